use std::fmt::{self, Display, Formatter};

use crate::cli::provision::ProvisionEvent;
use crate::provisioning::{ProvisioningOutcome, ProvisioningReport};

use super::painter::Painter;
use super::table::Table;

/// Renders one progress line while an attempt runs.
pub(crate) struct ProvisionEventView<'a> {
    event: &'a ProvisionEvent,
    painter: &'a Painter,
}

impl<'a> ProvisionEventView<'a> {
    pub(crate) fn new(event: &'a ProvisionEvent, painter: &'a Painter) -> Self {
        Self { event, painter }
    }
}

impl Display for ProvisionEventView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.event {
            ProvisionEvent::Status { stage, message } => {
                let label = self.painter.muted(format!("[{stage}]"));
                let message = if stage.is_terminal() {
                    self.painter.success(message)
                } else {
                    self.painter.value(message)
                };
                write!(f, "{label} {message}")
            }
            ProvisionEvent::Failed { message } => write!(
                f,
                "{} {}",
                self.painter.muted("[error]"),
                self.painter.failure(message)
            ),
        }
    }
}

/// Renders the final report of an attempt.
pub(crate) struct ProvisioningReportView<'a> {
    report: &'a ProvisioningReport,
    painter: &'a Painter,
}

impl<'a> ProvisioningReportView<'a> {
    pub(crate) fn new(report: &'a ProvisioningReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }
}

impl Display for ProvisioningReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let outcome = self.report.outcome().to_string();
        let outcome = match self.report.outcome() {
            ProvisioningOutcome::Confirmed => self.painter.success(outcome),
            ProvisioningOutcome::Unconfirmed | ProvisioningOutcome::FallbackElapsed => {
                self.painter.warning(outcome)
            }
        };
        let last_stage = self
            .report
            .last_stage()
            .map_or_else(|| "<none>".to_string(), |stage| stage.to_string());

        let table = Table::key_value(
            self.painter,
            vec![
                ("device_id", self.painter.value(self.report.device_id())),
                ("outcome", outcome),
                ("last_stage", self.painter.value(last_stage)),
            ],
        );
        write!(f, "{}", self.painter.heading("Provisioning:"))?;
        write!(f, "\n{table}")
    }
}
