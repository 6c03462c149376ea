use std::fmt::{self, Display, Formatter};

use crate::discovery::{ScanStopReason, ScanSummary};
use crate::hw::Advertisement;
use crate::utils::{format_rssi, format_signal_strength};

use super::painter::Painter;
use super::table::Table;

/// Renders the result of a `scan` run.
pub(crate) struct ScanSummaryView<'a> {
    summary: &'a ScanSummary,
    advertisements: Option<&'a [Advertisement]>,
    painter: &'a Painter,
}

impl<'a> ScanSummaryView<'a> {
    pub(crate) fn new(
        summary: &'a ScanSummary,
        advertisements: Option<&'a [Advertisement]>,
        painter: &'a Painter,
    ) -> Self {
        Self {
            summary,
            advertisements,
            painter,
        }
    }

    fn fountain_table(&self) -> Table {
        Table::grid(
            ["device_id", "name", "signal"],
            self.summary
                .found()
                .iter()
                .map(|device| {
                    vec![
                        self.painter.value(device.id()),
                        device.name().to_string(),
                        format_signal_strength(device.signal_strength()),
                    ]
                })
                .collect(),
        )
    }

    fn stop_reason(&self) -> String {
        let reason = self.summary.stop_reason().to_string();
        match self.summary.stop_reason() {
            ScanStopReason::TransportUnavailable => self.painter.failure(reason),
            ScanStopReason::WindowElapsed | ScanStopReason::Stopped => self.painter.value(reason),
        }
    }
}

impl Display for ScanSummaryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.heading("Fountains:"))?;
        let fountains = self.fountain_table();
        if fountains.is_empty() {
            write!(f, "\n{}", self.painter.warning("No fountains found"))?;
        } else {
            write!(f, "\n{fountains}")?;
        }

        if let Some(advertisements) = self.advertisements {
            let table = Table::grid(
                ["device_id", "local_name", "rssi", "services"],
                advertisements.iter().map(advertisement_row).collect(),
            );
            write!(f, "\n\n{}", self.painter.heading("All advertisements:"))?;
            write!(f, "\n{table}")?;
        }

        let session = Table::key_value(
            self.painter,
            vec![
                (
                    "advertisements_seen",
                    self.painter
                        .value(self.summary.advertisements_seen().to_string()),
                ),
                ("stop_reason", self.stop_reason()),
            ],
        );
        write!(f, "\n\n{}", self.painter.heading("Scan:"))?;
        write!(f, "\n{session}")
    }
}

fn advertisement_row(advertisement: &Advertisement) -> Vec<String> {
    vec![
        advertisement.id().to_string(),
        advertisement.local_name().unwrap_or("<unknown>").to_string(),
        format_rssi(advertisement.rssi()),
        advertisement.services().len().to_string(),
    ]
}
