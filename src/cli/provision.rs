use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::pin;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::{RunOptions, parse_duration};
use crate::commissioner::Commissioner;
use crate::config::{CredentialsFile, ProvisioningConfig};
use crate::error::{CredentialsError, ProvisioningError};
use crate::hw::TransportBackend;
use crate::provisioning::{
    DeviceCredentials, ProvisioningObserver, ProvisioningReport, ProvisioningStage,
};
use crate::terminal::TerminalClient;

use super::ui::{Painter, ProvisionEventView, ProvisioningReportView, write_json};

const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_OUTER_TIMEOUT: Duration = Duration::from_secs(15);

/// Arguments for the `provision` command.
#[derive(Debug, Clone, clap::Args)]
pub struct ProvisionArgs {
    /// Fountain address to connect to. Scans for the first fountain when omitted.
    #[arg(long)]
    device_id: Option<String>,
    /// JSON credentials file. Defaults to the platform config directory.
    #[arg(long)]
    credentials_file: Option<PathBuf>,
    #[command(flatten)]
    overrides: CredentialsFile,
    /// Scan window when no device id is given.
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    scan_duration: Duration,
    /// Fallback timer around the whole attempt.
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    outer_timeout: Duration,
}

impl ProvisionArgs {
    /// Creates provision arguments with default timings.
    ///
    /// `overrides` take precedence over the credentials file.
    #[must_use]
    pub fn new(device_id: Option<String>, overrides: CredentialsFile) -> Self {
        Self {
            device_id,
            credentials_file: None,
            overrides,
            scan_duration: DEFAULT_SCAN_DURATION,
            outer_timeout: DEFAULT_OUTER_TIMEOUT,
        }
    }

    /// Reads credentials from `path` instead of the default location.
    #[must_use]
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Overrides the fallback timer.
    #[must_use]
    pub fn with_outer_timeout(mut self, outer_timeout: Duration) -> Self {
        self.outer_timeout = outer_timeout;
        self
    }

    fn resolve_credentials(&self) -> Result<DeviceCredentials, CredentialsError> {
        let file = match &self.credentials_file {
            Some(path) => CredentialsFile::load(path)?,
            None => CredentialsFile::load_default()?,
        };
        self.overrides.clone().or(file).into_credentials()
    }

    fn config(&self, options: &RunOptions) -> ProvisioningConfig {
        ProvisioningConfig::builder()
            .name_prefix(options.name_prefix())
            .encoding(options.wire_encoding())
            .scan_duration(self.scan_duration)
            .outer_timeout(self.outer_timeout)
            .build()
    }
}

/// Something the fountain or the state machine reported during an attempt.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum ProvisionEvent {
    Status {
        stage: ProvisioningStage,
        message: String,
    },
    Failed {
        message: String,
    },
}

/// Forwards observer callbacks to the command loop.
struct ChannelObserver {
    events: mpsc::UnboundedSender<ProvisionEvent>,
}

impl ProvisioningObserver for ChannelObserver {
    fn on_status_update(&self, stage: ProvisioningStage, message: &str) {
        // The receiver outlives the attempt; a closed channel only means output stopped.
        let _ = self.events.send(ProvisionEvent::Status {
            stage,
            message: message.to_string(),
        });
    }

    fn on_error(&self, error: &ProvisioningError) {
        let _ = self.events.send(ProvisionEvent::Failed {
            message: error.to_string(),
        });
    }
}

#[derive(Debug, Serialize)]
struct ProvisionOutput<'a> {
    events: &'a [ProvisionEvent],
    report: Option<&'a ProvisioningReport>,
}

/// Executes the `provision` command.
#[instrument(
    skip(backend, args, options, out, terminal_client),
    level = "info",
    fields(device_id = ?args.device_id)
)]
pub(crate) async fn run<W>(
    backend: Arc<dyn TransportBackend>,
    args: &ProvisionArgs,
    options: &RunOptions,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    let output_format = options.output_format(terminal_client);
    let painter = Painter::new(terminal_client.stdout_is_terminal());
    let credentials = args.resolve_credentials()?;
    let commissioner = Commissioner::new(backend, args.config(options));

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let observer: Arc<dyn ProvisioningObserver> = Arc::new(ChannelObserver { events: sender });
    let mut events = Vec::new();

    let result = {
        let attempt = async {
            match args.device_id.as_deref() {
                Some(device_id) => {
                    commissioner
                        .commission(device_id, credentials, observer)
                        .await
                }
                None => commissioner.commission_first(credentials, observer).await,
            }
        };
        pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => break result,
                Some(event) = receiver.recv() => {
                    emit(out, output_format, &painter, event, &mut events)?;
                }
            }
        }
    };
    while let Ok(event) = receiver.try_recv() {
        emit(out, output_format, &painter, event, &mut events)?;
    }

    match output_format {
        OutputFormat::Pretty => {
            if let Ok(report) = &result {
                writeln!(out, "{}", ProvisioningReportView::new(report, &painter))?;
            }
        }
        OutputFormat::Json => write_json(
            out,
            &ProvisionOutput {
                events: &events,
                report: result.as_ref().ok(),
            },
        )?,
    }

    result?;
    Ok(())
}

fn emit<W>(
    out: &mut W,
    output_format: OutputFormat,
    painter: &Painter,
    event: ProvisionEvent,
    events: &mut Vec<ProvisionEvent>,
) -> io::Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => writeln!(out, "{}", ProvisionEventView::new(&event, painter)),
        OutputFormat::Json => {
            events.push(event);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn overrides_fill_in_over_credentials_file() {
        let path = std::env::temp_dir().join(format!(
            "fountain-provision-args-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"wifi_ssid":"home","wifi_password":"secret","backend_url":"https://api.example.test","backend_key":"anon","user_id":"user-1","household_id":"house-1"}"#,
        )
        .expect("temp file should be writable");

        let args = ProvisionArgs::new(
            None,
            CredentialsFile {
                wifi_ssid: Some("office".to_string()),
                ..CredentialsFile::default()
            },
        )
        .with_credentials_file(&path);
        let credentials = args.resolve_credentials();
        std::fs::remove_file(&path).expect("temp file should be removable");

        let credentials = credentials.expect("credentials should resolve");
        assert_eq!("office", credentials.wifi_ssid());
        assert_eq!("user-1", credentials.user_id());
    }

    #[test]
    fn config_carries_global_options() {
        let options = RunOptions::builder().name_prefix("Fountain").build();
        let args = ProvisionArgs::new(None, CredentialsFile::default())
            .with_outer_timeout(Duration::from_secs(30));

        let config = args.config(&options);
        assert_eq!("Fountain", config.name_prefix());
        assert_eq!(Duration::from_secs(30), config.outer_timeout());
        assert_eq!(DEFAULT_SCAN_DURATION, config.scan_duration());
    }

    #[test]
    fn events_serialise_with_tag() {
        let event = ProvisionEvent::Status {
            stage: ProvisioningStage::WifiSent,
            message: "Wi-Fi credentials received".to_string(),
        };
        let json = serde_json::to_value(&event).expect("event should serialise");
        assert_eq!(
            serde_json::json!({
                "event": "status",
                "stage": "wifi_sent",
                "message": "Wi-Fi credentials received",
            }),
            json
        );
    }
}
