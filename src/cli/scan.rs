use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::pin;
use tracing::{instrument, trace};

use crate::cli::OutputFormat;
use crate::cli::command::{RunOptions, parse_duration};
use crate::discovery::{DeviceDiscovery, ScanSummary};
use crate::hw::{Advertisement, TransportBackend};
use crate::terminal::TerminalClient;

use super::ui::{Painter, ScanSummaryView, write_json};

const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Arguments for the `scan` command.
#[derive(Debug, Clone, clap::Args)]
pub struct ScanArgs {
    /// How long to scan (e.g. `5s`, `1m`).
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    duration: Duration,
    /// Also list every advertisement seen, not only fountains.
    #[arg(long)]
    show_all: bool,
}

impl Default for ScanArgs {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_DURATION, false)
    }
}

impl ScanArgs {
    /// Creates scan arguments.
    #[must_use]
    pub fn new(duration: Duration, show_all: bool) -> Self {
        Self { duration, show_all }
    }
}

#[derive(Debug, Serialize)]
struct ScanOutput<'a> {
    #[serde(flatten)]
    summary: &'a ScanSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    advertisements: Option<&'a [Advertisement]>,
}

/// Executes the `scan` command.
#[instrument(
    skip(backend, options, out, terminal_client),
    level = "info",
    fields(duration = ?args.duration, show_all = args.show_all)
)]
pub(crate) async fn run<W>(
    backend: Arc<dyn TransportBackend>,
    args: &ScanArgs,
    options: &RunOptions,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
) -> Result<()>
where
    W: io::Write,
{
    let discovery = DeviceDiscovery::new(backend, options.name_prefix());
    let mut advertisements = Vec::new();

    let summary = {
        let scan = discovery.scan_with_diagnostics(
            args.duration,
            |device| trace!(id = device.id(), "fountain reported"),
            |advertisement| {
                if args.show_all {
                    advertisements.push(advertisement.clone());
                }
            },
        );
        pin!(scan);
        tokio::select! {
            summary = &mut scan => summary,
            _ = tokio::signal::ctrl_c() => {
                discovery.stop();
                (&mut scan).await
            }
        }
    };

    let advertisements = args.show_all.then_some(advertisements.as_slice());
    match options.output_format(terminal_client) {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(
                out,
                "{}",
                ScanSummaryView::new(&summary, advertisements, &painter)
            )?;
        }
        OutputFormat::Json => write_json(
            out,
            &ScanOutput {
                summary: &summary,
                advertisements,
            },
        )?,
    }

    Ok(())
}
