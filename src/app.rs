use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, RunOptions};
use crate::codec::WireEncoding;
use crate::hw::{TransportBackend, fake_transport_backend};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

const SERVICE_NAME: &str = "fountain-provision";

/// Creates a transport backend driven by parsed `--fake-*` arguments.
#[must_use]
pub fn fake_transport_backend_from_args(
    fake_args: FakeArgs,
    encoding: WireEncoding,
) -> Arc<dyn TransportBackend> {
    fake_transport_backend(fake_args.into_backend_config(encoding))
}

/// Runs a CLI command against `backend`, writing results to `out`.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = fountain_provision::Args::try_parse_from([
///     "fountain-provision",
///     "--fake",
///     "--fake-scan",
///     "AA:BB:CC|PetFountain-01|-43",
///     "scan",
///     "--duration",
///     "1s",
/// ])?;
/// let options = args.run_options();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let backend = match maybe_fake_args {
///     Some(fake_args) => {
///         fountain_provision::fake_transport_backend_from_args(fake_args, options.wire_encoding())
///     }
///     None => fountain_provision::real_transport_backend(),
/// };
/// let mut out = Vec::new();
/// fountain_provision::run(command, &options, &mut out, backend).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or output
/// writing fails.
pub async fn run<W>(
    command: Command,
    options: &RunOptions,
    out: &mut W,
    backend: Arc<dyn TransportBackend>,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, options, out, &SystemTerminalClient, backend).await
}

/// Runs a CLI command with an injected terminal client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use std::time::Duration;
///
/// use fountain_provision::{Command, FakeBackendConfig, RunOptions, ScanArgs};
///
/// struct PipedTerminal;
/// impl fountain_provision::TerminalClient for PipedTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let backend = fountain_provision::fake_transport_backend(FakeBackendConfig::builder().build());
/// let command = Command::Scan(ScanArgs::new(Duration::from_millis(200), false));
/// let mut out = Vec::new();
/// fountain_provision::run_with_clients(
///     command,
///     &RunOptions::default(),
///     &mut out,
///     &PipedTerminal,
///     backend,
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command fails, or output
/// writing fails.
#[instrument(
    skip(options, out, terminal_client, backend),
    level = "info",
    fields(command = %command_name(&command), log_level = ?options.log_level())
)]
pub async fn run_with_clients<W>(
    command: Command,
    options: &RunOptions,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    backend: Arc<dyn TransportBackend>,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        SERVICE_NAME,
        terminal_client.stderr_is_terminal(),
        options.log_level().map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Scan(args) => {
            crate::cli::scan::run(backend, &args, options, out, terminal_client).await
        }
        Command::Provision(args) => {
            crate::cli::provision::run(backend, &args, options, out, terminal_client).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Scan(_args) => "scan",
        Command::Provision(_args) => "provision",
    }
}
