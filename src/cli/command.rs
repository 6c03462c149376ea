use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::provision::ProvisionArgs;
use crate::cli::scan::ScanArgs;
use crate::codec::WireEncoding;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, FakeScript, ScanFixture};
use crate::protocol::FOUNTAIN_NAME_PREFIX;
use crate::terminal::TerminalClient;

/// Command-line options for the fountain provisioning tool.
#[derive(Debug, Parser)]
#[command(
    name = "fountain-provision",
    about = "Find pet fountains over Bluetooth LE and send them Wi-Fi and account credentials."
)]
pub struct Args {
    /// Log verbosity; overrides `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output_format: Option<OutputFormat>,
    /// Advertised local-name prefix identifying fountains.
    #[arg(long, global = true, default_value = FOUNTAIN_NAME_PREFIX)]
    name_prefix: String,
    /// Encoding of characteristic values on the wire.
    #[arg(long, global = true, value_enum, default_value_t = WireEncoding::Utf8)]
    wire_encoding: WireEncoding,
    /// Uses the fake BLE backend with a scripted fountain.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `device_id|local_name|rssi;...` (`-` for none).
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// How the fake fountain reacts to the provisioning exchange.
    #[arg(long, global = true, requires = "fake", value_enum)]
    fake_script: Option<FakeScript>,
    /// Delay before the fake fountain acknowledges a write (e.g. `50ms`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_ack_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use fountain_provision::{Args, Command, ScanArgs};
    ///
    /// let scan = Args::new(Command::Scan(ScanArgs::default()));
    /// let _ = scan;
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output_format: None,
            name_prefix: FOUNTAIN_NAME_PREFIX.to_string(),
            wire_encoding: WireEncoding::default(),
            fake: false,
            fake_scan: None,
            fake_script: None,
            fake_ack_delay: None,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            scan_fixture,
            script,
            ack_delay,
        } = fake;

        self.fake = true;
        self.fake_scan = Some(scan_fixture);
        self.fake_script = Some(script);
        self.fake_ack_delay = ack_delay;
        self
    }

    /// Returns the requested log-level override.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the global options shared by every command.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            log_level: self.log_level,
            output_format: self.output_format,
            name_prefix: self.name_prefix.clone(),
            wire_encoding: self.wire_encoding,
        }
    }

    /// Splits parsed CLI arguments into command and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_scan,
            fake_script,
            fake_ack_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(CliConfigError::MissingFakeScanFixture.into());
            };
            Some(FakeArgs {
                scan_fixture,
                script: fake_script.unwrap_or_default(),
                ack_delay: fake_ack_delay,
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Global options resolved from the command line.
#[derive(Debug, Clone, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    output_format: Option<OutputFormat>,
    #[builder(into, default = FOUNTAIN_NAME_PREFIX.to_string())]
    name_prefix: String,
    #[builder(default)]
    wire_encoding: WireEncoding,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunOptions {
    /// Returns the log-level override, if any.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Returns the fountain name prefix.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Returns the wire encoding of characteristic values.
    #[must_use]
    pub fn wire_encoding(&self) -> WireEncoding {
        self.wire_encoding
    }

    pub(crate) fn output_format(&self, terminal_client: &dyn TerminalClient) -> OutputFormat {
        self.output_format.unwrap_or(if terminal_client.stdout_is_terminal() {
            OutputFormat::Pretty
        } else {
            OutputFormat::Json
        })
    }
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Output rendering accepted by `--output-format`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Coloured tables for people.
    Pretty,
    /// JSON documents for scripts.
    Json,
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(default)]
    script: FakeScript,
    ack_delay: Option<Duration>,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self, encoding: WireEncoding) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            script,
            ack_delay,
        } = self;

        FakeBackendConfig::builder()
            .advertisements(scan_fixture.into())
            .script(script)
            .maybe_ack_delay(ack_delay)
            .encoding(encoding)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan for advertising fountains and list them.
    Scan(ScanArgs),
    /// Connect to a fountain and send it Wi-Fi, backend and account credentials.
    Provision(ProvisionArgs),
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
