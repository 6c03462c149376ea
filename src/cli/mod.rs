pub(crate) mod command;
pub(crate) mod provision;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat, RunOptions};
pub use self::provision::ProvisionArgs;
pub use self::scan::ScanArgs;
