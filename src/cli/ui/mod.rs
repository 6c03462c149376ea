use std::io;

use anyhow::Result;
use serde::Serialize;

mod painter;
mod provision_view;
mod scan_view;
mod table;

pub(crate) use self::painter::Painter;
pub(crate) use self::provision_view::{ProvisionEventView, ProvisioningReportView};
pub(crate) use self::scan_view::ScanSummaryView;

/// Writes one pretty-printed JSON document followed by a newline.
pub(crate) fn write_json(out: &mut impl io::Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
