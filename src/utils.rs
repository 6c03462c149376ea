use crate::hw::UNKNOWN_SIGNAL_STRENGTH;

/// Formats bytes as uppercase hexadecimal pairs separated by spaces.
pub(crate) fn format_hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "<empty>".to_string();
    }

    bytes
        .iter()
        .map(|value| format!("{value:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats a fountain signal strength, treating the sentinel as unknown.
pub(crate) fn format_signal_strength(dbm: i16) -> String {
    if dbm == UNKNOWN_SIGNAL_STRENGTH {
        "unknown".to_string()
    } else {
        format!("{dbm} dBm")
    }
}

/// Formats an optional advertisement RSSI.
pub(crate) fn format_rssi(rssi: Option<i16>) -> String {
    rssi.map_or_else(|| "-".to_string(), format_signal_strength)
}
