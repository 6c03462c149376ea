use serde::Serialize;
use thiserror::Error;

/// Provisioning progress as reported by the fountain.
///
/// Ordered: a stage compares greater than every stage the fountain passes through
/// before it.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    #[strum(to_string = "connected")]
    Connected,
    #[strum(to_string = "wifi_sent")]
    WifiSent,
    #[strum(to_string = "backend_config_sent")]
    BackendConfigSent,
    #[strum(to_string = "user_identity_sent")]
    UserIdentitySent,
    #[strum(to_string = "complete")]
    Complete,
}

/// A status string the fountain sent that maps to no known stage.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("unknown fountain status `{status}`")]
pub struct UnknownStatus {
    status: String,
}

impl UnknownStatus {
    /// Returns the unrecognised status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }
}

impl ProvisioningStage {
    /// Maps one status notification onto a stage.
    ///
    /// Surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStatus`] for any value the fountain firmware does not define.
    ///
    /// ```
    /// use fountain_provision::ProvisioningStage;
    ///
    /// assert_eq!(
    ///     Ok(ProvisioningStage::WifiSent),
    ///     ProvisioningStage::from_status("wifi_received")
    /// );
    /// assert!(ProvisioningStage::from_status("rebooting").is_err());
    /// ```
    pub fn from_status(status: &str) -> Result<Self, UnknownStatus> {
        match status.trim() {
            "connected" | "firmware_connected" => Ok(Self::Connected),
            "wifi_received" => Ok(Self::WifiSent),
            "supabase_received" => Ok(Self::BackendConfigSent),
            "user_received" => Ok(Self::UserIdentitySent),
            "provisioning_complete" => Ok(Self::Complete),
            other => Err(UnknownStatus {
                status: other.to_string(),
            }),
        }
    }

    /// Canonical status string the fountain sends for this stage.
    #[must_use]
    pub fn wire_status(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::WifiSent => "wifi_received",
            Self::BackendConfigSent => "supabase_received",
            Self::UserIdentitySent => "user_received",
            Self::Complete => "provisioning_complete",
        }
    }

    /// Short progress message suitable for showing to a user.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::Connected => "Connected to fountain",
            Self::WifiSent => "Fountain received Wi-Fi credentials",
            Self::BackendConfigSent => "Fountain received backend configuration",
            Self::UserIdentitySent => "Fountain received account details",
            Self::Complete => "Provisioning complete, fountain is restarting",
        }
    }

    /// Returns whether this is the terminal stage.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Complete
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use strum::IntoEnumIterator;

    use super::*;

    #[rstest]
    #[case("connected", ProvisioningStage::Connected)]
    #[case("firmware_connected", ProvisioningStage::Connected)]
    #[case("wifi_received", ProvisioningStage::WifiSent)]
    #[case("supabase_received", ProvisioningStage::BackendConfigSent)]
    #[case("user_received", ProvisioningStage::UserIdentitySent)]
    #[case("provisioning_complete", ProvisioningStage::Complete)]
    #[case(" provisioning_complete\n", ProvisioningStage::Complete)]
    fn known_statuses_map_to_stages(#[case] status: &str, #[case] expected: ProvisioningStage) {
        assert_eq!(Ok(expected), ProvisioningStage::from_status(status));
    }

    #[rstest]
    #[case("")]
    #[case("WIFI_RECEIVED")]
    #[case("rebooting")]
    fn unknown_statuses_are_distinguishable(#[case] status: &str) {
        assert_matches!(
            ProvisioningStage::from_status(status),
            Err(unknown) if unknown.status() == status.trim()
        );
    }

    #[test]
    fn stages_are_ordered_by_progress() {
        assert!(ProvisioningStage::Connected < ProvisioningStage::WifiSent);
        assert!(ProvisioningStage::WifiSent < ProvisioningStage::BackendConfigSent);
        assert!(ProvisioningStage::BackendConfigSent < ProvisioningStage::UserIdentitySent);
        assert!(ProvisioningStage::UserIdentitySent < ProvisioningStage::Complete);
    }

    #[test]
    fn wire_status_parses_back_to_the_same_stage() {
        for stage in ProvisioningStage::iter() {
            assert_eq!(Ok(stage), ProvisioningStage::from_status(stage.wire_status()));
        }
    }
}
