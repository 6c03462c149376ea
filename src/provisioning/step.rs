use serde::Serialize;

use super::stage::ProvisioningStage;
use crate::protocol::EndpointId;

/// One credential write in the provisioning exchange, in firmware order.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    #[strum(to_string = "Wi-Fi credentials")]
    WifiCredentials,
    #[strum(to_string = "backend configuration")]
    BackendConfig,
    #[strum(to_string = "user identity")]
    UserIdentity,
}

impl ProvisioningStep {
    /// Characteristic this step writes.
    #[must_use]
    pub fn endpoint(self) -> EndpointId {
        match self {
            Self::WifiCredentials => EndpointId::WifiCharacteristic,
            Self::BackendConfig => EndpointId::BackendCharacteristic,
            Self::UserIdentity => EndpointId::IdentityCharacteristic,
        }
    }

    /// Stage whose arrival ends the wait after this step's write.
    ///
    /// The identity step waits for completion rather than its own acknowledgement.
    #[must_use]
    pub fn ack_stage(self) -> ProvisioningStage {
        match self {
            Self::WifiCredentials => ProvisioningStage::WifiSent,
            Self::BackendConfig => ProvisioningStage::BackendConfigSent,
            Self::UserIdentity => ProvisioningStage::Complete,
        }
    }

    /// Returns whether this write triggers the fountain to persist and restart.
    #[must_use]
    pub fn is_final(self) -> bool {
        self == Self::UserIdentity
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn steps_run_in_firmware_order() {
        let endpoints: Vec<EndpointId> = ProvisioningStep::iter()
            .map(ProvisioningStep::endpoint)
            .collect();
        assert_eq!(
            vec![
                EndpointId::WifiCharacteristic,
                EndpointId::BackendCharacteristic,
                EndpointId::IdentityCharacteristic,
            ],
            endpoints
        );
    }

    #[test]
    fn only_identity_is_final() {
        let finals: Vec<ProvisioningStep> =
            ProvisioningStep::iter().filter(|step| step.is_final()).collect();
        assert_eq!(vec![ProvisioningStep::UserIdentity], finals);
    }
}
