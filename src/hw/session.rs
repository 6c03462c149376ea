use tracing::instrument;
use uuid::Uuid;

use super::model::{CharacteristicInfo, ServiceInfo};
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId, EndpointKind};

/// Capability a characteristic must expose for the provisioning exchange.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum RequiredCapability {
    Write,
    Notify,
}

fn required_capability(endpoint: EndpointId) -> Option<RequiredCapability> {
    match endpoint {
        EndpointId::ProvisioningService => None,
        EndpointId::WifiCharacteristic
        | EndpointId::BackendCharacteristic
        | EndpointId::IdentityCharacteristic => Some(RequiredCapability::Write),
        EndpointId::StatusCharacteristic => Some(RequiredCapability::Notify),
    }
}

/// Verifies a freshly enumerated GATT table exposes the provisioning profile.
///
/// # Errors
///
/// Returns an error listing every endpoint that is absent or lacks the capability
/// the exchange relies on.
#[instrument(skip(services), level = "debug", fields(service_count = services.len()))]
pub(crate) fn verify_session_endpoints(services: &[ServiceInfo]) -> Result<(), InteractionError> {
    let service_uuid = protocol::endpoint_metadata(EndpointId::ProvisioningService).uuid();
    let Some(service) = find_service(services, service_uuid) else {
        return Err(InteractionError::MissingRequiredEndpoints {
            missing: format_missing_endpoints(protocol::known_endpoints()),
        });
    };

    let missing: Vec<EndpointId> = protocol::known_endpoints()
        .filter(|endpoint| {
            protocol::endpoint_metadata(*endpoint).kind() == EndpointKind::Characteristic
        })
        .filter(|endpoint| !endpoint_is_usable(service, *endpoint))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    Err(InteractionError::MissingRequiredEndpoints {
        missing: format_missing_endpoints(missing),
    })
}

fn endpoint_is_usable(service: &ServiceInfo, endpoint: EndpointId) -> bool {
    let uuid = protocol::endpoint_metadata(endpoint).uuid();
    let Some(characteristic) = find_characteristic(service, uuid) else {
        return false;
    };

    match required_capability(endpoint) {
        Some(RequiredCapability::Write) => supports_write(characteristic),
        Some(RequiredCapability::Notify) => supports_notify(characteristic),
        None => true,
    }
}

fn find_service(services: &[ServiceInfo], uuid: Uuid) -> Option<&ServiceInfo> {
    services.iter().find(|service| service.uuid() == uuid)
}

fn find_characteristic(service: &ServiceInfo, uuid: Uuid) -> Option<&CharacteristicInfo> {
    service
        .characteristics()
        .iter()
        .find(|characteristic| characteristic.uuid() == uuid)
}

fn supports_write(characteristic: &CharacteristicInfo) -> bool {
    characteristic.has_property("write")
}

fn supports_notify(characteristic: &CharacteristicInfo) -> bool {
    characteristic.has_property("notify") || characteristic.has_property("indicate")
}

fn format_missing_endpoints(endpoints: impl IntoIterator<Item = EndpointId>) -> String {
    endpoints
        .into_iter()
        .map(|endpoint| {
            let metadata = protocol::endpoint_metadata(endpoint);
            format!("{} ({})", metadata.name(), metadata.uuid())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use rstest::rstest;

    use super::*;

    fn characteristic(endpoint: EndpointId, properties: &[&str]) -> CharacteristicInfo {
        CharacteristicInfo::new(
            protocol::endpoint_metadata(endpoint).uuid(),
            properties
                .iter()
                .map(|property| (*property).to_string())
                .collect(),
        )
    }

    fn provisioning_service(characteristics: Vec<CharacteristicInfo>) -> Vec<ServiceInfo> {
        vec![ServiceInfo::new(
            protocol::endpoint_metadata(EndpointId::ProvisioningService).uuid(),
            characteristics,
        )]
    }

    fn complete_profile() -> Vec<CharacteristicInfo> {
        vec![
            characteristic(EndpointId::WifiCharacteristic, &["write"]),
            characteristic(EndpointId::BackendCharacteristic, &["write"]),
            characteristic(EndpointId::IdentityCharacteristic, &["write"]),
            characteristic(EndpointId::StatusCharacteristic, &["read", "notify"]),
        ]
    }

    #[test]
    fn complete_profile_verifies() {
        let services = provisioning_service(complete_profile());
        assert_matches!(verify_session_endpoints(&services), Ok(()));
    }

    #[test]
    fn missing_service_reports_every_endpoint() {
        let error = verify_session_endpoints(&[]).expect_err("empty GATT table should fail");
        assert_matches!(
            error,
            InteractionError::MissingRequiredEndpoints { missing }
            if missing.contains("fountain provisioning service")
                && missing.contains("provisioning status")
        );
    }

    #[rstest]
    #[case::status_without_notify(
        vec![
            characteristic(EndpointId::WifiCharacteristic, &["write"]),
            characteristic(EndpointId::BackendCharacteristic, &["write"]),
            characteristic(EndpointId::IdentityCharacteristic, &["write"]),
            characteristic(EndpointId::StatusCharacteristic, &["read"]),
        ],
        "provisioning status"
    )]
    #[case::identity_missing(
        vec![
            characteristic(EndpointId::WifiCharacteristic, &["write"]),
            characteristic(EndpointId::BackendCharacteristic, &["write"]),
            characteristic(EndpointId::StatusCharacteristic, &["notify"]),
        ],
        "user identity"
    )]
    #[case::wifi_read_only(
        vec![
            characteristic(EndpointId::WifiCharacteristic, &["read"]),
            characteristic(EndpointId::BackendCharacteristic, &["write"]),
            characteristic(EndpointId::IdentityCharacteristic, &["write"]),
            characteristic(EndpointId::StatusCharacteristic, &["indicate"]),
        ],
        "wifi credentials"
    )]
    fn incomplete_profiles_name_the_missing_endpoint(
        #[case] characteristics: Vec<CharacteristicInfo>,
        #[case] expected_fragment: &str,
    ) {
        let services = provisioning_service(characteristics);
        let error = verify_session_endpoints(&services).expect_err("profile should be rejected");

        assert_matches!(
            error,
            InteractionError::MissingRequiredEndpoints { missing }
            if missing.contains(expected_fragment)
        );
    }
}
