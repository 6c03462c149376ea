use std::collections::HashMap;
use std::sync::LazyLock;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

/// Local-name prefix advertised by unprovisioned fountains.
pub const FOUNTAIN_NAME_PREFIX: &str = "PetFountain";

/// ATT MTU requested before credentials are written.
pub(crate) const REQUESTED_ATT_MTU: u16 = 512;

/// Known fountain provisioning endpoints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum EndpointId {
    /// Provisioning GATT service.
    #[strum(to_string = "provisioning_service")]
    ProvisioningService,
    /// Write-only characteristic accepting `{ssid, password}`.
    #[strum(to_string = "wifi_characteristic")]
    WifiCharacteristic,
    /// Write-only characteristic accepting `{url, anon_key}`.
    #[strum(to_string = "backend_characteristic")]
    BackendCharacteristic,
    /// Write-only characteristic accepting `{user_id, household_id}`.
    ///
    /// Writing it makes the fountain persist its configuration and restart.
    #[strum(to_string = "identity_characteristic")]
    IdentityCharacteristic,
    /// Notify-only characteristic carrying status strings.
    #[strum(to_string = "status_characteristic")]
    StatusCharacteristic,
}

/// Endpoint category in GATT.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display)]
pub(crate) enum EndpointKind {
    #[strum(to_string = "service")]
    Service,
    #[strum(to_string = "characteristic")]
    Characteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    uuid: Uuid,
    kind: EndpointKind,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Endpoint UUID.
    pub(crate) fn uuid(self) -> Uuid {
        self.uuid
    }

    /// Endpoint kind.
    pub(crate) fn kind(self) -> EndpointKind {
        self.kind
    }
}

/// Endpoint metadata keyed by typed endpoint IDs.
static ENDPOINTS_BY_ID: LazyLock<HashMap<EndpointId, EndpointMetadata>> = LazyLock::new(|| {
    EndpointId::iter()
        .map(|endpoint| (endpoint, metadata_for(endpoint)))
        .collect()
});

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    *ENDPOINTS_BY_ID
        .get(&endpoint)
        .unwrap_or(&metadata_for(endpoint))
}

/// Returns all known endpoints.
pub(crate) fn known_endpoints() -> impl Iterator<Item = EndpointId> {
    EndpointId::iter()
}

/// Resolves a UUID back to its endpoint, if it is one of ours.
pub(crate) fn endpoint_for_uuid(uuid: Uuid) -> Option<EndpointId> {
    known_endpoints().find(|endpoint| endpoint_metadata(*endpoint).uuid() == uuid)
}

fn metadata_for(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::ProvisioningService => EndpointMetadata {
            name: "fountain provisioning service",
            uuid: Uuid::from_u128(0x4faf_c201_1fb5_459e_8fcc_c5c9_c331_914b),
            kind: EndpointKind::Service,
        },
        EndpointId::WifiCharacteristic => EndpointMetadata {
            name: "wifi credentials",
            uuid: Uuid::from_u128(0xbeb5_483e_36e1_4688_b7f5_ea07_361b_26a8),
            kind: EndpointKind::Characteristic,
        },
        EndpointId::BackendCharacteristic => EndpointMetadata {
            name: "backend config",
            uuid: Uuid::from_u128(0x1c95_d5e3_d8f7_413a_bf3d_7a2e_5d7b_e87e),
            kind: EndpointKind::Characteristic,
        },
        EndpointId::IdentityCharacteristic => EndpointMetadata {
            name: "user identity",
            uuid: Uuid::from_u128(0xa3c8_7500_8ed3_4bdf_8a39_a01b_ebed_e295),
            kind: EndpointKind::Characteristic,
        },
        EndpointId::StatusCharacteristic => EndpointMetadata {
            name: "provisioning status",
            uuid: Uuid::from_u128(0xd591_3036_2d8a_41ee_85b9_4e36_1aa5_c8a7),
            kind: EndpointKind::Characteristic,
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn endpoint_metadata_contains_expected_names() {
        let service = endpoint_metadata(EndpointId::ProvisioningService);
        assert_eq!("fountain provisioning service", service.name());
        assert_eq!(EndpointKind::Service, service.kind());

        let status = endpoint_metadata(EndpointId::StatusCharacteristic);
        assert_eq!("provisioning status", status.name());
        assert_eq!(EndpointKind::Characteristic, status.kind());
    }

    #[rstest]
    #[case(EndpointId::WifiCharacteristic, "beb5483e-36e1-4688-b7f5-ea07361b26a8")]
    #[case(EndpointId::StatusCharacteristic, "d5913036-2d8a-41ee-85b9-4e361aa5c8a7")]
    fn endpoint_uuids_render_canonically(#[case] endpoint: EndpointId, #[case] expected: &str) {
        assert_eq!(expected, endpoint_metadata(endpoint).uuid().to_string());
    }

    #[test]
    fn endpoint_for_uuid_round_trips_every_endpoint() {
        for endpoint in known_endpoints() {
            let uuid = endpoint_metadata(endpoint).uuid();
            assert_eq!(Some(endpoint), endpoint_for_uuid(uuid));
        }
    }
}
