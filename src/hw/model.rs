use serde::Serialize;
use uuid::Uuid;

/// Signal strength reported when an advertisement carries no RSSI.
pub(crate) const UNKNOWN_SIGNAL_STRENGTH: i16 = -127;

/// One raw advertisement observed during a scan.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Advertisement {
    id: String,
    local_name: Option<String>,
    rssi: Option<i16>,
    services: Vec<Uuid>,
}

impl Advertisement {
    /// Creates an advertisement record.
    #[must_use]
    pub fn new(id: impl Into<String>, local_name: Option<String>, rssi: Option<i16>) -> Self {
        Self {
            id: id.into(),
            local_name,
            rssi,
            services: Vec::new(),
        }
    }

    /// Attaches the advertised service UUIDs.
    #[must_use]
    pub fn with_services(mut self, services: Vec<Uuid>) -> Self {
        self.services = services;
        self
    }

    /// Returns the transport-level identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the RSSI, if the platform reported one.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }

    /// Returns advertised service UUIDs.
    #[must_use]
    pub fn services(&self) -> &[Uuid] {
        &self.services
    }
}

/// A fountain sighting reported by discovery.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScannedDevice {
    id: String,
    name: String,
    signal_strength: i16,
}

impl ScannedDevice {
    /// Creates a scanned-device record.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            signal_strength,
        }
    }

    /// Builds a sighting from an advertisement whose name passed the filter.
    pub(crate) fn from_advertisement(advertisement: &Advertisement, name: &str) -> Self {
        Self::new(
            advertisement.id(),
            name,
            advertisement.rssi().unwrap_or(UNKNOWN_SIGNAL_STRENGTH),
        )
    }

    /// Returns the transport-level address.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the signal strength in dBm.
    #[must_use]
    pub fn signal_strength(&self) -> i16 {
        self.signal_strength
    }
}

/// Bluetooth radio readiness reported by a backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, derive_more::Display)]
pub enum RadioState {
    #[display("ready")]
    Ready,
    #[display("powered_off")]
    PoweredOff,
    #[display("unauthorized")]
    Unauthorized,
    #[display("unavailable")]
    Unavailable,
}

/// A characteristic description discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: Uuid,
    properties: Vec<String>,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: Uuid, properties: Vec<String>) -> Self {
        Self { uuid, properties }
    }

    /// Returns the characteristic UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns property labels for this characteristic.
    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    pub(crate) fn has_property(&self, property: &str) -> bool {
        self.properties
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(property))
    }
}

/// A GATT service with discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: Uuid,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: Uuid, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns all characteristics in this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }
}
