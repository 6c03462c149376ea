use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::info;

use super::btleplug_backend::BtleplugBackend;
use super::fake_backend::{FakeBackend, FakeBackendConfig};
use super::model::{Advertisement, RadioState, ServiceInfo};
use crate::error::InteractionError;
use crate::protocol::EndpointId;

/// Stream of advertisements produced while a scan is running.
pub type AdvertisementStream =
    Pin<Box<dyn Stream<Item = Result<Advertisement, InteractionError>> + Send>>;

/// Stream of raw notification payloads for one characteristic.
pub type NotificationStream = Pin<Box<dyn Stream<Item = Vec<u8>> + Send>>;

/// Platform BLE stack seen from the provisioning client.
///
/// Implementations are injected into the transport adapter and discovery so tests
/// can substitute a scripted fountain.
#[async_trait]
pub trait TransportBackend: Send + Sync + fmt::Debug {
    /// Reports whether the radio can be used right now.
    async fn radio_state(&self) -> Result<RadioState, InteractionError>;

    /// Starts scanning and returns the advertisement feed.
    async fn start_scan(&self) -> Result<AdvertisementStream, InteractionError>;

    /// Stops any running scan.
    async fn stop_scan(&self) -> Result<(), InteractionError>;

    /// Cancels a pending or stale connection to `device_id`.
    async fn cancel_connection(&self, device_id: &str) -> Result<(), InteractionError>;

    /// Opens a fresh connection to `device_id`.
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, InteractionError>;
}

/// One established GATT connection.
#[async_trait]
pub trait GattLink: Send + Sync + fmt::Debug {
    /// Returns the transport-level device identifier.
    fn device_id(&self) -> &str;

    /// Reports whether the link is still up.
    async fn is_connected(&self) -> Result<bool, InteractionError>;

    /// Enumerates services and characteristics from the peripheral, bypassing caches.
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, InteractionError>;

    /// Requests a larger ATT MTU and returns the negotiated value.
    async fn request_mtu(&self, mtu: u16) -> Result<u16, InteractionError>;

    /// Writes one characteristic value with response.
    async fn write(&self, endpoint: EndpointId, payload: &[u8]) -> Result<(), InteractionError>;

    /// Enables notifications and returns the payload feed for `endpoint`.
    async fn subscribe(&self, endpoint: EndpointId)
    -> Result<NotificationStream, InteractionError>;

    /// Disables notifications for `endpoint`.
    async fn unsubscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    /// Tears the connection down.
    async fn disconnect(&self) -> Result<(), InteractionError>;
}

/// Builds the backend backed by the host Bluetooth stack.
#[must_use]
pub fn real_transport_backend() -> Arc<dyn TransportBackend> {
    Arc::new(BtleplugBackend::new())
}

/// Builds the scripted fake backend.
#[must_use]
pub fn fake_transport_backend(config: FakeBackendConfig) -> Arc<dyn TransportBackend> {
    info!("using fake BLE backend");
    Arc::new(FakeBackend::new(config))
}
