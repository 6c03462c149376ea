use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{OnceCell, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument, trace};

use super::hardware::{AdvertisementStream, GattLink, NotificationStream, TransportBackend};
use super::model::{Advertisement, CharacteristicInfo, RadioState, ServiceInfo};
use crate::error::InteractionError;
use crate::protocol::{self, EndpointId};

const SCAN_CHANNEL_CAPACITY: usize = 64;

/// Hardware backend backed by `btleplug`.
#[derive(Debug, Default)]
pub(crate) struct BtleplugBackend {
    manager: OnceCell<Manager>,
}

impl BtleplugBackend {
    /// Creates the real BLE backend. The platform manager is opened on first use.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    async fn manager(&self) -> Result<&Manager, InteractionError> {
        self.manager
            .get_or_try_init(|| async { Ok(Manager::new().await?) })
            .await
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<Adapter>, InteractionError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }
        Ok(adapters)
    }

    #[instrument(skip(self), level = "debug")]
    async fn find_peripheral(&self, device_id: &str) -> Result<Peripheral, InteractionError> {
        for adapter in self.adapters().await? {
            for peripheral in adapter.peripherals().await? {
                if peripheral.id().to_string() == device_id {
                    return Ok(peripheral);
                }
            }
        }

        Err(InteractionError::DeviceNotFound {
            device_id: device_id.to_string(),
        })
    }
}

#[async_trait]
impl TransportBackend for BtleplugBackend {
    #[instrument(skip(self), level = "debug")]
    async fn radio_state(&self) -> Result<RadioState, InteractionError> {
        let adapters = match self.adapters().await {
            Ok(adapters) => adapters,
            Err(InteractionError::NoAdapters) => return Ok(RadioState::Unavailable),
            Err(InteractionError::Ble(btleplug::Error::PermissionDenied)) => {
                return Ok(RadioState::Unauthorized);
            }
            Err(error) => return Err(error),
        };

        let mut state = RadioState::Unavailable;
        for adapter in adapters {
            match adapter.adapter_state().await? {
                CentralState::PoweredOn => return Ok(RadioState::Ready),
                CentralState::PoweredOff => state = RadioState::PoweredOff,
                CentralState::Unknown => {}
            }
        }
        Ok(state)
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementStream, InteractionError> {
        let adapters = self.adapters().await?;
        let (sender, receiver) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        start_scans(&adapters, &sender).await?;

        Ok(Box::pin(ReceiverStream::new(receiver)))
    }

    #[instrument(skip(self), level = "debug")]
    async fn stop_scan(&self) -> Result<(), InteractionError> {
        let mut last_error = None;
        for adapter in self.adapters().await? {
            if let Err(error) = adapter.stop_scan().await {
                debug!(?error, "failed to stop adapter scan cleanly");
                last_error = Some(error);
            }
        }

        match last_error {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn cancel_connection(&self, device_id: &str) -> Result<(), InteractionError> {
        let peripheral = match self.find_peripheral(device_id).await {
            Ok(peripheral) => peripheral,
            Err(InteractionError::DeviceNotFound { .. }) => return Ok(()),
            Err(error) => return Err(error),
        };

        if peripheral.is_connected().await? {
            debug!("dropping stale connection before reconnecting");
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, InteractionError> {
        let peripheral = self.find_peripheral(device_id).await?;
        peripheral.connect().await?;

        Ok(Arc::new(BtleplugLink {
            device_id: device_id.to_string(),
            peripheral,
        }))
    }
}

type AdvertisementSender = mpsc::Sender<Result<Advertisement, InteractionError>>;

/// One radio that can feed advertisements into a shared scan.
#[async_trait]
trait ScanRadio: Send + Sync {
    async fn begin_scan(&self, sender: AdvertisementSender) -> Result<(), InteractionError>;

    async fn end_scan(&self) -> Result<(), InteractionError>;
}

#[async_trait]
impl ScanRadio for Adapter {
    async fn begin_scan(&self, sender: AdvertisementSender) -> Result<(), InteractionError> {
        let events = self.events().await?;
        self.start_scan(ScanFilter::default()).await?;
        tokio::spawn(forward_scan_events(self.clone(), events, sender));
        Ok(())
    }

    async fn end_scan(&self) -> Result<(), InteractionError> {
        Ok(self.stop_scan().await?)
    }
}

/// Starts every radio, or none: a failure stops the radios already scanning.
async fn start_scans<R: ScanRadio>(
    radios: &[R],
    sender: &AdvertisementSender,
) -> Result<(), InteractionError> {
    for (index, radio) in radios.iter().enumerate() {
        if let Err(error) = radio.begin_scan(sender.clone()).await {
            for started in &radios[..index] {
                if let Err(stop_error) = started.end_scan().await {
                    debug!(?stop_error, "failed to stop a partially started scan");
                }
            }
            return Err(error);
        }
    }
    Ok(())
}

async fn forward_scan_events(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = CentralEvent> + Send>>,
    sender: AdvertisementSender,
) {
    loop {
        let event = tokio::select! {
            () = sender.closed() => break,
            event = events.next() => event,
        };
        let Some(event) = event else {
            break;
        };
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };

        let advertisement = advertisement_for(&adapter, &id).await;
        if let Ok(None) = advertisement {
            continue;
        }
        let item = advertisement.and_then(|maybe| {
            maybe.ok_or(InteractionError::DeviceNotFound {
                device_id: id.to_string(),
            })
        });
        if sender.send(item).await.is_err() {
            break;
        }
    }
    trace!("scan event forwarder finished");
}

async fn advertisement_for(
    adapter: &Adapter,
    id: &btleplug::platform::PeripheralId,
) -> Result<Option<Advertisement>, InteractionError> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };

    let mut services = properties.services;
    services.sort();
    Ok(Some(
        Advertisement::new(id.to_string(), properties.local_name, properties.rssi)
            .with_services(services),
    ))
}

/// Active connection bound to a real peripheral.
#[derive(Debug)]
struct BtleplugLink {
    device_id: String,
    peripheral: Peripheral,
}

impl BtleplugLink {
    fn characteristic_for(&self, endpoint: EndpointId) -> Result<Characteristic, InteractionError> {
        let uuid = protocol::endpoint_metadata(endpoint).uuid();
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl GattLink for BtleplugLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(self.peripheral.is_connected().await?)
    }

    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id))]
    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, InteractionError> {
        self.peripheral.discover_services().await?;
        Ok(collect_services(&self.peripheral))
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16, InteractionError> {
        trace!(mtu, "btleplug leaves MTU exchange to the host stack");
        Err(InteractionError::MtuNegotiationUnsupported)
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, payload_len = payload.len()))]
    async fn write(&self, endpoint: EndpointId, payload: &[u8]) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral
            .write(&characteristic, payload, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(%endpoint))]
    async fn subscribe(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        let filtered = notifications
            .filter_map(move |notification| (notification.uuid == uuid).then_some(notification.value));
        Ok(Box::pin(filtered))
    }

    #[instrument(skip(self), level = "debug", fields(%endpoint))]
    async fn unsubscribe(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id))]
    async fn disconnect(&self) -> Result<(), InteractionError> {
        ensure_live(self.peripheral.is_connected().await)?;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// A peer that is gone, or whose state can no longer be read, reports `NotConnected`.
fn ensure_live(connected: Result<bool, btleplug::Error>) -> Result<(), InteractionError> {
    match connected {
        Ok(true) => Ok(()),
        Ok(false) => Err(InteractionError::NotConnected),
        Err(error) => {
            trace!(?error, "treating unreadable connection state as disconnected");
            Err(InteractionError::NotConnected)
        }
    }
}

fn collect_services(peripheral: &Peripheral) -> Vec<ServiceInfo> {
    let mut services: Vec<ServiceInfo> = peripheral
        .services()
        .into_iter()
        .map(|service| {
            let mut characteristics: Vec<CharacteristicInfo> = service
                .characteristics
                .iter()
                .map(|characteristic| {
                    CharacteristicInfo::new(
                        characteristic.uuid,
                        property_labels(characteristic.properties),
                    )
                })
                .collect();
            characteristics.sort_by_key(CharacteristicInfo::uuid);
            ServiceInfo::new(service.uuid, characteristics)
        })
        .collect();
    services.sort_by_key(ServiceInfo::uuid);
    services
}

fn property_labels(flags: CharPropFlags) -> Vec<String> {
    let labels: Vec<String> = flags
        .iter_names()
        .map(|(name, _)| name.to_lowercase())
        .collect();
    if labels.is_empty() {
        vec!["none".to_string()]
    } else {
        labels
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(CharPropFlags::WRITE, vec!["write"])]
    #[case(CharPropFlags::READ | CharPropFlags::NOTIFY, vec!["read", "notify"])]
    #[case(
        CharPropFlags::WRITE_WITHOUT_RESPONSE,
        vec!["write_without_response"]
    )]
    #[case(CharPropFlags::empty(), vec!["none"])]
    fn property_labels_render_lowercase_flag_names(
        #[case] flags: CharPropFlags,
        #[case] expected: Vec<&str>,
    ) {
        assert_eq!(expected, property_labels(flags));
    }

    #[rstest]
    #[case::gone(Ok(false))]
    #[case::unreadable(Err(btleplug::Error::NotSupported("state".to_string())))]
    fn departed_peer_is_an_expected_disconnect(#[case] connected: Result<bool, btleplug::Error>) {
        let error = ensure_live(connected).expect_err("a departed peer cannot be disconnected");
        assert!(error.is_expected_disconnect());
    }

    #[test]
    fn live_peer_can_be_disconnected() {
        assert!(ensure_live(Ok(true)).is_ok());
    }

    #[derive(Debug, Default)]
    struct StubRadio {
        fails: bool,
        began: AtomicUsize,
        ended: AtomicUsize,
    }

    #[async_trait]
    impl ScanRadio for StubRadio {
        async fn begin_scan(&self, _sender: AdvertisementSender) -> Result<(), InteractionError> {
            self.began.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                return Err(InteractionError::NoAdapters);
            }
            Ok(())
        }

        async fn end_scan(&self) -> Result<(), InteractionError> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn radios(failing: Option<usize>) -> Vec<StubRadio> {
        (0..3)
            .map(|index| StubRadio {
                fails: failing == Some(index),
                ..StubRadio::default()
            })
            .collect()
    }

    fn counts(radios: &[StubRadio]) -> (Vec<usize>, Vec<usize>) {
        (
            radios.iter().map(|radio| radio.began.load(Ordering::SeqCst)).collect(),
            radios.iter().map(|radio| radio.ended.load(Ordering::SeqCst)).collect(),
        )
    }

    #[tokio::test]
    async fn failing_radio_stops_the_radios_already_scanning() {
        let radios = radios(Some(1));
        let (sender, _receiver) = mpsc::channel(1);

        let result = start_scans(&radios, &sender).await;

        assert_matches!(result, Err(InteractionError::NoAdapters));
        assert_eq!((vec![1, 1, 0], vec![1, 0, 0]), counts(&radios));
    }

    #[tokio::test]
    async fn every_radio_starts_when_none_fail() {
        let radios = radios(None);
        let (sender, _receiver) = mpsc::channel(1);

        start_scans(&radios, &sender)
            .await
            .expect("every radio should start");

        assert_eq!((vec![1, 1, 1], vec![0, 0, 0]), counts(&radios));
    }
}
