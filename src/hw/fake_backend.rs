use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, trace};

use super::hardware::{AdvertisementStream, GattLink, NotificationStream, TransportBackend};
use super::model::{Advertisement, CharacteristicInfo, RadioState, ServiceInfo};
use crate::codec::{CredentialCodec, WireEncoding};
use crate::error::{FixtureError, InteractionError};
use crate::protocol::{self, EndpointId};

/// How the scripted fountain reacts to the provisioning exchange.
#[derive(
    Debug, Clone, Copy, Default, Eq, PartialEq, clap::ValueEnum, strum_macros::Display,
)]
pub enum FakeScript {
    /// Every step is acknowledged and provisioning completes.
    #[default]
    #[strum(to_string = "happy")]
    Happy,
    /// The fountain applies the identity but never reports completion.
    #[strum(to_string = "lost-final")]
    LostFinal,
    /// The Wi-Fi characteristic write is rejected.
    #[strum(to_string = "wifi-write-fails")]
    WifiWriteFails,
    /// The link drops right after the connection is established.
    #[strum(to_string = "disconnected")]
    Disconnected,
    /// Completion is reported twice.
    #[strum(to_string = "duplicate-complete")]
    DuplicateComplete,
    /// The fountain reports completion and reboots while the identity write is in
    /// flight, so the write itself fails.
    #[strum(to_string = "reboot-errors")]
    RebootErrors,
    /// Completion is reported as soon as Wi-Fi credentials arrive.
    #[strum(to_string = "complete-after-wifi")]
    CompleteAfterWifi,
}

/// Parsed fake scan fixture records in `id|name|rssi;...` form.
///
/// `-` stands for a missing name or RSSI.
#[derive(Debug, Clone, derive_more::Into)]
pub struct ScanFixture {
    advertisements: Vec<Advertisement>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let advertisements = parse_scan_fixture(value)?;
        Ok(Self { advertisements })
    }
}

/// Settings for constructing a fake hardware backend.
#[derive(Debug, Clone, Builder)]
pub struct FakeBackendConfig {
    #[builder(default)]
    advertisements: Vec<Advertisement>,
    #[builder(default)]
    script: FakeScript,
    #[builder(default = RadioState::Ready)]
    radio_state: RadioState,
    #[builder(default = Duration::from_millis(100))]
    advertisement_interval: Duration,
    #[builder(default = 1)]
    advertisement_repeats: usize,
    #[builder(default)]
    inject_scan_error: bool,
    #[builder(default = Duration::from_millis(50))]
    ack_delay: Duration,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default = 247)]
    negotiated_mtu: u16,
    #[builder(default)]
    mtu_unsupported: bool,
    missing_endpoint: Option<EndpointId>,
    /// Characteristic whose writes are rejected regardless of the script.
    failing_write: Option<EndpointId>,
    #[builder(default)]
    subscribe_fails: bool,
    #[builder(default)]
    encoding: WireEncoding,
}

/// Everything the fake fountain observed, shared with tests.
#[derive(Debug, Clone, Default)]
pub struct FakeRecorder {
    state: Arc<Mutex<RecorderState>>,
}

#[derive(Debug, Default)]
struct RecorderState {
    writes: Vec<(EndpointId, Vec<u8>)>,
    scans_started: usize,
    scans_stopped: usize,
    cancellations: usize,
    connects: usize,
    disconnects: usize,
    unsubscribes: usize,
    mtu_requests: Vec<u16>,
}

impl FakeRecorder {
    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns every accepted characteristic write in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(EndpointId, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Returns the endpoints that accepted a write, in order.
    #[must_use]
    pub fn written_endpoints(&self) -> Vec<EndpointId> {
        self.lock()
            .writes
            .iter()
            .map(|(endpoint, _)| *endpoint)
            .collect()
    }

    /// Returns how many scans were started.
    #[must_use]
    pub fn scans_started(&self) -> usize {
        self.lock().scans_started
    }

    /// Returns how many scan stop requests reached the backend.
    #[must_use]
    pub fn scans_stopped(&self) -> usize {
        self.lock().scans_stopped
    }

    /// Returns how many stale connections were cancelled before connecting.
    #[must_use]
    pub fn cancellations(&self) -> usize {
        self.lock().cancellations
    }

    /// Returns how many connections were opened.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Returns how many disconnect requests reached the fountain.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    /// Returns how many times status notifications were disabled.
    #[must_use]
    pub fn unsubscribes(&self) -> usize {
        self.lock().unsubscribes
    }

    /// Returns every requested MTU.
    #[must_use]
    pub fn mtu_requests(&self) -> Vec<u16> {
        self.lock().mtu_requests.clone()
    }
}

/// Fake backend used in tests and non-hardware environments.
#[derive(Debug)]
pub struct FakeBackend {
    config: FakeBackendConfig,
    recorder: FakeRecorder,
}

impl FakeBackend {
    /// Creates a fake backend from explicit settings.
    #[must_use]
    pub fn new(config: FakeBackendConfig) -> Self {
        Self {
            config,
            recorder: FakeRecorder::default(),
        }
    }

    /// Returns a handle on what the fake fountain observed.
    #[must_use]
    pub fn recorder(&self) -> FakeRecorder {
        self.recorder.clone()
    }
}

#[async_trait]
impl TransportBackend for FakeBackend {
    async fn radio_state(&self) -> Result<RadioState, InteractionError> {
        Ok(self.config.radio_state)
    }

    #[instrument(skip(self), level = "debug")]
    async fn start_scan(&self) -> Result<AdvertisementStream, InteractionError> {
        self.recorder.lock().scans_started += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        let advertisements = self.config.advertisements.clone();
        let interval = self.config.advertisement_interval;
        let repeats = self.config.advertisement_repeats;
        let mut inject_error = self.config.inject_scan_error;

        tokio::spawn(async move {
            for _ in 0..repeats {
                for advertisement in &advertisements {
                    sleep(interval).await;
                    if sender.send(Ok(advertisement.clone())).is_err() {
                        return;
                    }
                    if inject_error {
                        inject_error = false;
                        let _ = sender.send(Err(InteractionError::Injected { operation: "scan" }));
                    }
                }
            }
            trace!("fake advertisement feed exhausted");
        });

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn stop_scan(&self) -> Result<(), InteractionError> {
        self.recorder.lock().scans_stopped += 1;
        Ok(())
    }

    async fn cancel_connection(&self, _device_id: &str) -> Result<(), InteractionError> {
        self.recorder.lock().cancellations += 1;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn GattLink>, InteractionError> {
        if !self.config.connect_delay.is_zero() {
            sleep(self.config.connect_delay).await;
        }

        let known = self.config.advertisements.is_empty()
            || self
                .config
                .advertisements
                .iter()
                .any(|advertisement| advertisement.id() == device_id);
        if !known {
            return Err(InteractionError::DeviceNotFound {
                device_id: device_id.to_string(),
            });
        }

        self.recorder.lock().connects += 1;
        Ok(Arc::new(FakeLink {
            device_id: device_id.to_string(),
            config: self.config.clone(),
            codec: CredentialCodec::new(self.config.encoding),
            connected: AtomicBool::new(true),
            status_sender: Mutex::new(None),
            recorder: self.recorder.clone(),
        }))
    }
}

/// One scripted fountain connection.
#[derive(Debug)]
struct FakeLink {
    device_id: String,
    config: FakeBackendConfig,
    codec: CredentialCodec,
    connected: AtomicBool,
    status_sender: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    recorder: FakeRecorder,
}

impl FakeLink {
    fn ensure_connected(&self) -> Result<(), InteractionError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InteractionError::NotConnected)
        }
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Vec<u8>>> {
        self.status_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn close_status_feed(&self) {
        self.status_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Emits status strings in order after the acknowledgement delay.
    fn notify_later(&self, statuses: &'static [&'static str]) {
        let Some(sender) = self.sender() else {
            debug!(?statuses, "no subscriber for fake status notifications");
            return;
        };
        let codec = self.codec;
        let delay = self.config.ack_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            for status in statuses {
                if sender.send(codec.encode_str(status)).is_err() {
                    break;
                }
            }
        });
    }

    fn statuses_for(&self, endpoint: EndpointId) -> &'static [&'static str] {
        match (endpoint, self.config.script) {
            (EndpointId::WifiCharacteristic, FakeScript::CompleteAfterWifi) => {
                &["wifi_received", "provisioning_complete"]
            }
            (EndpointId::WifiCharacteristic, _) => &["wifi_received"],
            (EndpointId::BackendCharacteristic, _) => &["supabase_received"],
            (EndpointId::IdentityCharacteristic, FakeScript::LostFinal) => &["user_received"],
            (EndpointId::IdentityCharacteristic, FakeScript::DuplicateComplete) => &[
                "user_received",
                "provisioning_complete",
                "provisioning_complete",
            ],
            (EndpointId::IdentityCharacteristic, _) => &["user_received", "provisioning_complete"],
            _ => &[],
        }
    }
}

#[async_trait]
impl GattLink for FakeLink {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn is_connected(&self) -> Result<bool, InteractionError> {
        Ok(self.connected.load(Ordering::SeqCst) && self.config.script != FakeScript::Disconnected)
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, InteractionError> {
        self.ensure_connected()?;
        Ok(fountain_services(self.config.missing_endpoint))
    }

    async fn request_mtu(&self, mtu: u16) -> Result<u16, InteractionError> {
        self.recorder.lock().mtu_requests.push(mtu);
        if self.config.mtu_unsupported {
            return Err(InteractionError::MtuNegotiationUnsupported);
        }
        Ok(mtu.min(self.config.negotiated_mtu))
    }

    #[instrument(skip(self, payload), level = "debug", fields(%endpoint))]
    async fn write(&self, endpoint: EndpointId, payload: &[u8]) -> Result<(), InteractionError> {
        self.ensure_connected()?;
        if self.config.failing_write == Some(endpoint) {
            return Err(InteractionError::Injected { operation: "write" });
        }

        match (endpoint, self.config.script) {
            (EndpointId::WifiCharacteristic, FakeScript::WifiWriteFails) => {
                return Err(InteractionError::Injected { operation: "write" });
            }
            (EndpointId::IdentityCharacteristic, FakeScript::RebootErrors) => {
                self.recorder.lock().writes.push((endpoint, payload.to_vec()));
                if let Some(sender) = self.sender() {
                    let _ = sender.send(self.codec.encode_str("provisioning_complete"));
                }
                self.connected.store(false, Ordering::SeqCst);
                self.close_status_feed();
                return Err(InteractionError::PeerDisconnected);
            }
            _ => {}
        }

        self.recorder.lock().writes.push((endpoint, payload.to_vec()));
        self.notify_later(self.statuses_for(endpoint));
        Ok(())
    }

    async fn subscribe(
        &self,
        endpoint: EndpointId,
    ) -> Result<NotificationStream, InteractionError> {
        self.ensure_connected()?;
        if self.config.subscribe_fails {
            return Err(InteractionError::Injected {
                operation: "subscribe",
            });
        }
        if endpoint != EndpointId::StatusCharacteristic {
            return Err(InteractionError::MissingEndpoint { endpoint });
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        *self
            .status_sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
        self.notify_later(&["connected"]);

        Ok(Box::pin(UnboundedReceiverStream::new(receiver)))
    }

    async fn unsubscribe(&self, _endpoint: EndpointId) -> Result<(), InteractionError> {
        self.recorder.lock().unsubscribes += 1;
        self.close_status_feed();
        self.ensure_connected()
    }

    async fn disconnect(&self) -> Result<(), InteractionError> {
        self.recorder.lock().disconnects += 1;
        self.close_status_feed();
        if self.connected.swap(false, Ordering::SeqCst) {
            Ok(())
        } else {
            Err(InteractionError::NotConnected)
        }
    }
}

fn parse_scan_fixture(raw_fixture: &str) -> Result<Vec<Advertisement>, FixtureError> {
    if raw_fixture.trim().is_empty() {
        return Err(FixtureError::EmptyFixture);
    }

    raw_fixture
        .split(';')
        .filter(|record| !record.trim().is_empty())
        .map(parse_scan_record)
        .collect()
}

fn parse_scan_record(raw_record: &str) -> Result<Advertisement, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [id, name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if id.is_empty() || name.is_empty() || rssi.is_empty() {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (*name != "-").then(|| (*name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(Advertisement::new(*id, local_name, rssi))
}

fn fountain_services(missing: Option<EndpointId>) -> Vec<ServiceInfo> {
    let characteristics = [
        (EndpointId::WifiCharacteristic, &["write"][..]),
        (EndpointId::BackendCharacteristic, &["write"][..]),
        (EndpointId::IdentityCharacteristic, &["write"][..]),
        (EndpointId::StatusCharacteristic, &["read", "notify"][..]),
    ]
    .into_iter()
    .filter(|(endpoint, _)| Some(*endpoint) != missing)
    .map(|(endpoint, properties)| {
        CharacteristicInfo::new(
            protocol::endpoint_metadata(endpoint).uuid(),
            properties.iter().map(ToString::to_string).collect(),
        )
    })
    .collect();

    vec![ServiceInfo::new(
        protocol::endpoint_metadata(EndpointId::ProvisioningService).uuid(),
        characteristics,
    )]
}
