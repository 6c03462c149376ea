use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::pin;
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::hw::{Advertisement, ScannedDevice, TransportBackend};

/// Why a scan session ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
pub enum ScanStopReason {
    /// The scan window ran out.
    #[strum(to_string = "window_elapsed")]
    WindowElapsed,
    /// [`DeviceDiscovery::stop`] was called, or a newer scan replaced this one.
    #[strum(to_string = "stopped")]
    Stopped,
    /// The transport refused to start scanning.
    #[strum(to_string = "transport_unavailable")]
    TransportUnavailable,
}

/// What one scan session saw.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ScanSummary {
    found: Vec<ScannedDevice>,
    advertisements_seen: usize,
    stop_reason: ScanStopReason,
}

impl ScanSummary {
    pub(crate) fn new(
        found: Vec<ScannedDevice>,
        advertisements_seen: usize,
        stop_reason: ScanStopReason,
    ) -> Self {
        Self {
            found,
            advertisements_seen,
            stop_reason,
        }
    }

    /// Fountains reported during the session, in discovery order.
    #[must_use]
    pub fn found(&self) -> &[ScannedDevice] {
        &self.found
    }

    /// Number of advertisements of any kind observed.
    #[must_use]
    pub fn advertisements_seen(&self) -> usize {
        self.advertisements_seen
    }

    /// Returns why the session ended.
    #[must_use]
    pub fn stop_reason(&self) -> ScanStopReason {
        self.stop_reason
    }
}

#[derive(Debug)]
struct ActiveScan {
    generation: u64,
    cancel: CancellationToken,
}

/// Finds advertising fountains during a bounded scan window.
#[derive(Debug)]
pub struct DeviceDiscovery {
    backend: Arc<dyn TransportBackend>,
    name_prefix: String,
    next_generation: AtomicU64,
    active: Mutex<Option<ActiveScan>>,
}

impl DeviceDiscovery {
    /// Creates a discovery session matching local names starting with `name_prefix`.
    #[must_use]
    pub fn new(backend: Arc<dyn TransportBackend>, name_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            name_prefix: name_prefix.into(),
            next_generation: AtomicU64::new(0),
            active: Mutex::new(None),
        }
    }

    /// Returns the name prefix fountains are matched on.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveScan>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scans for `duration`, reporting each fountain once through `on_found`.
    pub async fn scan<F>(&self, duration: Duration, on_found: F) -> ScanSummary
    where
        F: FnMut(&ScannedDevice),
    {
        self.scan_with_diagnostics(duration, on_found, |_| {}).await
    }

    /// Scans for `duration`, reporting each fountain once through `on_found` and every
    /// advertisement through `on_any_found`.
    ///
    /// Transport errors are logged and never returned. Starting a scan stops any
    /// scan still running on this instance.
    #[instrument(
        skip(self, on_found, on_any_found),
        level = "info",
        fields(name_prefix = %self.name_prefix)
    )]
    pub async fn scan_with_diagnostics<F, G>(
        &self,
        duration: Duration,
        mut on_found: F,
        mut on_any_found: G,
    ) -> ScanSummary
    where
        F: FnMut(&ScannedDevice),
        G: FnMut(&Advertisement),
    {
        let (generation, cancel) = self.begin_session();
        let mut found = Vec::new();
        let mut reported = HashSet::new();
        let mut advertisements_seen = 0usize;

        let mut advertisements = match self.backend.start_scan().await {
            Ok(advertisements) => advertisements,
            Err(error) => {
                warn!(?error, "could not start scanning");
                self.end_session(generation);
                return ScanSummary {
                    found,
                    advertisements_seen,
                    stop_reason: ScanStopReason::TransportUnavailable,
                };
            }
        };

        let window = sleep(duration);
        pin!(window);
        let mut feed_open = true;

        let stop_reason = loop {
            tokio::select! {
                () = &mut window => break ScanStopReason::WindowElapsed,
                () = cancel.cancelled() => break ScanStopReason::Stopped,
                item = advertisements.next(), if feed_open => match item {
                    Some(Ok(advertisement)) => {
                        advertisements_seen += 1;
                        on_any_found(&advertisement);
                        if let Some(device) = self.match_device(&advertisement)
                            && reported.insert(device.id().to_string())
                        {
                            debug!(id = device.id(), name = device.name(), "found fountain");
                            on_found(&device);
                            found.push(device);
                        }
                    }
                    Some(Err(error)) => warn!(?error, "scan reported an error; still scanning"),
                    None => {
                        trace!("advertisement feed closed before the window elapsed");
                        feed_open = false;
                    }
                },
            }
        };

        if self.end_session(generation) {
            if let Err(error) = self.backend.stop_scan().await {
                debug!(?error, "failed to stop scanning cleanly");
            }
        } else {
            trace!("scan replaced; leaving the radio to the newer session");
        }

        ScanSummary {
            found,
            advertisements_seen,
            stop_reason,
        }
    }

    /// Scans until the first fountain appears or `duration` elapses.
    pub async fn first_match(&self, duration: Duration) -> Option<ScannedDevice> {
        let mut first = None;
        self.scan(duration, |device| {
            if first.is_none() {
                first = Some(device.clone());
                self.stop();
            }
        })
        .await;
        first
    }

    /// Stops the running scan. Does nothing when no scan is active.
    pub fn stop(&self) {
        match self.active().take() {
            Some(session) => {
                debug!(generation = session.generation, "stopping scan");
                session.cancel.cancel();
            }
            None => trace!("no active scan to stop"),
        }
    }

    fn begin_session(&self) -> (u64, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let previous = self.active().replace(ActiveScan {
            generation,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            debug!(generation = previous.generation, "replacing running scan");
            previous.cancel.cancel();
        }
        (generation, cancel)
    }

    /// Clears the session record. Returns `false` when a newer session owns the radio.
    fn end_session(&self, generation: u64) -> bool {
        let mut active = self.active();
        match active.as_ref() {
            Some(session) if session.generation == generation => {
                active.take();
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn match_device(&self, advertisement: &Advertisement) -> Option<ScannedDevice> {
        let name = advertisement.local_name()?;
        name.starts_with(&self.name_prefix)
            .then(|| ScannedDevice::from_advertisement(advertisement, name))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::{FakeBackendConfig, fake_transport_backend};

    fn discovery() -> DeviceDiscovery {
        DeviceDiscovery::new(
            fake_transport_backend(FakeBackendConfig::builder().build()),
            "PetFountain",
        )
    }

    #[rstest]
    #[case(Some("PetFountain-A1"), true)]
    #[case(Some("PetFountain"), true)]
    #[case(Some("petfountain-a1"), false)]
    #[case(Some("My PetFountain"), false)]
    #[case(None, false)]
    fn names_match_on_prefix_only(#[case] name: Option<&str>, #[case] expected: bool) {
        let advertisement = Advertisement::new("AA:BB", name.map(str::to_string), Some(-50));
        assert_eq!(expected, discovery().match_device(&advertisement).is_some());
    }

    #[test]
    fn missing_rssi_reports_floor_strength() {
        let advertisement = Advertisement::new("AA:BB", Some("PetFountain-1".to_string()), None);
        let device = discovery()
            .match_device(&advertisement)
            .expect("fountain should match");
        assert_eq!(-127, device.signal_strength());
    }

    #[test]
    fn stop_without_scan_is_a_no_op() {
        let discovery = discovery();
        discovery.stop();
        discovery.stop();
    }
}
