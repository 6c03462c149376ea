use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::hardware::{GattLink, TransportBackend};
use super::model::RadioState;
use super::session::verify_session_endpoints;
use crate::codec::CredentialCodec;
use crate::config::ProvisioningConfig;
use crate::error::InteractionError;
use crate::protocol::EndpointId;
use crate::provisioning::AttemptState;
use crate::utils::format_hex;

/// Application-level view of the platform BLE stack.
///
/// Owns at most one live [`ConnectionHandle`]; connecting again tears the previous
/// handle down first.
#[derive(Debug)]
pub struct TransportAdapter {
    backend: Arc<dyn TransportBackend>,
    codec: CredentialCodec,
    connect_timeout: Duration,
    connect_settle: Duration,
    active: Mutex<Option<ConnectionHandle>>,
}

impl TransportAdapter {
    /// Creates an adapter over `backend` using the timing and encoding in `config`.
    #[must_use]
    pub fn new(backend: Arc<dyn TransportBackend>, config: &ProvisioningConfig) -> Self {
        Self {
            backend,
            codec: CredentialCodec::new(config.encoding()),
            connect_timeout: config.connect_timeout(),
            connect_settle: config.connect_settle(),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ConnectionHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports whether the radio is powered and usable.
    ///
    /// Expected "not ready" states come back as `false`, never as an error.
    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_ready(&self) -> bool {
        match self.backend.radio_state().await {
            Ok(RadioState::Ready) => true,
            Ok(state) => {
                warn!(%state, "bluetooth radio is not ready");
                false
            }
            Err(error) => {
                warn!(?error, "could not query bluetooth radio state");
                false
            }
        }
    }

    /// Opens a fresh connection to `device_id` and enumerates its services.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection times out, the backend rejects it, or the
    /// peripheral does not expose the provisioning profile.
    #[instrument(skip(self), level = "info", fields(timeout = ?self.connect_timeout))]
    pub async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, InteractionError> {
        let previous = self.active().take();
        if let Some(previous) = previous {
            previous.release().await;
        }

        if let Err(error) = self.backend.cancel_connection(device_id).await {
            debug!(?error, "ignoring failure to cancel a stale connection");
        }
        if !self.connect_settle.is_zero() {
            sleep(self.connect_settle).await;
        }

        let link = timeout(self.connect_timeout, self.backend.connect(device_id))
            .await
            .map_err(|_| InteractionError::ConnectTimeout {
                device_id: device_id.to_string(),
                timeout: self.connect_timeout,
            })??;

        let verified = match link.discover_services().await {
            Ok(services) => verify_session_endpoints(&services),
            Err(error) => Err(error),
        };
        if let Err(error) = verified {
            drop_link(link.as_ref()).await;
            return Err(error);
        }

        let handle = ConnectionHandle::new(link, self.codec);
        *self.active() = Some(handle.clone());
        info!(device_id, "connected to fountain");
        Ok(handle)
    }

    /// Releases the live connection, if any.
    #[instrument(skip(self), level = "debug")]
    pub async fn disconnect(&self) {
        let handle = self.active().take();
        match handle {
            Some(handle) => handle.release().await,
            None => debug!("no live connection to release"),
        }
    }
}

/// Reference to one established fountain connection.
///
/// Clones share the same link; releasing any clone releases all of them.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    link: Arc<dyn GattLink>,
    codec: CredentialCodec,
    released: AtomicBool,
}

impl ConnectionHandle {
    fn new(link: Arc<dyn GattLink>, codec: CredentialCodec) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                link,
                codec,
                released: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the transport-level device identifier.
    #[must_use]
    pub fn device_id(&self) -> &str {
        self.inner.link.device_id()
    }

    /// Returns whether [`Self::release`] already ran on this connection.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    /// Reports whether the link is still live.
    ///
    /// A released handle is never live; transport errors count as not live.
    pub async fn is_connected(&self) -> bool {
        if self.is_released() {
            return false;
        }
        match self.inner.link.is_connected().await {
            Ok(connected) => connected,
            Err(error) => {
                debug!(?error, "connection state query failed");
                false
            }
        }
    }

    /// Requests a larger ATT MTU.
    ///
    /// # Errors
    ///
    /// Returns an error when the platform does not support negotiation or the peer
    /// rejects it.
    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id()))]
    pub async fn request_mtu(&self, mtu: u16) -> Result<u16, InteractionError> {
        self.inner.link.request_mtu(mtu).await
    }

    /// Encodes `payload` and writes it with response to `endpoint`.
    ///
    /// Once `attempt` has observed completion the fountain is rebooting, so write
    /// failures are swallowed.
    ///
    /// # Errors
    ///
    /// Returns an error when encoding fails or the write fails before completion.
    #[instrument(skip(self, payload, attempt), level = "debug", fields(%endpoint))]
    pub async fn write_characteristic<T>(
        &self,
        endpoint: EndpointId,
        payload: &T,
        attempt: &AttemptState,
    ) -> Result<(), InteractionError>
    where
        T: Serialize + ?Sized,
    {
        let bytes = self.inner.codec.encode(payload)?;
        match self.inner.link.write(endpoint, &bytes).await {
            Ok(()) => Ok(()),
            Err(error) if attempt.is_complete() => {
                debug!(?error, "ignoring write failure after provisioning completed");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    /// Subscribes to `endpoint` and forwards each decoded notification to `handler`.
    ///
    /// Decode failures and handler panics are logged inside the monitor task and never
    /// propagate.
    ///
    /// # Errors
    ///
    /// Returns an error when notifications cannot be enabled.
    #[instrument(skip(self, handler), level = "debug", fields(%endpoint))]
    pub async fn monitor<F>(
        &self,
        endpoint: EndpointId,
        handler: F,
    ) -> Result<Subscription, InteractionError>
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        let mut notifications = self.inner.link.subscribe(endpoint).await?;
        let cancel = CancellationToken::new();
        let codec = self.inner.codec;
        let task_cancel = cancel.clone();

        let task = tokio::spawn(
            async move {
                let mut delivered = 0usize;
                loop {
                    let payload = tokio::select! {
                        () = task_cancel.cancelled() => break,
                        payload = notifications.next() => payload,
                    };
                    let Some(payload) = payload else {
                        debug!("notification stream closed");
                        break;
                    };

                    let status = match codec.decode(&payload) {
                        Ok(status) => status,
                        Err(error) => {
                            warn!(?error, payload = %format_hex(&payload), "dropping undecodable notification");
                            continue;
                        }
                    };

                    if catch_unwind(AssertUnwindSafe(|| handler(status))).is_err() {
                        warn!("notification handler panicked; continuing");
                        continue;
                    }
                    delivered += 1;
                }
                delivered
            }
            .in_current_span(),
        );

        Ok(Subscription {
            endpoint,
            link: Arc::clone(&self.inner.link),
            cancel,
            task: Some(task),
        })
    }

    /// Disconnects the link. Safe to call repeatedly and on a peer that already left.
    #[instrument(skip(self), level = "debug", fields(device_id = %self.device_id()))]
    pub async fn release(&self) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        drop_link(self.inner.link.as_ref()).await;
    }
}

/// Disconnects `link`, quietly when the peer already left.
async fn drop_link(link: &dyn GattLink) {
    match link.disconnect().await {
        Ok(()) => debug!("disconnected"),
        Err(error) if error.is_expected_disconnect() => {
            debug!(?error, "peer was already gone");
        }
        Err(error) => info!(?error, "disconnect failed"),
    }
}

/// Active notification registration on one characteristic.
///
/// Dropping it stops forwarding; [`Subscription::cancel`] additionally disables
/// notifications on the peer.
#[derive(Debug)]
pub struct Subscription {
    endpoint: EndpointId,
    link: Arc<dyn GattLink>,
    cancel: CancellationToken,
    task: Option<JoinHandle<usize>>,
}

impl Subscription {
    /// Returns the monitored endpoint.
    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// Stops forwarding and disables notifications. Never fails.
    ///
    /// Returns how many notifications reached the handler.
    #[instrument(skip(self), level = "debug", fields(endpoint = %self.endpoint))]
    pub async fn cancel(mut self) -> usize {
        self.cancel.cancel();
        let delivered = match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|error| {
                debug!(?error, "monitor task ended abnormally");
                0
            }),
            None => 0,
        };

        if let Err(error) = self.link.unsubscribe(self.endpoint).await {
            debug!(?error, "ignoring unsubscribe failure");
        }
        delivered
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
