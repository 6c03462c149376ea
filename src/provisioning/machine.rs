use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use strum::IntoEnumIterator;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::attempt::{AttemptState, Observation, WaitOutcome};
use super::credentials::DeviceCredentials;
use super::stage::ProvisioningStage;
use super::step::ProvisioningStep;
use crate::config::ProvisioningConfig;
use crate::error::ProvisioningError;
use crate::hw::ConnectionHandle;
use crate::protocol::EndpointId;

/// Caller hooks for progress reporting.
///
/// Status updates are delivered from the notification task, so implementations must
/// be cheap and must not block.
pub trait ProvisioningObserver: Send + Sync {
    /// Called once per stage the attempt advances to, in order.
    fn on_status_update(&self, stage: ProvisioningStage, message: &str);

    /// Called once when the attempt fails.
    fn on_error(&self, error: &ProvisioningError);
}

/// How an attempt ended without an error.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningOutcome {
    /// The fountain reported completion.
    #[strum(to_string = "confirmed")]
    Confirmed,
    /// Every write went through but completion was never reported (soft success).
    #[strum(to_string = "unconfirmed")]
    Unconfirmed,
    /// The caller's fallback timer fired before the attempt finished.
    #[strum(to_string = "fallback_elapsed")]
    FallbackElapsed,
}

/// Result of one provisioning attempt.
///
/// The device id is the key a registration layer should upsert on, since an
/// unconfirmed attempt may still have completed on the fountain.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ProvisioningReport {
    device_id: String,
    outcome: ProvisioningOutcome,
    last_stage: Option<ProvisioningStage>,
}

impl ProvisioningReport {
    pub(crate) fn new(
        device_id: impl Into<String>,
        outcome: ProvisioningOutcome,
        last_stage: Option<ProvisioningStage>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            outcome,
            last_stage,
        }
    }

    /// Returns the provisioned device's transport address.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns how the attempt ended.
    #[must_use]
    pub fn outcome(&self) -> ProvisioningOutcome {
        self.outcome
    }

    /// Returns the last stage the fountain reported, if any.
    #[must_use]
    pub fn last_stage(&self) -> Option<ProvisioningStage> {
        self.last_stage
    }
}

/// Drives the three-step credential exchange over one connection.
#[derive(Debug, Clone)]
pub struct Provisioner {
    subscription_settle: Duration,
    wifi_ack_window: Duration,
    backend_ack_window: Duration,
    final_ack_window: Duration,
    write_failure_grace: Duration,
    requested_mtu: u16,
}

impl Provisioner {
    /// Creates a provisioner using the waits in `config`.
    #[must_use]
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self {
            subscription_settle: config.subscription_settle(),
            wifi_ack_window: config.wifi_ack_window(),
            backend_ack_window: config.backend_ack_window(),
            final_ack_window: config.final_ack_window(),
            write_failure_grace: config.write_failure_grace(),
            requested_mtu: config.requested_mtu(),
        }
    }

    fn ack_window(&self, step: ProvisioningStep) -> Duration {
        match step {
            ProvisioningStep::WifiCredentials => self.wifi_ack_window,
            ProvisioningStep::BackendConfig => self.backend_ack_window,
            ProvisioningStep::UserIdentity => self.final_ack_window,
        }
    }

    /// Sends `credentials` to the fountain behind `handle`.
    ///
    /// Resolves successfully once the fountain reports completion, or once every
    /// write went through and the final wait elapsed ([`ProvisioningOutcome::Unconfirmed`]).
    /// The subscription is torn down and the handle released on every path.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is not live, status notifications cannot
    /// be enabled, or a write fails before the fountain reported completion. The
    /// observer's `on_error` sees the same error first.
    #[instrument(
        skip(self, handle, credentials, observer),
        level = "info",
        fields(device_id = %handle.device_id())
    )]
    pub async fn provision(
        &self,
        handle: ConnectionHandle,
        credentials: DeviceCredentials,
        observer: Arc<dyn ProvisioningObserver>,
    ) -> Result<ProvisioningReport, ProvisioningError> {
        let device_id = handle.device_id().to_string();

        if !handle.is_connected().await {
            let error = ProvisioningError::NotConnected { device_id };
            return Err(fail(&handle, observer.as_ref(), error).await);
        }

        self.negotiate_mtu(&handle).await;

        let attempt = AttemptState::new();
        let handler = status_handler(attempt.clone(), Arc::clone(&observer));
        let subscription = match handle
            .monitor(EndpointId::StatusCharacteristic, handler)
            .await
        {
            Ok(subscription) => subscription,
            Err(source) => {
                let error = ProvisioningError::Subscribe(source);
                return Err(fail(&handle, observer.as_ref(), error).await);
            }
        };

        if !self.subscription_settle.is_zero() {
            sleep(self.subscription_settle).await;
        }

        let result = self.run_steps(&handle, &credentials, &attempt).await;

        let delivered = subscription.cancel().await;
        debug!(delivered, "status subscription closed");

        match result {
            Ok(outcome) => {
                handle.release().await;
                info!(%outcome, "provisioning attempt finished");
                Ok(ProvisioningReport::new(device_id, outcome, attempt.latest()))
            }
            Err(error) => Err(fail(&handle, observer.as_ref(), error).await),
        }
    }

    async fn negotiate_mtu(&self, handle: &ConnectionHandle) {
        match handle.request_mtu(self.requested_mtu).await {
            Ok(mtu) => debug!(mtu, "negotiated ATT MTU"),
            Err(error) => debug!(?error, "MTU negotiation unavailable; using the default"),
        }
    }

    async fn run_steps(
        &self,
        handle: &ConnectionHandle,
        credentials: &DeviceCredentials,
        attempt: &AttemptState,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        for step in ProvisioningStep::iter() {
            if attempt.is_complete() {
                debug!(%step, "fountain already complete; skipping remaining steps");
                return Ok(ProvisioningOutcome::Confirmed);
            }

            let payload = credentials.payload_for(step);
            if let Err(source) = handle
                .write_characteristic(step.endpoint(), &payload, attempt)
                .await
            {
                // A completion notification may still be in flight behind the failure.
                let grace = attempt
                    .wait_until(ProvisioningStage::Complete, self.write_failure_grace)
                    .await;
                if grace != WaitOutcome::TimedOut {
                    debug!(%step, ?source, "write failed after the fountain completed");
                    return Ok(ProvisioningOutcome::Confirmed);
                }
                return Err(ProvisioningError::StepWrite { step, source });
            }

            match attempt
                .wait_until(step.ack_stage(), self.ack_window(step))
                .await
            {
                WaitOutcome::Reached(stage) if stage.is_terminal() => {
                    return Ok(ProvisioningOutcome::Confirmed);
                }
                WaitOutcome::Reached(stage) => debug!(%step, %stage, "step acknowledged"),
                WaitOutcome::TimedOut if step.is_final() => {
                    warn!(
                        latest = ?attempt.latest(),
                        "no completion notification; treating attempt as unconfirmed success"
                    );
                    return Ok(ProvisioningOutcome::Unconfirmed);
                }
                WaitOutcome::TimedOut => {
                    warn!(%step, "no acknowledgement within the window; continuing");
                }
            }
        }

        Ok(if attempt.is_complete() {
            ProvisioningOutcome::Confirmed
        } else {
            ProvisioningOutcome::Unconfirmed
        })
    }
}

async fn fail(
    handle: &ConnectionHandle,
    observer: &dyn ProvisioningObserver,
    error: ProvisioningError,
) -> ProvisioningError {
    warn!(%error, "provisioning attempt failed");
    observer.on_error(&error);
    handle.release().await;
    error
}

fn status_handler(
    attempt: AttemptState,
    observer: Arc<dyn ProvisioningObserver>,
) -> impl Fn(String) + Send + Sync + 'static {
    move |status| {
        let stage = match ProvisioningStage::from_status(&status) {
            Ok(stage) => stage,
            Err(unknown) => {
                warn!(status = unknown.status(), "ignoring unknown fountain status");
                return;
            }
        };

        match attempt.observe(stage) {
            Observation::Advanced => observer.on_status_update(stage, stage.message()),
            Observation::Duplicate => debug!(%stage, "duplicate status notification"),
            Observation::Stale => {
                debug!(%stage, latest = ?attempt.latest(), "stale status notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    #[derive(Default)]
    struct Recording {
        stages: Mutex<Vec<ProvisioningStage>>,
    }

    impl ProvisioningObserver for Recording {
        fn on_status_update(&self, stage: ProvisioningStage, _message: &str) {
            self.stages.lock().expect("lock should not be poisoned").push(stage);
        }

        fn on_error(&self, _error: &ProvisioningError) {}
    }

    #[test]
    fn status_handler_reports_each_stage_once_in_order() {
        let recording = Arc::new(Recording::default());
        let attempt = AttemptState::new();
        let handler = status_handler(attempt.clone(), recording.clone());

        for status in [
            "wifi_received",
            "wifi_received",
            "supabase_received",
            "bogus",
            "user_received",
            "wifi_received",
            "provisioning_complete",
            "provisioning_complete",
        ] {
            handler(status.to_string());
        }

        assert_eq!(
            vec![
                ProvisioningStage::WifiSent,
                ProvisioningStage::BackendConfigSent,
                ProvisioningStage::UserIdentitySent,
                ProvisioningStage::Complete,
            ],
            *recording.stages.lock().expect("lock should not be poisoned")
        );
        assert!(attempt.is_complete());
    }
}
