use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use super::stage::ProvisioningStage;

/// How one stage observation changed an attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Observation {
    /// The stage is newer than anything seen so far and was recorded.
    Advanced,
    /// The stage equals the latest one already recorded.
    Duplicate,
    /// The stage is older than the latest one already recorded.
    Stale,
}

/// Result of waiting for a stage.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The target stage, or a later one, was observed.
    Reached(ProvisioningStage),
    /// The window elapsed first.
    TimedOut,
}

/// Highest stage observed during one provisioning attempt.
///
/// The notification task writes through [`AttemptState::observe`]; the write sequence
/// reads through [`AttemptState::is_complete`] and waits with
/// [`AttemptState::wait_until`]. Clones share the same cell.
#[derive(Debug, Clone)]
pub struct AttemptState {
    latest: Arc<watch::Sender<Option<ProvisioningStage>>>,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptState {
    /// Starts a fresh attempt with no stage observed.
    #[must_use]
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            latest: Arc::new(latest),
        }
    }

    /// Records `stage` if it moves the attempt forward.
    ///
    /// Check and update happen atomically, so concurrent observers agree on which of
    /// them advanced the attempt.
    pub fn observe(&self, stage: ProvisioningStage) -> Observation {
        let mut observation = Observation::Stale;
        self.latest.send_if_modified(|latest| match *latest {
            Some(current) if current == stage => {
                observation = Observation::Duplicate;
                false
            }
            Some(current) if current > stage => false,
            _ => {
                *latest = Some(stage);
                observation = Observation::Advanced;
                true
            }
        });
        observation
    }

    /// Returns the latest stage observed.
    #[must_use]
    pub fn latest(&self) -> Option<ProvisioningStage> {
        *self.latest.borrow()
    }

    /// Returns whether the fountain reported completion.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.latest() == Some(ProvisioningStage::Complete)
    }

    /// Waits until `target` or a later stage is observed, for at most `window`.
    ///
    /// Completion always ends the wait.
    pub async fn wait_until(&self, target: ProvisioningStage, window: Duration) -> WaitOutcome {
        let mut receiver = self.latest.subscribe();
        let reached = timeout(
            window,
            receiver.wait_for(|latest| latest.is_some_and(|stage| stage >= target)),
        )
        .await;

        match reached {
            Ok(Ok(latest)) => {
                let stage = *latest;
                stage.map_or(WaitOutcome::TimedOut, WaitOutcome::Reached)
            }
            // The sender lives in `self`, so the channel cannot close while we wait.
            Ok(Err(_)) | Err(_) => WaitOutcome::TimedOut,
        }
    }
}
