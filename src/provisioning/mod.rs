mod attempt;
mod credentials;
mod machine;
mod stage;
mod step;

pub use self::attempt::{AttemptState, Observation, WaitOutcome};
pub use self::credentials::{DeviceCredentials, StepPayload};
pub use self::machine::{
    ProvisioningObserver, ProvisioningOutcome, ProvisioningReport, Provisioner,
};
pub use self::stage::{ProvisioningStage, UnknownStatus};
pub use self::step::ProvisioningStep;
