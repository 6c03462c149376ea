mod app;
mod cli;
mod codec;
mod commissioner;
mod config;
mod discovery;
mod error;
mod hw;
mod protocol;
mod provisioning;
mod telemetry;
mod terminal;
mod utils;

pub use app::{fake_transport_backend_from_args, run, run_with_clients};
pub use cli::{
    Args, Command, FakeArgs, LogLevel, OutputFormat, ProvisionArgs, RunOptions, ScanArgs,
};
pub use codec::{CodecError, CredentialCodec, WireEncoding};
pub use commissioner::Commissioner;
pub use config::{CredentialsFile, ProvisioningConfig, default_credentials_path};
pub use discovery::{DeviceDiscovery, ScanStopReason, ScanSummary};
pub use error::{
    CommissionError, CredentialsError, FixtureError, InteractionError, ProtocolError,
    ProvisioningError,
};
pub use hw::{
    Advertisement, AdvertisementStream, CharacteristicInfo, ConnectionHandle, FakeBackend,
    FakeBackendConfig, FakeRecorder, FakeScript, GattLink, NotificationStream, RadioState,
    ScanFixture, ScannedDevice, ServiceInfo, Subscription, TransportAdapter, TransportBackend,
    fake_transport_backend, real_transport_backend,
};
pub use protocol::{EndpointId, FOUNTAIN_NAME_PREFIX};
pub use provisioning::{
    AttemptState, DeviceCredentials, Observation, ProvisioningObserver, ProvisioningOutcome,
    ProvisioningReport, ProvisioningStage, ProvisioningStep, Provisioner, StepPayload,
    UnknownStatus, WaitOutcome,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
