use std::path::PathBuf;
use std::time::Duration;

use derive_more::From;
use thiserror::Error;

use crate::codec::CodecError;
use crate::protocol::{EndpointId, endpoint_metadata};
use crate::provisioning::ProvisioningStep;

/// Errors returned by BLE transport operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("device `{device_id}` is not known to any adapter; scan for it first")]
    DeviceNotFound { device_id: String },
    #[error("timed out after {timeout:?} while connecting to `{device_id}`")]
    ConnectTimeout {
        device_id: String,
        timeout: Duration,
    },
    #[error("the connection to the fountain is no longer live")]
    NotConnected,
    #[error("the fountain dropped the connection")]
    PeerDisconnected,
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("required fountain endpoints are missing: {missing}")]
    MissingRequiredEndpoints { missing: String },
    #[error("this platform negotiates the ATT MTU itself")]
    MtuNegotiationUnsupported,
    #[error("scripted transport failure during `{operation}`")]
    Injected { operation: &'static str },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Fixture(#[from] FixtureError),
}

impl InteractionError {
    /// Returns whether the error is the expected shape of a peer that already went
    /// away (rebooting, out of range, or a link that timed out).
    #[must_use]
    pub fn is_expected_disconnect(&self) -> bool {
        match self {
            Self::Ble(error) => matches!(
                error,
                btleplug::Error::NotConnected
                    | btleplug::Error::DeviceNotFound
                    | btleplug::Error::TimedOut(_)
            ),
            Self::NotConnected | Self::PeerDisconnected | Self::ConnectTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Errors that end a provisioning attempt before the fountain reported completion.
///
/// Each variant names how far the attempt got; retry from a fresh connection.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("connection to `{device_id}` is not live; reconnect and retry")]
    NotConnected { device_id: String },
    #[error("failed to subscribe to fountain status notifications")]
    Subscribe(#[source] InteractionError),
    #[error("failed to send {step} to the fountain")]
    StepWrite {
        step: ProvisioningStep,
        #[source]
        source: InteractionError,
    },
}

impl ProvisioningError {
    /// Returns the credential step that failed, if the failure happened during a write.
    #[must_use]
    pub fn step(&self) -> Option<ProvisioningStep> {
        match self {
            Self::StepWrite { step, .. } => Some(*step),
            Self::NotConnected { .. } | Self::Subscribe(_) => None,
        }
    }
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("the fake discovery fixture is empty")]
    EmptyFixture,
    #[error("fixture records must contain three pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
}

/// Errors returned while assembling device credentials.
#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("failed to read credentials file `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("credentials file `{}` is not valid JSON", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("missing credential `{field}`; pass --{flag} or set it in the credentials file")]
    MissingField {
        field: &'static str,
        flag: &'static str,
    },
}

/// Errors raised by the caller-side commissioning flow.
#[derive(Debug, Error)]
pub enum CommissionError {
    #[error("bluetooth is not ready; check that the radio is on and permission is granted")]
    RadioNotReady,
    #[error("no fountain advertising `{prefix}*` was found within {window:?}")]
    NoDeviceFound { prefix: String, window: Duration },
}

/// Errors returned when validating runtime backend options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
    #[error(transparent)]
    #[from(ProvisioningError, Box<ProvisioningError>)]
    Provisioning(Box<ProvisioningError>),
    #[error(transparent)]
    #[from(CommissionError, Box<CommissionError>)]
    Commission(Box<CommissionError>),
    #[error(transparent)]
    #[from(CredentialsError, Box<CredentialsError>)]
    Credentials(Box<CredentialsError>),
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::ble_not_connected(InteractionError::Ble(btleplug::Error::NotConnected), true)]
    #[case::ble_timeout(
        InteractionError::Ble(btleplug::Error::TimedOut(Duration::from_secs(1))),
        true
    )]
    #[case::peer_gone(InteractionError::PeerDisconnected, true)]
    #[case::not_connected(InteractionError::NotConnected, true)]
    #[case::permission(InteractionError::Ble(btleplug::Error::PermissionDenied), false)]
    #[case::injected(InteractionError::Injected { operation: "write" }, false)]
    fn expected_disconnect_classification(
        #[case] error: InteractionError,
        #[case] expected: bool,
    ) {
        assert_eq!(expected, error.is_expected_disconnect());
    }

    #[test]
    fn step_write_names_the_step() {
        let error = ProvisioningError::StepWrite {
            step: ProvisioningStep::WifiCredentials,
            source: InteractionError::Injected { operation: "write" },
        };
        assert_eq!("failed to send Wi-Fi credentials to the fountain", error.to_string());
        assert_eq!(Some(ProvisioningStep::WifiCredentials), error.step());
    }

    #[test]
    fn missing_endpoint_message_names_endpoint() {
        let error = InteractionError::MissingEndpoint {
            endpoint: EndpointId::StatusCharacteristic,
        };
        assert_eq!(
            "required endpoint `provisioning status` (d5913036-2d8a-41ee-85b9-4e361aa5c8a7) was not found on the connected device",
            error.to_string()
        );
    }
}
