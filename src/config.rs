use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::codec::WireEncoding;
use crate::error::CredentialsError;
use crate::protocol::{FOUNTAIN_NAME_PREFIX, REQUESTED_ATT_MTU};
use crate::provisioning::DeviceCredentials;

const CREDENTIALS_FILE_NAME: &str = "credentials.json";

/// Timing, encoding and discovery settings for one provisioning client.
///
/// ```
/// use std::time::Duration;
///
/// let config = fountain_provision::ProvisioningConfig::builder()
///     .final_ack_window(Duration::from_secs(20))
///     .build();
/// assert_eq!(Duration::from_secs(10), config.connect_timeout());
/// assert_eq!(Duration::from_secs(20), config.final_ack_window());
/// ```
#[derive(Debug, Clone, Builder)]
pub struct ProvisioningConfig {
    #[builder(default = Duration::from_secs(10))]
    connect_timeout: Duration,
    #[builder(default = Duration::from_millis(300))]
    connect_settle: Duration,
    #[builder(default = Duration::from_millis(500))]
    subscription_settle: Duration,
    #[builder(default = Duration::from_secs(5))]
    wifi_ack_window: Duration,
    #[builder(default = Duration::from_secs(5))]
    backend_ack_window: Duration,
    #[builder(default = Duration::from_secs(10))]
    final_ack_window: Duration,
    #[builder(default = Duration::from_millis(250))]
    write_failure_grace: Duration,
    #[builder(default = REQUESTED_ATT_MTU)]
    requested_mtu: u16,
    #[builder(default = Duration::from_secs(15))]
    outer_timeout: Duration,
    #[builder(default = Duration::from_secs(10))]
    scan_duration: Duration,
    #[builder(into, default = FOUNTAIN_NAME_PREFIX.to_string())]
    name_prefix: String,
    #[builder(default)]
    encoding: WireEncoding,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ProvisioningConfig {
    /// Upper bound for the initial connection.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Pause between cancelling a stale connection and reconnecting.
    #[must_use]
    pub fn connect_settle(&self) -> Duration {
        self.connect_settle
    }

    /// Pause between subscribing to status and the first write.
    #[must_use]
    pub fn subscription_settle(&self) -> Duration {
        self.subscription_settle
    }

    /// Wait for the Wi-Fi acknowledgement.
    #[must_use]
    pub fn wifi_ack_window(&self) -> Duration {
        self.wifi_ack_window
    }

    /// Wait for the backend configuration acknowledgement.
    #[must_use]
    pub fn backend_ack_window(&self) -> Duration {
        self.backend_ack_window
    }

    /// Wait for completion after the identity write.
    #[must_use]
    pub fn final_ack_window(&self) -> Duration {
        self.final_ack_window
    }

    /// How long a failed write may still be rescued by a completion notification.
    #[must_use]
    pub fn write_failure_grace(&self) -> Duration {
        self.write_failure_grace
    }

    /// ATT MTU requested before writing credentials.
    #[must_use]
    pub fn requested_mtu(&self) -> u16 {
        self.requested_mtu
    }

    /// Caller-side fallback timer around a whole attempt.
    #[must_use]
    pub fn outer_timeout(&self) -> Duration {
        self.outer_timeout
    }

    /// Scan window used when looking for a fountain.
    #[must_use]
    pub fn scan_duration(&self) -> Duration {
        self.scan_duration
    }

    /// Advertised name prefix identifying fountains.
    #[must_use]
    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }

    /// Wire encoding of characteristic values.
    #[must_use]
    pub fn encoding(&self) -> WireEncoding {
        self.encoding
    }
}

/// Credentials as stored on disk. Every field may be supplied or overridden from the
/// command line instead.
#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize, clap::Args)]
#[serde(deny_unknown_fields)]
pub struct CredentialsFile {
    /// Wi-Fi network name.
    #[arg(long = "ssid")]
    #[serde(default)]
    pub wifi_ssid: Option<String>,
    /// Wi-Fi password.
    #[arg(long = "password")]
    #[serde(default)]
    pub wifi_password: Option<String>,
    /// Backend base URL the fountain reports to.
    #[arg(long)]
    #[serde(default)]
    pub backend_url: Option<String>,
    /// Backend anonymous API key.
    #[arg(long)]
    #[serde(default)]
    pub backend_key: Option<String>,
    /// Owning user id.
    #[arg(long)]
    #[serde(default)]
    pub user_id: Option<String>,
    /// Owning household id.
    #[arg(long)]
    #[serde(default)]
    pub household_id: Option<String>,
}

impl CredentialsFile {
    /// Reads a credentials file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is not valid JSON.
    #[instrument(level = "debug")]
    pub fn load(path: &Path) -> Result<Self, CredentialsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CredentialsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the default credentials file if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the default file exists but cannot be parsed.
    pub fn load_default() -> Result<Self, CredentialsError> {
        match default_credentials_path() {
            Some(path) if path.is_file() => Self::load(&path),
            Some(path) => {
                debug!(path = %path.display(), "no default credentials file");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Fills gaps in `self` from `fallback`; fields already set win.
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            wifi_ssid: self.wifi_ssid.or(fallback.wifi_ssid),
            wifi_password: self.wifi_password.or(fallback.wifi_password),
            backend_url: self.backend_url.or(fallback.backend_url),
            backend_key: self.backend_key.or(fallback.backend_key),
            user_id: self.user_id.or(fallback.user_id),
            household_id: self.household_id.or(fallback.household_id),
        }
    }

    /// Converts into complete credentials.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::MissingField`] naming the first absent field.
    pub fn into_credentials(self) -> Result<DeviceCredentials, CredentialsError> {
        Ok(DeviceCredentials::builder()
            .wifi_ssid(required(self.wifi_ssid, "wifi_ssid", "ssid")?)
            .wifi_password(required(self.wifi_password, "wifi_password", "password")?)
            .backend_url(required(self.backend_url, "backend_url", "backend-url")?)
            .backend_key(required(self.backend_key, "backend_key", "backend-key")?)
            .user_id(required(self.user_id, "user_id", "user-id")?)
            .household_id(required(self.household_id, "household_id", "household-id")?)
            .build())
    }
}

fn required(
    value: Option<String>,
    field: &'static str,
    flag: &'static str,
) -> Result<String, CredentialsError> {
    value.ok_or(CredentialsError::MissingField { field, flag })
}

/// Default location of the credentials file in the platform config directory.
#[must_use]
pub fn default_credentials_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "PetFountain", "fountain-provision")
        .map(|dirs| dirs.config_dir().join(CREDENTIALS_FILE_NAME))
}
