use std::sync::Arc;

use fountain_macros::progress;
use owo_colors::OwoColorize;
use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::config::ProvisioningConfig;
use crate::discovery::DeviceDiscovery;
use crate::error::{CommissionError, InteractionError, ProtocolError};
use crate::hw::{ConnectionHandle, ScannedDevice, TransportAdapter, TransportBackend};
use crate::provisioning::{
    DeviceCredentials, ProvisioningObserver, ProvisioningOutcome, ProvisioningReport, Provisioner,
};

/// Caller-side provisioning flow: readiness, optional discovery, connect, provision
/// under an outer fallback timer, release.
///
/// ```
/// # async fn demo() -> Result<(), fountain_provision::ProtocolError> {
/// use fountain_provision::{Commissioner, FakeBackendConfig, ProvisioningConfig};
///
/// let backend = fountain_provision::fake_transport_backend(FakeBackendConfig::builder().build());
/// let commissioner = Commissioner::new(backend, ProvisioningConfig::default());
/// assert!(commissioner.adapter().ensure_ready().await);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Commissioner {
    adapter: TransportAdapter,
    discovery: DeviceDiscovery,
    provisioner: Provisioner,
    config: ProvisioningConfig,
}

impl Commissioner {
    /// Wires an adapter, discovery and provisioner around one backend.
    #[must_use]
    pub fn new(backend: Arc<dyn TransportBackend>, config: ProvisioningConfig) -> Self {
        Self {
            adapter: TransportAdapter::new(Arc::clone(&backend), &config),
            discovery: DeviceDiscovery::new(backend, config.name_prefix()),
            provisioner: Provisioner::new(&config),
            config,
        }
    }

    /// Returns the transport adapter.
    #[must_use]
    pub fn adapter(&self) -> &TransportAdapter {
        &self.adapter
    }

    /// Returns the discovery helper.
    #[must_use]
    pub fn discovery(&self) -> &DeviceDiscovery {
        &self.discovery
    }

    /// Returns the settings this commissioner runs with.
    #[must_use]
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    /// Scans for the first advertising fountain.
    ///
    /// # Errors
    ///
    /// Returns an error when no fountain shows up within the scan window.
    #[progress(
        message = "Scanning for fountains",
        finished = format!("{} Fountain found", "✓".green()),
        failed = format!("{} No fountain found", "✗".red()),
    )]
    #[instrument(skip(self), level = "info", fields(window = ?self.config.scan_duration()))]
    pub async fn find_first_device(&self) -> Result<ScannedDevice, CommissionError> {
        self.discovery
            .first_match(self.config.scan_duration())
            .await
            .ok_or_else(|| CommissionError::NoDeviceFound {
                prefix: self.config.name_prefix().to_string(),
                window: self.config.scan_duration(),
            })
    }

    /// Finds the first fountain and provisions it.
    ///
    /// # Errors
    ///
    /// See [`Commissioner::commission`]; additionally fails when no fountain is found.
    pub async fn commission_first(
        &self,
        credentials: DeviceCredentials,
        observer: Arc<dyn ProvisioningObserver>,
    ) -> Result<ProvisioningReport, ProtocolError> {
        if !self.adapter.ensure_ready().await {
            return Err(CommissionError::RadioNotReady.into());
        }
        let device = self.find_first_device().await?;
        self.commission(device.id(), credentials, observer).await
    }

    /// Connects to `device_id` and provisions it.
    ///
    /// When the outer fallback timer fires first the attempt is abandoned and the
    /// report says [`ProvisioningOutcome::FallbackElapsed`]; callers may then register
    /// the device on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns an error when the radio is not ready, the connection fails, or the
    /// provisioning attempt fails before completion.
    #[instrument(
        skip(self, credentials, observer),
        level = "info",
        fields(outer_timeout = ?self.config.outer_timeout())
    )]
    pub async fn commission(
        &self,
        device_id: &str,
        credentials: DeviceCredentials,
        observer: Arc<dyn ProvisioningObserver>,
    ) -> Result<ProvisioningReport, ProtocolError> {
        if !self.adapter.ensure_ready().await {
            return Err(CommissionError::RadioNotReady.into());
        }

        let handle = self.connect(device_id).await?;
        let attempt = timeout(
            self.config.outer_timeout(),
            self.provisioner.provision(handle, credentials, observer),
        )
        .await;

        let result = match attempt {
            Ok(result) => result.map_err(ProtocolError::from),
            Err(_) => {
                warn!("fallback timer fired before the attempt finished");
                Ok(ProvisioningReport::new(
                    device_id,
                    ProvisioningOutcome::FallbackElapsed,
                    None,
                ))
            }
        };

        self.adapter.disconnect().await;
        result
    }

    #[progress(
        message = "Connecting to fountain",
        finished = format!("{} Connected", "✓".green()),
        failed = format!("{} Connection failed", "✗".red()),
    )]
    #[instrument(skip(self), level = "info")]
    async fn connect(&self, device_id: &str) -> Result<ConnectionHandle, InteractionError> {
        self.adapter.connect(device_id).await
    }
}
