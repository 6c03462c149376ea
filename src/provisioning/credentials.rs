use std::fmt;

use bon::Builder;
use serde::Serialize;

use super::step::ProvisioningStep;

/// Everything the fountain needs to join Wi-Fi and report to the backend.
///
/// Built by the caller right before provisioning and moved into the attempt. Secrets
/// are redacted from `Debug` output.
#[derive(Clone, Eq, PartialEq, Builder)]
#[builder(on(String, into))]
pub struct DeviceCredentials {
    wifi_ssid: String,
    wifi_password: String,
    backend_url: String,
    backend_key: String,
    user_id: String,
    household_id: String,
}

impl fmt::Debug for DeviceCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DeviceCredentials")
            .field("wifi_ssid", &self.wifi_ssid)
            .field("wifi_password", &"<redacted>")
            .field("backend_url", &self.backend_url)
            .field("backend_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("household_id", &self.household_id)
            .finish()
    }
}

/// JSON body written for one provisioning step.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepPayload<'a> {
    Wifi { ssid: &'a str, password: &'a str },
    Backend { url: &'a str, anon_key: &'a str },
    Identity { user_id: &'a str, household_id: &'a str },
}

impl DeviceCredentials {
    /// Returns the Wi-Fi network name.
    #[must_use]
    pub fn wifi_ssid(&self) -> &str {
        &self.wifi_ssid
    }

    /// Returns the backend base URL.
    #[must_use]
    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    /// Returns the owning user id.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the owning household id.
    #[must_use]
    pub fn household_id(&self) -> &str {
        &self.household_id
    }

    /// Payload written for `step`.
    #[must_use]
    pub fn payload_for(&self, step: ProvisioningStep) -> StepPayload<'_> {
        match step {
            ProvisioningStep::WifiCredentials => StepPayload::Wifi {
                ssid: &self.wifi_ssid,
                password: &self.wifi_password,
            },
            ProvisioningStep::BackendConfig => StepPayload::Backend {
                url: &self.backend_url,
                anon_key: &self.backend_key,
            },
            ProvisioningStep::UserIdentity => StepPayload::Identity {
                user_id: &self.user_id,
                household_id: &self.household_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn credentials() -> DeviceCredentials {
        DeviceCredentials::builder()
            .wifi_ssid("home")
            .wifi_password("hunter2")
            .backend_url("https://api.example.test")
            .backend_key("anon-123")
            .user_id("user-1")
            .household_id("house-9")
            .build()
    }

    #[rstest]
    #[case(ProvisioningStep::WifiCredentials, r#"{"ssid":"home","password":"hunter2"}"#)]
    #[case(
        ProvisioningStep::BackendConfig,
        r#"{"url":"https://api.example.test","anon_key":"anon-123"}"#
    )]
    #[case(
        ProvisioningStep::UserIdentity,
        r#"{"user_id":"user-1","household_id":"house-9"}"#
    )]
    fn payloads_use_firmware_field_names(#[case] step: ProvisioningStep, #[case] expected: &str) {
        let json = serde_json::to_string(&credentials().payload_for(step))
            .expect("payload should serialise");
        assert_eq!(expected, json);
    }

    #[test]
    fn debug_output_redacts_secrets() {
        assert_snapshot!(
            format!("{:?}", credentials()),
            @r#"DeviceCredentials { wifi_ssid: "home", wifi_password: "<redacted>", backend_url: "https://api.example.test", backend_key: "<redacted>", user_id: "user-1", household_id: "house-9" }"#
        );
    }
}
