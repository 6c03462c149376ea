use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use rstest::rstest;

use fountain_provision::{
    Advertisement, Commissioner, DeviceCredentials, EndpointId, FakeBackend, FakeBackendConfig,
    FakeRecorder, FakeScript, InteractionError, ProtocolError, ProvisioningConfig,
    ProvisioningError, ProvisioningObserver, ProvisioningOutcome, ProvisioningStage,
    ProvisioningStep, TransportBackend,
};

const DEVICE_ID: &str = "AA:BB:CC";

#[derive(Debug, Default)]
struct RecordingObserver {
    stages: Mutex<Vec<ProvisioningStage>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingObserver {
    fn stages(&self) -> Vec<ProvisioningStage> {
        self.stages.lock().expect("stage log poisoned").clone()
    }

    fn errors(&self) -> Vec<String> {
        self.errors.lock().expect("error log poisoned").clone()
    }
}

impl ProvisioningObserver for RecordingObserver {
    fn on_status_update(&self, stage: ProvisioningStage, _message: &str) {
        self.stages.lock().expect("stage log poisoned").push(stage);
    }

    fn on_error(&self, error: &ProvisioningError) {
        self.errors
            .lock()
            .expect("error log poisoned")
            .push(error.to_string());
    }
}

fn credentials() -> DeviceCredentials {
    DeviceCredentials::builder()
        .wifi_ssid("home")
        .wifi_password("secret")
        .backend_url("https://api.example.test")
        .backend_key("anon")
        .user_id("user-1")
        .household_id("house-1")
        .build()
}

fn fountain() -> Advertisement {
    Advertisement::new(DEVICE_ID, Some("PetFountain-01".to_string()), Some(-43))
}

fn backend(config: FakeBackendConfig) -> (Arc<dyn TransportBackend>, FakeRecorder) {
    let backend = FakeBackend::new(config);
    let recorder = backend.recorder();
    (Arc::new(backend), recorder)
}

fn scripted(script: FakeScript) -> FakeBackendConfig {
    FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .script(script)
        .build()
}

async fn commission(
    config: FakeBackendConfig,
    provisioning: ProvisioningConfig,
) -> (
    Result<fountain_provision::ProvisioningReport, ProtocolError>,
    Arc<RecordingObserver>,
    FakeRecorder,
) {
    let (backend, recorder) = backend(config);
    let observer = Arc::new(RecordingObserver::default());
    let commissioner = Commissioner::new(backend, provisioning);
    let result = commissioner
        .commission(DEVICE_ID, credentials(), observer.clone())
        .await;
    (result, observer, recorder)
}

#[tokio::test(start_paused = true)]
async fn happy_path_reports_every_stage_in_order() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::Happy), ProvisioningConfig::default()).await;

    let report = result.expect("provisioning should succeed");
    assert_eq!(DEVICE_ID, report.device_id());
    assert_eq!(ProvisioningOutcome::Confirmed, report.outcome());
    assert_eq!(Some(ProvisioningStage::Complete), report.last_stage());
    assert_eq!(
        vec![
            ProvisioningStage::Connected,
            ProvisioningStage::WifiSent,
            ProvisioningStage::BackendConfigSent,
            ProvisioningStage::UserIdentitySent,
            ProvisioningStage::Complete,
        ],
        observer.stages()
    );
    assert_eq!(Vec::<String>::new(), observer.errors());
    assert_eq!(
        vec![
            EndpointId::WifiCharacteristic,
            EndpointId::BackendCharacteristic,
            EndpointId::IdentityCharacteristic,
        ],
        recorder.written_endpoints()
    );
    assert_eq!(1, recorder.cancellations());
    assert_eq!(1, recorder.unsubscribes());
    assert_eq!(1, recorder.disconnects());
    assert_eq!(vec![512], recorder.mtu_requests());
}

#[tokio::test(start_paused = true)]
async fn writes_carry_json_credentials() {
    let (result, _observer, recorder) =
        commission(scripted(FakeScript::Happy), ProvisioningConfig::default()).await;
    result.expect("provisioning should succeed");

    let bodies: Vec<serde_json::Value> = recorder
        .writes()
        .iter()
        .map(|(_, payload)| serde_json::from_slice(payload).expect("payload should be JSON"))
        .collect();
    assert_eq!(
        vec![
            serde_json::json!({ "ssid": "home", "password": "secret" }),
            serde_json::json!({ "url": "https://api.example.test", "anon_key": "anon" }),
            serde_json::json!({ "user_id": "user-1", "household_id": "house-1" }),
        ],
        bodies
    );
}

#[tokio::test(start_paused = true)]
async fn missing_completion_is_an_unconfirmed_success() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::LostFinal), ProvisioningConfig::default()).await;

    let report = result.expect("lost completion should still resolve");
    assert_eq!(ProvisioningOutcome::Unconfirmed, report.outcome());
    assert_eq!(Some(ProvisioningStage::UserIdentitySent), report.last_stage());
    assert_eq!(Vec::<String>::new(), observer.errors());
    assert_eq!(3, recorder.written_endpoints().len());
}

#[tokio::test(start_paused = true)]
async fn dead_link_fails_before_any_write() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::Disconnected), ProvisioningConfig::default()).await;

    assert_matches!(
        result,
        Err(ProtocolError::Provisioning(error))
            if matches!(*error, ProvisioningError::NotConnected { ref device_id } if device_id == DEVICE_ID)
    );
    assert_eq!(1, observer.errors().len());
    assert_eq!(Vec::<ProvisioningStage>::new(), observer.stages());
    assert_eq!(Vec::<EndpointId>::new(), recorder.written_endpoints());
}

#[tokio::test(start_paused = true)]
async fn failed_wifi_write_names_the_step_and_stops() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::WifiWriteFails), ProvisioningConfig::default()).await;

    let error = match result {
        Err(ProtocolError::Provisioning(error)) => error,
        other => panic!("expected a provisioning error, got {other:?}"),
    };
    assert_eq!(Some(ProvisioningStep::WifiCredentials), error.step());
    assert_matches!(
        *error,
        ProvisioningError::StepWrite {
            source: InteractionError::Injected { operation: "write" },
            ..
        }
    );
    assert_eq!(
        vec!["failed to send Wi-Fi credentials to the fountain".to_string()],
        observer.errors()
    );
    assert_eq!(vec![ProvisioningStage::Connected], observer.stages());
    assert_eq!(Vec::<EndpointId>::new(), recorder.written_endpoints());
    assert_eq!(1, recorder.disconnects());
}

#[rstest]
#[case::backend(
    EndpointId::BackendCharacteristic,
    ProvisioningStep::BackendConfig,
    vec![EndpointId::WifiCharacteristic],
    ProvisioningStage::WifiSent
)]
#[case::identity(
    EndpointId::IdentityCharacteristic,
    ProvisioningStep::UserIdentity,
    vec![EndpointId::WifiCharacteristic, EndpointId::BackendCharacteristic],
    ProvisioningStage::BackendConfigSent
)]
#[tokio::test(start_paused = true)]
async fn later_write_failure_names_its_step(
    #[case] failing: EndpointId,
    #[case] step: ProvisioningStep,
    #[case] written: Vec<EndpointId>,
    #[case] last_stage: ProvisioningStage,
) {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .failing_write(failing)
        .build();
    let (result, observer, recorder) = commission(config, ProvisioningConfig::default()).await;

    let error = match result {
        Err(ProtocolError::Provisioning(error)) => error,
        other => panic!("expected a provisioning error, got {other:?}"),
    };
    assert_eq!(Some(step), error.step());
    assert_eq!(vec![format!("failed to send {step} to the fountain")], observer.errors());
    assert_eq!(Some(&last_stage), observer.stages().last());
    assert_eq!(written, recorder.written_endpoints());
    assert_eq!(1, recorder.unsubscribes());
    assert_eq!(1, recorder.disconnects());
}

#[tokio::test(start_paused = true)]
async fn status_subscription_failure_aborts_before_writing() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .subscribe_fails(true)
        .build();
    let (result, observer, recorder) = commission(config, ProvisioningConfig::default()).await;

    let error = match result {
        Err(ProtocolError::Provisioning(error)) => error,
        other => panic!("expected a provisioning error, got {other:?}"),
    };
    assert_eq!(None, error.step());
    assert_matches!(
        *error,
        ProvisioningError::Subscribe(InteractionError::Injected {
            operation: "subscribe"
        })
    );
    assert_eq!(1, observer.errors().len());
    assert_eq!(Vec::<ProvisioningStage>::new(), observer.stages());
    assert_eq!(Vec::<EndpointId>::new(), recorder.written_endpoints());
    assert_eq!(0, recorder.unsubscribes());
    assert_eq!(1, recorder.disconnects());
}

#[tokio::test(start_paused = true)]
async fn duplicate_completion_is_reported_once() {
    let (result, observer, _recorder) =
        commission(scripted(FakeScript::DuplicateComplete), ProvisioningConfig::default()).await;

    assert_eq!(
        ProvisioningOutcome::Confirmed,
        result.expect("provisioning should succeed").outcome()
    );
    let completions = observer
        .stages()
        .into_iter()
        .filter(|stage| *stage == ProvisioningStage::Complete)
        .count();
    assert_eq!(1, completions);
}

#[tokio::test(start_paused = true)]
async fn early_completion_skips_remaining_writes() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::CompleteAfterWifi), ProvisioningConfig::default()).await;

    assert_eq!(
        ProvisioningOutcome::Confirmed,
        result.expect("provisioning should succeed").outcome()
    );
    assert_eq!(
        vec![EndpointId::WifiCharacteristic],
        recorder.written_endpoints()
    );
    assert_eq!(
        Some(&ProvisioningStage::Complete),
        observer.stages().last()
    );
}

#[tokio::test(start_paused = true)]
async fn reboot_during_final_write_is_success() {
    let (result, observer, recorder) =
        commission(scripted(FakeScript::RebootErrors), ProvisioningConfig::default()).await;

    let report = result.expect("a reboot after completion should not fail the attempt");
    assert_eq!(ProvisioningOutcome::Confirmed, report.outcome());
    assert_eq!(Vec::<String>::new(), observer.errors());
    assert_eq!(
        Some(&ProvisioningStage::Complete),
        observer.stages().last()
    );
    assert_eq!(3, recorder.written_endpoints().len());
}

#[rstest]
#[case::wifi(EndpointId::WifiCharacteristic)]
#[case::status(EndpointId::StatusCharacteristic)]
#[tokio::test(start_paused = true)]
async fn missing_endpoint_rejects_the_connection(#[case] missing: EndpointId) {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .missing_endpoint(missing)
        .build();
    let (result, observer, recorder) = commission(config, ProvisioningConfig::default()).await;

    assert_matches!(
        result,
        Err(ProtocolError::Interaction(error))
            if matches!(*error, InteractionError::MissingRequiredEndpoints { .. })
    );
    assert_eq!(Vec::<ProvisioningStage>::new(), observer.stages());
    assert_eq!(1, recorder.disconnects());
}

#[tokio::test(start_paused = true)]
async fn slow_connection_times_out() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .connect_delay(Duration::from_secs(30))
        .build();
    let provisioning = ProvisioningConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .build();
    let (result, _observer, recorder) = commission(config, provisioning).await;

    assert_matches!(
        result,
        Err(ProtocolError::Interaction(error))
            if matches!(*error, InteractionError::ConnectTimeout { .. })
    );
    assert_eq!(0, recorder.connects());
}

#[tokio::test(start_paused = true)]
async fn unknown_device_is_not_found() {
    let (backend, _recorder) = backend(scripted(FakeScript::Happy));
    let commissioner = Commissioner::new(backend, ProvisioningConfig::default());

    let result = commissioner
        .commission(
            "11:22:33",
            credentials(),
            Arc::new(RecordingObserver::default()),
        )
        .await;
    assert_matches!(
        result,
        Err(ProtocolError::Interaction(error))
            if matches!(*error, InteractionError::DeviceNotFound { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn fallback_timer_abandons_a_silent_fountain() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .ack_delay(Duration::from_secs(60))
        .build();
    let provisioning = ProvisioningConfig::builder()
        .outer_timeout(Duration::from_secs(3))
        .build();
    let (result, observer, recorder) = commission(config, provisioning).await;

    let report = result.expect("fallback should resolve with a report");
    assert_eq!(ProvisioningOutcome::FallbackElapsed, report.outcome());
    assert_eq!(None, report.last_stage());
    assert_eq!(Vec::<String>::new(), observer.errors());
    assert_eq!(1, recorder.disconnects());
}

#[tokio::test(start_paused = true)]
async fn radio_off_fails_before_connecting() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![fountain()])
        .radio_state(fountain_provision::RadioState::PoweredOff)
        .build();
    let (result, _observer, recorder) = commission(config, ProvisioningConfig::default()).await;

    assert_matches!(
        result,
        Err(ProtocolError::Commission(error))
            if matches!(*error, fountain_provision::CommissionError::RadioNotReady)
    );
    assert_eq!(0, recorder.connects());
}

#[tokio::test(start_paused = true)]
async fn commission_first_scans_then_provisions() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![
            Advertisement::new("00:11:22", Some("Speaker".to_string()), Some(-65)),
            fountain(),
        ])
        .build();
    let (backend, recorder) = backend(config);
    let observer = Arc::new(RecordingObserver::default());
    let commissioner = Commissioner::new(backend, ProvisioningConfig::default());

    let report = commissioner
        .commission_first(credentials(), observer.clone())
        .await
        .expect("first fountain should be provisioned");

    assert_eq!(DEVICE_ID, report.device_id());
    assert_eq!(ProvisioningOutcome::Confirmed, report.outcome());
    assert_eq!(1, recorder.scans_started());
    assert_eq!(1, recorder.connects());
}

#[tokio::test(start_paused = true)]
async fn commission_first_without_fountains_reports_no_device() {
    let config = FakeBackendConfig::builder()
        .advertisements(vec![Advertisement::new(
            "00:11:22",
            Some("Speaker".to_string()),
            Some(-65),
        )])
        .build();
    let (backend, recorder) = backend(config);
    let commissioner = Commissioner::new(backend, ProvisioningConfig::default());

    let result = commissioner
        .commission_first(credentials(), Arc::new(RecordingObserver::default()))
        .await;
    assert_matches!(
        result,
        Err(ProtocolError::Commission(error))
            if matches!(*error, fountain_provision::CommissionError::NoDeviceFound { .. })
    );
    assert_eq!(0, recorder.connects());
}
