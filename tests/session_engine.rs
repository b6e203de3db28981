//! Charger-session behaviour driven through the dispatcher, with a scripted
//! backend and a recording charger.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::{json, Value};

use ocpp_bridge::application::dispatch::{ocpp16_schemas, ActionDispatcher, CallContext};
use ocpp_bridge::application::ports::{
    BackendApi, BootInfo, ChargePointCommands, CommandStatus, ConfigurationEntry,
    ConfigurationResult, ConnectorStatusReport, MeterReport, StartedTransaction, TransactionStart,
    TransactionStop,
};
use ocpp_bridge::application::{SessionEngine, SessionStore};
use ocpp_bridge::config::{ChargingProfileConfig, SessionConfig};
use ocpp_bridge::domain::{AuthorizationRecord, SetChargingProfilePayload};
use ocpp_bridge::support::{BackendError, CommandError, RpcErrorCode};

const CP: &str = "CP001";

// ── Scripted backend ───────────────────────────────────────────

struct ScriptedBackend {
    authorize: Mutex<Result<AuthorizationStatus, BackendError>>,
    boot: Mutex<Result<(), BackendError>>,
    start: Mutex<Result<StartedTransaction, BackendError>>,
    stop: Mutex<Result<(), BackendError>>,
    heartbeat: Mutex<Result<DateTime<Utc>, BackendError>>,
    starts: Mutex<Vec<TransactionStart>>,
    stops: Mutex<Vec<TransactionStop>>,
    meters: Mutex<Vec<MeterReport>>,
    statuses: Mutex<Vec<ConnectorStatusReport>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            authorize: Mutex::new(Ok(AuthorizationStatus::Accepted)),
            boot: Mutex::new(Ok(())),
            start: Mutex::new(Ok(StartedTransaction {
                transaction_id: 42,
                max_power_kw: Some(7.4),
            })),
            stop: Mutex::new(Ok(())),
            heartbeat: Mutex::new(Err(BackendError::Timeout)),
            starts: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            meters: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BackendApi for ScriptedBackend {
    async fn verify_identity(&self, charge_point_id: &str) -> Result<String, BackendError> {
        Ok(format!("internal-{}", charge_point_id))
    }

    async fn authorize(&self, _cp: &str, _id_tag: &str) -> Result<IdTagInfo, BackendError> {
        self.authorize
            .lock()
            .unwrap()
            .clone()
            .map(|status| IdTagInfo {
                status,
                expiry_date: None,
                parent_id_tag: None,
            })
    }

    async fn notify_boot(&self, _cp: &str, _info: &BootInfo) -> Result<(), BackendError> {
        self.boot.lock().unwrap().clone()
    }

    async fn notify_heartbeat(&self, _cp: &str) -> Result<DateTime<Utc>, BackendError> {
        self.heartbeat.lock().unwrap().clone()
    }

    async fn start_transaction(
        &self,
        start: &TransactionStart,
    ) -> Result<StartedTransaction, BackendError> {
        self.starts.lock().unwrap().push(start.clone());
        self.start.lock().unwrap().clone()
    }

    async fn stop_transaction(&self, stop: &TransactionStop) -> Result<(), BackendError> {
        self.stops.lock().unwrap().push(stop.clone());
        self.stop.lock().unwrap().clone()
    }

    async fn report_meter_value(&self, report: &MeterReport) -> Result<(), BackendError> {
        self.meters.lock().unwrap().push(report.clone());
        Ok(())
    }

    async fn report_connector_status(
        &self,
        report: &ConnectorStatusReport,
    ) -> Result<(), BackendError> {
        self.statuses.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// ── Recording charger ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Sent {
    RemoteStart { connector_id: u32, id_tag: String },
    RemoteStop { transaction_id: i32 },
    SetChargingProfile(SetChargingProfilePayload),
    GetConfiguration(Vec<String>),
    ChangeConfiguration { key: String, value: String },
}

struct RecordingCharger {
    sent: Mutex<Vec<Sent>>,
    remote_start: Mutex<Result<CommandStatus, CommandError>>,
    remote_start_delay: Duration,
    max_stack_level: Option<String>,
}

impl Default for RecordingCharger {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            remote_start: Mutex::new(Ok(CommandStatus::Accepted)),
            remote_start_delay: Duration::ZERO,
            max_stack_level: Some("3".to_string()),
        }
    }
}

impl RecordingCharger {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn remote_starts(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| matches!(s, Sent::RemoteStart { .. }))
            .collect()
    }
}

#[async_trait]
impl ChargePointCommands for RecordingCharger {
    async fn remote_start_transaction(
        &self,
        _cp: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<CommandStatus, CommandError> {
        self.sent.lock().unwrap().push(Sent::RemoteStart {
            connector_id,
            id_tag: id_tag.to_string(),
        });
        tokio::time::sleep(self.remote_start_delay).await;
        self.remote_start.lock().unwrap().clone()
    }

    async fn remote_stop_transaction(
        &self,
        _cp: &str,
        transaction_id: i32,
    ) -> Result<CommandStatus, CommandError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::RemoteStop { transaction_id });
        Ok(CommandStatus::Accepted)
    }

    async fn set_charging_profile(
        &self,
        _cp: &str,
        profile: &SetChargingProfilePayload,
    ) -> Result<CommandStatus, CommandError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::SetChargingProfile(profile.clone()));
        Ok(CommandStatus::Accepted)
    }

    async fn get_configuration(
        &self,
        _cp: &str,
        keys: &[String],
    ) -> Result<ConfigurationResult, CommandError> {
        self.sent
            .lock()
            .unwrap()
            .push(Sent::GetConfiguration(keys.to_vec()));
        Ok(ConfigurationResult {
            configuration_key: vec![ConfigurationEntry {
                key: "ChargeProfileMaxStackLevel".to_string(),
                readonly: true,
                value: self.max_stack_level.clone(),
            }],
            unknown_key: Vec::new(),
        })
    }

    async fn change_configuration(
        &self,
        _cp: &str,
        key: &str,
        value: &str,
    ) -> Result<CommandStatus, CommandError> {
        self.sent.lock().unwrap().push(Sent::ChangeConfiguration {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(CommandStatus::Accepted)
    }
}

// ── Harness ────────────────────────────────────────────────────

struct Harness {
    backend: Arc<ScriptedBackend>,
    charger: Arc<RecordingCharger>,
    engine: Arc<SessionEngine>,
    dispatcher: ActionDispatcher,
}

impl Harness {
    fn new() -> Self {
        Self::with(ScriptedBackend::default(), RecordingCharger::default(), session_config())
    }

    fn with(backend: ScriptedBackend, charger: RecordingCharger, session: SessionConfig) -> Self {
        let backend = Arc::new(backend);
        let charger = Arc::new(charger);
        let engine = Arc::new(SessionEngine::new(
            backend.clone(),
            charger.clone(),
            SessionStore::shared(),
            session,
            ChargingProfileConfig::default(),
        ));
        let dispatcher = engine.dispatcher(Arc::new(ocpp16_schemas()));
        Self {
            backend,
            charger,
            engine,
            dispatcher,
        }
    }

    async fn call(&self, action: &str, payload: Value) -> Value {
        self.try_call(action, payload)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", action, e))
    }

    async fn try_call(
        &self,
        action: &str,
        payload: Value,
    ) -> Result<Value, ocpp_bridge::support::ProtocolError> {
        let ctx = CallContext {
            charge_point_id: CP.to_string(),
            internal_id: format!("internal-{}", CP),
            message_id: uuid::Uuid::new_v4().to_string(),
        };
        self.dispatcher.dispatch(ctx, action, payload).await
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        profile_settle_delay_ms: 20,
        ..SessionConfig::default()
    }
}

/// Poll `check` until it holds or a second has passed.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Give spawned follow-up commands a chance to run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn status(connector_id: u32, status: &str) -> Value {
    json!({"connectorId": connector_id, "errorCode": "NoError", "status": status})
}

fn start_tx(connector_id: u32, id_tag: &str, meter_start: i32) -> Value {
    json!({
        "connectorId": connector_id,
        "idTag": id_tag,
        "meterStart": meter_start,
        "timestamp": "2024-01-01T10:00:00Z"
    })
}

fn stop_tx(transaction_id: i32, meter_stop: i32) -> Value {
    json!({
        "transactionId": transaction_id,
        "meterStop": meter_stop,
        "timestamp": "2024-01-01T11:00:00Z",
        "idTag": "X",
        "reason": "Local"
    })
}

// ── Authorize ──────────────────────────────────────────────────

#[tokio::test]
async fn authorize_fails_closed_when_backend_unavailable() {
    for error in [
        BackendError::Timeout,
        BackendError::Network("connection refused".into()),
        BackendError::Http {
            status: 503,
            message: "down".into(),
        },
    ] {
        let backend = ScriptedBackend {
            authorize: Mutex::new(Err(error)),
            ..ScriptedBackend::default()
        };
        let h = Harness::with(backend, RecordingCharger::default(), session_config());

        let resp = h.call("Authorize", json!({"idTag": "8B6EDE6E"})).await;
        assert_eq!(resp["idTagInfo"]["status"], "Invalid");
    }
}

#[tokio::test]
async fn authorize_then_preparing_starts_exactly_once() {
    let h = Harness::new();

    let resp = h.call("Authorize", json!({"idTag": "8B6EDE6E"})).await;
    assert_eq!(resp["idTagInfo"]["status"], "Accepted");

    let resp = h.call("StatusNotification", status(1, "Preparing")).await;
    assert_eq!(resp, json!({}));

    assert!(eventually(|| !h.charger.remote_starts().is_empty()).await);
    settle().await;
    assert_eq!(
        h.charger.remote_starts(),
        vec![Sent::RemoteStart {
            connector_id: 1,
            id_tag: "8B6EDE6E".to_string()
        }]
    );

    let snapshot = h.engine.store.snapshot(CP).await;
    assert!(snapshot.charging);
    assert_eq!(snapshot.pending_connector, None);

    // A second Preparing while charging does not start again.
    h.call("StatusNotification", status(1, "Preparing")).await;
    settle().await;
    assert_eq!(h.charger.remote_starts().len(), 1);
}

#[tokio::test]
async fn preparing_without_authorization_parks_a_pending_start() {
    let h = Harness::new();

    let resp = h.call("StatusNotification", status(1, "Preparing")).await;
    assert_eq!(resp, json!({}));
    settle().await;

    assert_eq!(h.charger.sent(), vec![]);
    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.pending_connector, Some(1));
    assert!(!snapshot.charging);
}

#[tokio::test]
async fn pending_start_is_resumed_by_accepted_authorize() {
    let h = Harness::new();

    h.call("StatusNotification", status(2, "Preparing")).await;
    h.call("Authorize", json!({"idTag": "CARD-1"})).await;

    assert!(eventually(|| !h.charger.remote_starts().is_empty()).await);
    assert_eq!(
        h.charger.remote_starts(),
        vec![Sent::RemoteStart {
            connector_id: 2,
            id_tag: "CARD-1".to_string()
        }]
    );
    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.pending_connector, None);
    assert!(snapshot.charging);
}

#[tokio::test]
async fn rejected_authorize_leaves_pending_start_waiting() {
    let backend = ScriptedBackend {
        authorize: Mutex::new(Ok(AuthorizationStatus::Blocked)),
        ..ScriptedBackend::default()
    };
    let h = Harness::with(backend, RecordingCharger::default(), session_config());

    h.call("StatusNotification", status(1, "Preparing")).await;
    let resp = h.call("Authorize", json!({"idTag": "STOLEN"})).await;
    assert_eq!(resp["idTagInfo"]["status"], "Blocked");
    settle().await;

    assert_eq!(h.charger.sent(), vec![]);
    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, Some(1));
}

#[tokio::test]
async fn stale_authorization_is_treated_as_absent() {
    let h = Harness::new();
    {
        let cell = h.engine.store.session(CP);
        cell.lock().await.authorization = Some(AuthorizationRecord::new(
            "8B6EDE6E",
            AuthorizationStatus::Accepted,
            Utc::now() - chrono::Duration::seconds(31),
        ));
    }

    h.call("StatusNotification", status(1, "Preparing")).await;
    settle().await;

    assert_eq!(h.charger.sent(), vec![]);
    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, Some(1));
}

#[tokio::test]
async fn rejected_remote_start_rearms_pending_start() {
    let charger = RecordingCharger {
        remote_start: Mutex::new(Ok(CommandStatus::Rejected)),
        ..RecordingCharger::default()
    };
    let h = Harness::with(ScriptedBackend::default(), charger, session_config());

    h.call("Authorize", json!({"idTag": "8B6EDE6E"})).await;
    h.call("StatusNotification", status(1, "Preparing")).await;

    let store = h.engine.store.clone();
    let mut rearmed = false;
    for _ in 0..100 {
        let snapshot = store.snapshot(CP).await;
        if snapshot.pending_connector == Some(1) && !snapshot.start_requested {
            rearmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rearmed);

    let snapshot = store.snapshot(CP).await;
    assert!(!snapshot.charging);
    // The card was spent on the failed attempt.
    assert_eq!(snapshot.authorized_id_tag, None);
}

#[tokio::test]
async fn pending_start_is_voided_when_connector_leaves_preparing() {
    let h = Harness::new();

    h.call("StatusNotification", status(1, "Preparing")).await;
    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, Some(1));

    h.call("StatusNotification", status(1, "Faulted")).await;
    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, None);

    let resp = h.call("Authorize", json!({"idTag": "8B6EDE6E"})).await;
    assert_eq!(resp["idTagInfo"]["status"], "Accepted");
    settle().await;

    assert_eq!(h.charger.remote_starts(), vec![]);
    assert!(!h.engine.store.snapshot(CP).await.charging);
}

#[tokio::test]
async fn other_connector_status_keeps_pending_start() {
    let h = Harness::new();

    h.call("StatusNotification", status(1, "Preparing")).await;
    h.call("StatusNotification", status(2, "Unavailable")).await;

    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, Some(1));
}

#[tokio::test]
async fn failed_remote_start_after_unplug_is_not_rearmed() {
    let charger = RecordingCharger {
        remote_start: Mutex::new(Err(CommandError::Timeout)),
        remote_start_delay: Duration::from_millis(150),
        ..RecordingCharger::default()
    };
    let h = Harness::with(ScriptedBackend::default(), charger, session_config());

    h.call("Authorize", json!({"idTag": "8B6EDE6E"})).await;
    h.call("StatusNotification", status(1, "Preparing")).await;
    assert!(eventually(|| h.charger.remote_starts().len() == 1).await);

    // Driver unplugs while the command is still unanswered.
    h.call("StatusNotification", status(1, "Available")).await;

    let store = h.engine.store.clone();
    let mut answered = false;
    for _ in 0..100 {
        if !store.snapshot(CP).await.start_requested {
            answered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(answered);

    let snapshot = store.snapshot(CP).await;
    assert_eq!(snapshot.pending_connector, None);
    assert!(!snapshot.charging);
}

// ── Transactions ───────────────────────────────────────────────

#[tokio::test]
async fn start_transaction_fails_closed_without_backend_id() {
    let backend = ScriptedBackend {
        start: Mutex::new(Err(BackendError::Http {
            status: 500,
            message: "boom".into(),
        })),
        ..ScriptedBackend::default()
    };
    let h = Harness::with(backend, RecordingCharger::default(), session_config());

    let resp = h.call("StartTransaction", start_tx(1, "X", 1000)).await;
    assert_eq!(resp["transactionId"], 0);
    assert_eq!(resp["idTagInfo"]["status"], "Invalid");

    settle().await;
    assert_eq!(h.charger.sent(), vec![]);
    assert_eq!(h.engine.store.snapshot(CP).await.transaction_id, None);
}

#[tokio::test]
async fn start_transaction_with_non_positive_backend_id_is_invalid() {
    for transaction_id in [0, -5] {
        let backend = ScriptedBackend {
            start: Mutex::new(Ok(StartedTransaction {
                transaction_id,
                max_power_kw: Some(7.4),
            })),
            ..ScriptedBackend::default()
        };
        let h = Harness::with(backend, RecordingCharger::default(), session_config());

        let resp = h.call("StartTransaction", start_tx(1, "X", 1000)).await;
        assert_eq!(resp["transactionId"], 0);
        assert_eq!(resp["idTagInfo"]["status"], "Invalid");

        settle().await;
        assert_eq!(h.charger.sent(), vec![]);
        let snapshot = h.engine.store.snapshot(CP).await;
        assert_eq!(snapshot.transaction_id, None);
        assert!(!snapshot.charging);
    }
}

#[tokio::test]
async fn start_then_stop_clears_the_session() {
    let h = Harness::new();

    let resp = h.call("StartTransaction", start_tx(1, "X", 1000)).await;
    assert_eq!(resp["transactionId"], 42);
    assert_eq!(resp["idTagInfo"]["status"], "Accepted");

    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.transaction_id, Some(42));
    assert!(snapshot.charging);

    let started = h.backend.starts.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].meter_start, 1000);
    assert_eq!(started[0].id_tag, "X");

    let resp = h.call("StopTransaction", stop_tx(42, 1500)).await;
    assert_eq!(resp["idTagInfo"]["status"], "Accepted");

    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.transaction_id, None);
    assert!(!snapshot.charging);

    let stops = h.backend.stops.lock().unwrap().clone();
    assert_eq!(stops.len(), 1);
    assert_eq!(stops[0].meter_stop, 1500);
    assert_eq!(stops[0].reason.as_deref(), Some("Local"));
}

#[tokio::test]
async fn stop_transaction_is_accepted_even_when_backend_fails_twice() {
    let backend = ScriptedBackend {
        stop: Mutex::new(Err(BackendError::Timeout)),
        ..ScriptedBackend::default()
    };
    let h = Harness::with(backend, RecordingCharger::default(), session_config());

    for _ in 0..2 {
        let resp = h.call("StopTransaction", stop_tx(42, 1500)).await;
        assert_eq!(resp["idTagInfo"]["status"], "Accepted");
    }
    assert_eq!(h.backend.stops.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn stop_for_another_transaction_keeps_the_active_one() {
    let h = Harness::new();
    h.call("StartTransaction", start_tx(1, "X", 1000)).await;

    let resp = h.call("StopTransaction", stop_tx(7, 1500)).await;
    assert_eq!(resp["idTagInfo"]["status"], "Accepted");

    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.transaction_id, Some(42));
    assert!(snapshot.charging);
}

#[tokio::test]
async fn profile_is_pushed_after_settle_delay() {
    let h = Harness::new();
    h.call("StartTransaction", start_tx(1, "X", 1000)).await;

    let pushed = || {
        h.charger
            .sent()
            .into_iter()
            .find_map(|s| match s {
                Sent::SetChargingProfile(p) => Some(p),
                _ => None,
            })
    };
    assert!(eventually(|| pushed().is_some()).await);

    let profile = pushed().unwrap();
    assert_eq!(profile.connector_id, 0);
    let period = &profile.cs_charging_profiles.charging_schedule.charging_schedule_period;
    assert_eq!(period.len(), 1);
    assert_eq!(period[0].limit, 7_400);
    assert_eq!(profile.cs_charging_profiles.stack_level, 8);
}

#[tokio::test]
async fn stop_before_settle_delay_cancels_profile_push() {
    let session = SessionConfig {
        profile_settle_delay_ms: 200,
        ..SessionConfig::default()
    };
    let h = Harness::with(ScriptedBackend::default(), RecordingCharger::default(), session);

    h.call("StartTransaction", start_tx(1, "X", 1000)).await;
    h.call("StopTransaction", stop_tx(42, 1500)).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(!h
        .charger
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::SetChargingProfile(_))));
}

#[tokio::test]
async fn idle_connector_stops_the_running_transaction() {
    let h = Harness::new();
    h.call("StartTransaction", start_tx(1, "X", 1000)).await;

    h.call("StatusNotification", status(1, "Finishing")).await;

    assert!(eventually(|| h
        .charger
        .sent()
        .contains(&Sent::RemoteStop { transaction_id: 42 }))
    .await);
    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.transaction_id, None);
    assert!(!snapshot.charging);
}

#[tokio::test]
async fn idle_on_another_connector_keeps_the_transaction() {
    let h = Harness::new();
    h.call("StartTransaction", start_tx(1, "X", 1000)).await;

    h.call("StatusNotification", status(2, "Available")).await;
    settle().await;

    assert!(!h
        .charger
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::RemoteStop { .. })));
    let snapshot = h.engine.store.snapshot(CP).await;
    assert_eq!(snapshot.transaction_id, Some(42));
    assert!(snapshot.charging);
}

#[tokio::test]
async fn station_status_is_forwarded_without_touching_the_session() {
    let h = Harness::new();

    let resp = h.call("StatusNotification", status(0, "Preparing")).await;
    assert_eq!(resp, json!({}));
    settle().await;

    let forwarded = h.backend.statuses.lock().unwrap().clone();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].connector_id, 0);
    assert_eq!(forwarded[0].status, "Preparing");
    assert_eq!(forwarded[0].error_code, "NoError");
    assert_eq!(h.engine.store.snapshot(CP).await.pending_connector, None);
}

// ── MeterValues ────────────────────────────────────────────────

#[tokio::test]
async fn meter_values_without_energy_register_make_no_backend_call() {
    let h = Harness::new();

    let resp = h
        .call(
            "MeterValues",
            json!({
                "connectorId": 1,
                "transactionId": 42,
                "meterValue": [{
                    "timestamp": "2024-01-01T10:05:00Z",
                    "sampledValue": [{"value": "230.1", "measurand": "Voltage", "unit": "V"}]
                }]
            }),
        )
        .await;

    assert_eq!(resp, json!({}));
    assert!(h.backend.meters.lock().unwrap().is_empty());
}

#[tokio::test]
async fn meter_values_forward_latest_energy_in_wh() {
    let h = Harness::new();
    h.call("StartTransaction", start_tx(1, "X", 1000)).await;

    let resp = h
        .call(
            "MeterValues",
            json!({
                "connectorId": 1,
                "meterValue": [
                    {
                        "timestamp": "2024-01-01T10:05:00Z",
                        "sampledValue": [{"value": "1.2", "unit": "kWh"}]
                    },
                    {
                        "timestamp": "2024-01-01T10:10:00Z",
                        "sampledValue": [
                            {"value": "1.5678", "measurand": "Energy.Active.Import.Register", "unit": "kWh"},
                            {"value": "16", "measurand": "Current.Import", "unit": "A"}
                        ]
                    }
                ]
            }),
        )
        .await;

    assert_eq!(resp, json!({}));
    assert_eq!(
        h.backend.meters.lock().unwrap().clone(),
        vec![MeterReport {
            transaction_id: 42,
            meter_value_wh: 1567
        }]
    );
}

// ── Boot / Heartbeat ───────────────────────────────────────────

#[tokio::test]
async fn accepted_boot_reads_and_writes_charger_configuration() {
    let session = SessionConfig {
        meter_value_sample_interval_secs: Some(60),
        ..session_config()
    };
    let h = Harness::with(ScriptedBackend::default(), RecordingCharger::default(), session);

    let resp = h
        .call(
            "BootNotification",
            json!({"chargePointVendor": "Acme", "chargePointModel": "AC22"}),
        )
        .await;
    assert_eq!(resp["status"], "Accepted");
    assert_eq!(resp["interval"], 300);

    assert!(eventually(|| h.charger.sent().len() == 2).await);
    assert_eq!(
        h.charger.sent(),
        vec![
            Sent::GetConfiguration(vec!["ChargeProfileMaxStackLevel".to_string()]),
            Sent::ChangeConfiguration {
                key: "MeterValueSampleInterval".to_string(),
                value: "60".to_string()
            },
        ]
    );
    assert_eq!(h.engine.store.snapshot(CP).await.max_stack_level, Some(3));
}

#[tokio::test]
async fn boot_status_follows_backend_outcome() {
    let cases = [
        (
            Err(BackendError::Rejected {
                status: 404,
                message: "unknown".into(),
            }),
            "Rejected",
        ),
        (Err(BackendError::Timeout), "Pending"),
    ];
    for (outcome, expected) in cases {
        let backend = ScriptedBackend {
            boot: Mutex::new(outcome),
            ..ScriptedBackend::default()
        };
        let h = Harness::with(backend, RecordingCharger::default(), session_config());

        let resp = h
            .call(
                "BootNotification",
                json!({"chargePointVendor": "Acme", "chargePointModel": "AC22"}),
            )
            .await;
        assert_eq!(resp["status"], expected);
        assert_eq!(resp["interval"], 60);
        settle().await;
        assert_eq!(h.charger.sent(), vec![]);
    }
}

#[tokio::test]
async fn heartbeat_falls_back_to_local_clock() {
    let h = Harness::new();
    let before = Utc::now();

    let resp = h.call("Heartbeat", json!({})).await;
    let current: DateTime<Utc> = serde_json::from_value(resp["currentTime"].clone()).unwrap();
    assert!(current >= before - chrono::Duration::seconds(1));
}

// ── Dispatcher errors ──────────────────────────────────────────

#[tokio::test]
async fn unknown_action_is_not_implemented() {
    let h = Harness::new();
    let err = h.try_call("DataTransfer", json!({"vendorId": "x"})).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::NotImplemented);
}

#[tokio::test]
async fn schema_violation_skips_the_handler() {
    let h = Harness::new();
    let err = h
        .try_call("StartTransaction", json!({"connectorId": 1, "idTag": "X"}))
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcErrorCode::FormationViolation);
    assert!(h.backend.starts.lock().unwrap().is_empty());
}
