//! Server-initiated commands
//!
//! [`CommandSender`] frames a CALL on the charger's live connection and
//! suspends the caller until the matching CALLRESULT / CALLERROR arrives or
//! the timeout elapses. Replies are validated against the action's response
//! schema before they are handed back.

pub mod change_configuration;
pub mod get_configuration;
pub mod remote_start;
pub mod remote_stop;
pub mod set_charging_profile;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{info, warn, Instrument};

use crate::application::dispatch::{describe, SchemaRegistry};
use crate::application::ports::{ChargePointCommands, CommandStatus, ConfigurationResult};
use crate::application::session::SharedSessionRegistry;
use crate::domain::SetChargingProfilePayload;
use crate::support::{CommandError, OcppFrame};

pub use change_configuration::change_configuration;
pub use get_configuration::get_configuration;
pub use remote_start::remote_start_transaction;
pub use remote_stop::remote_stop_transaction;
pub use set_charging_profile::set_charging_profile;

pub struct CommandSender {
    session_registry: SharedSessionRegistry,
    schemas: Arc<SchemaRegistry>,
    call_timeout: Duration,
}

pub type SharedCommandSender = Arc<CommandSender>;

impl CommandSender {
    pub fn new(
        session_registry: SharedSessionRegistry,
        schemas: Arc<SchemaRegistry>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            session_registry,
            schemas,
            call_timeout,
        }
    }

    /// Send `action` with the default timeout.
    pub async fn send_command(
        &self,
        charge_point_id: &str,
        action: &'static str,
        payload: Value,
    ) -> Result<Value, CommandError> {
        self.call(charge_point_id, action, payload, self.call_timeout)
            .await
    }

    /// Send `action` and wait up to `wait` for the charger's answer.
    pub async fn call(
        &self,
        charge_point_id: &str,
        action: &'static str,
        payload: Value,
        wait: Duration,
    ) -> Result<Value, CommandError> {
        let start = Instant::now();
        metrics::counter!("ocpp_commands_total", "action" => action).increment(1);

        let result = self.call_inner(charge_point_id, action, payload, wait).await;

        metrics::histogram!("ocpp_command_latency_seconds", "action" => action)
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::counter!("ocpp_command_failures_total", "action" => action, "kind" => e.kind())
                .increment(1);
        }
        result
    }

    async fn call_inner(
        &self,
        charge_point_id: &str,
        action: &'static str,
        payload: Value,
        wait: Duration,
    ) -> Result<Value, CommandError> {
        let connection = self
            .session_registry
            .get(charge_point_id)
            .ok_or_else(|| CommandError::NotConnected(charge_point_id.to_string()))?;
        let span = connection.span().clone();

        async {
            // One call in flight per connection.
            let _turn = connection.lock_calls().await;

            let (message_id, reply) = connection.begin_call(action);
            let frame = OcppFrame::Call {
                message_id: message_id.clone(),
                action: action.to_string(),
                payload,
            };

            info!(action, message_id = message_id.as_str(), "Sending command");

            if let Err(e) = connection.send_text(frame.serialize()) {
                connection.forget_call(&message_id);
                return Err(e);
            }

            let answer = match timeout(wait, reply).await {
                Ok(Ok(answer)) => answer,
                // Sender dropped without an answer: the connection went away.
                Ok(Err(_)) => Err(CommandError::ConnectionClosed),
                Err(_) => {
                    connection.forget_call(&message_id);
                    warn!(
                        action,
                        message_id = message_id.as_str(),
                        timeout_ms = wait.as_millis() as u64,
                        "Command timed out"
                    );
                    Err(CommandError::Timeout)
                }
            }?;

            if let Err(violations) = self.schemas.validate_response(action, &answer) {
                let description = describe(&violations);
                warn!(
                    action,
                    message_id = message_id.as_str(),
                    violations = description.as_str(),
                    "Command response failed schema validation"
                );
                return Err(CommandError::InvalidResponse(description));
            }

            Ok(answer)
        }
        .instrument(span)
        .await
    }
}

/// Decode a command answer into its typed response.
pub(crate) fn decode_response<T: serde::de::DeserializeOwned>(
    payload: Value,
) -> Result<T, CommandError> {
    serde_json::from_value(payload)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))
}

/// Serialise a command request.
pub(crate) fn encode_request<T: serde::Serialize>(request: &T) -> Result<Value, CommandError> {
    serde_json::to_value(request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))
}

#[async_trait]
impl ChargePointCommands for CommandSender {
    async fn remote_start_transaction(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<CommandStatus, CommandError> {
        remote_start_transaction(self, charge_point_id, connector_id, id_tag).await
    }

    async fn remote_stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<CommandStatus, CommandError> {
        remote_stop_transaction(self, charge_point_id, transaction_id).await
    }

    async fn set_charging_profile(
        &self,
        charge_point_id: &str,
        profile: &SetChargingProfilePayload,
    ) -> Result<CommandStatus, CommandError> {
        set_charging_profile(self, charge_point_id, profile).await
    }

    async fn get_configuration(
        &self,
        charge_point_id: &str,
        keys: &[String],
    ) -> Result<ConfigurationResult, CommandError> {
        get_configuration(self, charge_point_id, keys).await
    }

    async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: &str,
        value: &str,
    ) -> Result<CommandStatus, CommandError> {
        change_configuration(self, charge_point_id, key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatch::ocpp16_schemas;
    use crate::application::session::{Outbound, SessionRegistry};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup(
        wait: Duration,
    ) -> (
        Arc<CommandSender>,
        SharedSessionRegistry,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let registry = SessionRegistry::shared();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register("CP001", "7", tx);
        let sender = Arc::new(CommandSender::new(
            registry.clone(),
            Arc::new(ocpp16_schemas()),
            wait,
        ));
        (sender, registry, rx)
    }

    async fn next_call(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> (String, String, Value) {
        match rx.recv().await {
            Some(Outbound::Text(text)) => match OcppFrame::parse(&text).unwrap() {
                OcppFrame::Call {
                    message_id,
                    action,
                    payload,
                } => (message_id, action, payload),
                other => panic!("expected CALL, got {:?}", other),
            },
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn not_connected_fails_fast() {
        let (sender, _registry, _rx) = setup(Duration::from_secs(1));
        let err = sender
            .send_command("CP404", "RemoteStopTransaction", json!({"transactionId": 1}))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::NotConnected("CP404".into()));
    }

    #[tokio::test]
    async fn call_result_resolves_the_caller() {
        let (sender, registry, mut rx) = setup(Duration::from_secs(5));
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.remote_start_transaction("CP001", 1, "8B6EDE6E").await }
        });

        let (message_id, action, payload) = next_call(&mut rx).await;
        assert_eq!(action, "RemoteStartTransaction");
        assert_eq!(payload, json!({"connectorId": 1, "idTag": "8B6EDE6E"}));

        let conn = registry.get("CP001").unwrap();
        assert!(conn.complete_call(&message_id, Ok(json!({"status": "Accepted"}))));
        assert_eq!(task.await.unwrap().unwrap(), CommandStatus::Accepted);
    }

    #[tokio::test]
    async fn call_error_is_surfaced() {
        let (sender, registry, mut rx) = setup(Duration::from_secs(5));
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.remote_stop_transaction("CP001", 42).await }
        });

        let (message_id, _, _) = next_call(&mut rx).await;
        registry.get("CP001").unwrap().complete_call(
            &message_id,
            Err(CommandError::CallError {
                code: "NotSupported".into(),
                description: "".into(),
            }),
        );
        assert!(matches!(
            task.await.unwrap(),
            Err(CommandError::CallError { code, .. }) if code == "NotSupported"
        ));
    }

    #[tokio::test]
    async fn timeout_is_a_distinct_error() {
        let (sender, registry, _rx) = setup(Duration::from_millis(50));
        let err = sender
            .remote_stop_transaction("CP001", 42)
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Timeout);
        assert_eq!(registry.get("CP001").unwrap().pending_count(), 0);
    }

    #[tokio::test]
    async fn malformed_answer_is_invalid_response() {
        let (sender, registry, mut rx) = setup(Duration::from_secs(5));
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.change_configuration("CP001", "MeterValueSampleInterval", "60").await }
        });

        let (message_id, _, payload) = next_call(&mut rx).await;
        assert_eq!(payload, json!({"key": "MeterValueSampleInterval", "value": "60"}));
        registry
            .get("CP001")
            .unwrap()
            .complete_call(&message_id, Ok(json!({"status": "Perhaps"})));
        assert!(matches!(
            task.await.unwrap(),
            Err(CommandError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_fails_pending_call() {
        let (sender, registry, mut rx) = setup(Duration::from_secs(5));
        let task = tokio::spawn({
            let sender = sender.clone();
            async move { sender.remote_stop_transaction("CP001", 42).await }
        });

        let _ = next_call(&mut rx).await;
        let conn = registry.get("CP001").unwrap();
        registry.unregister(&conn);
        assert_eq!(task.await.unwrap(), Err(CommandError::ConnectionClosed));
    }

    #[tokio::test]
    async fn calls_are_serialised_per_connection() {
        let (sender, registry, mut rx) = setup(Duration::from_secs(5));
        let first = tokio::spawn({
            let sender = sender.clone();
            async move { sender.remote_stop_transaction("CP001", 1).await }
        });
        let (first_id, _, _) = next_call(&mut rx).await;

        let second = tokio::spawn({
            let sender = sender.clone();
            async move { sender.remote_stop_transaction("CP001", 2).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Second call is held back until the first is answered.
        assert!(rx.try_recv().is_err());

        let conn = registry.get("CP001").unwrap();
        conn.complete_call(&first_id, Ok(json!({"status": "Accepted"})));
        assert_eq!(first.await.unwrap().unwrap(), CommandStatus::Accepted);

        let (second_id, _, payload) = next_call(&mut rx).await;
        assert_ne!(first_id, second_id);
        assert_eq!(payload, json!({"transactionId": 2}));
        conn.complete_call(&second_id, Ok(json!({"status": "Rejected"})));
        assert_eq!(second.await.unwrap().unwrap(), CommandStatus::Rejected);
    }
}
