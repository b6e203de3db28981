//! Action dispatcher
//!
//! Routes an incoming CALL to the handler registered for its action, after
//! validating the payload against the action's request schema. The routing
//! table is built explicitly with [`DispatcherBuilder`].

pub mod ocpp16_schemas;
pub mod schema;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::support::ProtocolError;

pub use ocpp16_schemas::ocpp16_schemas;
pub use schema::{describe, FieldType, Schema, SchemaRegistry, Violation};

/// What a handler knows about the call it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub charge_point_id: String,
    /// Backend id resolved during the handshake.
    pub internal_id: String,
    pub message_id: String,
}

pub type HandlerResult = Result<Value, ProtocolError>;

type BoxedHandler = Arc<dyn Fn(CallContext, Value) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub struct DispatcherBuilder {
    handlers: HashMap<String, BoxedHandler>,
    schemas: Arc<SchemaRegistry>,
}

impl DispatcherBuilder {
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            handlers: HashMap::new(),
            schemas,
        }
    }

    /// Register `handler` for `action`. A later registration replaces an earlier one.
    pub fn handler<F, Fut>(mut self, action: &str, handler: F) -> Self
    where
        F: Fn(CallContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let boxed: BoxedHandler = Arc::new(move |ctx: CallContext, payload: Value| -> BoxFuture<'static, HandlerResult> {
            Box::pin(handler(ctx, payload))
        });
        self.handlers.insert(action.to_string(), boxed);
        self
    }

    pub fn build(self) -> ActionDispatcher {
        ActionDispatcher {
            handlers: self.handlers,
            schemas: self.schemas,
        }
    }
}

pub struct ActionDispatcher {
    handlers: HashMap<String, BoxedHandler>,
    schemas: Arc<SchemaRegistry>,
}

impl ActionDispatcher {
    pub fn builder(schemas: Arc<SchemaRegistry>) -> DispatcherBuilder {
        DispatcherBuilder::new(schemas)
    }

    pub fn handles(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    /// Registered actions, sorted.
    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    /// Run the handler for `action`.
    ///
    /// Unknown actions fail with `NotImplemented`; schema violations fail
    /// with `FormationViolation` before the handler runs. Handler errors are
    /// passed through untouched.
    pub async fn dispatch(&self, ctx: CallContext, action: &str, payload: Value) -> HandlerResult {
        metrics::counter!("ocpp_incoming_calls_total", "action" => action.to_string()).increment(1);

        let handler = match self.handlers.get(action) {
            Some(handler) => handler.clone(),
            None => {
                warn!(
                    charge_point_id = ctx.charge_point_id.as_str(),
                    action,
                    message_id = ctx.message_id.as_str(),
                    "No handler for action"
                );
                return Err(ProtocolError::not_implemented(action));
            }
        };

        if let Err(violations) = self.schemas.validate_request(action, &payload) {
            let description = describe(&violations);
            warn!(
                charge_point_id = ctx.charge_point_id.as_str(),
                action,
                message_id = ctx.message_id.as_str(),
                violations = description.as_str(),
                "Payload failed schema validation"
            );
            let details: Vec<Value> = violations
                .iter()
                .map(|v| json!({"path": v.path, "message": v.message}))
                .collect();
            return Err(ProtocolError::formation_violation(description)
                .with_details(json!({ "violations": details })));
        }

        debug!(
            charge_point_id = ctx.charge_point_id.as_str(),
            action,
            message_id = ctx.message_id.as_str(),
            "Dispatching"
        );
        handler(ctx, payload).await
    }
}
