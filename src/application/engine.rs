//! Charger-session engine
//!
//! Owns the collaborators every OCPP handler needs and builds the routing
//! table that maps each action to its handler.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::application::dispatch::{ActionDispatcher, CallContext, HandlerResult, SchemaRegistry};
use crate::application::handlers;
use crate::application::ports::{BackendApi, ChargePointCommands};
use crate::application::session::SharedSessionStore;
use crate::config::{ChargingProfileConfig, SessionConfig};

pub struct SessionEngine {
    pub backend: Arc<dyn BackendApi>,
    pub commands: Arc<dyn ChargePointCommands>,
    pub store: SharedSessionStore,
    pub session: SessionConfig,
    pub charging_profile: ChargingProfileConfig,
}

impl SessionEngine {
    pub fn new(
        backend: Arc<dyn BackendApi>,
        commands: Arc<dyn ChargePointCommands>,
        store: SharedSessionStore,
        session: SessionConfig,
        charging_profile: ChargingProfileConfig,
    ) -> Self {
        Self {
            backend,
            commands,
            store,
            session,
            charging_profile,
        }
    }

    /// Routing table for every charger-initiated action this server answers.
    pub fn dispatcher(self: &Arc<Self>, schemas: Arc<SchemaRegistry>) -> ActionDispatcher {
        ActionDispatcher::builder(schemas)
            .handler("BootNotification", bind(self, handlers::handle_boot_notification))
            .handler("Heartbeat", bind(self, handlers::handle_heartbeat))
            .handler("Authorize", bind(self, handlers::handle_authorize))
            .handler("StatusNotification", bind(self, handlers::handle_status_notification))
            .handler("StartTransaction", bind(self, handlers::handle_start_transaction))
            .handler("StopTransaction", bind(self, handlers::handle_stop_transaction))
            .handler("MeterValues", bind(self, handlers::handle_meter_values))
            .build()
    }
}

fn bind<F, Fut>(
    engine: &Arc<SessionEngine>,
    handler: F,
) -> impl Fn(CallContext, Value) -> Fut + Send + Sync + 'static
where
    F: Fn(Arc<SessionEngine>, CallContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let engine = engine.clone();
    move |ctx, payload| handler(engine.clone(), ctx, payload)
}
