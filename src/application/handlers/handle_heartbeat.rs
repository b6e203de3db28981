//! Heartbeat handler

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use serde_json::Value;
use tracing::{debug, warn};

use super::to_payload;
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;

pub async fn handle_heartbeat(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    _payload: Value,
) -> HandlerResult {
    let current_time = match engine.backend.notify_heartbeat(&ctx.charge_point_id).await {
        Ok(time) => time,
        Err(e) => {
            warn!(error = %e, "Heartbeat not forwarded, answering with local time");
            Utc::now()
        }
    };
    debug!(%current_time, "Heartbeat");

    to_payload(&HeartbeatResponse { current_time })
}
