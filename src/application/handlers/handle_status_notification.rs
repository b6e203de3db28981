//! StatusNotification handler
//!
//! Every report is forwarded to the backend. For a real connector the status
//! also drives the session: `Preparing` starts a session (or parks a
//! PendingStart until the card is presented), `Finishing` and `Available`
//! end the transaction running on that connector, and any other status voids
//! a start parked for it. Local state always follows the reported status,
//! whatever the outcome of the resulting command.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::types::ChargePointStatus;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::follow_up::{spawn_remote_start, spawn_remote_stop};
use super::{parse_request, to_payload, wire_name};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::application::ports::ConnectorStatusReport;
use crate::domain::PendingStart;

pub async fn handle_status_notification(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: StatusNotificationRequest = parse_request("StatusNotification", payload)?;
    let status = wire_name(&req.status);
    info!(
        connector_id = req.connector_id,
        status = status.as_str(),
        error_code = ?req.error_code,
        "StatusNotification"
    );

    let report = ConnectorStatusReport {
        charge_point_id: ctx.charge_point_id.clone(),
        connector_id: req.connector_id,
        status,
        error_code: wire_name(&req.error_code),
        info: req.info.clone(),
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    };
    if let Err(e) = engine.backend.report_connector_status(&report).await {
        warn!(connector_id = req.connector_id, error = %e, "Connector status not forwarded");
    }

    // Connector 0 is the station as a whole.
    if req.connector_id > 0 {
        match req.status {
            ChargePointStatus::Preparing => on_preparing(&engine, &ctx, req.connector_id).await,
            ChargePointStatus::Finishing | ChargePointStatus::Available => {
                on_idle(&engine, &ctx, req.connector_id).await
            }
            _ => {
                let cell = engine.store.session(&ctx.charge_point_id);
                cell.lock().await.leave_preparing(req.connector_id);
            }
        }
    }

    to_payload(&StatusNotificationResponse {})
}

async fn on_preparing(engine: &Arc<SessionEngine>, ctx: &CallContext, connector_id: u32) {
    let now = Utc::now();
    let start_with = {
        let cell = engine.store.session(&ctx.charge_point_id);
        let mut state = cell.lock().await;
        let id_tag = if state.is_busy() {
            None
        } else {
            state
                .valid_authorization(now, engine.session.auth_ttl())
                .map(|record| record.id_tag.clone())
        };

        match id_tag {
            Some(id_tag) => {
                state.authorization = None;
                state.pending_start = None;
                state.charging = true;
                state.start_requested = true;
                Some((id_tag, state.connector_epoch(connector_id)))
            }
            None => {
                state.pending_start = Some(PendingStart {
                    connector_id,
                    timestamp: now,
                });
                None
            }
        }
    };

    match start_with {
        Some((id_tag, epoch)) => {
            info!(connector_id, id_tag = id_tag.as_str(), "Authorized connector preparing, starting");
            spawn_remote_start(
                engine.clone(),
                ctx.charge_point_id.clone(),
                connector_id,
                id_tag,
                epoch,
            );
        }
        None => info!(connector_id, "Waiting for authorization"),
    }
}

async fn on_idle(engine: &Arc<SessionEngine>, ctx: &CallContext, connector_id: u32) {
    let finished = {
        let cell = engine.store.session(&ctx.charge_point_id);
        let mut state = cell.lock().await;
        state.reset_after_idle(connector_id)
    };

    match finished {
        Some(mut tx) => {
            tx.cancel_profile_push();
            info!(
                connector_id,
                transaction_id = tx.transaction_id,
                "Connector idle with a running transaction, stopping it"
            );
            spawn_remote_stop(engine.clone(), ctx.charge_point_id.clone(), tx.transaction_id);
        }
        None => debug!(connector_id, "Connector idle"),
    }
}
