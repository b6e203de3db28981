//! StartTransaction handler
//!
//! Fails closed: without a backend transaction id the charger gets id `0`
//! and `Invalid`.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{error, info};

use super::follow_up::schedule_profile_push;
use super::{parse_request, to_payload};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::application::ports::TransactionStart;
use crate::domain::ActiveTransaction;

pub async fn handle_start_transaction(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: StartTransactionRequest = parse_request("StartTransaction", payload)?;
    info!(
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    let start = TransactionStart {
        charge_point_id: ctx.charge_point_id.clone(),
        connector_id: req.connector_id,
        id_tag: req.id_tag.clone(),
        meter_start: req.meter_start,
        timestamp: req.timestamp,
    };

    let started = match engine.backend.start_transaction(&start).await {
        Ok(started) if started.transaction_id > 0 => started,
        Ok(started) => {
            error!(
                connector_id = req.connector_id,
                transaction_id = started.transaction_id,
                "Backend returned an unusable transaction id, answering Invalid"
            );
            return not_billed();
        }
        Err(e) => {
            error!(
                connector_id = req.connector_id,
                error = %e,
                kind = e.kind(),
                "Transaction not opened by backend, answering Invalid"
            );
            return not_billed();
        }
    };

    {
        let cell = engine.store.session(&ctx.charge_point_id);
        let mut state = cell.lock().await;
        let profile_push = schedule_profile_push(
            engine.clone(),
            ctx.charge_point_id.clone(),
            started.transaction_id,
            started.max_power_kw,
        );
        // Replacing an older record aborts its pending push.
        state.active_transaction = Some(ActiveTransaction {
            transaction_id: started.transaction_id,
            connector_id: req.connector_id,
            id_tag: req.id_tag.clone(),
            meter_start: req.meter_start,
            started_at: Utc::now(),
            profile_push: Some(profile_push),
        });
        state.charging = true;
        state.pending_start = None;
    }

    info!(
        transaction_id = started.transaction_id,
        max_power_kw = ?started.max_power_kw,
        "Transaction started"
    );

    to_payload(&StartTransactionResponse {
        transaction_id: started.transaction_id,
        id_tag_info: IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}

fn not_billed() -> HandlerResult {
    to_payload(&StartTransactionResponse {
        transaction_id: 0,
        id_tag_info: IdTagInfo {
            status: AuthorizationStatus::Invalid,
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}
