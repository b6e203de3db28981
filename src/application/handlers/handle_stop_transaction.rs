//! StopTransaction handler
//!
//! Always `Accepted`: the charge has physically ended and a charger retries
//! anything else indefinitely. A backend failure is logged for
//! reconciliation.

use std::sync::Arc;

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{parse_request, to_payload, wire_name};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::application::ports::TransactionStop;

pub async fn handle_stop_transaction(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: StopTransactionRequest = parse_request("StopTransaction", payload)?;
    let reason = req.reason.as_ref().map(wire_name);
    info!(
        transaction_id = req.transaction_id,
        meter_stop = req.meter_stop,
        reason = ?reason,
        "StopTransaction"
    );

    {
        let cell = engine.store.session(&ctx.charge_point_id);
        let mut state = cell.lock().await;
        let matches = state
            .active_transaction
            .as_ref()
            .map(|tx| tx.transaction_id == req.transaction_id);
        match matches {
            Some(true) => {
                if let Some(mut tx) = state.active_transaction.take() {
                    tx.cancel_profile_push();
                }
                state.charging = false;
            }
            None => state.charging = false,
            Some(false) => warn!(
                transaction_id = req.transaction_id,
                "Stop for a transaction other than the active one"
            ),
        }
    }

    let stop = TransactionStop {
        transaction_id: req.transaction_id,
        meter_stop: req.meter_stop,
        timestamp: req.timestamp,
        id_tag: req.id_tag.clone(),
        reason,
    };
    if let Err(e) = engine.backend.stop_transaction(&stop).await {
        error!(
            transaction_id = req.transaction_id,
            meter_stop = req.meter_stop,
            error = %e,
            "Transaction close not recorded by backend, needs reconciliation"
        );
    }

    to_payload(&StopTransactionResponse {
        id_tag_info: Some(IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        }),
    })
}
