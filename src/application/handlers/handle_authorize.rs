//! Authorize handler
//!
//! Fails closed: anything but a clear answer from the backend is `Invalid`.

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::{info, warn};

use super::follow_up::spawn_remote_start;
use super::{parse_request, to_payload};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::domain::AuthorizationRecord;

pub async fn handle_authorize(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: AuthorizeRequest = parse_request("Authorize", payload)?;
    info!(id_tag = req.id_tag.as_str(), "Authorize");

    let id_tag_info = match engine.backend.authorize(&ctx.charge_point_id, &req.id_tag).await {
        Ok(info) => info,
        Err(e) => {
            warn!(
                id_tag = req.id_tag.as_str(),
                error = %e,
                kind = e.kind(),
                "Authorization could not be verified, answering Invalid"
            );
            IdTagInfo {
                status: AuthorizationStatus::Invalid,
                expiry_date: None,
                parent_id_tag: None,
            }
        }
    };
    let accepted = matches!(id_tag_info.status, AuthorizationStatus::Accepted);

    let start_connector = {
        let cell = engine.store.session(&ctx.charge_point_id);
        let mut state = cell.lock().await;
        state.authorization = Some(AuthorizationRecord::new(
            req.id_tag.clone(),
            id_tag_info.status.clone(),
            Utc::now(),
        ));

        if accepted && state.pending_start.is_some() && !state.is_busy() {
            // One card tap, one session: the record is spent on this start.
            state.authorization = None;
            state.charging = true;
            state.start_requested = true;
            let pending = state.pending_start.take();
            pending.map(|p| (p.connector_id, state.connector_epoch(p.connector_id)))
        } else {
            None
        }
    };

    info!(
        id_tag = req.id_tag.as_str(),
        status = ?id_tag_info.status,
        "Authorize answered"
    );

    if let Some((connector_id, epoch)) = start_connector {
        info!(connector_id, "Pending start resumed by authorization");
        spawn_remote_start(
            engine.clone(),
            ctx.charge_point_id.clone(),
            connector_id,
            req.id_tag,
            epoch,
        );
    }

    to_payload(&AuthorizeResponse { id_tag_info })
}
