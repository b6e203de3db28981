//! BootNotification handler

use std::sync::Arc;

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::{info, warn};

use super::follow_up::spawn_boot_configuration;
use super::{parse_request, to_payload};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::application::ports::BootInfo;
use crate::support::BackendError;

pub async fn handle_boot_notification(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: BootNotificationRequest = parse_request("BootNotification", payload)?;
    info!(
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        serial_number = ?req.charge_point_serial_number,
        firmware_version = ?req.firmware_version,
        "BootNotification"
    );

    let boot = BootInfo {
        vendor: req.charge_point_vendor,
        model: req.charge_point_model,
        serial_number: req.charge_point_serial_number,
        firmware_version: req.firmware_version,
    };

    let (status, interval) = match engine.backend.notify_boot(&ctx.charge_point_id, &boot).await {
        Ok(()) => (
            RegistrationStatus::Accepted,
            engine.session.heartbeat_interval_secs,
        ),
        Err(BackendError::Rejected { status, message }) => {
            warn!(http_status = status, message = message.as_str(), "Boot rejected by backend");
            (
                RegistrationStatus::Rejected,
                engine.session.boot_retry_interval_secs,
            )
        }
        Err(e) => {
            warn!(error = %e, "Boot not confirmed, answering Pending");
            (
                RegistrationStatus::Pending,
                engine.session.boot_retry_interval_secs,
            )
        }
    };

    if matches!(status, RegistrationStatus::Accepted) {
        spawn_boot_configuration(engine.clone(), ctx.charge_point_id.clone());
    }

    info!(status = ?status, interval, "BootNotification answered");

    to_payload(&BootNotificationResponse {
        current_time: Utc::now(),
        interval: interval.unsigned_abs(),
        status,
    })
}
