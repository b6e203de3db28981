//! Commands issued as a consequence of charger messages
//!
//! They run as tasks of their own so the triggering CALL is answered first:
//! a charger that is still waiting for our answer may not process a command
//! we send it.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::AbortHandle;
use tracing::{info, warn, Instrument, Span};

use crate::application::engine::SessionEngine;
use crate::domain::{build_power_limit_profile, PendingStart, PowerLimit};
use crate::support::SessionError;

/// Send RemoteStartTransaction. The caller has already marked the session
/// as starting; a failure rolls that back and re-arms the PendingStart.
///
/// `epoch` is the connector's status epoch when the start was issued. If the
/// connector left `Preparing` while the command was on the wire, the outcome
/// no longer describes the connector and nothing is re-armed.
pub(super) fn spawn_remote_start(
    engine: Arc<SessionEngine>,
    charge_point_id: String,
    connector_id: u32,
    id_tag: String,
    epoch: u64,
) {
    tokio::spawn(
        async move {
            let outcome = match engine
                .commands
                .remote_start_transaction(&charge_point_id, connector_id, &id_tag)
                .await
            {
                Ok(status) if status.is_accepted() => Ok(()),
                Ok(status) => Err(SessionError::HardwareRejected {
                    action: "RemoteStartTransaction",
                    status: status.to_string(),
                }),
                Err(e) => Err(SessionError::from(e)),
            };

            let cell = engine.store.session(&charge_point_id);
            let mut state = cell.lock().await;
            state.start_requested = false;
            let still_preparing = state.connector_epoch(connector_id) == epoch;
            match outcome {
                Ok(()) => {
                    info!(connector_id, id_tag = id_tag.as_str(), "Remote start accepted");
                    if still_preparing {
                        state.charging = true;
                    }
                }
                Err(e) if !still_preparing => {
                    warn!(
                        connector_id,
                        id_tag = id_tag.as_str(),
                        error = %e,
                        "Remote start failed after the connector left Preparing"
                    );
                    if state.active_transaction.is_none() {
                        state.charging = false;
                    }
                }
                Err(e) => {
                    warn!(
                        connector_id,
                        id_tag = id_tag.as_str(),
                        error = %e,
                        "Remote start failed, waiting for a new authorization"
                    );
                    if state.active_transaction.is_none() {
                        state.charging = false;
                    }
                    if state.pending_start.is_none() {
                        state.pending_start = Some(PendingStart {
                            connector_id,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        }
        .instrument(Span::current()),
    );
}

/// Send RemoteStopTransaction. Local state is already cleared; the outcome
/// is only logged.
pub(super) fn spawn_remote_stop(engine: Arc<SessionEngine>, charge_point_id: String, transaction_id: i32) {
    tokio::spawn(
        async move {
            match engine
                .commands
                .remote_stop_transaction(&charge_point_id, transaction_id)
                .await
            {
                Ok(status) if status.is_accepted() => {
                    info!(transaction_id, "Remote stop accepted")
                }
                Ok(status) => {
                    let error = SessionError::HardwareRejected {
                        action: "RemoteStopTransaction",
                        status: status.to_string(),
                    };
                    warn!(transaction_id, error = %error, "Remote stop not accepted")
                }
                Err(e) => warn!(transaction_id, error = %e, "Remote stop failed"),
            }
        }
        .instrument(Span::current()),
    );
}

/// Push the power-limit profile once the settle delay has passed.
///
/// The returned handle belongs to the transaction: stopping the transaction
/// aborts a push that has not happened yet.
pub(super) fn schedule_profile_push(
    engine: Arc<SessionEngine>,
    charge_point_id: String,
    transaction_id: i32,
    max_power_kw: Option<f64>,
) -> AbortHandle {
    let delay = engine.session.profile_settle_delay();
    tokio::spawn(
        async move {
            tokio::time::sleep(delay).await;

            let max_stack_level = {
                let cell = engine.store.session(&charge_point_id);
                let state = cell.lock().await;
                match &state.active_transaction {
                    Some(tx) if tx.transaction_id == transaction_id => state.max_stack_level,
                    _ => return,
                }
            };

            let limit = PowerLimit::from_kw(max_power_kw, &engine.charging_profile);
            let profile = build_power_limit_profile(
                limit,
                &engine.charging_profile,
                max_stack_level,
                Utc::now(),
            );

            match engine
                .commands
                .set_charging_profile(&charge_point_id, &profile)
                .await
            {
                Ok(status) if status.is_accepted() => {
                    info!(transaction_id, limit_w = limit.watts, "Charging profile applied")
                }
                // The charger keeps its own default limit.
                Ok(status) => warn!(
                    transaction_id,
                    limit_w = limit.watts,
                    status = %status,
                    "Charging profile not accepted"
                ),
                Err(e) => warn!(transaction_id, error = %e, "Charging profile push failed"),
            }
        }
        .instrument(Span::current()),
    )
    .abort_handle()
}

/// After an accepted boot: learn `ChargeProfileMaxStackLevel` and push the
/// configured `MeterValueSampleInterval`.
pub(super) fn spawn_boot_configuration(engine: Arc<SessionEngine>, charge_point_id: String) {
    tokio::spawn(
        async move {
            let keys = vec!["ChargeProfileMaxStackLevel".to_string()];
            match engine.commands.get_configuration(&charge_point_id, &keys).await {
                Ok(config) => {
                    let level = config
                        .value_of("ChargeProfileMaxStackLevel")
                        .and_then(|v| v.trim().parse::<i32>().ok());
                    if let Some(level) = level {
                        engine.store.session(&charge_point_id).lock().await.max_stack_level =
                            Some(level);
                    }
                    info!(max_stack_level = ?level, "Charger profile capabilities read");
                }
                Err(e) => warn!(error = %e, "GetConfiguration failed"),
            }

            if let Some(interval) = engine.session.meter_value_sample_interval_secs {
                let value = interval.to_string();
                match engine
                    .commands
                    .change_configuration(&charge_point_id, "MeterValueSampleInterval", &value)
                    .await
                {
                    Ok(status) if status.is_accepted() => {
                        info!(interval, "MeterValueSampleInterval applied")
                    }
                    Ok(status) => warn!(interval, status = %status, "MeterValueSampleInterval not accepted"),
                    Err(e) => warn!(error = %e, "ChangeConfiguration failed"),
                }
            }
        }
        .instrument(Span::current()),
    );
}
