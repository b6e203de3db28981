//! MeterValues handler
//!
//! Forwards the latest energy register reading of the running transaction.
//! Always answers `{}`: a lost meter update never interrupts a session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Measurand, MeterValue, UnitOfMeasure};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{parse_request, to_payload};
use crate::application::dispatch::{CallContext, HandlerResult};
use crate::application::engine::SessionEngine;
use crate::application::ports::MeterReport;

pub async fn handle_meter_values(
    engine: Arc<SessionEngine>,
    ctx: CallContext,
    payload: Value,
) -> HandlerResult {
    let req: MeterValuesRequest = parse_request("MeterValues", payload)?;
    debug!(
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        samples = req.meter_value.len(),
        "MeterValues"
    );

    let Some(energy_wh) = latest_energy_reading(&req.meter_value) else {
        debug!(connector_id = req.connector_id, "No energy register sample");
        return to_payload(&MeterValuesResponse {});
    };

    let transaction_id = match req.transaction_id {
        Some(id) => Some(id),
        None => {
            let cell = engine.store.session(&ctx.charge_point_id);
            let state = cell.lock().await;
            state
                .active_transaction
                .as_ref()
                .filter(|tx| tx.connector_id == req.connector_id)
                .map(|tx| tx.transaction_id)
        }
    };

    match transaction_id {
        Some(transaction_id) => {
            let report = MeterReport {
                transaction_id,
                meter_value_wh: energy_wh,
            };
            match engine.backend.report_meter_value(&report).await {
                Ok(()) => info!(transaction_id, energy_wh, "Meter value forwarded"),
                Err(e) => warn!(transaction_id, energy_wh, error = %e, "Meter value not forwarded"),
            }
        }
        None => debug!(
            connector_id = req.connector_id,
            energy_wh,
            "Energy reading outside of a transaction"
        ),
    }

    to_payload(&MeterValuesResponse {})
}

/// Latest `Energy.Active.Import.Register` reading in whole Wh.
///
/// A sample without a measurand is that register. Values arrive as decimal
/// strings; `kWh` readings are converted and fractions truncated.
pub fn latest_energy_reading(meter_values: &[MeterValue]) -> Option<i64> {
    let mut latest: Option<(DateTime<Utc>, i64)> = None;

    for meter_value in meter_values {
        for sampled in &meter_value.sampled_value {
            let is_register = matches!(
                sampled.measurand,
                None | Some(Measurand::EnergyActiveImportRegister)
            );
            if !is_register {
                continue;
            }
            let Ok(value) = sampled.value.trim().parse::<f64>() else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }
            let wh = match sampled.unit {
                Some(UnitOfMeasure::KWh) => value * 1000.0,
                _ => value,
            };

            // Later entries win ties.
            if latest.map_or(true, |(at, _)| meter_value.timestamp >= at) {
                latest = Some((meter_value.timestamp, wh.floor() as i64));
            }
        }
    }

    latest.map(|(_, wh)| wh)
}
