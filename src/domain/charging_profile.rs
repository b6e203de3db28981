//! Charging-profile builder
//!
//! Turns the backend's power cap (kW) into the SetChargingProfile payload
//! pushed once a transaction is running.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::ChargingProfileConfig;

/// Station-wide scope: the profile applies to every connector.
pub const WHOLE_CHARGE_POINT: i32 = 0;

/// Power limit derived from the backend cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLimit {
    pub watts: i32,
}

impl PowerLimit {
    /// `None` → default cap; any cap the backend sent, zero and negative
    /// included, is raised to the floor.
    pub fn from_kw(max_power_kw: Option<f64>, cfg: &ChargingProfileConfig) -> Self {
        let kw = match max_power_kw {
            Some(kw) if kw.is_finite() => kw,
            _ => cfg.default_power_kw,
        };
        let kw = kw.max(cfg.min_power_kw);
        Self {
            watts: (kw * 1000.0).floor() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChargingProfilePayload {
    pub connector_id: i32,
    pub cs_charging_profiles: ChargingProfilePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingProfilePayload {
    pub charging_profile_id: i32,
    pub stack_level: i32,
    pub charging_profile_purpose: &'static str,
    pub charging_profile_kind: &'static str,
    pub charging_schedule: ChargingSchedulePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePayload {
    pub start_schedule: DateTime<Utc>,
    pub charging_rate_unit: &'static str,
    pub charging_schedule_period: Vec<ChargingSchedulePeriodPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargingSchedulePeriodPayload {
    pub start_period: i32,
    pub limit: i32,
    pub number_phases: i32,
}

/// Build the station-wide power limit command.
///
/// `max_stack_level` is the charger's `ChargeProfileMaxStackLevel` when known;
/// the configured level is clamped to it.
pub fn build_power_limit_profile(
    limit: PowerLimit,
    cfg: &ChargingProfileConfig,
    max_stack_level: Option<i32>,
    now: DateTime<Utc>,
) -> SetChargingProfilePayload {
    let stack_level = match max_stack_level {
        Some(max) if max >= 0 => cfg.stack_level.min(max),
        _ => cfg.stack_level,
    };

    SetChargingProfilePayload {
        connector_id: WHOLE_CHARGE_POINT,
        cs_charging_profiles: ChargingProfilePayload {
            charging_profile_id: cfg.profile_id,
            stack_level,
            charging_profile_purpose: "TxDefaultProfile",
            charging_profile_kind: "Absolute",
            charging_schedule: ChargingSchedulePayload {
                // Must not lie in the charger's future.
                start_schedule: now - Duration::minutes(10),
                charging_rate_unit: "W",
                charging_schedule_period: vec![ChargingSchedulePeriodPayload {
                    start_period: 0,
                    limit: limit.watts,
                    number_phases: cfg.number_phases,
                }],
            },
        },
    }
}
