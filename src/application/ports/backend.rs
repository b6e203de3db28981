//! Backend API port
//!
//! Every call carries a bounded timeout. Callers decide on
//! [`BackendError::is_unavailable`] except for identity verification, where
//! an explicit rejection and an unreachable backend lead to different
//! close codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::IdTagInfo;

use crate::support::BackendError;

/// Charger metadata reported in BootNotification.
#[derive(Debug, Clone, PartialEq)]
pub struct BootInfo {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStart {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i32,
    pub timestamp: DateTime<Utc>,
}

/// Backend answer to a transaction start.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedTransaction {
    pub transaction_id: i32,
    /// Power cap assigned to the session; `None` means "use the default".
    pub max_power_kw: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionStop {
    pub transaction_id: i32,
    pub meter_stop: i32,
    pub timestamp: DateTime<Utc>,
    pub id_tag: Option<String>,
    pub reason: Option<String>,
}

/// Latest energy register reading of a running transaction, in Wh.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterReport {
    pub transaction_id: i32,
    pub meter_value_wh: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorStatusReport {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub status: String,
    pub error_code: String,
    pub info: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Resolve a charger identity to the backend's internal id.
    ///
    /// `Err(BackendError::Rejected)` when the charger is unknown, forbidden
    /// or deactivated.
    async fn verify_identity(&self, charge_point_id: &str) -> Result<String, BackendError>;

    async fn authorize(&self, charge_point_id: &str, id_tag: &str)
        -> Result<IdTagInfo, BackendError>;

    async fn notify_boot(&self, charge_point_id: &str, info: &BootInfo) -> Result<(), BackendError>;

    /// Returns the backend clock.
    async fn notify_heartbeat(&self, charge_point_id: &str) -> Result<DateTime<Utc>, BackendError>;

    async fn start_transaction(
        &self,
        start: &TransactionStart,
    ) -> Result<StartedTransaction, BackendError>;

    async fn stop_transaction(&self, stop: &TransactionStop) -> Result<(), BackendError>;

    async fn report_meter_value(&self, report: &MeterReport) -> Result<(), BackendError>;

    async fn report_connector_status(
        &self,
        report: &ConnectorStatusReport,
    ) -> Result<(), BackendError>;
}
