//! Per-charger session records
//!
//! Everything the engine remembers about one charger identity between
//! messages. None of it is persisted: the backend is the system of record
//! and chargers re-announce their status after a reconnect.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rust_ocpp::v1_6::types::AuthorizationStatus;
use tokio::task::AbortHandle;

/// Result of the most recent Authorize on a charger.
#[derive(Debug, Clone)]
pub struct AuthorizationRecord {
    pub id_tag: String,
    pub timestamp: DateTime<Utc>,
    pub status: AuthorizationStatus,
}

impl AuthorizationRecord {
    pub fn new(id_tag: impl Into<String>, status: AuthorizationStatus, now: DateTime<Utc>) -> Self {
        Self {
            id_tag: id_tag.into(),
            timestamp: now,
            status,
        }
    }

    /// Accepted and not older than `ttl` at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        matches!(self.status, AuthorizationStatus::Accepted) && now - self.timestamp <= ttl
    }
}

/// A connector that reported `Preparing` before any usable authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStart {
    pub connector_id: u32,
    pub timestamp: DateTime<Utc>,
}

/// The transaction currently running on a charger.
#[derive(Debug)]
pub struct ActiveTransaction {
    pub transaction_id: i32,
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: i32,
    pub started_at: DateTime<Utc>,
    /// Deferred charging-profile push bound to this transaction.
    pub profile_push: Option<AbortHandle>,
}

impl ActiveTransaction {
    /// Drop the pending profile push, if it has not fired yet.
    pub fn cancel_profile_push(&mut self) {
        if let Some(handle) = self.profile_push.take() {
            handle.abort();
        }
    }
}

impl Drop for ActiveTransaction {
    fn drop(&mut self) {
        self.cancel_profile_push();
    }
}

/// Whole per-identity state.
#[derive(Debug, Default)]
pub struct SessionState {
    pub authorization: Option<AuthorizationRecord>,
    pub pending_start: Option<PendingStart>,
    pub active_transaction: Option<ActiveTransaction>,
    /// Charging flag: `NotCharging ↔ Charging`.
    pub charging: bool,
    /// A RemoteStartTransaction is on the wire and not yet answered.
    pub start_requested: bool,
    /// `ChargeProfileMaxStackLevel` as reported by the charger.
    pub max_stack_level: Option<i32>,
    /// Per connector, bumped on every status other than `Preparing`.
    pub connector_epochs: HashMap<u32, u64>,
}

impl SessionState {
    /// The authorization that may start a session at `now`, if any.
    pub fn valid_authorization(&self, now: DateTime<Utc>, ttl: Duration) -> Option<&AuthorizationRecord> {
        self.authorization
            .as_ref()
            .filter(|record| record.is_valid_at(now, ttl))
    }

    /// Charging, or about to be.
    pub fn is_busy(&self) -> bool {
        self.charging || self.start_requested
    }

    pub fn connector_epoch(&self, connector_id: u32) -> u64 {
        self.connector_epochs.get(&connector_id).copied().unwrap_or(0)
    }

    /// The connector reported something other than `Preparing`: a start
    /// parked for it is void.
    pub fn leave_preparing(&mut self, connector_id: u32) {
        *self.connector_epochs.entry(connector_id).or_default() += 1;
        if self
            .pending_start
            .as_ref()
            .is_some_and(|p| p.connector_id == connector_id)
        {
            self.pending_start = None;
        }
    }

    /// Forget the session after `connector_id` went idle. A transaction
    /// running on another connector is left alone.
    pub fn reset_after_idle(&mut self, connector_id: u32) -> Option<ActiveTransaction> {
        self.leave_preparing(connector_id);
        match &self.active_transaction {
            Some(tx) if tx.connector_id != connector_id => None,
            _ => {
                self.charging = false;
                self.active_transaction.take()
            }
        }
    }
}
