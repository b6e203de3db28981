//! Per-identity session store
//!
//! One `tokio::sync::Mutex` per charger identity: messages of the same
//! charger are serialised against each other, different chargers never
//! contend. Callers must release the guard before awaiting the network.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::domain::SessionState;

pub type SharedSessionStore = Arc<SessionStore>;

/// Read-only copy of a session, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub authorized_id_tag: Option<String>,
    pub pending_connector: Option<u32>,
    pub transaction_id: Option<i32>,
    pub charging: bool,
    pub start_requested: bool,
    pub max_stack_level: Option<i32>,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedSessionStore {
        Arc::new(Self::new())
    }

    /// The session cell for `charge_point_id`, created on first use.
    pub fn session(&self, charge_point_id: &str) -> Arc<Mutex<SessionState>> {
        // Clone out of the shard before the caller awaits the mutex.
        self.sessions
            .entry(charge_point_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop the session of a charger that went away, unless a reconnect
    /// still needs it: a running transaction, a start on the wire or a
    /// parked start. A cell locked by a follow-up task is kept.
    pub fn evict_if_idle(&self, charge_point_id: &str) -> bool {
        self.sessions
            .remove_if(charge_point_id, |_, cell| match cell.try_lock() {
                Ok(state) => {
                    state.active_transaction.is_none()
                        && !state.is_busy()
                        && state.pending_start.is_none()
                }
                Err(_) => false,
            })
            .is_some()
    }

    pub async fn snapshot(&self, charge_point_id: &str) -> SessionSnapshot {
        let cell = self.session(charge_point_id);
        let state = cell.lock().await;
        SessionSnapshot {
            authorized_id_tag: state.authorization.as_ref().map(|a| a.id_tag.clone()),
            pending_connector: state.pending_start.as_ref().map(|p| p.connector_id),
            transaction_id: state.active_transaction.as_ref().map(|t| t.transaction_id),
            charging: state.charging,
            start_requested: state.start_requested,
            max_stack_level: state.max_stack_level,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PendingStart;
    use chrono::Utc;

    #[tokio::test]
    async fn sessions_are_isolated_per_identity() {
        let store = SessionStore::new();
        store.session("CP001").lock().await.charging = true;
        store.session("CP002").lock().await.pending_start = Some(PendingStart {
            connector_id: 2,
            timestamp: Utc::now(),
        });

        let a = store.snapshot("CP001").await;
        let b = store.snapshot("CP002").await;
        assert!(a.charging);
        assert_eq!(a.pending_connector, None);
        assert!(!b.charging);
        assert_eq!(b.pending_connector, Some(2));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_busy_ones_kept() {
        let store = SessionStore::new();
        store.session("CP001").lock().await.max_stack_level = Some(3);
        store.session("CP002").lock().await.charging = true;
        store.session("CP003").lock().await.pending_start = Some(PendingStart {
            connector_id: 1,
            timestamp: Utc::now(),
        });

        assert!(store.evict_if_idle("CP001"));
        assert!(!store.evict_if_idle("CP002"));
        assert!(!store.evict_if_idle("CP003"));
        assert!(!store.evict_if_idle("CP404"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn locked_session_is_not_evicted() {
        let store = SessionStore::new();
        let cell = store.session("CP001");
        let _guard = cell.lock().await;

        assert!(!store.evict_if_idle("CP001"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn same_identity_shares_one_cell() {
        let store = SessionStore::new();
        let a = store.session("CP001");
        let b = store.session("CP001");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
