//! Session registry: live charger connections by identity
//!
//! At most one connection per identity. A reconnect evicts the older
//! connection: its pending calls fail with `ConnectionClosed` and its writer
//! is told to close the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::connection::{Connection, Outbound};
use crate::support::CommandError;

/// Close code sent to a connection replaced by a newer one.
const CLOSE_REPLACED: u16 = 1000;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Connection>>,
    next_connection_id: AtomicU64,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared() -> SharedSessionRegistry {
        Arc::new(Self::new())
    }

    /// Register a freshly verified connection, evicting any older one.
    pub fn register(
        &self,
        charge_point_id: &str,
        internal_id: &str,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Connection> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(
            connection_id,
            charge_point_id,
            internal_id,
            sender,
        ));

        if let Some(old) = self
            .sessions
            .insert(charge_point_id.to_string(), connection.clone())
        {
            let failed = old.fail_pending(CommandError::ConnectionClosed);
            old.close(CLOSE_REPLACED, "Replaced by a newer connection");
            warn!(
                charge_point_id,
                old_connection_id = old.connection_id,
                failed_calls = failed,
                "Evicted previous connection"
            );
        }

        info!(charge_point_id, connection_id, internal_id, "Registered charge point session");
        metrics::gauge!("ocpp_connected_chargers").set(self.sessions.len() as f64);
        connection
    }

    /// Remove `connection` if it is still the live one for its identity,
    /// and fail its pending calls either way.
    pub fn unregister(&self, connection: &Connection) -> bool {
        let removed = self
            .sessions
            .remove_if(&connection.charge_point_id, |_, live| {
                live.connection_id == connection.connection_id
            })
            .is_some();

        let failed = connection.fail_pending(CommandError::ConnectionClosed);
        if removed {
            info!(
                charge_point_id = connection.charge_point_id.as_str(),
                connection_id = connection.connection_id,
                failed_calls = failed,
                "Unregistered charge point session"
            );
            metrics::gauge!("ocpp_connected_chargers").set(self.sessions.len() as f64);
        }
        removed
    }

    pub fn get(&self, charge_point_id: &str) -> Option<Arc<Connection>> {
        self.sessions.get(charge_point_id).map(|c| c.value().clone())
    }

    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.sessions.contains_key(charge_point_id)
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Close every live connection (server shutdown).
    pub fn close_all(&self, code: u16, reason: &str) {
        for entry in self.sessions.iter() {
            entry.fail_pending(CommandError::ConnectionClosed);
            entry.close(code, reason);
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
