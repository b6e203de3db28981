//! One live WebSocket connection to a charge point
//!
//! Besides the outbound channel to the writer task, the connection owns the
//! table of server-initiated calls awaiting an answer. Keeping that table on
//! the connection means a reconnect never sees replies meant for its
//! predecessor, and closing the connection fails exactly its own calls.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard};
use tracing::{debug, info_span, warn, Span};
use uuid::Uuid;

use crate::support::CommandError;

/// Work for the connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// A server-initiated call waiting for CALLRESULT / CALLERROR.
#[derive(Debug)]
struct PendingCall {
    action: String,
    sent_at: Instant,
    reply: oneshot::Sender<Result<Value, CommandError>>,
}

/// Receiving half handed to the caller of [`Connection::begin_call`].
pub type PendingReply = oneshot::Receiver<Result<Value, CommandError>>;

#[derive(Debug)]
pub struct Connection {
    /// Unique per accepted socket, so a stale connection can be told apart
    /// from its replacement under the same identity.
    pub connection_id: u64,
    pub charge_point_id: String,
    /// Id the backend knows this charger by.
    pub internal_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<Outbound>,
    last_activity_ms: AtomicI64,
    pending: DashMap<String, PendingCall>,
    /// Serialises server-initiated calls: OCPP-J allows one in flight.
    call_lock: Mutex<()>,
    span: Span,
}

impl Connection {
    pub fn new(
        connection_id: u64,
        charge_point_id: impl Into<String>,
        internal_id: impl Into<String>,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Self {
        let charge_point_id = charge_point_id.into();
        let now = Utc::now();
        let span = info_span!(
            "charger",
            charge_point_id = charge_point_id.as_str(),
            connection_id
        );
        Self {
            connection_id,
            charge_point_id,
            internal_id: internal_id.into(),
            connected_at: now,
            sender,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            pending: DashMap::new(),
            call_lock: Mutex::new(()),
            span,
        }
    }

    /// Span carrying the charger identity; every task of the connection runs in it.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn send_text(&self, text: String) -> Result<(), CommandError> {
        self.sender
            .send(Outbound::Text(text))
            .map_err(|_| CommandError::SendFailed("connection writer has stopped".to_string()))
    }

    /// Ask the writer task to send a close frame and stop.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        let _ = self.sender.send(Outbound::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_activity_ms.load(Ordering::Relaxed))
            .single()
            .unwrap_or(self.connected_at)
    }

    /// Wait for the right to send the next server-initiated call.
    pub async fn lock_calls(&self) -> MutexGuard<'_, ()> {
        self.call_lock.lock().await
    }

    /// Register a call under a fresh message id that no pending call uses.
    pub fn begin_call(&self, action: &str) -> (String, PendingReply) {
        let (reply, rx) = oneshot::channel();
        loop {
            let message_id = Uuid::new_v4().to_string();
            if let Entry::Vacant(slot) = self.pending.entry(message_id.clone()) {
                slot.insert(PendingCall {
                    action: action.to_string(),
                    sent_at: Instant::now(),
                    reply,
                });
                return (message_id, rx);
            }
        }
    }

    /// Deliver the answer to a pending call. Returns `false` for unknown ids.
    pub fn complete_call(&self, message_id: &str, result: Result<Value, CommandError>) -> bool {
        match self.pending.remove(message_id) {
            Some((_, call)) => {
                debug!(
                    parent: &self.span,
                    action = call.action.as_str(),
                    message_id,
                    elapsed_ms = call.sent_at.elapsed().as_millis() as u64,
                    "Reply received"
                );
                let _ = call.reply.send(result);
                true
            }
            None => {
                warn!(parent: &self.span, message_id, "Reply for unknown call");
                false
            }
        }
    }

    /// Drop a pending call without answering it (timeout, send failure).
    pub fn forget_call(&self, message_id: &str) {
        self.pending.remove(message_id);
    }

    /// Fail every pending call with `error`. Returns how many were failed.
    pub fn fail_pending(&self, error: CommandError) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.reply.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
