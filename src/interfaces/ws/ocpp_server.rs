//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`
//! (or `/{charge_point_id}`), verifies the identity with the backend and then
//! runs three tasks per connection: a writer draining the outbound channel,
//! a reader routing frames, and a worker answering incoming CALLs in order.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn, Instrument};

use crate::application::dispatch::{ActionDispatcher, CallContext};
use crate::application::ports::BackendApi;
use crate::application::session::{
    Connection, Outbound, SharedSessionRegistry, SharedSessionStore,
};
use crate::config::ServerConfig;
use crate::support::retry::{retry_with_backoff, RetryConfig};
use crate::support::{BackendError, CommandError, OcppFrame, ProtocolError, ShutdownSignal};

/// OCPP 1.6 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_PROTOCOL_ERROR: u16 = 1002;
const CLOSE_POLICY_VIOLATION: u16 = 1008;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// How long the writer gets to flush a close frame before it is dropped.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// OCPP WebSocket Server
pub struct OcppServer {
    config: ServerConfig,
    identity_retry: RetryConfig,
    backend: Arc<dyn BackendApi>,
    session_registry: SharedSessionRegistry,
    session_store: Option<SharedSessionStore>,
    dispatcher: Arc<ActionDispatcher>,
    shutdown_signal: Option<ShutdownSignal>,
}

/// Everything a connection task needs, cloned per accepted socket.
#[derive(Clone)]
struct ConnectionDeps {
    identity_retry: RetryConfig,
    backend: Arc<dyn BackendApi>,
    session_registry: SharedSessionRegistry,
    session_store: Option<SharedSessionStore>,
    dispatcher: Arc<ActionDispatcher>,
    shutdown: Option<ShutdownSignal>,
    max_malformed_frames: u32,
}

impl OcppServer {
    pub fn new(
        config: ServerConfig,
        identity_check_attempts: u32,
        backend: Arc<dyn BackendApi>,
        session_registry: SharedSessionRegistry,
        dispatcher: Arc<ActionDispatcher>,
    ) -> Self {
        Self {
            config,
            identity_retry: RetryConfig::attempts(identity_check_attempts),
            backend,
            session_registry,
            session_store: None,
            dispatcher,
            shutdown_signal: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    /// Evict idle sessions from `store` when their charger disconnects.
    pub fn with_session_store(mut self, store: SharedSessionStore) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Override the backoff used while the backend cannot confirm an identity.
    pub fn with_identity_retry(mut self, retry: RetryConfig) -> Self {
        self.identity_retry = retry;
        self
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), BoxError> {
        let addr = self.config.address();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "OCPP 1.6 central system listening");
        info!(
            "Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            local_addr
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = wait_for_shutdown(&self.shutdown_signal) => {
                    info!("WebSocket server received shutdown signal");
                    self.graceful_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let deps = ConnectionDeps {
            identity_retry: self.identity_retry.clone(),
            backend: self.backend.clone(),
            session_registry: self.session_registry.clone(),
            session_store: self.session_store.clone(),
            dispatcher: self.dispatcher.clone(),
            shutdown: self.shutdown_signal.clone(),
            max_malformed_frames: self.config.max_malformed_frames,
        };

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, deps).await {
                warn!(%addr, error = %e, "Connection ended with error");
            }
        });
    }

    fn graceful_shutdown(&self) {
        let count = self.session_registry.count();
        if count > 0 {
            info!(count, "Closing connected charge points");
        }
        self.session_registry
            .close_all(CLOSE_GOING_AWAY, "Server shutting down");
    }

    pub fn session_registry(&self) -> &SharedSessionRegistry {
        &self.session_registry
    }
}

async fn wait_for_shutdown(signal: &Option<ShutdownSignal>) {
    match signal {
        Some(signal) => signal.wait().await,
        None => std::future::pending().await,
    }
}

/// Extract charge point ID from WebSocket request path.
/// Expected format: /ocpp/{charge_point_id} or /{charge_point_id}
fn extract_charge_point_id(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');

    if let Some(id) = path.strip_prefix("ocpp/") {
        let id = id.trim_matches('/');
        if !id.is_empty() && !id.contains('/') {
            return Some(id.to_string());
        }
        return None;
    }

    let path = path.trim_end_matches('/');
    if !path.is_empty() && !path.contains('/') {
        return Some(path.to_string());
    }

    None
}

/// `Ok(true)` when the client offered `ocpp1.6`, `Ok(false)` when it offered
/// nothing, `Err` when it offered only other protocols.
fn negotiate_subprotocol(requested: &str) -> Result<bool, ()> {
    if requested.trim().is_empty() {
        return Ok(false);
    }
    if requested
        .split(',')
        .map(str::trim)
        .any(|p| p == OCPP_SUBPROTOCOL)
    {
        Ok(true)
    } else {
        Err(())
    }
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

fn close_frame(code: u16, reason: String) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    }
}

/// A CALL taken off the socket, waiting for the worker.
struct IncomingCall {
    message_id: String,
    action: String,
    payload: Value,
}

/// Why the reader stopped.
#[derive(Debug, PartialEq, Eq)]
enum ReaderExit {
    PeerClosed,
    TooManyMalformed,
    TransportError,
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    deps: ConnectionDeps,
) -> Result<(), BoxError> {
    debug!(%addr, "New TCP connection");

    let mut charge_point_id: Option<String> = None;

    let mut ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let requested = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            debug!(%addr, path, requested, "WebSocket handshake");

            match negotiate_subprotocol(requested) {
                Ok(true) => {
                    response.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        HeaderValue::from_static(OCPP_SUBPROTOCOL),
                    );
                }
                Ok(false) => {}
                Err(()) => {
                    warn!(%addr, requested, "Client does not offer ocpp1.6");
                    return Err(reject(StatusCode::BAD_REQUEST, "ocpp1.6 subprotocol required"));
                }
            }

            match extract_charge_point_id(path) {
                Some(id) => {
                    charge_point_id = Some(id);
                    Ok(response)
                }
                None => {
                    warn!(%addr, path, "No charge point identity in path");
                    Err(reject(StatusCode::NOT_FOUND, "Charge point identity missing from path"))
                }
            }
        },
    )
    .await?;

    let Some(charge_point_id) = charge_point_id else {
        return Ok(());
    };

    let backend = deps.backend.clone();
    let verified = retry_with_backoff(
        deps.identity_retry.clone(),
        || {
            let backend = backend.clone();
            let id = charge_point_id.clone();
            async move { backend.verify_identity(&id).await }
        },
        BackendError::is_unavailable,
        "verify_identity",
    )
    .await;

    let internal_id = match verified {
        Ok(internal_id) => internal_id,
        Err(e) => {
            let (code, reason) = match &e {
                BackendError::Rejected { .. } => {
                    (CLOSE_POLICY_VIOLATION, "Unknown or inactive charge point")
                }
                _ => (CLOSE_TRY_AGAIN_LATER, "Backend unavailable"),
            };
            warn!(
                charge_point_id = charge_point_id.as_str(),
                %addr,
                error = %e,
                close_code = code,
                "Identity verification failed"
            );
            let _ = ws_stream
                .close(Some(close_frame(code, reason.to_string())))
                .await;
            return Ok(());
        }
    };

    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();
    let connection = deps
        .session_registry
        .register(&charge_point_id, &internal_id, tx);
    let span = connection.span().clone();

    info!(parent: &span, %addr, internal_id = internal_id.as_str(), "Connected");

    let (ws_sender, ws_receiver) = ws_stream.split();
    let (call_tx, call_rx) = mpsc::unbounded_channel::<IncomingCall>();

    let mut writer = tokio::spawn(run_writer(ws_sender, rx).instrument(span.clone()));
    let worker = tokio::spawn(
        run_worker(connection.clone(), deps.dispatcher.clone(), call_rx).instrument(span.clone()),
    );
    let mut reader = tokio::spawn(
        run_reader(
            connection.clone(),
            ws_receiver,
            call_tx,
            deps.max_malformed_frames,
        )
        .instrument(span.clone()),
    );

    tokio::select! {
        exit = &mut reader => {
            if matches!(exit, Ok(ReaderExit::TooManyMalformed)) {
                let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
            }
        }
        _ = &mut writer => {}
        _ = wait_for_shutdown(&deps.shutdown) => {
            info!(parent: &span, "Connection closing due to server shutdown");
            connection.close(CLOSE_GOING_AWAY, "Server shutting down");
            let _ = tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer).await;
        }
    }

    // A replaced connection leaves the session to its successor.
    if deps.session_registry.unregister(&connection) {
        if let Some(store) = &deps.session_store {
            if store.evict_if_idle(&connection.charge_point_id) {
                debug!(parent: &span, "Idle session evicted");
            }
        }
    }
    reader.abort();
    writer.abort();
    worker.abort();

    info!(parent: &span, "Disconnected");
    Ok(())
}

/// Drain the outbound channel onto the socket.
async fn run_writer(
    mut ws_sender: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Text(text) => {
                debug!(frame = text.as_str(), "->");
                if let Err(e) = ws_sender.send(Message::Text(text)).await {
                    error!(error = %e, "Send error");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                info!(code, reason = reason.as_str(), "Sending close frame");
                let _ = ws_sender
                    .send(Message::Close(Some(close_frame(code, reason))))
                    .await;
                break;
            }
        }
    }
}

/// Answer incoming CALLs one at a time, in arrival order.
async fn run_worker(
    connection: Arc<Connection>,
    dispatcher: Arc<ActionDispatcher>,
    mut calls: mpsc::UnboundedReceiver<IncomingCall>,
) {
    while let Some(call) = calls.recv().await {
        let ctx = CallContext {
            charge_point_id: connection.charge_point_id.clone(),
            internal_id: connection.internal_id.clone(),
            message_id: call.message_id.clone(),
        };

        let frame = match dispatcher.dispatch(ctx, &call.action, call.payload).await {
            Ok(payload) => OcppFrame::CallResult {
                message_id: call.message_id,
                payload,
            },
            Err(e) => {
                warn!(
                    action = call.action.as_str(),
                    message_id = call.message_id.as_str(),
                    code = %e.code,
                    description = e.description.as_str(),
                    "Answering with CALLERROR"
                );
                OcppFrame::error_response(call.message_id, &e)
            }
        };

        if connection.send_text(frame.serialize()).is_err() {
            break;
        }
    }
}

/// Read frames: CALLs go to the worker, replies complete pending calls.
async fn run_reader(
    connection: Arc<Connection>,
    mut ws_receiver: SplitStream<WebSocketStream<TcpStream>>,
    calls: mpsc::UnboundedSender<IncomingCall>,
    max_malformed_frames: u32,
) -> ReaderExit {
    let mut malformed: u32 = 0;

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(frame)) => {
                info!(?frame, "Close frame received");
                return ReaderExit::PeerClosed;
            }
            Ok(Message::Binary(data)) => {
                warn!(bytes = data.len(), "Binary message received, ignoring");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket error");
                return ReaderExit::TransportError;
            }
        };

        connection.touch();
        debug!(frame = text.as_str(), "<-");

        match OcppFrame::parse(&text) {
            Ok(OcppFrame::Call {
                message_id,
                action,
                payload,
            }) => {
                malformed = 0;
                let call = IncomingCall {
                    message_id,
                    action,
                    payload,
                };
                if calls.send(call).is_err() {
                    return ReaderExit::TransportError;
                }
            }
            Ok(OcppFrame::CallResult {
                message_id,
                payload,
            }) => {
                malformed = 0;
                connection.complete_call(&message_id, Ok(payload));
            }
            Ok(OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                ..
            }) => {
                malformed = 0;
                connection.complete_call(
                    &message_id,
                    Err(CommandError::CallError {
                        code: error_code,
                        description: error_description,
                    }),
                );
            }
            Err(e) => {
                malformed += 1;
                warn!(error = %e, malformed, "Malformed frame");

                if let Some(message_id) = OcppFrame::recover_call_id(&text) {
                    let error = ProtocolError::new(e.rpc_code(), e.to_string());
                    let reply = OcppFrame::error_response(message_id, &error);
                    let _ = connection.send_text(reply.serialize());
                }

                if malformed >= max_malformed_frames {
                    warn!(malformed, "Too many malformed frames, closing");
                    connection.close(CLOSE_PROTOCOL_ERROR, "Too many malformed frames");
                    return ReaderExit::TooManyMalformed;
                }
            }
        }
    }

    ReaderExit::PeerClosed
}
