//! # OCPP Bridge
//!
//! OCPP 1.6-J charger-session engine. Charge points connect over WebSocket;
//! the bridge keeps the per-charger session state machine and forwards every
//! business decision to the backend API.
//!
//! ## Architecture
//!
//! - **domain**: Session records and the charging-profile builder
//! - **application**: Dispatcher, message handlers, outbound commands, session state
//! - **infrastructure**: HTTP gateway to the backend business API
//! - **interfaces**: The OCPP WebSocket server
//! - **support**: OCPP-J framing, errors, retry and shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod support;

pub use config::{default_config_path, AppConfig};
