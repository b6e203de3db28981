//! Inbound interfaces.

pub mod ws;

pub use ws::OcppServer;
