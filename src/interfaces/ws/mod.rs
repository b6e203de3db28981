//! WebSocket interface: the OCPP 1.6-J endpoint chargers connect to.

pub mod ocpp_server;

pub use ocpp_server::OcppServer;
