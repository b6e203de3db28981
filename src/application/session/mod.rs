//! Connection routing and per-charger session state.

pub mod connection;
pub mod registry;
pub mod store;

pub use connection::{Connection, Outbound};
pub use registry::{SessionRegistry, SharedSessionRegistry};
pub use store::{SessionSnapshot, SessionStore, SharedSessionStore};
