//! Application layer: routing, session engine, outbound commands and the
//! ports to the outside world.

pub mod commands;
pub mod dispatch;
pub mod engine;
pub mod handlers;
pub mod ports;
pub mod session;

pub use commands::{CommandSender, SharedCommandSender};
pub use dispatch::{ocpp16_schemas, ActionDispatcher, CallContext, SchemaRegistry};
pub use engine::SessionEngine;
pub use ports::{BackendApi, ChargePointCommands, CommandStatus};
pub use session::{SessionRegistry, SessionStore, SharedSessionRegistry, SharedSessionStore};
