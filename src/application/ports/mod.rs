//! Application ports
//!
//! [`BackendApi`] is the gateway to the business backend, [`ChargePointCommands`]
//! the contract for commands sent from this server to a charger. Handlers only
//! see these traits, which keeps them testable without a network.

pub mod backend;
pub mod outbound;

pub use backend::{
    BackendApi, BootInfo, ConnectorStatusReport, MeterReport, StartedTransaction,
    TransactionStart, TransactionStop,
};
pub use outbound::{ChargePointCommands, CommandStatus, ConfigurationEntry, ConfigurationResult};
