//! Outbound port: commands sent from this server to a charge point.
//!
//! The production implementation is
//! [`CommandSender`](crate::application::commands::CommandSender), which frames
//! each command as an OCPP-J CALL over the charger's live connection.

use async_trait::async_trait;

use crate::domain::SetChargingProfilePayload;
use crate::support::CommandError;

/// Status field of a command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Accepted,
    Rejected,
    NotSupported,
    RebootRequired,
    Unknown(String),
}

impl CommandStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "Accepted" => Self::Accepted,
            "Rejected" => Self::Rejected,
            "NotSupported" => Self::NotSupported,
            "RebootRequired" => Self::RebootRequired,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "Accepted"),
            Self::Rejected => write!(f, "Rejected"),
            Self::NotSupported => write!(f, "NotSupported"),
            Self::RebootRequired => write!(f, "RebootRequired"),
            Self::Unknown(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationEntry {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigurationResult {
    pub configuration_key: Vec<ConfigurationEntry>,
    pub unknown_key: Vec<String>,
}

impl ConfigurationResult {
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.configuration_key
            .iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value.as_deref())
    }
}

#[async_trait]
pub trait ChargePointCommands: Send + Sync {
    async fn remote_start_transaction(
        &self,
        charge_point_id: &str,
        connector_id: u32,
        id_tag: &str,
    ) -> Result<CommandStatus, CommandError>;

    async fn remote_stop_transaction(
        &self,
        charge_point_id: &str,
        transaction_id: i32,
    ) -> Result<CommandStatus, CommandError>;

    async fn set_charging_profile(
        &self,
        charge_point_id: &str,
        profile: &SetChargingProfilePayload,
    ) -> Result<CommandStatus, CommandError>;

    /// `keys` empty means "all keys".
    async fn get_configuration(
        &self,
        charge_point_id: &str,
        keys: &[String],
    ) -> Result<ConfigurationResult, CommandError>;

    async fn change_configuration(
        &self,
        charge_point_id: &str,
        key: &str,
        value: &str,
    ) -> Result<CommandStatus, CommandError>;
}
