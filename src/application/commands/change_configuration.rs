//! ChangeConfiguration command

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use tracing::info;

use super::{decode_response, encode_request, CommandSender};
use crate::application::ports::CommandStatus;
use crate::support::CommandError;

pub async fn change_configuration(
    command_sender: &CommandSender,
    charge_point_id: &str,
    key: &str,
    value: &str,
) -> Result<CommandStatus, CommandError> {
    info!(charge_point_id, key, value, "ChangeConfiguration");

    let request = ChangeConfigurationRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    let payload = encode_request(&request)?;
    let result = command_sender
        .send_command(charge_point_id, "ChangeConfiguration", payload)
        .await?;

    let response: ChangeConfigurationResponse = decode_response(result)?;
    Ok(CommandStatus::parse(&format!("{:?}", response.status)))
}
