//! RemoteStartTransaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::RemoteStartTransactionResponse;
use serde_json::json;
use tracing::info;

use super::{decode_response, CommandSender};
use crate::application::ports::CommandStatus;
use crate::support::CommandError;

pub async fn remote_start_transaction(
    command_sender: &CommandSender,
    charge_point_id: &str,
    connector_id: u32,
    id_tag: &str,
) -> Result<CommandStatus, CommandError> {
    info!(charge_point_id, connector_id, id_tag, "RemoteStartTransaction");

    let payload = json!({ "connectorId": connector_id, "idTag": id_tag });
    let result = command_sender
        .send_command(charge_point_id, "RemoteStartTransaction", payload)
        .await?;

    let response: RemoteStartTransactionResponse = decode_response(result)?;
    Ok(CommandStatus::parse(&format!("{:?}", response.status)))
}
