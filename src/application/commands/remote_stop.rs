//! RemoteStopTransaction command

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use tracing::info;

use super::{decode_response, encode_request, CommandSender};
use crate::application::ports::CommandStatus;
use crate::support::CommandError;

pub async fn remote_stop_transaction(
    command_sender: &CommandSender,
    charge_point_id: &str,
    transaction_id: i32,
) -> Result<CommandStatus, CommandError> {
    info!(charge_point_id, transaction_id, "RemoteStopTransaction");

    let payload = encode_request(&RemoteStopTransactionRequest { transaction_id })?;
    let result = command_sender
        .send_command(charge_point_id, "RemoteStopTransaction", payload)
        .await?;

    let response: RemoteStopTransactionResponse = decode_response(result)?;
    Ok(CommandStatus::parse(&format!("{:?}", response.status)))
}
