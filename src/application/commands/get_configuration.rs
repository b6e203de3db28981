//! GetConfiguration command

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use tracing::info;

use super::{decode_response, encode_request, CommandSender};
use crate::application::ports::{ConfigurationEntry, ConfigurationResult};
use crate::support::CommandError;

/// Read configuration keys; an empty `keys` slice asks for everything.
pub async fn get_configuration(
    command_sender: &CommandSender,
    charge_point_id: &str,
    keys: &[String],
) -> Result<ConfigurationResult, CommandError> {
    info!(charge_point_id, ?keys, "GetConfiguration");

    let request = GetConfigurationRequest {
        key: (!keys.is_empty()).then(|| keys.to_vec()),
    };
    let payload = encode_request(&request)?;
    let result = command_sender
        .send_command(charge_point_id, "GetConfiguration", payload)
        .await?;

    let response: GetConfigurationResponse = decode_response(result)?;
    Ok(ConfigurationResult {
        configuration_key: response
            .configuration_key
            .unwrap_or_default()
            .into_iter()
            .map(|kv| ConfigurationEntry {
                key: kv.key,
                readonly: kv.readonly,
                value: kv.value,
            })
            .collect(),
        unknown_key: response.unknown_key.unwrap_or_default(),
    })
}
