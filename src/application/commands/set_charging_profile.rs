//! SetChargingProfile command

use rust_ocpp::v1_6::messages::set_charging_profile::SetChargingProfileResponse;
use tracing::info;

use super::{decode_response, encode_request, CommandSender};
use crate::application::ports::CommandStatus;
use crate::domain::SetChargingProfilePayload;
use crate::support::CommandError;

/// `connector_id` 0 in the payload applies the profile to the whole charge point.
pub async fn set_charging_profile(
    command_sender: &CommandSender,
    charge_point_id: &str,
    profile: &SetChargingProfilePayload,
) -> Result<CommandStatus, CommandError> {
    let schedule = &profile.cs_charging_profiles.charging_schedule;
    info!(
        charge_point_id,
        connector_id = profile.connector_id,
        profile_id = profile.cs_charging_profiles.charging_profile_id,
        stack_level = profile.cs_charging_profiles.stack_level,
        limit_w = schedule.charging_schedule_period.first().map(|p| p.limit),
        "SetChargingProfile"
    );

    let payload = encode_request(profile)?;
    let result = command_sender
        .send_command(charge_point_id, "SetChargingProfile", payload)
        .await?;

    let response: SetChargingProfileResponse = decode_response(result)?;
    Ok(CommandStatus::parse(&format!("{:?}", response.status)))
}
