//! Domain records and pure computations.

pub mod charging_profile;
pub mod session;

pub use charging_profile::{build_power_limit_profile, PowerLimit, SetChargingProfilePayload};
pub use session::{ActiveTransaction, AuthorizationRecord, PendingStart, SessionState};
