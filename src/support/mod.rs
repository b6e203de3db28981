//! Cross-cutting support code: wire framing, errors, shutdown, retry.

pub mod errors;
pub mod ocpp_frame;
pub mod retry;
pub mod shutdown;

pub use errors::{BackendError, CommandError, ProtocolError, RpcErrorCode, SessionError};
pub use ocpp_frame::{OcppFrame, OcppFrameError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
