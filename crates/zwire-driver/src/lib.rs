//! Transport coordination and request correlation for serial controllers.
//!
//! This is the layer collaborators talk to. A [`Driver`] owns one physical
//! channel through a [`Coordinator`], which guarantees that frame
//! transmission and frame reception never interleave on the wire and retries
//! unacknowledged frames. On top of that the driver matches responses and
//! session-tagged callbacks to the requests that caused them and routes
//! everything else to registered handlers.

pub mod config;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod handlers;
pub mod request;
pub mod session;
pub mod signal;

pub use config::{
    CoordinatorConfig, DriverConfig, ACK_TIMEOUT, CHECKSUM_FAILURE_LIMIT, MAX_ATTEMPTS,
    REOPEN_ATTEMPTS, REOPEN_DELAY, RETRY_BASE_DELAY, RETRY_DELAY_STEP, STARTUP_TIMEOUT,
};
pub use coordinator::{Coordinator, CoordinatorStats};
pub use driver::{Driver, ResetOutcome};
pub use error::{DriverError, Result};
pub use handlers::Subscription;
pub use request::{callback_session, response_accepted, CallbackRequest};
pub use session::SessionId;
pub use signal::{Signal, SignalClosed};
