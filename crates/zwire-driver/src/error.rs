use zwire_frame::FunctionType;

/// Errors surfaced to collaborators of the driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// Opening the physical channel failed.
    #[error("transport error: {0}")]
    Transport(#[from] zwire_transport::TransportError),

    /// The frame could not be encoded.
    #[error("frame error: {0}")]
    Frame(#[from] zwire_frame::FrameError),

    /// The controller never acknowledged the frame.
    #[error("frame not acknowledged after {attempts} attempts")]
    SendFailed { attempts: u32 },

    /// The immediate response refused the request.
    #[error("controller rejected {function}")]
    Rejected { function: FunctionType },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Every session id is tied to an outstanding callback.
    #[error("all session ids are in use")]
    SessionsExhausted,

    /// The driver was shut down.
    #[error("driver shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, DriverError>;
