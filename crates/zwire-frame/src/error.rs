/// Errors that can occur during frame encoding/decoding.
///
/// A checksum mismatch is not an error: it is recorded on the decoded
/// [`DataFrame`](crate::DataFrame) so the caller can answer with a NAK.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The parameters do not fit in the one-byte length field.
    #[error("parameters too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
