//! Checksummed frame codec for the controller serial protocol.
//!
//! Every data frame on the wire is:
//! - a start-of-frame marker (`0x01`)
//! - a length byte covering message type, message id and parameters
//! - message type, message id, parameters
//! - an XOR checksum seeded with `0xFF`
//!
//! ACK (`0x06`), NAK (`0x15`) and CAN (`0x18`) travel as single bytes.
//! Everything here is pure: no I/O, no state beyond the parse position.

pub mod codec;
pub mod error;
pub mod framed;
pub mod message;

pub use codec::{
    checksum, encode, encode_into, try_parse, DataFrame, Frame, Parsed, ACK, CAN,
    MAX_PARAMETERS, MIN_LENGTH, NAK, SOF,
};
pub use error::{FrameError, Result};
pub use framed::FrameCodec;
pub use message::{CallbackShape, FunctionType, MessageType, Routing};
