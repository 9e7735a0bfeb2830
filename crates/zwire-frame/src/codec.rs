use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::message::{FunctionType, MessageType};

/// Start of a data frame.
pub const SOF: u8 = 0x01;
/// Positive acknowledgement.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement.
pub const NAK: u8 = 0x15;
/// Cancel: the peer dropped the frame, usually because of a collision.
pub const CAN: u8 = 0x18;

/// Smallest valid length field: message type + message id.
pub const MIN_LENGTH: u8 = 2;

/// Largest parameter block that fits the one-byte length field.
pub const MAX_PARAMETERS: usize = u8::MAX as usize - MIN_LENGTH as usize;

/// Bytes a data frame adds around its parameters: marker, length, type, id, checksum.
const DATA_OVERHEAD: usize = 5;

/// A wire-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nak,
    Can,
    Data(DataFrame),
}

impl Frame {
    /// True for ACK, NAK and CAN.
    pub fn is_control(&self) -> bool {
        !matches!(self, Frame::Data(_))
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        match self {
            Frame::Ack | Frame::Nak | Frame::Can => 1,
            Frame::Data(data) => data.wire_size(),
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(frame: DataFrame) -> Self {
        Frame::Data(frame)
    }
}

/// A data frame carrying a request, a response or a callback.
///
/// Fields are read-only so that a frame built from components always reports
/// a valid checksum; only [`try_parse`] can produce `checksum_valid == false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    message_type: MessageType,
    function: FunctionType,
    parameters: Bytes,
    checksum_valid: bool,
}

impl DataFrame {
    /// Create a data frame from validated components.
    pub fn new(
        message_type: MessageType,
        function: FunctionType,
        parameters: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_type,
            function,
            parameters: parameters.into(),
            checksum_valid: true,
        }
    }

    /// Host-to-controller request.
    pub fn request(function: FunctionType, parameters: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Request, function, parameters)
    }

    /// Response frame (as sent by the controller).
    pub fn response(function: FunctionType, parameters: impl Into<Bytes>) -> Self {
        Self::new(MessageType::Response, function, parameters)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The message id.
    pub fn function(&self) -> FunctionType {
        self.function
    }

    pub fn parameters(&self) -> &Bytes {
        &self.parameters
    }

    /// Whether the received checksum matched. Always true for locally built frames.
    pub fn checksum_valid(&self) -> bool {
        self.checksum_valid
    }

    /// Value of the length field: message type + message id + parameters.
    ///
    /// Only meaningful when the parameters fit, see [`MAX_PARAMETERS`].
    pub fn length(&self) -> usize {
        MIN_LENGTH as usize + self.parameters.len()
    }

    /// The total wire size of this frame.
    pub fn wire_size(&self) -> usize {
        DATA_OVERHEAD + self.parameters.len()
    }
}

/// XOR checksum seeded with `0xFF`, over length byte through last parameter.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0xFF, |acc, byte| acc ^ byte)
}

/// Encode a frame into a fresh buffer.
pub fn encode(frame: &Frame) -> Result<Bytes> {
    let mut dst = BytesMut::with_capacity(frame.wire_size());
    encode_into(frame, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode a frame into the wire format, appending to `dst`.
///
/// Wire format:
/// ```text
/// ┌──────┬────────┬──────┬────────────┬──────────────────┬──────────┐
/// │ SOF  │ Length │ Type │ Message id │ Parameters       │ Checksum │
/// │ 0x01 │ (1B)   │ (1B) │ (1B)       │ (Length-2 bytes) │ (1B)     │
/// └──────┴────────┴──────┴────────────┴──────────────────┴──────────┘
/// ```
/// Control frames are the single marker byte. The checksum is always
/// recomputed, so re-encoding a frame received with a bad checksum yields a
/// well-formed frame.
pub fn encode_into(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    let data = match frame {
        Frame::Ack => {
            dst.put_u8(ACK);
            return Ok(());
        }
        Frame::Nak => {
            dst.put_u8(NAK);
            return Ok(());
        }
        Frame::Can => {
            dst.put_u8(CAN);
            return Ok(());
        }
        Frame::Data(data) => data,
    };

    if data.parameters.len() > MAX_PARAMETERS {
        return Err(FrameError::PayloadTooLarge {
            size: data.parameters.len(),
            max: MAX_PARAMETERS,
        });
    }

    dst.reserve(data.wire_size());
    let start = dst.len();
    dst.put_u8(SOF);
    dst.put_u8(data.length() as u8);
    dst.put_u8(data.message_type.into());
    dst.put_u8(data.function.into());
    dst.put_slice(&data.parameters);
    let sum = checksum(&dst[start + 1..]);
    dst.put_u8(sum);
    Ok(())
}

/// Result of one [`try_parse`] step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed {
    /// Bytes the caller should drop from the front of its buffer.
    pub consumed: usize,
    /// How many of the consumed bytes were garbage before a frame marker.
    pub skipped: usize,
    /// The decoded frame, or `None` if no complete frame is buffered yet.
    pub frame: Option<Frame>,
}

/// Parse at most one frame from the front of `buf`.
///
/// Garbage before a marker is consumed and counted in
/// [`skipped`](Parsed::skipped). An incomplete data frame is never consumed,
/// so calling again after more bytes arrive picks up where this call left
/// off. A data frame is returned whether or not its checksum matched.
pub fn try_parse(buf: &[u8]) -> Parsed {
    let mut pos = 0;
    while pos < buf.len() {
        let control = match buf[pos] {
            ACK => Some(Frame::Ack),
            NAK => Some(Frame::Nak),
            CAN => Some(Frame::Can),
            SOF => None,
            _ => {
                pos += 1;
                continue;
            }
        };

        if let Some(frame) = control {
            return Parsed {
                consumed: pos + 1,
                skipped: pos,
                frame: Some(frame),
            };
        }

        let Some(&length) = buf.get(pos + 1) else {
            return incomplete(pos);
        };
        if length < MIN_LENGTH {
            // A marker followed by an impossible length is line noise.
            pos += 1;
            continue;
        }

        let total = length as usize + 3;
        if buf.len() - pos < total {
            return incomplete(pos);
        }

        let body = &buf[pos + 1..pos + total - 1];
        let received = buf[pos + total - 1];
        let frame = DataFrame {
            message_type: MessageType::from(body[1]),
            function: FunctionType::from(body[2]),
            parameters: Bytes::copy_from_slice(&body[3..]),
            checksum_valid: checksum(body) == received,
        };
        return Parsed {
            consumed: pos + total,
            skipped: pos,
            frame: Some(Frame::Data(frame)),
        };
    }

    incomplete(pos)
}

fn incomplete(skipped: usize) -> Parsed {
    Parsed {
        consumed: skipped,
        skipped,
        frame: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(parsed: &Parsed) -> &DataFrame {
        match &parsed.frame {
            Some(Frame::Data(data)) => data,
            other => panic!("expected data frame, got {other:?}"),
        }
    }

    #[test]
    fn empty_request_encodes_to_known_bytes() {
        let frame = Frame::Data(DataFrame::request(FunctionType::MemoryGetId, Bytes::new()));
        let wire = encode(&frame).unwrap();
        assert_eq!(wire.as_ref(), &[0x01, 0x02, 0x00, 0x20, 0xDD]);

        let parsed = try_parse(&wire);
        assert_eq!(parsed.consumed, 5);
        assert_eq!(parsed.skipped, 0);
        assert_eq!(parsed.frame, Some(frame));
        assert!(data(&parsed).checksum_valid());
    }

    #[test]
    fn encode_decode_roundtrip_with_parameters() {
        let frame = Frame::Data(DataFrame::request(
            FunctionType::SendData,
            vec![0x05, 0x02, 0x25, 0x02, 0x25, 0x07],
        ));
        let wire = encode(&frame).unwrap();
        assert_eq!(wire.len(), frame.wire_size());
        assert_eq!(wire[1] as usize, 2 + 6);

        let parsed = try_parse(&wire);
        assert_eq!(parsed.consumed, wire.len());
        assert_eq!(parsed.frame, Some(frame));
    }

    #[test]
    fn control_frames_encode_to_single_marker() {
        assert_eq!(encode(&Frame::Ack).unwrap().as_ref(), &[ACK]);
        assert_eq!(encode(&Frame::Nak).unwrap().as_ref(), &[NAK]);
        assert_eq!(encode(&Frame::Can).unwrap().as_ref(), &[CAN]);
    }

    #[test]
    fn oversized_parameters_rejected() {
        let frame = Frame::Data(DataFrame::request(
            FunctionType::SendData,
            vec![0u8; MAX_PARAMETERS + 1],
        ));
        assert!(matches!(
            encode(&frame),
            Err(FrameError::PayloadTooLarge { size: 254, max: 253 })
        ));
    }

    #[test]
    fn largest_parameter_block_fits() {
        let frame = Frame::Data(DataFrame::request(
            FunctionType::SendData,
            vec![0xAA; MAX_PARAMETERS],
        ));
        let wire = encode(&frame).unwrap();
        assert_eq!(wire[1], 0xFF);
        assert_eq!(try_parse(&wire).frame, Some(frame));
    }

    #[test]
    fn every_single_bit_flip_in_parameters_is_detected() {
        let frame = Frame::Data(DataFrame::request(
            FunctionType::SendData,
            vec![0x00, 0xFF, 0x5A, 0xA5],
        ));
        let wire = encode(&frame).unwrap();

        for index in 4..wire.len() - 1 {
            for bit in 0..8 {
                let mut corrupted = wire.to_vec();
                corrupted[index] ^= 1 << bit;
                let parsed = try_parse(&corrupted);
                assert_eq!(parsed.consumed, wire.len());
                assert!(
                    !data(&parsed).checksum_valid(),
                    "flip of bit {bit} in byte {index} went unnoticed"
                );
            }
        }
    }

    #[test]
    fn bad_checksum_is_a_frame_property() {
        let mut wire = encode(&Frame::Data(DataFrame::request(
            FunctionType::GetVersion,
            Bytes::new(),
        )))
        .unwrap()
        .to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;

        let parsed = try_parse(&wire);
        let frame = data(&parsed);
        assert!(!frame.checksum_valid());
        assert_eq!(frame.function(), FunctionType::GetVersion);
    }

    #[test]
    fn garbage_before_ack_is_skipped() {
        let parsed = try_parse(&[0xAA, 0xBB, 0x06]);
        assert_eq!(parsed.frame, Some(Frame::Ack));
        assert_eq!(parsed.skipped, 2);
        assert_eq!(parsed.consumed, 3);
    }

    #[test]
    fn only_garbage_is_consumed_without_frame() {
        let parsed = try_parse(&[0x00, 0x42, 0x99]);
        assert_eq!(parsed.frame, None);
        assert_eq!(parsed.skipped, 3);
        assert_eq!(parsed.consumed, 3);
    }

    #[test]
    fn partial_frame_consumes_nothing_until_complete() {
        let full = encode(&Frame::Data(DataFrame::response(
            FunctionType::GetVersion,
            vec![0x5A, 0x2D, 0x57],
        )))
        .unwrap();
        assert_eq!(full[1], 5);

        let mut buf = full[..4].to_vec();
        let first = try_parse(&buf);
        assert_eq!(first.frame, None);
        assert_eq!(first.consumed, 0);

        // Re-parsing the same partial input is stable.
        assert_eq!(try_parse(&buf), first);

        buf.extend_from_slice(&full[4..]);
        let second = try_parse(&buf);
        assert_eq!(second.consumed, full.len());
        assert!(data(&second).checksum_valid());
    }

    #[test]
    fn marker_without_length_waits() {
        let parsed = try_parse(&[0x01]);
        assert_eq!(parsed.frame, None);
        assert_eq!(parsed.consumed, 0);
    }

    #[test]
    fn garbage_then_partial_frame_drops_only_garbage() {
        let parsed = try_parse(&[0x77, 0x01, 0x04, 0x00]);
        assert_eq!(parsed.frame, None);
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.consumed, 1);
    }

    #[test]
    fn impossible_length_treated_as_noise() {
        let parsed = try_parse(&[SOF, 0x00, ACK]);
        assert_eq!(parsed.frame, Some(Frame::Ack));
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn multiple_frames_parse_in_sequence() {
        let mut wire = BytesMut::new();
        encode_into(&Frame::Ack, &mut wire).unwrap();
        encode_into(
            &Frame::Data(DataFrame::response(FunctionType::SendData, vec![0x01])),
            &mut wire,
        )
        .unwrap();
        encode_into(&Frame::Can, &mut wire).unwrap();

        let mut offset = 0;
        let mut frames = Vec::new();
        loop {
            let parsed = try_parse(&wire[offset..]);
            offset += parsed.consumed;
            match parsed.frame {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }

        assert_eq!(offset, wire.len());
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], Frame::Ack);
        assert!(matches!(&frames[1], Frame::Data(d) if d.function() == FunctionType::SendData));
        assert_eq!(frames[2], Frame::Can);
    }

    #[test]
    fn unknown_type_and_function_survive_roundtrip() {
        let frame = Frame::Data(DataFrame::new(
            MessageType::Unknown(0x07),
            FunctionType::Unknown(0xEE),
            vec![0x01],
        ));
        let wire = encode(&frame).unwrap();
        assert_eq!(try_parse(&wire).frame, Some(frame));
    }

    #[test]
    fn checksum_matches_reference() {
        assert_eq!(checksum(&[0x02, 0x00, 0x20]), 0xDD);
        assert_eq!(checksum(&[0x03, 0x00, 0x15]), 0xE9);
        assert_eq!(checksum(&[]), 0xFF);
    }
}
