use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::codec::{encode_into, try_parse, Frame};
use crate::error::{FrameError, Result};

/// `tokio_util` codec over [`try_parse`] and [`encode_into`].
///
/// Keeps a running count of garbage bytes dropped in front of frame markers.
#[derive(Debug, Default)]
pub struct FrameCodec {
    skipped: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total garbage bytes skipped since this codec was created.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let parsed = try_parse(src);
        if parsed.skipped > 0 {
            self.skipped += parsed.skipped as u64;
            trace!(skipped = parsed.skipped, "dropped bytes before frame marker");
        }
        src.advance(parsed.consumed);
        Ok(parsed.frame)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        encode_into(&frame, dst)
    }
}

impl Encoder<&Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        encode_into(frame, dst)
    }
}
