#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;
use zwire_frame::{encode, DataFrame, Frame, FrameCodec};
use zwire_transport::MemoryPeers;

/// Plays the controller on the far end of an in-memory channel.
pub struct Controller {
    io: Framed<DuplexStream, FrameCodec>,
}

impl Controller {
    pub async fn attach(peers: &mut MemoryPeers) -> Self {
        let stream = peers.next().await.expect("host opened a channel");
        Self {
            io: Framed::new(stream, FrameCodec::new()),
        }
    }

    pub async fn next_frame(&mut self) -> Frame {
        self.io
            .next()
            .await
            .expect("host closed the channel")
            .expect("decode failed")
    }

    pub async fn expect_data(&mut self) -> DataFrame {
        match self.next_frame().await {
            Frame::Data(data) => data,
            other => panic!("expected a data frame, got {other:?}"),
        }
    }

    pub async fn expect_ack(&mut self) {
        assert_eq!(self.next_frame().await, Frame::Ack);
    }

    pub async fn reply(&mut self, frame: Frame) {
        self.io.send(frame).await.expect("write to host");
    }

    pub async fn ack(&mut self) {
        self.reply(Frame::Ack).await;
    }

    pub async fn send_data(&mut self, frame: DataFrame) {
        self.reply(Frame::Data(frame)).await;
    }

    /// Write bytes exactly as given, bypassing the encoder.
    pub async fn write_raw(&mut self, bytes: &[u8]) {
        let stream = self.io.get_mut();
        stream.write_all(bytes).await.expect("write to host");
        stream.flush().await.expect("flush to host");
    }
}

/// Wire bytes of a data frame.
pub fn wire(frame: &DataFrame) -> Vec<u8> {
    encode(&Frame::Data(frame.clone()))
        .expect("frame fits")
        .to_vec()
}

/// Wire bytes of a data frame with its checksum flipped.
pub fn corrupted(frame: &DataFrame) -> Vec<u8> {
    let mut bytes = wire(frame);
    if let Some(last) = bytes.last_mut() {
        *last ^= 0x5A;
    }
    bytes
}
