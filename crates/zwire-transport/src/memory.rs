use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{BoxedPort, OpenFuture, PortOpener};

/// Default in-memory buffer size per direction.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// In-process channel opener.
///
/// Every [`open`](PortOpener::open) creates a fresh `tokio::io::duplex` pair,
/// keeps one end and hands the other to the paired [`MemoryPeers`]. A test or
/// simulator plays the controller on the far end.
#[derive(Debug, Clone)]
pub struct MemoryPort {
    peers: mpsc::UnboundedSender<DuplexStream>,
    opens: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
    buffer_size: usize,
}

/// Receives the controller side of every channel opened by a [`MemoryPort`].
#[derive(Debug)]
pub struct MemoryPeers {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
    opens: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl MemoryPort {
    /// Create an opener and its peer receiver.
    pub fn new() -> (Self, MemoryPeers) {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create an opener with an explicit per-direction buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> (Self, MemoryPeers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let opens = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let port = Self {
            peers: tx,
            opens: Arc::clone(&opens),
            failures: Arc::clone(&failures),
            buffer_size,
        };
        let peers = MemoryPeers {
            rx,
            opens,
            failures,
        };
        (port, peers)
    }

    fn open_pair(&self) -> Result<BoxedPort> {
        let pending_failures = self.failures.load(Ordering::Acquire);
        if pending_failures > 0 {
            self.failures.fetch_sub(1, Ordering::AcqRel);
            return Err(TransportError::Open {
                path: PathBuf::from("memory"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "simulated device disappearance",
                ),
            });
        }

        let (local, remote) = tokio::io::duplex(self.buffer_size);
        self.peers
            .send(remote)
            .map_err(|_| TransportError::Shutdown)?;
        let opens = self.opens.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(opens, "opened in-memory channel");
        Ok(Box::new(local))
    }
}

impl PortOpener for MemoryPort {
    fn open(&self) -> OpenFuture<'_> {
        Box::pin(async move { self.open_pair() })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryPeers {
    /// Wait for the controller side of the next opened channel.
    pub async fn next(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }

    /// Take an already opened controller side without waiting.
    pub fn try_next(&mut self) -> Option<DuplexStream> {
        self.rx.try_recv().ok()
    }

    /// Number of successful opens so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Acquire)
    }

    /// Make the next `count` opens fail as if the device vanished.
    pub fn fail_next_opens(&self, count: usize) {
        self.failures.store(count, Ordering::Release);
    }
}
