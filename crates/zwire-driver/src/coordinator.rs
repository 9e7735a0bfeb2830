//! Wire-level coordination of one physical channel.
//!
//! Two background tasks share the channel. The write loop drains an outbound
//! queue and retries each data frame until the controller acknowledges it.
//! The read loop decodes inbound bytes, answers every data frame with ACK or
//! NAK and resolves the pending acknowledgement on ACK/NAK/CAN. Writing a
//! frame and processing received bytes both happen under one coordinator
//! lock, so bytes of different frames never interleave on the wire.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use zwire_frame::{encode, DataFrame, Frame, FrameCodec, ACK, NAK};
use zwire_transport::{BoxedPort, PortOpener, TransportError};

use crate::config::CoordinatorConfig;
use crate::error::{DriverError, Result};
use crate::signal::Signal;

/// Counters describing coordinator activity since start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Data frames the controller acknowledged.
    pub frames_sent: u64,
    /// Valid data frames received and acknowledged.
    pub frames_received: u64,
    /// Data frames written again after NAK, CAN or a timeout.
    pub retransmissions: u64,
    /// Frames given up on after the last attempt.
    pub send_failures: u64,
    /// NAKs written for frames with a bad checksum.
    pub naks_sent: u64,
    /// ACK/NAK/CAN bytes that arrived with no frame awaiting them.
    pub unexpected_acks: u64,
    /// Noise bytes discarded while looking for a frame start.
    pub skipped_bytes: u64,
    /// Channel resets.
    pub reconnects: u64,
    /// Deepest observed nesting of the coordinator critical section.
    pub max_critical_depth: usize,
}

#[derive(Debug, Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    retransmissions: AtomicU64,
    send_failures: AtomicU64,
    naks_sent: AtomicU64,
    unexpected_acks: AtomicU64,
    skipped_bytes: AtomicU64,
    reconnects: AtomicU64,
    critical_depth: AtomicUsize,
    max_critical_depth: AtomicUsize,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State guarded by the coordinator lock.
struct Wire {
    writer: Option<WriteHalf<BoxedPort>>,
    codec: FrameCodec,
    checksum_failures: u32,
}

struct Outbound {
    bytes: Bytes,
    done: oneshot::Sender<Result<()>>,
}

struct Shared {
    opener: Box<dyn PortOpener>,
    config: CoordinatorConfig,
    wire: tokio::sync::Mutex<Wire>,
    generation: AtomicU64,
    delivery: Mutex<Option<oneshot::Sender<bool>>>,
    queue: Mutex<VecDeque<Outbound>>,
    queued: Signal,
    fresh_reader: Mutex<Option<(u64, ReadHalf<BoxedPort>)>>,
    channel_changed: Signal,
    inbound: mpsc::UnboundedSender<DataFrame>,
    counters: Counters,
}

/// Owns a physical channel and serializes all traffic on it.
pub struct Coordinator {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Open the channel and start the read and write loops.
    ///
    /// Valid inbound data frames are delivered, in arrival order, on the
    /// returned receiver.
    pub async fn start(
        opener: Box<dyn PortOpener>,
        config: CoordinatorConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DataFrame>)> {
        let port = opener.open().await?;
        info!(channel = %opener.describe(), "channel open");
        let (reader, writer) = tokio::io::split(port);
        let (inbound, inbound_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            opener,
            config,
            wire: tokio::sync::Mutex::new(Wire {
                writer: Some(writer),
                codec: FrameCodec::new(),
                checksum_failures: 0,
            }),
            generation: AtomicU64::new(1),
            delivery: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            queued: Signal::new(),
            fresh_reader: Mutex::new(Some((1, reader))),
            channel_changed: Signal::new(),
            inbound,
            counters: Counters::default(),
        });

        let shutdown = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(read_loop(Arc::clone(&shared), shutdown.clone())),
            tokio::spawn(write_loop(Arc::clone(&shared), shutdown.clone())),
        ];

        Ok((
            Self {
                shared,
                shutdown,
                tasks: Mutex::new(tasks),
            },
            inbound_rx,
        ))
    }

    /// Queue a frame and wait until it is acknowledged.
    ///
    /// Data frames are retried per the configured policy and fail with
    /// [`DriverError::SendFailed`] once attempts run out. Dropping the
    /// returned future before the frame reaches the wire withdraws it.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(DriverError::Shutdown);
        }
        let bytes = encode(&frame)?;
        let (done, result) = oneshot::channel();
        lock(&self.shared.queue).push_back(Outbound { bytes, done });
        self.shared.queued.set();
        result.await.unwrap_or(Err(DriverError::Shutdown))
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> CoordinatorStats {
        let c = &self.shared.counters;
        CoordinatorStats {
            frames_sent: c.frames_sent.load(Ordering::Relaxed),
            frames_received: c.frames_received.load(Ordering::Relaxed),
            retransmissions: c.retransmissions.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            naks_sent: c.naks_sent.load(Ordering::Relaxed),
            unexpected_acks: c.unexpected_acks.load(Ordering::Relaxed),
            skipped_bytes: c.skipped_bytes.load(Ordering::Relaxed),
            reconnects: c.reconnects.load(Ordering::Relaxed),
            max_critical_depth: c.max_critical_depth.load(Ordering::Relaxed),
        }
    }

    /// Human-readable channel description.
    pub fn describe(&self) -> String {
        self.shared.opener.describe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop both loops and close the channel.
    ///
    /// Queued and in-flight sends fail with [`DriverError::Shutdown`].
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.shared.queued.close();
        self.shared.channel_changed.close();

        let tasks: Vec<_> = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(%err, "coordinator task ended abnormally");
            }
        }

        lock(&self.shared.queue).clear();
        self.shared.disarm();
        let mut wire = self.shared.wire.lock().await;
        if let Some(mut writer) = wire.writer.take() {
            let _ = writer.shutdown().await;
        }
        lock(&self.shared.fresh_reader).take();
        debug!("coordinator stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.shared.queued.close();
        self.shared.channel_changed.close();
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("channel", &self.shared.opener.describe())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Marks the coordinator critical section for the depth statistic.
struct CriticalSection<'a>(&'a Counters);

impl<'a> CriticalSection<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let depth = counters.critical_depth.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_critical_depth.fetch_max(depth, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for CriticalSection<'_> {
    fn drop(&mut self) {
        self.0.critical_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn pop_outbound(&self) -> Option<Outbound> {
        lock(&self.queue).pop_front()
    }

    fn disarm(&self) {
        lock(&self.delivery).take();
    }

    /// Complete the pending acknowledgement, if one is armed.
    fn resolve_delivery(&self, frame: &Frame) {
        let acked = matches!(frame, Frame::Ack);
        match lock(&self.delivery).take() {
            Some(tx) => {
                trace!(?frame, "acknowledgement received");
                let _ = tx.send(acked);
            }
            None => {
                bump(&self.counters.unexpected_acks);
                debug!(?frame, "acknowledgement with nothing in flight; dropping");
            }
        }
    }

    /// Write one data frame and return the acknowledgement receiver.
    async fn write_frame(&self, bytes: &[u8]) -> io::Result<oneshot::Receiver<bool>> {
        let mut wire = self.wire.lock().await;
        let _section = CriticalSection::enter(&self.counters);
        let writer = wire
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;

        let (tx, rx) = oneshot::channel();
        *lock(&self.delivery) = Some(tx);
        let written = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            self.disarm();
            return Err(err);
        }
        Ok(rx)
    }

    /// Send one data frame with retransmission.
    async fn transmit(&self, bytes: &[u8]) -> Result<()> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.config.retry_delay(attempt - 1);
                bump(&self.counters.retransmissions);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retransmitting frame");
                tokio::time::sleep(delay).await;
            }

            let delivery = match self.write_frame(bytes).await {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(attempt, %err, "write failed");
                    continue;
                }
            };

            let acked = match tokio::time::timeout(self.config.ack_timeout, delivery).await {
                Ok(Ok(acked)) => acked,
                // Disarmed by a channel reset.
                Ok(Err(_)) => false,
                Err(_elapsed) => {
                    self.disarm();
                    debug!(attempt, "no acknowledgement before timeout");
                    false
                }
            };
            if acked {
                bump(&self.counters.frames_sent);
                return Ok(());
            }
        }

        bump(&self.counters.send_failures);
        warn!(attempts, "frame not acknowledged; resetting channel");
        self.reconnect(self.generation()).await;
        Err(DriverError::SendFailed { attempts })
    }

    /// Decode buffered input under the coordinator lock.
    ///
    /// Returns `false` when the channel must be reset.
    async fn process_inbound(&self, incoming: &mut BytesMut) -> bool {
        let mut wire = self.wire.lock().await;
        let _section = CriticalSection::enter(&self.counters);

        loop {
            let skipped_before = wire.codec.skipped_bytes();
            let decoded = wire.codec.decode(incoming);
            let skipped = wire.codec.skipped_bytes() - skipped_before;
            if skipped > 0 {
                self.counters
                    .skipped_bytes
                    .fetch_add(skipped, Ordering::Relaxed);
                debug!(skipped, "discarded bytes outside any frame");
            }

            let frame = match decoded {
                Ok(Some(frame)) => frame,
                Ok(None) => return true,
                Err(err) => {
                    warn!(%err, "decoder failed");
                    return false;
                }
            };

            match frame {
                Frame::Ack | Frame::Nak | Frame::Can => self.resolve_delivery(&frame),
                Frame::Data(data) if data.checksum_valid() => {
                    wire.checksum_failures = 0;
                    if let Err(err) = reply(&mut wire, ACK).await {
                        warn!(%err, "failed to acknowledge frame");
                        return false;
                    }
                    bump(&self.counters.frames_received);
                    trace!(function = %data.function(), "frame received");
                    if self.inbound.send(data).is_err() {
                        debug!("no consumer for inbound frames; dropping");
                    }
                }
                Frame::Data(data) => {
                    wire.checksum_failures += 1;
                    bump(&self.counters.naks_sent);
                    warn!(
                        function = %data.function(),
                        consecutive = wire.checksum_failures,
                        "checksum mismatch; sending NAK"
                    );
                    if let Err(err) = reply(&mut wire, NAK).await {
                        warn!(%err, "failed to send NAK");
                        return false;
                    }
                    let limit = self.config.checksum_failure_limit;
                    if limit > 0 && wire.checksum_failures >= limit {
                        warn!(limit, "too many consecutive checksum failures");
                        wire.checksum_failures = 0;
                        return false;
                    }
                }
            }
        }
    }

    /// Discard buffered state, close the channel and open it again.
    ///
    /// A reset observed for an older generation is skipped: somebody else
    /// already replaced that channel.
    async fn reconnect(&self, observed: u64) {
        let mut wire = self.wire.lock().await;
        if self.generation() != observed {
            debug!(observed, "channel already replaced");
            return;
        }
        let _section = CriticalSection::enter(&self.counters);
        bump(&self.counters.reconnects);

        if let Some(mut writer) = wire.writer.take() {
            let _ = writer.shutdown().await;
        }
        lock(&self.fresh_reader).take();
        self.disarm();
        wire.codec = FrameCodec::new();
        wire.checksum_failures = 0;

        // Only reconnect moves the generation, always under the wire lock. The
        // fresh reader is installed before the new generation is published.
        let generation = observed + 1;
        match self.reopen().await {
            Ok(port) => {
                let (reader, writer) = tokio::io::split(port);
                wire.writer = Some(writer);
                *lock(&self.fresh_reader) = Some((generation, reader));
                info!(channel = %self.opener.describe(), generation, "channel reopened");
            }
            Err(err) => {
                error!(channel = %self.opener.describe(), %err, "could not reopen channel");
            }
        }
        self.generation.store(generation, Ordering::Release);
        // Wake the read loop either way: it picks up the fresh reader or
        // drops the stale one and keeps retrying.
        self.channel_changed.set();
    }

    async fn reopen(&self) -> std::result::Result<BoxedPort, TransportError> {
        let attempts = self.config.reopen_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.opener.open().await {
                Ok(port) => return Ok(port),
                Err(err) if attempt < attempts => {
                    debug!(attempt, %err, "reopen failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(self.config.reopen_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn reply(wire: &mut Wire, byte: u8) -> io::Result<()> {
    let writer = wire
        .writer
        .as_mut()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "channel closed"))?;
    writer.write_all(&[byte]).await?;
    writer.flush().await
}

async fn write_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    loop {
        while let Some(outbound) = shared.pop_outbound() {
            if outbound.done.is_closed() {
                debug!("sender went away; dropping queued frame");
                continue;
            }
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                result = shared.transmit(&outbound.bytes) => result,
            };
            let _ = outbound.done.send(result);
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            waited = shared.queued.wait() => {
                if waited.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_loop(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut reader: Option<ReadHalf<BoxedPort>> = None;
    let mut generation = 0;
    let mut incoming = BytesMut::with_capacity(shared.config.read_chunk_size);

    loop {
        if let Some((fresh_generation, fresh)) = lock(&shared.fresh_reader).take() {
            reader = Some(fresh);
            generation = fresh_generation;
            incoming.clear();
        } else if reader.is_some() && shared.generation() != generation {
            debug!(generation, "channel lost; dropping stale reader");
            reader = None;
            incoming.clear();
        }

        let Some(active) = reader.as_mut() else {
            // No channel: wait for one to be installed, retrying the reopen
            // ourselves at the configured pace.
            tokio::select! {
                _ = shutdown.cancelled() => return,
                waited = shared.channel_changed.wait() => {
                    if waited.is_err() {
                        return;
                    }
                }
                _ = tokio::time::sleep(shared.config.reopen_delay) => {
                    shared.reconnect(shared.generation()).await;
                }
            }
            continue;
        };

        incoming.reserve(shared.config.read_chunk_size);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            waited = shared.channel_changed.wait() => {
                if waited.is_err() {
                    return;
                }
            }
            read = active.read_buf(&mut incoming) => match read {
                Ok(0) => {
                    warn!("channel closed by peer");
                    reader = None;
                    shared.reconnect(generation).await;
                }
                Ok(len) => {
                    trace!(len, "read bytes");
                    if !shared.process_inbound(&mut incoming).await {
                        reader = None;
                        shared.reconnect(generation).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "read failed");
                    reader = None;
                    shared.reconnect(generation).await;
                }
            }
        }
    }
}
