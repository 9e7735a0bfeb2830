//! Request/response/callback correlation on top of the coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use zwire_frame::{DataFrame, Frame, FunctionType, MessageType, Routing};
use zwire_transport::PortOpener;

use crate::config::DriverConfig;
use crate::coordinator::{Coordinator, CoordinatorStats};
use crate::error::{DriverError, Result};
use crate::handlers::{Handler, HandlerRegistry, Subscription};
use crate::request::{callback_session, response_accepted, CallbackRequest};
use crate::session::{CallbackTable, Reservation};
use crate::signal::Signal;

/// How a soft reset completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The controller announced its restart.
    Restarted,
    /// No startup notification arrived in time; the reset is assumed done.
    Assumed,
}

struct PendingResponse {
    function: FunctionType,
    tx: oneshot::Sender<DataFrame>,
    arm_on_accept: Option<Reservation>,
}

/// Correlation state shared with the dispatcher task.
struct Correlation {
    /// Held for the duration of one request/response exchange.
    exchange: tokio::sync::Mutex<()>,
    pending: Mutex<Option<PendingResponse>>,
    callbacks: Mutex<CallbackTable>,
    handlers: Mutex<HandlerRegistry>,
    startup: Signal,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Correlation {
    fn new() -> Self {
        Self {
            exchange: tokio::sync::Mutex::new(()),
            pending: Mutex::new(None),
            callbacks: Mutex::new(CallbackTable::new()),
            handlers: Mutex::new(HandlerRegistry::new()),
            startup: Signal::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn dispatch(&self, frame: DataFrame) {
        match frame.message_type() {
            MessageType::Response => {
                if let Some(frame) = self.complete_response(frame) {
                    self.dispatch_unsolicited(frame);
                }
            }
            MessageType::Request => {
                if let Some(frame) = self.complete_callback(frame) {
                    self.dispatch_unsolicited(frame);
                }
            }
            MessageType::Unknown(kind) => {
                debug!(message_type = kind, function = %frame.function(), "unknown message type");
                self.dispatch_unsolicited(frame);
            }
        }
    }

    /// Resolve the pending response slot. Gives the frame back if it does
    /// not match.
    fn complete_response(&self, frame: DataFrame) -> Option<DataFrame> {
        let pending = {
            let mut slot = lock(&self.pending);
            let matches = slot
                .as_ref()
                .is_some_and(|pending| pending.function == frame.function());
            if matches {
                slot.take()
            } else {
                None
            }
        };
        let Some(pending) = pending else {
            return Some(frame);
        };

        // Arm before the next inbound frame is looked at, so a callback
        // that follows its response immediately still finds its entry.
        if let Some(reservation) = pending.arm_on_accept {
            if response_accepted(&frame) {
                lock(&self.callbacks).arm(reservation);
            }
        }
        trace!(function = %frame.function(), "response matched");
        let _ = pending.tx.send(frame);
        None
    }

    fn complete_callback(&self, frame: DataFrame) -> Option<DataFrame> {
        let Some(session) = callback_session(&frame) else {
            return Some(frame);
        };
        let tx = lock(&self.callbacks).take_armed(frame.function(), session);
        match tx {
            Some(tx) => {
                trace!(function = %frame.function(), %session, "callback matched");
                let _ = tx.send(frame);
                None
            }
            None => Some(frame),
        }
    }

    fn dispatch_unsolicited(&self, frame: DataFrame) {
        let routing = frame.function().routing(frame.parameters());
        if routing == Routing::Startup {
            info!("controller started");
            self.startup.set();
        }
        let handlers = lock(&self.handlers).handlers_for(routing, frame.function());
        if handlers.is_empty() {
            if routing != Routing::Startup {
                debug!(function = %frame.function(), ?routing, "no handler for frame; dropping");
            }
            return;
        }
        for handler in handlers {
            handler.deliver(&frame);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.pending).take();
        lock(&self.callbacks).clear();
        lock(&self.handlers).clear();
        self.startup.close();
    }
}

/// Clears the pending response slot when an exchange ends, however it ends.
struct ResponseSlot<'a>(&'a Correlation);

impl Drop for ResponseSlot<'_> {
    fn drop(&mut self) {
        lock(&self.0.pending).take();
    }
}

/// Removes a callback entry when its waiter goes away.
struct CallbackEntry<'a> {
    state: &'a Correlation,
    reservation: Reservation,
}

impl Drop for CallbackEntry<'_> {
    fn drop(&mut self) {
        lock(&self.state.callbacks).release(self.reservation);
    }
}

/// Serial controller driver.
///
/// Share it behind an `Arc`; every operation takes `&self`.
pub struct Driver {
    coordinator: Coordinator,
    state: Arc<Correlation>,
    config: DriverConfig,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Driver {
    /// Open the channel and start dispatching inbound frames.
    pub async fn open<O: PortOpener>(opener: O, config: DriverConfig) -> Result<Self> {
        let (coordinator, inbound) =
            Coordinator::start(Box::new(opener), config.coordinator.clone()).await?;
        let state = Arc::new(Correlation::new());
        let shutdown = CancellationToken::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&state),
            inbound,
            shutdown.clone(),
        ));
        info!(channel = %coordinator.describe(), "driver started");

        Ok(Self {
            coordinator,
            state,
            config,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// Send a frame and wait only for its acknowledgement.
    pub async fn send(&self, frame: DataFrame, cancel: &CancellationToken) -> Result<()> {
        self.ensure_open()?;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriverError::Cancelled),
            sent = self.coordinator.send(Frame::Data(frame)) => sent,
        }
    }

    /// Send a request and wait for the response of the same function.
    ///
    /// Only one exchange waits for a response at a time; others queue in
    /// call order.
    pub async fn send_await_response(
        &self,
        request: DataFrame,
        cancel: &CancellationToken,
    ) -> Result<DataFrame> {
        self.ensure_open()?;
        let _exchange = self.acquire_exchange(cancel).await?;
        let response = self.register_response(request.function(), None);
        let _slot = ResponseSlot(&self.state);
        self.send(request, cancel).await?;
        self.complete(response, cancel).await
    }

    /// Send a session-tagged request and wait for its callback.
    ///
    /// When the request awaits an immediate response, a response whose first
    /// parameter byte is zero fails the exchange with
    /// [`DriverError::Rejected`] and no callback is waited for.
    pub async fn send_await_callback(
        &self,
        request: CallbackRequest,
        cancel: &CancellationToken,
    ) -> Result<DataFrame> {
        self.ensure_open()?;
        let (tx, callback) = oneshot::channel();
        let reservation = lock(&self.state.callbacks).reserve(request.callback_function(), tx)?;
        let _entry = CallbackEntry {
            state: &self.state,
            reservation,
        };
        let frame = request.to_frame(Some(reservation.session));
        debug!(function = %request.function(), session = %reservation.session, "sending request");

        if request.awaits_response() {
            let _exchange = self.acquire_exchange(cancel).await?;
            let response = self.register_response(request.function(), Some(reservation));
            let _slot = ResponseSlot(&self.state);
            self.send(frame, cancel).await?;
            let response = self.complete(response, cancel).await?;
            if !response_accepted(&response) {
                debug!(function = %request.function(), "request rejected");
                return Err(DriverError::Rejected {
                    function: request.function(),
                });
            }
        } else {
            lock(&self.state.callbacks).arm(reservation);
            self.send(frame, cancel).await?;
        }

        self.complete(callback, cancel).await
    }

    /// Restart the controller firmware and wait for it to come back.
    pub async fn soft_reset(&self, cancel: &CancellationToken) -> Result<ResetOutcome> {
        self.ensure_open()?;
        self.state.startup.reset();
        self.send(
            DataFrame::request(FunctionType::SerialApiSoftReset, Bytes::new()),
            cancel,
        )
        .await?;

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriverError::Cancelled),
            waited = tokio::time::timeout(self.config.startup_timeout, self.state.startup.wait()) => waited,
        };
        match waited {
            Ok(Ok(())) => Ok(ResetOutcome::Restarted),
            Ok(Err(_closed)) => Err(DriverError::Shutdown),
            Err(_elapsed) => {
                debug!("no startup notification after soft reset; continuing");
                Ok(ResetOutcome::Assumed)
            }
        }
    }

    /// Call `handler` for unsolicited frames from `node`.
    pub fn on_device<F>(&self, node: u8, handler: F)
    where
        F: Fn(&DataFrame) + Send + Sync + 'static,
    {
        lock(&self.state.handlers).on_device(node, Handler::Callback(Arc::new(handler)));
    }

    /// Call `handler` for unsolicited frames of `function`.
    pub fn on_function<F>(&self, function: FunctionType, handler: F)
    where
        F: Fn(&DataFrame) + Send + Sync + 'static,
    {
        lock(&self.state.handlers).on_function(function, Handler::Callback(Arc::new(handler)));
    }

    /// Call `handler` whenever the controller announces a (re)start.
    pub fn on_startup<F>(&self, handler: F)
    where
        F: Fn(&DataFrame) + Send + Sync + 'static,
    {
        lock(&self.state.handlers).on_startup(Handler::Callback(Arc::new(handler)));
    }

    /// Call `handler` for every unsolicited frame.
    pub fn on_unsolicited<F>(&self, handler: F)
    where
        F: Fn(&DataFrame) + Send + Sync + 'static,
    {
        lock(&self.state.handlers).on_any(Handler::Callback(Arc::new(handler)));
    }

    /// Stream unsolicited frames from `node`.
    pub fn subscribe_device(&self, node: u8) -> Subscription {
        let (handler, subscription) = Subscription::channel();
        lock(&self.state.handlers).on_device(node, handler);
        subscription
    }

    /// Stream unsolicited frames of `function`.
    pub fn subscribe_function(&self, function: FunctionType) -> Subscription {
        let (handler, subscription) = Subscription::channel();
        lock(&self.state.handlers).on_function(function, handler);
        subscription
    }

    /// Stream every unsolicited frame.
    pub fn subscribe_unsolicited(&self) -> Subscription {
        let (handler, subscription) = Subscription::channel();
        lock(&self.state.handlers).on_any(handler);
        subscription
    }

    /// Drop every handler registered for `node`.
    pub fn clear_device(&self, node: u8) -> bool {
        lock(&self.state.handlers).clear_device(node)
    }

    /// Callbacks still awaited.
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.state.callbacks).len()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.coordinator.stats()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Stop dispatching and close the channel.
    ///
    /// Outstanding operations fail with [`DriverError::Shutdown`] and
    /// subscriptions end.
    pub async fn shutdown(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
        self.coordinator.shutdown().await;
        self.state.close();
        info!("driver stopped");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(DriverError::Shutdown);
        }
        Ok(())
    }

    async fn acquire_exchange(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriverError::Cancelled),
            guard = self.state.exchange.lock() => Ok(guard),
        }
    }

    /// Register the pending response. Caller must hold the exchange lock.
    fn register_response(
        &self,
        function: FunctionType,
        arm_on_accept: Option<Reservation>,
    ) -> oneshot::Receiver<DataFrame> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.state.pending) = Some(PendingResponse {
            function,
            tx,
            arm_on_accept,
        });
        rx
    }

    async fn complete(
        &self,
        completion: oneshot::Receiver<DataFrame>,
        cancel: &CancellationToken,
    ) -> Result<DataFrame> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DriverError::Cancelled),
            frame = completion => frame.map_err(|_| DriverError::Shutdown),
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .finish()
    }
}

async fn dispatch_loop(
    state: Arc<Correlation>,
    mut inbound: mpsc::UnboundedReceiver<DataFrame>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = inbound.recv() => frame,
        };
        match frame {
            Some(frame) => state.dispatch(frame),
            None => break,
        }
    }
    debug!("dispatcher stopped");
}
