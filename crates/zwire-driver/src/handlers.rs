//! Registry for unsolicited frames.
//!
//! Frames that complete no pending request are routed by kind: device
//! notifications to the handlers of their source node, startup notifications
//! to startup handlers, everything else to handlers registered for the
//! frame's function. Function handlers also see device and startup frames of
//! their kind, and catch-all handlers see every unsolicited frame.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use zwire_frame::{DataFrame, FunctionType, Routing};

pub(crate) type Callback = Arc<dyn Fn(&DataFrame) + Send + Sync>;

#[derive(Clone)]
pub(crate) enum Handler {
    Callback(Callback),
    Channel(mpsc::UnboundedSender<DataFrame>),
}

impl Handler {
    pub fn deliver(&self, frame: &DataFrame) {
        match self {
            Handler::Callback(callback) => callback(frame),
            Handler::Channel(tx) => {
                let _ = tx.send(frame.clone());
            }
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Handler::Callback(_) => true,
            Handler::Channel(tx) => !tx.is_closed(),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Callback(_) => f.write_str("Handler::Callback"),
            Handler::Channel(_) => f.write_str("Handler::Channel"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct HandlerRegistry {
    devices: HashMap<u8, Vec<Handler>>,
    functions: HashMap<FunctionType, Vec<Handler>>,
    startup: Vec<Handler>,
    any: Vec<Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_device(&mut self, node: u8, handler: Handler) {
        self.devices.entry(node).or_default().push(handler);
    }

    pub fn on_function(&mut self, function: FunctionType, handler: Handler) {
        self.functions.entry(function).or_default().push(handler);
    }

    pub fn on_startup(&mut self, handler: Handler) {
        self.startup.push(handler);
    }

    pub fn on_any(&mut self, handler: Handler) {
        self.any.push(handler);
    }

    /// Remove every handler registered for a node.
    pub fn clear_device(&mut self, node: u8) -> bool {
        self.devices.remove(&node).is_some()
    }

    /// Handlers that should see a frame, dropping subscriptions whose
    /// receiver is gone. The result is cloned so the caller can run the
    /// handlers without holding the registry lock.
    pub fn handlers_for(&mut self, routing: Routing, function: FunctionType) -> Vec<Handler> {
        let mut selected = Vec::new();
        match routing {
            Routing::Device(node) => {
                if let Some(handlers) = self.devices.get_mut(&node) {
                    collect_live(handlers, &mut selected);
                    if handlers.is_empty() {
                        self.devices.remove(&node);
                    }
                }
            }
            Routing::Startup => collect_live(&mut self.startup, &mut selected),
            Routing::Function => {}
        }
        if let Some(handlers) = self.functions.get_mut(&function) {
            collect_live(handlers, &mut selected);
            if handlers.is_empty() {
                self.functions.remove(&function);
            }
        }
        collect_live(&mut self.any, &mut selected);
        selected
    }

    pub fn clear(&mut self) {
        self.devices.clear();
        self.functions.clear();
        self.startup.clear();
        self.any.clear();
    }
}

fn collect_live(handlers: &mut Vec<Handler>, selected: &mut Vec<Handler>) {
    handlers.retain(Handler::is_live);
    selected.extend(handlers.iter().cloned());
}

/// Stream of unsolicited frames for one subscription.
///
/// Ends when the driver shuts down. Dropping it unregisters the
/// subscription on the next matching frame.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<DataFrame>,
}

impl Subscription {
    pub(crate) fn channel() -> (Handler, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Handler::Channel(tx), Self { rx })
    }

    /// Next frame, or `None` once the driver has shut down.
    pub async fn recv(&mut self) -> Option<DataFrame> {
        self.rx.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<DataFrame> {
        self.rx.try_recv().ok()
    }
}

impl futures_core::Stream for Subscription {
    type Item = DataFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
