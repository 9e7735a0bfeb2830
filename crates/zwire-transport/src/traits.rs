use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// A connected physical channel: any bidirectional async byte stream.
///
/// Implemented automatically for every `AsyncRead + AsyncWrite` type that can
/// move between tasks, so tty wrappers, sockets and in-memory duplex streams
/// all qualify.
pub trait Port: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Port for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased channel handed to the coordinator.
pub type BoxedPort = Box<dyn Port>;

/// Future returned by [`PortOpener::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxedPort>> + Send + 'a>>;

/// Opens (and reopens) the physical channel.
///
/// The coordinator keeps one opener for its whole lifetime and calls
/// [`open`](PortOpener::open) again after every channel reset, so an opener
/// must be reusable and must not assume the previous handle was closed
/// cleanly.
pub trait PortOpener: Send + Sync + 'static {
    /// Open a fresh channel.
    fn open(&self) -> OpenFuture<'_>;

    /// Short human-readable description for logs (e.g. `serial:/dev/ttyACM0`).
    fn describe(&self) -> String;
}
