//! Physical byte channels for the zwire driver.
//!
//! The driver never talks to a device directly. It asks a [`PortOpener`] for a
//! fresh [`BoxedPort`] at startup and again every time the channel has to be
//! reset. Three openers are provided:
//! - [`SerialPort`]: a tty device configured raw 8N1 (Unix)
//! - [`UnixSocketPort`]: a Unix domain socket relay such as `socat` or a simulator
//! - [`MemoryPort`]: an in-process duplex pair for tests and simulators

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::{MemoryPeers, MemoryPort};
pub use traits::{BoxedPort, OpenFuture, Port, PortOpener};

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort, SerialStream, DEFAULT_BAUD_RATE};
#[cfg(unix)]
pub use uds::UnixSocketPort;
