//! Host-side driver for checksummed serial controller protocols.
//!
//! zwire talks to a controller over a serial line (or a bridge to one):
//! it frames and checksums messages, acknowledges and retransmits at the
//! wire level, and correlates requests with their responses and
//! session-tagged callbacks.
//!
//! # Crate Structure
//!
//! - [`transport`]: physical channels (serial tty, unix socket bridge, in-memory)
//! - [`frame`]: frame codec and message kinds
//! - [`driver`]: transport coordinator, correlation and unsolicited dispatch

/// Re-export transport types.
pub mod transport {
    pub use zwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use zwire_frame::*;
}

/// Re-export driver types.
pub mod driver {
    pub use zwire_driver::*;
}
