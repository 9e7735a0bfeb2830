use std::path::{Path, PathBuf};

use tokio::net::UnixStream;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{BoxedPort, OpenFuture, PortOpener};

/// Unix domain socket bridge.
///
/// Connects to a socket that relays the controller byte stream, e.g.
/// `socat UNIX-LISTEN:/tmp/zwire.sock /dev/ttyACM0,raw` or a controller
/// simulator. Every open makes a new connection.
#[derive(Debug, Clone)]
pub struct UnixSocketPort {
    path: PathBuf,
}

impl UnixSocketPort {
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(target_os = "macos")]
    const MAX_PATH_LEN: usize = 104;
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    const MAX_PATH_LEN: usize = 104;

    /// Create a bridge opener, validating the path length up front.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(Self { path })
    }

    /// The socket path this opener connects to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connect, returning the concrete stream type.
    pub async fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.path)
            .await
            .map_err(|source| TransportError::Connect {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = ?self.path, "connected to unix socket bridge");
        Ok(stream)
    }
}

impl PortOpener for UnixSocketPort {
    fn open(&self) -> OpenFuture<'_> {
        Box::pin(async move {
            let stream = self.connect().await?;
            Ok(Box::new(stream) as BoxedPort)
        })
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}
