use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{BoxedPort, OpenFuture, PortOpener};

/// Line speed used by serial controllers unless configured otherwise.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Line settings applied when the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate. Must be one of the standard termios speeds.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Serial tty opener.
///
/// Each [`open`](PortOpener::open) opens the device node non-blocking, puts
/// the line into raw 8N1 mode at the configured speed and discards anything
/// left in the kernel input and output queues.
#[derive(Debug, Clone)]
pub struct SerialPort {
    path: PathBuf,
    config: SerialConfig,
}

impl SerialPort {
    /// Serial opener with default line settings.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_config(path, SerialConfig::default())
    }

    /// Serial opener with explicit line settings.
    pub fn with_config(path: impl AsRef<Path>, config: SerialConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
        }
    }

    /// The device node this opener targets.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Line settings applied on open.
    pub fn config(&self) -> SerialConfig {
        self.config
    }

    /// Open and configure the device, returning the concrete stream type.
    pub fn open_stream(&self) -> Result<SerialStream> {
        let speed = baud_constant(self.config.baud_rate)
            .ok_or(TransportError::UnsupportedBaudRate(self.config.baud_rate))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|source| TransportError::Open {
                path: self.path.clone(),
                source,
            })?;

        configure_raw(&file, speed).map_err(|source| TransportError::Configure {
            path: self.path.clone(),
            source,
        })?;

        let inner = AsyncFd::new(file)?;
        info!(path = ?self.path, baud = self.config.baud_rate, "opened serial device");
        Ok(SerialStream { inner })
    }
}

impl PortOpener for SerialPort {
    fn open(&self) -> OpenFuture<'_> {
        Box::pin(async move {
            let stream = self.open_stream()?;
            Ok(Box::new(stream) as BoxedPort)
        })
    }

    fn describe(&self) -> String {
        format!("serial:{}", self.path.display())
    }
}

/// An open, raw-mode serial device registered with the tokio reactor.
pub struct SerialStream {
    inner: AsyncFd<File>,
}

impl AsyncRead for SerialStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| inner.get_ref().read(unfilled)) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(err)) => return Poll::Ready(Err(err)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for SerialStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| inner.get_ref().write(buf)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Writes go straight to the tty driver; there is no user-space buffer.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl std::fmt::Debug for SerialStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialStream")
            .field("fd", &self.inner.get_ref().as_raw_fd())
            .finish()
    }
}

fn baud_constant(rate: u32) -> Option<libc::speed_t> {
    let speed = match rate {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return None,
    };
    Some(speed)
}

fn configure_raw(file: &File, speed: libc::speed_t) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: `termios` is plain old data; an all-zero value is a valid
    // starting point and `tcgetattr` overwrites it for an open tty descriptor.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `fd` is an open descriptor owned by `file`; `tio` is writable.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialized by `tcgetattr` above.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cflag &= !(libc::CSTOPB | libc::PARENB | libc::CRTSCTS);
    tio.c_cflag = (tio.c_cflag & !libc::CSIZE) | libc::CS8;
    // VMIN=1 makes an empty non-blocking read report EAGAIN instead of EOF.
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    // SAFETY: `tio` is a valid termios value; `fd` is open.
    let rc = unsafe {
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            -1
        } else if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            -1
        } else {
            libc::tcflush(fd, libc::TCIOFLUSH)
        }
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    debug!(fd, "applied raw 8N1 line settings");
    Ok(())
}
