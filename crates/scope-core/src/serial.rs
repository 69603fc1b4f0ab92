//! Async serial port plumbing for the stage drivers.
//!
//! Drivers talk to a controller through a [`SharedPort`]: a type-erased
//! `AsyncRead + AsyncWrite` stream behind a `BufReader` and a tokio `Mutex`.
//! Real hardware plugs in a `tokio_serial::SerialStream` (see
//! [`open_serial_async`], behind the `serial` feature); tests plug in a
//! `tokio::io::DuplexStream` or a scripted mock.
//!
//! ```rust,ignore
//! use scope_core::serial::{open_serial_async, wrap_shared};
//!
//! let port = open_serial_async("/dev/ttyUSB0", 19_200, "ESP302").await?;
//! let shared = wrap_shared(Box::new(port));
//! ```

use crate::error::{AppResult, DaqError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::sync::Mutex;

/// Anything usable as a serial port.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Serial port shared between tasks, with line buffering for ASCII protocols.
///
/// Holding the lock across a write and its reply read keeps command/reply
/// pairs from interleaving.
pub type SharedPort = Arc<Mutex<BufReader<DynSerial>>>;

pub fn wrap_shared(port: DynSerial) -> SharedPort {
    Arc::new(Mutex::new(BufReader::new(port)))
}

/// Read one reply line, stripped of its line terminator.
///
/// Fails with [`DaqError::Timeout`] if no complete line arrives within
/// `timeout` and with [`DaqError::SerialUnexpectedEof`] if the stream closes.
pub async fn read_line_timeout<R>(reader: &mut R, timeout: Duration) -> AppResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| DaqError::Timeout(format!("no reply within {:?}", timeout)))??;
    if read == 0 {
        return Err(DaqError::SerialUnexpectedEof);
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Discard whatever the port has buffered, waiting at most `window` for more.
///
/// Returns the number of bytes thrown away. Used before a session starts so
/// a stale reply from a previous owner is not taken for ours.
pub async fn drain_serial_buffer<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut scratch = [0u8; 256];
    let deadline = tokio::time::Instant::now() + window;
    let mut discarded = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut scratch)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => discarded += n,
        }
    }

    discarded
}

/// Open a serial port at 8N1 without flow control.
///
/// Opening can block on some platforms, so it runs on the blocking pool.
#[cfg(feature = "serial")]
pub async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
    device_name: &str,
) -> AppResult<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    let name = device_name.to_string();

    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                DaqError::Io(std::io::Error::other(format!(
                    "failed to open {} serial port {}: {}",
                    name, path, e
                )))
            })
    })
    .await
    .map_err(|e| DaqError::Io(std::io::Error::other(e)))?
}
