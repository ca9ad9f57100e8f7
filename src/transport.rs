//! Byte Transport: a uniform blocking byte-stream interface over either a
//! local serial device or a TCP socket to a serial-to-Ethernet bridge.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Error, Result};

pub const TIMEOUT_LONG: Duration = Duration::from_secs(5);
pub const TIMEOUT_SHORT: Duration = Duration::from_millis(500);

/// Bidirectional byte stream to the inverter bus.
pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Reads into an internal buffer until the link has been silent for
    /// `quiet_short` after at least one byte arrived, or `deadline_long`
    /// elapses with zero bytes. Returns whatever accumulated; an empty
    /// result signals a hard timeout.
    fn read_until_quiet(&mut self, deadline_long: Duration, quiet_short: Duration) -> Result<Vec<u8>>;

    fn close(&mut self) -> Result<()>;
}

/// Parses an endpoint string into either a `host:port` pair or a local
/// device path, per the CLI's positional `device` argument.
pub fn open(endpoint: &str) -> Result<Box<dyn Transport>> {
    if let Some(addr) = parse_tcp_endpoint(endpoint) {
        let transport = TcpTransport::open(&addr)?;
        Ok(Box::new(transport))
    } else {
        let transport = SerialTransport::open(endpoint)?;
        Ok(Box::new(transport))
    }
}

fn parse_tcp_endpoint(endpoint: &str) -> Option<String> {
    let (host, port) = endpoint.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse::<u16>().ok()?;
    Some(endpoint.to_string())
}

/// Generic read-loop shared by both transport variants: reads in small
/// chunks against a short per-read timeout until either the short quiet
/// period elapses after data has arrived, or the long deadline elapses
/// with nothing at all. The 1200-baud physical layer interleaves
/// multi-fragment responses with inter-frame gaps and no length prefix
/// exists at the session layer, hence the two-timer shape.
fn read_until_quiet_generic<F>(
    mut read_chunk: F,
    deadline_long: Duration,
    quiet_short: Duration,
) -> Vec<u8>
where
    F: FnMut(Duration, &mut [u8]) -> std::io::Result<usize>,
{
    let start = Instant::now();
    let mut buf = Vec::new();
    let mut last_byte_at: Option<Instant> = None;
    let mut scratch = [0u8; 4096];

    loop {
        let now = Instant::now();
        let per_read_timeout = match last_byte_at {
            Some(t) => {
                let elapsed = now.duration_since(t);
                if elapsed >= quiet_short {
                    break;
                }
                quiet_short - elapsed
            }
            None => {
                let elapsed = now.duration_since(start);
                if elapsed >= deadline_long {
                    break;
                }
                (deadline_long - elapsed).min(quiet_short)
            }
        };

        match read_chunk(per_read_timeout, &mut scratch) {
            Ok(0) => {
                if last_byte_at.is_some() {
                    break;
                }
                if Instant::now().duration_since(start) >= deadline_long {
                    break;
                }
            }
            Ok(n) => {
                trace!(bytes = n, "read chunk from transport");
                buf.extend_from_slice(&scratch[..n]);
                last_byte_at = Some(Instant::now());
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if last_byte_at.is_some() {
                    break;
                }
                if Instant::now().duration_since(start) >= deadline_long {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    buf
}

pub struct SerialTransport {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialTransport {
    pub fn open(path: &str) -> Result<SerialTransport> {
        let port = serialport::new(path, 1200)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(TIMEOUT_SHORT)
            .open()
            .map_err(|e| Error::TransportUnavailable(format!("{}: {}", path, e)))?;
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes).map_err(Error::TransportIo)
    }

    fn read_until_quiet(&mut self, deadline_long: Duration, quiet_short: Duration) -> Result<Vec<u8>> {
        let port = &mut self.port;
        Ok(read_until_quiet_generic(
            |timeout, scratch| {
                let _ = port.set_timeout(timeout);
                match port.read(scratch) {
                    Ok(n) => Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                    Err(e) => Err(e),
                }
            },
            deadline_long,
            quiet_short,
        ))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn open(addr: &str) -> Result<TcpTransport> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| Error::TransportUnavailable(format!("{}: {}", addr, e)))?;
        stream.set_nodelay(true).ok();
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).map_err(Error::TransportIo)
    }

    fn read_until_quiet(&mut self, deadline_long: Duration, quiet_short: Duration) -> Result<Vec<u8>> {
        let stream = &mut self.stream;
        Ok(read_until_quiet_generic(
            |timeout, scratch| {
                stream.set_read_timeout(Some(timeout))?;
                match stream.read(scratch) {
                    Ok(n) => Ok(n),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                    Err(e) => Err(e),
                }
            },
            deadline_long,
            quiet_short,
        ))
    }

    fn close(&mut self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both).ok();
        Ok(())
    }
}

/// Wraps a transport and logs every inbound/outbound byte sequence under
/// `log_dir` as `<unix_ts>.from` / `<unix_ts>.to`, per the `-l` CLI flag.
pub struct LoggingTransport {
    inner: Box<dyn Transport>,
    log_dir: std::path::PathBuf,
}

impl LoggingTransport {
    pub fn new(inner: Box<dyn Transport>, log_dir: std::path::PathBuf) -> LoggingTransport {
        LoggingTransport { inner, log_dir }
    }

    fn log(&self, suffix: &str, bytes: &[u8]) {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = self.log_dir.join(format!("{}.{}", ts, suffix));
        if let Err(e) = std::fs::write(&path, bytes) {
            trace!(error = %e, path = %path.display(), "failed to write frame log");
        }
    }
}

impl Transport for LoggingTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.log("to", bytes);
        self.inner.write_all(bytes)
    }

    fn read_until_quiet(&mut self, deadline_long: Duration, quiet_short: Duration) -> Result<Vec<u8>> {
        let bytes = self.inner.read_until_quiet(deadline_long, quiet_short)?;
        if !bytes.is_empty() {
            self.log("from", &bytes);
        }
        Ok(bytes)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
