//! Zabbix trapper ("sender") protocol
//!
//! ## Frame layout
//!
//! ```text
//! +------+------+------+------+------+-----------------+-------------+
//! | 'Z'  | 'B'  | 'X'  | 'D'  | 0x01 | len: u64 LE     | JSON (len)  |
//! +------+------+------+------+------+-----------------+-------------+
//! ```
//!
//! The length is a u32 written into an 8-byte little-endian field, so the
//! high four bytes are always zero. The payload is
//! `{"request":"sender data","data":[...],"clock":<secs>}`.
//!
//! Each send opens a fresh TCP connection, writes the whole frame at once,
//! reads the reply until the peer closes, and drops the connection. There
//! is no retry and no buffering: a failed send loses that batch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::Error as IoError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Protocol magic followed by the version byte
pub const HEADER: &[u8; 5] = b"ZBXD\x01";

/// Header plus 8-byte length field
pub const FRAME_PREFIX_LEN: usize = 13;

/// `request` field of every sender packet
pub const SENDER_REQUEST: &str = "sender data";

/// Default bound on connect, write and read, each
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for trapper framing and delivery
#[derive(Debug)]
pub enum TrapperError {
    /// Connect, write or read failed
    Io(IoError),
    /// Payload could not be encoded or decoded
    Json(serde_json::Error),
    /// Payload does not fit the 32-bit length field
    PayloadTooLarge(usize),
    /// Frame does not start with `ZBXD\x01`
    InvalidHeader,
    /// Frame shorter than its header or declared length
    Truncated { expected: usize, actual: usize },
    /// Operation exceeded the I/O timeout
    Timeout(&'static str),
}

impl std::fmt::Display for TrapperError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapperError::Io(e) => write!(f, "I/O error: {}", e),
            TrapperError::Json(e) => write!(f, "JSON error: {}", e),
            TrapperError::PayloadTooLarge(len) => {
                write!(f, "Payload of {} bytes exceeds the 32-bit length field", len)
            }
            TrapperError::InvalidHeader => write!(f, "Invalid trapper header"),
            TrapperError::Truncated { expected, actual } => {
                write!(f, "Truncated frame: expected {} bytes, got {}", expected, actual)
            }
            TrapperError::Timeout(op) => write!(f, "Timed out during {}", op),
        }
    }
}

impl std::error::Error for TrapperError {}

impl From<IoError> for TrapperError {
    fn from(e: IoError) -> Self {
        TrapperError::Io(e)
    }
}

impl From<serde_json::Error> for TrapperError {
    fn from(e: serde_json::Error) -> Self {
        TrapperError::Json(e)
    }
}

/// One item value as understood by the collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub host: String,
    pub key: String,
    pub value: String,
    /// Capture time, epoch seconds
    pub clock: i64,
}

impl ExportRecord {
    pub fn new(
        host: impl Into<String>,
        key: impl Into<String>,
        value: impl ToString,
        clock: i64,
    ) -> Self {
        ExportRecord {
            host: host.into(),
            key: key.into(),
            value: value.to_string(),
            clock,
        }
    }
}

impl std::fmt::Display for ExportRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}={}", self.host, self.key, self.value)
    }
}

/// JSON body of a sender request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderPacket {
    pub request: String,
    pub data: Vec<ExportRecord>,
    /// Send time, epoch seconds
    pub clock: i64,
}

impl SenderPacket {
    pub fn new(data: Vec<ExportRecord>, clock: i64) -> Self {
        SenderPacket {
            request: SENDER_REQUEST.to_string(),
            data,
            clock,
        }
    }
}

/// Collector reply, e.g. `{"response":"success","info":"processed: 3; ..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderResponse {
    pub response: String,
    #[serde(default)]
    pub info: Option<String>,
}

/// Frame an arbitrary JSON payload
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, TrapperError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TrapperError::PayloadTooLarge(payload.len()))?;
    let mut buf = BytesMut::with_capacity(FRAME_PREFIX_LEN + payload.len());
    buf.put_slice(HEADER);
    buf.put_u32_le(len);
    buf.put_u32_le(0);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Split a frame into its payload. Bytes past the declared length are
/// ignored.
pub fn decode_frame(frame: &[u8]) -> Result<&[u8], TrapperError> {
    if frame.len() < FRAME_PREFIX_LEN {
        return Err(TrapperError::Truncated {
            expected: FRAME_PREFIX_LEN,
            actual: frame.len(),
        });
    }
    if &frame[..HEADER.len()] != HEADER {
        return Err(TrapperError::InvalidHeader);
    }
    let mut len_field = &frame[HEADER.len()..FRAME_PREFIX_LEN];
    let len = len_field.get_u32_le() as usize;
    let end = FRAME_PREFIX_LEN + len;
    if frame.len() < end {
        return Err(TrapperError::Truncated {
            expected: end,
            actual: frame.len(),
        });
    }
    Ok(&frame[FRAME_PREFIX_LEN..end])
}

/// Serialize and frame a sender packet
pub fn encode_packet(packet: &SenderPacket) -> Result<Bytes, TrapperError> {
    let payload = serde_json::to_vec(packet)?;
    encode_frame(&payload)
}

pub fn decode_packet(frame: &[u8]) -> Result<SenderPacket, TrapperError> {
    Ok(serde_json::from_slice(decode_frame(frame)?)?)
}

pub fn decode_response(frame: &[u8]) -> Result<SenderResponse, TrapperError> {
    Ok(serde_json::from_slice(decode_frame(frame)?)?)
}

/// Delivers record batches to one `(host, port)` collector
#[derive(Debug, Clone)]
pub struct TrapperSender {
    host: String,
    port: u16,
    io_timeout: Duration,
}

impl TrapperSender {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TrapperSender {
            host: host.into(),
            port,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Send `records` in one packet stamped with `clock` (epoch seconds)
    /// and return the raw reply, which is empty when the collector closes
    /// without answering.
    pub async fn send(
        &self,
        records: Vec<ExportRecord>,
        clock: i64,
    ) -> Result<Bytes, TrapperError> {
        let frame = encode_packet(&SenderPacket::new(records, clock))?;
        let addr = self.addr();

        let mut stream = timeout(self.io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TrapperError::Timeout("connect"))??;
        debug!("Connected to trapper at {}", addr);

        // The stream is dropped, and the socket closed, on every return path.
        timeout(self.io_timeout, stream.write_all(&frame))
            .await
            .map_err(|_| TrapperError::Timeout("write"))??;

        let mut reply = Vec::with_capacity(256);
        timeout(self.io_timeout, stream.read_to_end(&mut reply))
            .await
            .map_err(|_| TrapperError::Timeout("read"))??;

        if reply.is_empty() {
            debug!("Trapper at {} closed without replying", addr);
        }
        Ok(Bytes::from(reply))
    }
}
