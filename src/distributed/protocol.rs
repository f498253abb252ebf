//! Wire protocol between coordinator and workers
//!
//! Every message on a worker connection is one frame carrying exactly one
//! typed record. There is no separate framing for small values: the handshake
//! id and capacity report travel the same way as sub-tasks and results.
//!
//! # Message Flow
//!
//! ```text
//! Coordinator                     Worker
//!     |                              |
//!     |<------- TCP connect ---------|
//!     |-------- HANDSHAKE(id) ------>|
//!     |<------- CAPACITY(n) ---------|
//!     |                              |
//!     |-------- SUBTASK ------------>|
//!     |-------- SUBTASK ------------>|
//!     |<------- SUBRESULT -----------|
//!     |<------- SUBRESULT -----------|
//!     |            ...               |
//! ```
//!
//! There is no shutdown message; either side ends the session by closing
//! the stream.
//!
//! # Message Framing
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)][N bytes: payload]
//! ```
//!
//! # Payload Schema (version 1)
//!
//! ```text
//! [u8 version][u8 kind][fixed-width little-endian fields]
//!
//! kind 1  Handshake       session_id: u64
//! kind 2  CapacityReport  capacity: u64
//! kind 3  SubTask         lower: f64, upper: f64, step: f64, id: u64
//! kind 4  SubResult       value: f64, id: u64
//! ```

use crate::error::FramingError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Wire schema version
///
/// Increment this when a record layout changes. Both sides reject payloads
/// carrying any other version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Version byte plus kind byte
const HEADER_LEN: usize = 2;

/// Default upper bound on a single payload
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Record discriminant carried in every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Handshake = 1,
    CapacityReport = 2,
    SubTask = 3,
    SubResult = 4,
}

/// A record with a fixed-width body that can travel in a frame
pub trait Record: Sized {
    const KIND: RecordKind;

    /// Exact body length in bytes (excluding version and kind)
    const BODY_LEN: usize;

    fn write_body(&self, out: &mut Vec<u8>);

    fn read_body(body: &mut BodyReader<'_>) -> Result<Self, FramingError>;
}

/// Session id sent by the coordinator right after accepting a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub session_id: u64,
}

/// Capacity declared by the worker in reply to the handshake
///
/// Zero is legal on the wire; the coordinator substitutes its own default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityReport {
    pub capacity: u64,
}

/// One partitioned unit of work
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubTask {
    pub id: u64,
    pub lower: f64,
    pub upper: f64,
    pub step: f64,
}

impl SubTask {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Computed value for one sub-task, correlated by id
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubResult {
    pub id: u64,
    pub value: f64,
}

impl Record for Handshake {
    const KIND: RecordKind = RecordKind::Handshake;
    const BODY_LEN: usize = 8;

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.session_id.to_le_bytes());
    }

    fn read_body(body: &mut BodyReader<'_>) -> Result<Self, FramingError> {
        Ok(Self {
            session_id: body.u64()?,
        })
    }
}

impl Record for CapacityReport {
    const KIND: RecordKind = RecordKind::CapacityReport;
    const BODY_LEN: usize = 8;

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.capacity.to_le_bytes());
    }

    fn read_body(body: &mut BodyReader<'_>) -> Result<Self, FramingError> {
        Ok(Self {
            capacity: body.u64()?,
        })
    }
}

impl Record for SubTask {
    const KIND: RecordKind = RecordKind::SubTask;
    const BODY_LEN: usize = 32;

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.lower.to_le_bytes());
        out.extend_from_slice(&self.upper.to_le_bytes());
        out.extend_from_slice(&self.step.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
    }

    fn read_body(body: &mut BodyReader<'_>) -> Result<Self, FramingError> {
        let lower = body.f64()?;
        let upper = body.f64()?;
        let step = body.f64()?;
        let id = body.u64()?;
        Ok(Self {
            id,
            lower,
            upper,
            step,
        })
    }
}

impl Record for SubResult {
    const KIND: RecordKind = RecordKind::SubResult;
    const BODY_LEN: usize = 16;

    fn write_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.value.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
    }

    fn read_body(body: &mut BodyReader<'_>) -> Result<Self, FramingError> {
        let value = body.f64()?;
        let id = body.u64()?;
        Ok(Self { id, value })
    }
}

/// Cursor over a record body that has already been length-checked
pub struct BodyReader<'a> {
    kind: RecordKind,
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    fn new(kind: RecordKind, buf: &'a [u8]) -> Self {
        Self { kind, buf }
    }

    fn take8(&mut self) -> Result<[u8; 8], FramingError> {
        if self.buf.len() < 8 {
            return Err(FramingError::BadLength {
                kind: self.kind,
                expected: 8,
                found: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(8);
        self.buf = rest;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(head);
        Ok(bytes)
    }

    pub fn u64(&mut self) -> Result<u64, FramingError> {
        self.take8().map(u64::from_le_bytes)
    }

    pub fn f64(&mut self) -> Result<f64, FramingError> {
        self.take8().map(f64::from_le_bytes)
    }
}

/// Serialize a record to one complete frame (length prefix included)
pub fn encode_frame<R: Record>(record: &R) -> Vec<u8> {
    let payload_len = HEADER_LEN + R::BODY_LEN;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX_LEN + payload_len);
    framed.extend_from_slice(&(payload_len as u32).to_le_bytes());
    framed.push(PROTOCOL_VERSION);
    framed.push(R::KIND as u8);
    record.write_body(&mut framed);
    framed
}

/// Decode a payload (without length prefix) into the expected record
pub fn decode_payload<R: Record>(payload: &[u8]) -> Result<R, FramingError> {
    if payload.len() < HEADER_LEN {
        return Err(FramingError::BadLength {
            kind: R::KIND,
            expected: HEADER_LEN + R::BODY_LEN,
            found: payload.len(),
        });
    }

    let version = payload[0];
    if version != PROTOCOL_VERSION {
        return Err(FramingError::UnsupportedVersion {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }

    let kind = payload[1];
    if kind != R::KIND as u8 {
        return Err(FramingError::UnexpectedKind {
            expected: R::KIND,
            found: kind,
        });
    }

    let body = &payload[HEADER_LEN..];
    if body.len() != R::BODY_LEN {
        return Err(FramingError::BadLength {
            kind: R::KIND,
            expected: R::BODY_LEN,
            found: body.len(),
        });
    }

    R::read_body(&mut BodyReader::new(R::KIND, body))
}

/// Decode one frame from the front of a buffer
///
/// Returns the record and the number of bytes consumed, prefix included.
pub fn decode_frame<R: Record>(buf: &[u8]) -> Result<(R, usize), FramingError> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Err(FramingError::Closed);
    }

    let payload_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let end = LENGTH_PREFIX_LEN + payload_len;
    if buf.len() < end {
        return Err(FramingError::Truncated {
            expected: payload_len,
        });
    }

    let record = decode_payload(&buf[LENGTH_PREFIX_LEN..end])?;
    Ok((record, end))
}

/// Read one complete record from a stream
///
/// Reads the 4-byte length prefix, then exactly that many payload bytes.
pub async fn read_record<R, S>(stream: &mut S, max_frame_len: usize) -> Result<R, FramingError>
where
    R: Record,
    S: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::Closed
        } else {
            FramingError::Io(e)
        }
    })?;

    let payload_len = u32::from_le_bytes(len_buf) as usize;
    if payload_len > max_frame_len {
        return Err(FramingError::TooLarge {
            len: payload_len,
            max: max_frame_len,
        });
    }

    let mut payload = vec![0u8; payload_len];
    stream.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FramingError::Truncated {
                expected: payload_len,
            }
        } else {
            FramingError::Io(e)
        }
    })?;

    decode_payload(&payload)
}

/// Write one record as a single frame and flush it
pub async fn write_record<R, S>(stream: &mut S, record: &R) -> std::io::Result<()>
where
    R: Record,
    S: AsyncWrite + Unpin + ?Sized,
{
    let framed = encode_frame(record);
    stream.write_all(&framed).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_frame_roundtrip() {
        let task = SubTask {
            id: 42,
            lower: 2.0,
            upper: 10.0,
            step: 0.001,
        };

        let bytes = encode_frame(&task);
        let (decoded, consumed): (SubTask, usize) = decode_frame(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_subresult_frame_roundtrip() {
        let result = SubResult {
            id: u64::MAX,
            value: -3.14159,
        };

        let bytes = encode_frame(&result);
        let (decoded, consumed): (SubResult, usize) = decode_frame(&bytes).unwrap();

        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.id, u64::MAX);
        assert_eq!(decoded.value.to_bits(), result.value.to_bits());
    }

    #[test]
    fn test_message_framing() {
        let bytes = encode_frame(&Handshake { session_id: 7 });

        assert!(bytes.len() >= LENGTH_PREFIX_LEN);
        let msg_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), LENGTH_PREFIX_LEN + msg_len);
        assert_eq!(bytes[4], PROTOCOL_VERSION);
        assert_eq!(bytes[5], RecordKind::Handshake as u8);
        assert_eq!(&bytes[6..], &7u64.to_le_bytes());
    }

    #[test]
    fn test_subtask_field_order_is_little_endian() {
        let task = SubTask {
            id: 1,
            lower: 1.5,
            upper: 2.5,
            step: 0.25,
        };
        let bytes = encode_frame(&task);
        let body = &bytes[LENGTH_PREFIX_LEN + HEADER_LEN..];

        assert_eq!(&body[0..8], &1.5f64.to_le_bytes());
        assert_eq!(&body[8..16], &2.5f64.to_le_bytes());
        assert_eq!(&body[16..24], &0.25f64.to_le_bytes());
        assert_eq!(&body[24..32], &1u64.to_le_bytes());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let bytes = encode_frame(&CapacityReport { capacity: 4 });
        let err = decode_frame::<Handshake>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            FramingError::UnexpectedKind {
                expected: RecordKind::Handshake,
                found: 2
            }
        ));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let mut bytes = encode_frame(&CapacityReport { capacity: 4 });
        bytes[LENGTH_PREFIX_LEN] = PROTOCOL_VERSION + 1;
        let err = decode_frame::<CapacityReport>(&bytes).unwrap_err();
        assert!(matches!(err, FramingError::UnsupportedVersion { .. }));
    }

    #[test]
    fn test_bad_body_length_rejected() {
        let mut bytes = encode_frame(&SubResult { id: 1, value: 1.0 });
        bytes.push(0);
        let new_len = (bytes.len() - LENGTH_PREFIX_LEN) as u32;
        bytes[..4].copy_from_slice(&new_len.to_le_bytes());

        let err = decode_frame::<SubResult>(&bytes).unwrap_err();
        assert!(matches!(
            err,
            FramingError::BadLength {
                expected: 16,
                found: 17,
                ..
            }
        ));
    }

    #[test]
    fn test_incomplete_buffer() {
        let bytes = encode_frame(&SubResult { id: 1, value: 1.0 });
        assert!(matches!(
            decode_frame::<SubResult>(&bytes[..2]),
            Err(FramingError::Closed)
        ));
        assert!(matches!(
            decode_frame::<SubResult>(&bytes[..bytes.len() - 1]),
            Err(FramingError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let task = SubTask {
            id: 9,
            lower: -1.0,
            upper: 1.0,
            step: 0.5,
        };

        write_record(&mut a, &task).await.unwrap();
        write_record(&mut a, &SubResult { id: 9, value: 0.5 }).await.unwrap();

        let got: SubTask = read_record(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(got, task);
        let got: SubResult = read_record(&mut b, DEFAULT_MAX_FRAME_LEN).await.unwrap();
        assert_eq!(got, SubResult { id: 9, value: 0.5 });
    }

    #[tokio::test]
    async fn test_stream_closed_before_prefix() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);

        let err = read_record::<SubResult, _>(&mut b, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::Closed));
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn test_stream_closed_mid_payload() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let bytes = encode_frame(&SubResult { id: 3, value: 2.0 });
        a.write_all(&bytes[..bytes.len() - 4]).await.unwrap();
        drop(a);

        let err = read_record::<SubResult, _>(&mut b, DEFAULT_MAX_FRAME_LEN)
            .await
            .unwrap_err();
        assert!(matches!(err, FramingError::Truncated { expected: 18 }));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(4096u32).to_le_bytes()).await.unwrap();

        let err = read_record::<SubResult, _>(&mut b, 1024).await.unwrap_err();
        assert!(matches!(err, FramingError::TooLarge { len: 4096, max: 1024 }));
    }
}
