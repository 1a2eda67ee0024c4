//! Wire protocol between the client and the server engine.
//!
//! Frame format (integers big-endian):
//!
//! ```text
//! +--------+--------+------------------+
//! | type   | length | payload (JSON)   |
//! | 1 byte | 4 bytes| variable         |
//! +--------+--------+------------------+
//! ```
//!
//! Every call is client-initiated; the server answers each request with
//! exactly one response frame. Request and response variants are closed
//! sets, so encoding and decoding are exhaustive over the verb table.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::cache::ChecksumIndex;
use crate::error::SyncError;

/// Message type identifiers. Requests use the low range, responses the high.
pub mod msg {
    pub const GET_FILE: u8 = 0x01;
    pub const GET_FILES: u8 = 0x02;
    pub const SEND_FILE: u8 = 0x03;
    pub const SEND_FILES: u8 = 0x04;
    pub const GET_HASHES: u8 = 0x05;
    pub const APPLY_DELTAS: u8 = 0x06;

    pub const TEXT_CONTENT: u8 = 0x81;
    pub const FILE_LIST: u8 = 0x82;
    pub const HASH_INDEX: u8 = 0x83;
    pub const OK: u8 = 0x84;
    pub const ERROR: u8 = 0x85;
}

/// A relative path plus its full content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFile {
    pub path: String,
    pub content: String,
}

/// A relative path plus a delta against the content the server holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFileDelta {
    pub path: String,
    pub delta: String,
}

/// Per-path failure reported inside an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub path: String,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    NotFound,
    DeltaMismatch,
    Io,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} {}: {}", self.kind, self.path, self.detail)
    }
}

/// Client-initiated calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GetTextFile(String),
    GetTextFiles(Vec<String>),
    SendTextFile(TextFile),
    SendTextFiles(Vec<TextFile>),
    GetFileHashes,
    ApplyDeltas(Vec<TextFileDelta>),
}

/// Server answers. `Error` carries every per-path fault of the call; batch
/// verbs answer `Ok` iff the fault list would be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    TextContent(String),
    Files(Vec<TextFile>),
    Hashes(ChecksumIndex),
    Ok,
    Error(Vec<Fault>),
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, SyncError> {
    serde_json::to_vec(value).map_err(|e| SyncError::protocol(format!("encode: {e}")))
}

fn from_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, SyncError> {
    serde_json::from_slice(payload).map_err(|e| SyncError::protocol(format!("decode: {e}")))
}

fn frame(msg_type: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.push(msg_type);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    buf
}

/// Encode a request as a complete frame.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, SyncError> {
    let (msg_type, payload) = match request {
        Request::GetTextFile(path) => (msg::GET_FILE, to_json(path)?),
        Request::GetTextFiles(paths) => (msg::GET_FILES, to_json(paths)?),
        Request::SendTextFile(file) => (msg::SEND_FILE, to_json(file)?),
        Request::SendTextFiles(files) => (msg::SEND_FILES, to_json(files)?),
        Request::GetFileHashes => (msg::GET_HASHES, Vec::new()),
        Request::ApplyDeltas(deltas) => (msg::APPLY_DELTAS, to_json(deltas)?),
    };
    Ok(frame(msg_type, payload))
}

/// Encode a response as a complete frame.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, SyncError> {
    let (msg_type, payload) = match response {
        Response::TextContent(content) => (msg::TEXT_CONTENT, to_json(content)?),
        Response::Files(files) => (msg::FILE_LIST, to_json(files)?),
        Response::Hashes(index) => (msg::HASH_INDEX, to_json(index)?),
        Response::Ok => (msg::OK, Vec::new()),
        Response::Error(faults) => (msg::ERROR, to_json(faults)?),
    };
    Ok(frame(msg_type, payload))
}

/// Decode a request from its type byte and payload.
pub fn decode_request(msg_type: u8, payload: &[u8]) -> Result<Request, SyncError> {
    match msg_type {
        msg::GET_FILE => Ok(Request::GetTextFile(from_json(payload)?)),
        msg::GET_FILES => Ok(Request::GetTextFiles(from_json(payload)?)),
        msg::SEND_FILE => Ok(Request::SendTextFile(from_json(payload)?)),
        msg::SEND_FILES => Ok(Request::SendTextFiles(from_json(payload)?)),
        msg::GET_HASHES => Ok(Request::GetFileHashes),
        msg::APPLY_DELTAS => Ok(Request::ApplyDeltas(from_json(payload)?)),
        other => Err(SyncError::protocol(format!(
            "unknown request type: {other:#04x}"
        ))),
    }
}

/// Decode a response from its type byte and payload.
pub fn decode_response(msg_type: u8, payload: &[u8]) -> Result<Response, SyncError> {
    match msg_type {
        msg::TEXT_CONTENT => Ok(Response::TextContent(from_json(payload)?)),
        msg::FILE_LIST => Ok(Response::Files(from_json(payload)?)),
        msg::HASH_INDEX => Ok(Response::Hashes(from_json(payload)?)),
        msg::OK => Ok(Response::Ok),
        msg::ERROR => Ok(Response::Error(from_json(payload)?)),
        other => Err(SyncError::protocol(format!(
            "unknown response type: {other:#04x}"
        ))),
    }
}

/// Blocking reader over a byte stream of frames.
pub struct ProtocolReader<R> {
    inner: R,
}

impl<R: Read> ProtocolReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    fn read_frame(&mut self) -> Result<(u8, Vec<u8>), SyncError> {
        let mut header = [0u8; 5];
        self.inner.read_exact(&mut header).map_err(map_stream_err)?;
        let [msg_type, len @ ..] = header;

        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        if !payload.is_empty() {
            self.inner.read_exact(&mut payload).map_err(map_stream_err)?;
        }
        Ok((msg_type, payload))
    }

    /// Read the next request frame.
    ///
    /// # Errors
    /// [`SyncError::TransportClosed`] on clean EOF, [`SyncError::Protocol`]
    /// on anything undecodable.
    pub fn read_request(&mut self) -> Result<Request, SyncError> {
        let (msg_type, payload) = self.read_frame()?;
        decode_request(msg_type, &payload)
    }

    /// Read the next response frame.
    pub fn read_response(&mut self) -> Result<Response, SyncError> {
        let (msg_type, payload) = self.read_frame()?;
        decode_response(msg_type, &payload)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn map_stream_err(e: std::io::Error) -> SyncError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SyncError::TransportClosed
    } else {
        SyncError::protocol(format!("stream read failed: {e}"))
    }
}

/// Blocking writer producing frames onto a byte stream.
pub struct ProtocolWriter<W> {
    inner: W,
}

impl<W: Write> ProtocolWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn send_request(&mut self, request: &Request) -> Result<(), SyncError> {
        let frame = encode_request(request)?;
        self.write_frame(&frame)
    }

    pub fn send_response(&mut self, response: &Response) -> Result<(), SyncError> {
        let frame = encode_response(response)?;
        self.write_frame(&frame)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SyncError> {
        self.inner
            .write_all(frame)
            .and_then(|()| self.inner.flush())
            .map_err(|e| SyncError::protocol(format!("stream write failed: {e}")))
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
