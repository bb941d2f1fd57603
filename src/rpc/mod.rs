//! Worker RPC: a framed binary protocol carrying four actions between the
//! root process and each worker's socket. Every request begins with a
//! 1-byte action code, a fixed action-specific header, and an optional
//! payload whose length the header fully determines. Responses carry no
//! reply header — the caller already knows the expected length.
//!
//! All multi-byte integers on the wire are little-endian.

pub mod root;
pub mod socket;
pub mod worker;

use crate::error::{EngineError, EngineResult};
use socket::Socket;

pub const ACTION_HELLO: u8 = 0;
pub const ACTION_CREATE_FRAGMENT: u8 = 1;
pub const ACTION_FORWARD_FRAGMENT: u8 = 2;
pub const ACTION_SEND_BUFFER: u8 = 3;

/// Pre-agreed buffer-index convention used by FORWARD_FRAGMENT: it always
/// consumes the staged `BUFFER_INPUT` scratch and always leaves its partial
/// output in `BUFFER_OUTPUT`.
pub const BUFFER_INPUT: u8 = 0;
pub const BUFFER_OUTPUT: u8 = 1;

/// Fixed length of the opaque `specBlob` carried by HELLO. Its internal
/// layout belongs to the transformer-configuration collaborator; this crate
/// only needs it to be self-delimiting, which a compile-time constant gives
/// for free.
pub const SPEC_BLOB_LEN: usize = 64;

/// Which of a transformer block's four weight tensors a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragType {
    Qkv,
    AttnOut,
    FfnUp,
    FfnDown,
}

impl FragType {
    pub fn to_byte(self) -> u8 {
        match self {
            FragType::Qkv => 0,
            FragType::AttnOut => 1,
            FragType::FfnUp => 2,
            FragType::FfnDown => 3,
        }
    }

    pub fn from_byte(b: u8) -> EngineResult<Self> {
        match b {
            0 => Ok(FragType::Qkv),
            1 => Ok(FragType::AttnOut),
            2 => Ok(FragType::FfnUp),
            3 => Ok(FragType::FfnDown),
            other => Err(EngineError::Protocol { detail: format!("unknown fragType {other}") }),
        }
    }
}

/// Direction of a SEND_BUFFER request. Which way the bytes flow can't be
/// inferred from the rest of the header, so the wire frame carries it
/// explicitly rather than leaving it to be inferred from which client
/// method happened to issue the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferDirection {
    Write,
    Read,
}

impl BufferDirection {
    pub fn to_byte(self) -> u8 {
        match self {
            BufferDirection::Write => 0,
            BufferDirection::Read => 1,
        }
    }

    pub fn from_byte(b: u8) -> EngineResult<Self> {
        match b {
            0 => Ok(BufferDirection::Write),
            1 => Ok(BufferDirection::Read),
            other => Err(EngineError::Protocol { detail: format!("unknown buffer direction {other}") }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HelloHeader {
    pub slice_index: u8,
    pub slice_count: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct CreateFragmentHeader {
    pub slice_index: u8,
    pub layer_index: u8,
    pub frag_type: u8,
    pub bytes: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ForwardFragmentHeader {
    pub slice_index: u8,
    pub layer_index: u8,
    pub frag_type: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct SendBufferHeader {
    pub slice_index: u8,
    pub buffer_index: u8,
    pub direction: u8,
    pub bytes: u32,
}

/// Read the 1-byte action code off the wire. The caller dispatches on it to
/// decide which `read_*_header` to call next.
pub fn read_action(socket: &mut Socket) -> EngineResult<u8> {
    let mut buf = [0u8; 1];
    socket.read(&mut buf)?;
    Ok(buf[0])
}

pub fn write_hello(socket: &mut Socket, header: HelloHeader, spec_blob: &[u8; SPEC_BLOB_LEN]) -> EngineResult<()> {
    socket.write(&[ACTION_HELLO])?;
    socket.write(&[header.slice_index, header.slice_count])?;
    socket.write(spec_blob)
}

pub fn read_hello_header(socket: &mut Socket) -> EngineResult<(HelloHeader, [u8; SPEC_BLOB_LEN])> {
    let mut head = [0u8; 2];
    socket.read(&mut head)?;
    let mut spec_blob = [0u8; SPEC_BLOB_LEN];
    socket.read(&mut spec_blob)?;
    Ok((HelloHeader { slice_index: head[0], slice_count: head[1] }, spec_blob))
}

pub fn write_create_fragment(socket: &mut Socket, header: CreateFragmentHeader, weight_bytes: &[u8]) -> EngineResult<()> {
    debug_assert_eq!(header.bytes as usize, weight_bytes.len());
    socket.write(&[ACTION_CREATE_FRAGMENT])?;
    socket.write(&[header.slice_index, header.layer_index, header.frag_type])?;
    socket.write(&header.bytes.to_le_bytes())?;
    socket.write(weight_bytes)
}

pub fn read_create_fragment_header(socket: &mut Socket) -> EngineResult<CreateFragmentHeader> {
    let mut head = [0u8; 3];
    socket.read(&mut head)?;
    let mut len_buf = [0u8; 4];
    socket.read(&mut len_buf)?;
    Ok(CreateFragmentHeader {
        slice_index: head[0],
        layer_index: head[1],
        frag_type: head[2],
        bytes: u32::from_le_bytes(len_buf),
    })
}

pub fn write_forward_fragment(socket: &mut Socket, header: ForwardFragmentHeader) -> EngineResult<()> {
    socket.write(&[ACTION_FORWARD_FRAGMENT])?;
    socket.write(&[header.slice_index, header.layer_index, header.frag_type])
}

pub fn read_forward_fragment_header(socket: &mut Socket) -> EngineResult<ForwardFragmentHeader> {
    let mut head = [0u8; 3];
    socket.read(&mut head)?;
    Ok(ForwardFragmentHeader { slice_index: head[0], layer_index: head[1], frag_type: head[2] })
}

pub fn write_send_buffer_header(socket: &mut Socket, header: SendBufferHeader) -> EngineResult<()> {
    socket.write(&[ACTION_SEND_BUFFER])?;
    socket.write(&[header.slice_index, header.buffer_index, header.direction])?;
    socket.write(&header.bytes.to_le_bytes())
}

pub fn read_send_buffer_header(socket: &mut Socket) -> EngineResult<SendBufferHeader> {
    let mut head = [0u8; 3];
    socket.read(&mut head)?;
    let mut len_buf = [0u8; 4];
    socket.read(&mut len_buf)?;
    Ok(SendBufferHeader {
        slice_index: head[0],
        buffer_index: head[1],
        direction: head[2],
        bytes: u32::from_le_bytes(len_buf),
    })
}

/// Cumulative byte counters for one socket pool, sampled and reset by
/// `get_stats`. Serializable so a caller can log it as structured JSON.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
}
