//! `WorkerRemoteClient` from the source's worker.hpp: the root process's
//! view of a `SocketPool` fanned out over every worker slice, exposing one
//! typed method per wire action instead of the source's raw `sendBytes`.

use std::net::SocketAddr;

use crate::error::EngineResult;
use crate::rpc::socket::{SocketPool, SocketType};
use crate::rpc::{
    self, BufferDirection, CreateFragmentHeader, ForwardFragmentHeader, HelloHeader, SendBufferHeader, Stats,
    SPEC_BLOB_LEN,
};

/// Root-side handle to every connected worker slice. `slice_index` in each
/// method selects which socket in the pool to address; callers fan a single
/// logical operation out across slices by looping over `0..n_slices()`.
pub struct RootClient {
    pool: SocketPool,
}

impl RootClient {
    /// Connect to every worker address, send each its HELLO, and return a
    /// client ready to create fragments.
    pub fn connect(kind: SocketType, addrs: &[SocketAddr], spec_blob: &[u8; SPEC_BLOB_LEN]) -> EngineResult<Self> {
        let pool = SocketPool::connect(kind, addrs)?;
        let slice_count = addrs.len() as u8;
        for slice_index in 0..pool.n_sockets() {
            let header = HelloHeader { slice_index: slice_index as u8, slice_count };
            Self::send_hello(&pool, slice_index, header, spec_blob)?;
        }
        Ok(Self { pool })
    }

    pub fn n_slices(&self) -> usize {
        self.pool.n_sockets()
    }

    pub fn enable_turbo(&self) -> EngineResult<()> {
        self.pool.enable_turbo()
    }

    fn send_hello(pool: &SocketPool, slice_index: usize, header: HelloHeader, spec_blob: &[u8; SPEC_BLOB_LEN]) -> EngineResult<()> {
        let mut framed = Vec::with_capacity(1 + 2 + SPEC_BLOB_LEN);
        framed.push(rpc::ACTION_HELLO);
        framed.push(header.slice_index);
        framed.push(header.slice_count);
        framed.extend_from_slice(spec_blob);
        pool.write(slice_index, &framed)
    }

    pub fn create_fragment(&self, slice_index: usize, layer_index: u8, frag_type: u8, weight_bytes: &[u8]) -> EngineResult<()> {
        let header = CreateFragmentHeader {
            slice_index: slice_index as u8,
            layer_index,
            frag_type,
            bytes: weight_bytes.len() as u32,
        };
        let mut framed = Vec::with_capacity(1 + 7 + weight_bytes.len());
        framed.push(rpc::ACTION_CREATE_FRAGMENT);
        framed.push(header.slice_index);
        framed.push(header.layer_index);
        framed.push(header.frag_type);
        framed.extend_from_slice(&header.bytes.to_le_bytes());
        framed.extend_from_slice(weight_bytes);
        self.pool.write(slice_index, &framed)
    }

    pub fn forward_fragment(&self, slice_index: usize, layer_index: u8, frag_type: u8) -> EngineResult<()> {
        let header = ForwardFragmentHeader { slice_index: slice_index as u8, layer_index, frag_type };
        let framed = [rpc::ACTION_FORWARD_FRAGMENT, header.slice_index, header.layer_index, header.frag_type];
        self.pool.write(slice_index, &framed)
    }

    /// Stage `data` as the input buffer on `slice_index`'s worker.
    pub fn send_buffer(&self, slice_index: usize, buffer_index: u8, data: &[u8]) -> EngineResult<()> {
        let header = SendBufferHeader {
            slice_index: slice_index as u8,
            buffer_index,
            direction: BufferDirection::Write.to_byte(),
            bytes: data.len() as u32,
        };
        self.write_send_buffer_header(slice_index, header)?;
        self.pool.write(slice_index, data)
    }

    /// Ask `slice_index`'s worker to write back `bytes` bytes of
    /// `buffer_index` and read the response into a freshly allocated
    /// buffer.
    pub fn read_buffer(&self, slice_index: usize, buffer_index: u8, bytes: u32) -> EngineResult<Vec<u8>> {
        let header = SendBufferHeader {
            slice_index: slice_index as u8,
            buffer_index,
            direction: BufferDirection::Read.to_byte(),
            bytes,
        };
        self.write_send_buffer_header(slice_index, header)?;
        let mut out = vec![0u8; bytes as usize];
        self.pool.read(slice_index, &mut out)?;
        Ok(out)
    }

    fn write_send_buffer_header(&self, slice_index: usize, header: SendBufferHeader) -> EngineResult<()> {
        let framed = [
            rpc::ACTION_SEND_BUFFER,
            header.slice_index,
            header.buffer_index,
            header.direction,
            header.bytes.to_le_bytes()[0],
            header.bytes.to_le_bytes()[1],
            header.bytes.to_le_bytes()[2],
            header.bytes.to_le_bytes()[3],
        ];
        self.pool.write(slice_index, &framed)
    }

    pub fn dump_stats(&self) -> Stats {
        self.pool.get_stats()
    }
}
