//! `Worker`/`WorkerTransformerState` from the source's worker.hpp, narrowed
//! to this crate's scope: a worker owns one output-dimension slice of zero
//! or more weight fragments and two scratch buffers (input, output), and
//! runs FORWARD_FRAGMENT by handing its stored fragment to a `ThreadPool`.
//!
//! What the source's `WorkerLayer`/`TransformerState`/`SharedBuffer` machinery
//! covers beyond that — attention, FFN activation, KV cache — belongs to the
//! transformer-orchestration collaborator this crate hands partial sums back
//! to; a worker here only ever multiplies one fragment against one buffer.

use std::collections::HashMap;

use crate::core::types::{BlockQ40, FloatType, WeightView, QK40};
use crate::error::{EngineError, EngineResult};
use crate::pool::ThreadPool;
use crate::rpc::socket::{Socket, SocketType};
use crate::rpc::{
    self, BufferDirection, BUFFER_INPUT, BUFFER_OUTPUT, SPEC_BLOB_LEN,
};

/// What a worker needs to know about its own fragment shape and thread
/// budget. In the source this lives inside the opaque `TransformerSpec`
/// blob; this crate receives it directly from the demo binary's CLI args
/// rather than parsing it out of `specBlob`, since the blob's real layout
/// belongs to a transformer-configuration component this crate doesn't own.
#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    pub float_type: FloatType,
    pub n: usize,
    pub d0: usize,
    pub n_threads: usize,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
struct FragmentKey {
    layer_index: u8,
    frag_type: u8,
}

/// One running worker process: a connected socket, the fragments it has
/// been handed by CREATE_FRAGMENT, its two scratch buffers, and the thread
/// pool FORWARD_FRAGMENT dispatches onto.
pub struct WorkerServer {
    socket: Socket,
    slice_index: u8,
    config: WorkerConfig,
    pool: ThreadPool,
    fragments: HashMap<FragmentKey, Vec<u8>>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
}

impl WorkerServer {
    /// Block on `Socket::accept`, then exchange HELLO before returning a
    /// server ready to `serve_forever`.
    pub fn accept(kind: SocketType, port: u16, config: WorkerConfig) -> EngineResult<Self> {
        let mut socket = Socket::accept(kind, port)?;
        let (hello, _spec_blob) = Self::handle_hello(&mut socket)?;
        log::info!("worker accepted slice {} of {}", hello.slice_index, hello.slice_count);
        Ok(Self {
            socket,
            slice_index: hello.slice_index,
            config,
            pool: ThreadPool::new(config.n_threads),
            fragments: HashMap::new(),
            input_buffer: vec![0.0; config.n],
            output_buffer: vec![0.0; config.d0],
        })
    }

    fn handle_hello(socket: &mut Socket) -> EngineResult<(rpc::HelloHeader, [u8; SPEC_BLOB_LEN])> {
        let action = rpc::read_action(socket)?;
        if action != rpc::ACTION_HELLO {
            return Err(EngineError::Protocol { detail: format!("expected HELLO, got action {action}") });
        }
        rpc::read_hello_header(socket)
    }

    /// Serve one action per iteration until the socket is closed by the
    /// peer (surfaced as an `Io` error from the next `read_action`).
    pub fn serve_forever(&mut self) -> EngineResult<()> {
        loop {
            let action = rpc::read_action(&mut self.socket)?;
            match action {
                rpc::ACTION_CREATE_FRAGMENT => self.handle_create_fragment()?,
                rpc::ACTION_FORWARD_FRAGMENT => self.handle_forward_fragment()?,
                rpc::ACTION_SEND_BUFFER => self.handle_send_buffer()?,
                other => {
                    return Err(EngineError::Protocol { detail: format!("unexpected action {other} after HELLO") })
                }
            }
        }
    }

    fn handle_create_fragment(&mut self) -> EngineResult<()> {
        let header = rpc::read_create_fragment_header(&mut self.socket)?;
        let mut weight_bytes = vec![0u8; header.bytes as usize];
        self.socket.read(&mut weight_bytes)?;
        let key = FragmentKey { layer_index: header.layer_index, frag_type: header.frag_type };
        log::debug!(
            "slice {}: stored fragment layer={} type={} bytes={}",
            self.slice_index, header.layer_index, header.frag_type, header.bytes
        );
        self.fragments.insert(key, weight_bytes);
        Ok(())
    }

    fn handle_forward_fragment(&mut self) -> EngineResult<()> {
        let header = rpc::read_forward_fragment_header(&mut self.socket)?;
        let key = FragmentKey { layer_index: header.layer_index, frag_type: header.frag_type };
        let weight_bytes = self.fragments.get(&key).ok_or_else(|| EngineError::Protocol {
            detail: format!("forward requested for unknown fragment layer={} type={}", header.layer_index, header.frag_type),
        })?;

        let decoded = decode_weight_fragment(self.config.float_type, weight_bytes)?;
        // `ThreadPool::mul` quantizes the F32 input to Q80 internally when
        // `weights` is Q40, so the input buffer is always handed over as F32.
        self.pool.mul(decoded.as_view(), &self.input_buffer, &mut self.output_buffer, self.config.n, self.config.d0);
        Ok(())
    }

    fn handle_send_buffer(&mut self) -> EngineResult<()> {
        let header = rpc::read_send_buffer_header(&mut self.socket)?;
        let direction = BufferDirection::from_byte(header.direction)?;
        match (header.buffer_index, direction) {
            (BUFFER_INPUT, BufferDirection::Write) => {
                let mut bytes = vec![0u8; header.bytes as usize];
                self.socket.read(&mut bytes)?;
                self.input_buffer = bytes_to_f32_vec(&bytes);
            }
            (BUFFER_OUTPUT, BufferDirection::Read) => {
                let bytes = f32_slice_to_bytes(&self.output_buffer);
                self.socket.write(&bytes)?;
            }
            (idx, dir) => {
                return Err(EngineError::Protocol {
                    detail: format!("unsupported buffer_index={idx} direction={dir:?} combination"),
                })
            }
        }
        Ok(())
    }
}

/// Owned decode of a wire-format weight fragment. A `Vec<u8>` received off
/// the socket is only ever byte-aligned, so this parses field-by-field
/// through `from_le_bytes` rather than reinterpreting the buffer in place —
/// a raw pointer cast to `*const f32`/`*const BlockQ40` would require the
/// buffer to already meet that type's alignment, which nothing guarantees
/// here.
enum DecodedWeights {
    F32(Vec<f32>),
    F16(Vec<u16>),
    Q40(Vec<BlockQ40>),
}

impl DecodedWeights {
    fn as_view(&self) -> WeightView<'_> {
        match self {
            DecodedWeights::F32(v) => WeightView::F32(v),
            DecodedWeights::F16(v) => WeightView::F16(v),
            DecodedWeights::Q40(v) => WeightView::Q40(v),
        }
    }
}

fn decode_weight_fragment(float_type: FloatType, bytes: &[u8]) -> EngineResult<DecodedWeights> {
    match float_type {
        FloatType::F32 => {
            if bytes.len() % 4 != 0 {
                return Err(EngineError::Dimension { detail: "F32 fragment length not a multiple of 4".into() });
            }
            let floats = bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().expect("exact chunk"))).collect();
            Ok(DecodedWeights::F32(floats))
        }
        FloatType::F16 => {
            if bytes.len() % 2 != 0 {
                return Err(EngineError::Dimension { detail: "F16 fragment length not a multiple of 2".into() });
            }
            let halves = bytes.chunks_exact(2).map(|c| u16::from_le_bytes(c.try_into().expect("exact chunk"))).collect();
            Ok(DecodedWeights::F16(halves))
        }
        FloatType::Q40 => {
            let block_size = std::mem::size_of::<BlockQ40>();
            if bytes.len() % block_size != 0 {
                return Err(EngineError::Dimension { detail: "Q40 fragment length not a multiple of block size".into() });
            }
            let blocks = bytes
                .chunks_exact(block_size)
                .map(|c| {
                    let d = u16::from_le_bytes([c[0], c[1]]);
                    let mut qs = [0u8; QK40 / 2];
                    qs.copy_from_slice(&c[2..block_size]);
                    BlockQ40 { d, qs }
                })
                .collect();
            Ok(DecodedWeights::Q40(blocks))
        }
        FloatType::Q80 => Err(EngineError::Encoding { detail: "Q80 never tags a weight fragment".into() }),
    }
}

fn bytes_to_f32_vec(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().expect("exact chunk"))).collect()
}

fn f32_slice_to_bytes(floats: &[f32]) -> Vec<u8> {
    floats.iter().flat_map(|f| f.to_le_bytes()).collect()
}
