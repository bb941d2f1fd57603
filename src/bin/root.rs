//! Demo root process: shards a synthetic weight matrix across a set of
//! worker addresses, drives one forward pass end-to-end over the wire, and
//! prints the merged output vector. Stands in for the transformer runtime
//! that would otherwise own weight loading and own the real input vector.

use std::net::SocketAddr;

use clap::{Parser, ValueEnum};
use shardmul_engine::core::types::FloatType;
use shardmul_engine::rpc::root::RootClient;
use shardmul_engine::rpc::socket::SocketType;
use shardmul_engine::rpc::{BUFFER_INPUT, BUFFER_OUTPUT, SPEC_BLOB_LEN};
use shardmul_engine::shard::ShardPlan;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliFloatType {
    F32,
    F16,
    Q40,
}

impl From<CliFloatType> for FloatType {
    fn from(value: CliFloatType) -> Self {
        match value {
            CliFloatType::F32 => FloatType::F32,
            CliFloatType::F16 => FloatType::F16,
            CliFloatType::Q40 => FloatType::Q40,
        }
    }
}

/// Drive one sharded matrix-vector multiply across a pool of workers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker address, repeatable (one per shard). Order defines slice index.
    #[arg(long = "worker", required = true)]
    workers: Vec<SocketAddr>,

    /// Input width (number of columns per weight row).
    #[arg(long, default_value_t = 256)]
    n: usize,

    /// Output width (number of weight rows), must divide evenly by worker count.
    #[arg(long, default_value_t = 256)]
    d: usize,

    /// Weight encoding to ship to the workers.
    #[arg(long, value_enum, default_value_t = CliFloatType::F32)]
    float_type: CliFloatType,

    /// Use UDP instead of TCP for the worker sockets.
    #[arg(long)]
    udp: bool,

    /// Enable non-blocking sockets with TCP_NODELAY.
    #[arg(long)]
    turbo: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(&args) {
        log::error!("root failed: {err}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> shardmul_engine::error::EngineResult<()> {
    let float_type: FloatType = args.float_type.into();
    let socket_type = if args.udp { SocketType::Udp } else { SocketType::Tcp };
    let slice_count = args.workers.len();

    let weights: Vec<f32> = (0..args.n * args.d).map(|i| ((i % 17) as f32 - 8.0) * 0.05).collect();
    let input: Vec<f32> = (0..args.n).map(|i| (i as f32 / args.n as f32) - 0.5).collect();
    let weight_bytes = encode_weights(float_type, &weights);

    let plan = ShardPlan::new(float_type, slice_count, args.n, args.d);
    let spec_blob = [0u8; SPEC_BLOB_LEN];
    let client = RootClient::connect(socket_type, &args.workers, &spec_blob)?;
    if args.turbo {
        client.enable_turbo()?;
    }

    let input_bytes: Vec<u8> = input.iter().flat_map(|f| f.to_le_bytes()).collect();

    for slice_index in 0..slice_count {
        let slice_weights = plan.split_weights(slice_index, &weight_bytes);
        client.create_fragment(slice_index, 0, 0, &slice_weights)?;
        client.send_buffer(slice_index, BUFFER_INPUT, &input_bytes)?;
    }

    for slice_index in 0..slice_count {
        client.forward_fragment(slice_index, 0, 0)?;
    }

    let mut output = vec![0.0f32; args.d];
    for slice_index in 0..slice_count {
        let bytes = client.read_buffer(slice_index, BUFFER_OUTPUT, (plan.d0 * 4) as u32)?;
        let partial: Vec<f32> = bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect();
        plan.merge_outputs(slice_index, &mut output, &partial);
    }

    log::info!("output: {output:?}");
    let stats = client.dump_stats();
    log::info!("sent {} bytes, received {} bytes", stats.sent_bytes, stats.recv_bytes);
    Ok(())
}

fn encode_weights(float_type: FloatType, weights: &[f32]) -> Vec<u8> {
    match float_type {
        FloatType::F32 => weights.iter().flat_map(|f| f.to_le_bytes()).collect(),
        FloatType::F16 => weights
            .iter()
            .flat_map(|&f| shardmul_engine::quant::f16::f32_to_f16(f).to_le_bytes())
            .collect(),
        FloatType::Q40 => {
            panic!("Q40 weight fragments must come pre-quantized from the model-loading collaborator")
        }
        FloatType::Q80 => unreachable!("Q80 never tags a weight matrix"),
    }
}
