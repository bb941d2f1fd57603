//! Demo worker process: accepts one root connection, stores whatever
//! fragments CREATE_FRAGMENT hands it, and answers FORWARD_FRAGMENT /
//! SEND_BUFFER requests until the socket closes.

use clap::{Parser, ValueEnum};
use shardmul_engine::core::types::FloatType;
use shardmul_engine::rpc::socket::SocketType;
use shardmul_engine::rpc::worker::{WorkerConfig, WorkerServer};

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

/// Serve one shard's worth of a sharded matrix-vector multiply.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9001)]
    port: u16,

    /// Input width shared by every slice.
    #[arg(long, default_value_t = 256)]
    n: usize,

    /// Output rows owned by this slice (D / slice_count).
    #[arg(long, default_value_t = 64)]
    d0: usize,

    /// Weight encoding this slice's fragments arrive in.
    #[arg(long, value_enum, default_value_t = CliFloatType::F32)]
    float_type: CliFloatType,

    /// Worker thread pool size.
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Use UDP instead of TCP.
    #[arg(long)]
    udp: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let socket_type = if args.udp { SocketType::Udp } else { SocketType::Tcp };
    let config = WorkerConfig {
        float_type: args.float_type.into(),
        n: args.n,
        d0: args.d0,
        n_threads: args.threads,
    };

    let mut server = match WorkerServer::accept(socket_type, args.port, config) {
        Ok(server) => server,
        Err(err) => {
            log::error!("failed to accept root connection: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = server.serve_forever() {
        log::info!("connection closed: {err}");
    }
}
