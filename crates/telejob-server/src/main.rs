//! Telejob server binary.
//!
//! Runs the mTLS gRPC job service. Every flag can also be set through a
//! `TELEJOB_*` environment variable, e.g.:
//!
//! ```text
//! telejob-server --address 127.0.0.1:8443 \
//!     --server-cert server.crt --server-key server.key \
//!     --client-ca-cert client-ca.crt \
//!     --cpu-limit 0.5 --memory-limit 2000
//! ```

mod logging;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use telejob_api::{Server, ServerConfig};
use telejob_core::ControllerConfig;
use telejob_model::Limits;

#[derive(Debug, Parser)]
#[command(
    name = "telejob-server",
    version,
    about = "gRPC server that runs and manages jobs in a restricted environment"
)]
struct Args {
    /// Address to listen on.
    #[arg(short = 'A', long, env = "TELEJOB_ADDRESS")]
    address: String,

    /// Server certificate file.
    #[arg(long, env = "TELEJOB_SERVER_CERT")]
    server_cert: PathBuf,

    /// Server private key file.
    #[arg(long, env = "TELEJOB_SERVER_KEY")]
    server_key: PathBuf,

    /// Client CA certificate file.
    #[arg(long, env = "TELEJOB_CLIENT_CA_CERT")]
    client_ca_cert: PathBuf,

    /// Number of CPUs per job.
    #[arg(short = 'c', long, env = "TELEJOB_CPU_LIMIT", default_value_t = 0.0)]
    cpu_limit: f64,

    /// Memory limit in KiB per job.
    #[arg(short = 'm', long, env = "TELEJOB_MEMORY_LIMIT", default_value_t = 0)]
    memory_limit: u64,

    /// I/O limit per job, e.g. "252:1 rbps=1000000". May be repeated.
    #[arg(short = 'i', long, env = "TELEJOB_IO_LIMIT")]
    io_limit: Vec<String>,

    /// Parent cgroup for job cgroups.
    #[arg(long, env = "TELEJOB_CGROUP", default_value = "/sys/fs/cgroup/telejob")]
    cgroup: PathBuf,

    /// Log filter, e.g. "info" or "telejob_core=debug".
    #[arg(long, env = "TELEJOB_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let config = ServerConfig {
        address: args.address,
        server_cert: args.server_cert,
        server_key: args.server_key,
        client_ca_cert: args.client_ca_cert,
        controller: ControllerConfig {
            cgroup_root: args.cgroup,
            limits: Limits {
                cpus: args.cpu_limit,
                memory_kib: args.memory_limit,
                io: args.io_limit,
            },
        },
    };

    let server = Server::bind(config)
        .await
        .context("failed to create server")?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping server");
            shutdown.cancel();
        }
    });

    server.serve().await.context("failed to serve")?;
    Ok(())
}
