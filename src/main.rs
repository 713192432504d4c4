// src/main.rs
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use jsonrpsee::server::{ServerBuilder, ServerHandle};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod chain;
mod config;
mod decoder;
mod error;
mod paymaster;
mod policy;
mod rpc;
mod types;

use crate::config::PolicyConfig;
use crate::paymaster::Paymaster;
use crate::rpc::{PaymasterApiServer, PaymasterApiServerImpl};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(short, long, default_value = "127.0.0.1:8545")]
    rpc_server_addr: String,

    /// Signer key; falls back to the PAYMASTER_PRIVATE_KEY environment variable
    #[clap(short, long)]
    private_key: Option<String>,

    #[clap(short, long)]
    eth_rpc_url: String,

    /// DexaPay gateway contract whose payByEmail calls get sponsored
    #[clap(short, long)]
    gateway_contract: String,

    /// Override the supported chain id (defaults to Base Sepolia)
    #[clap(short, long)]
    chain_id: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let private_key = match args.private_key {
        Some(key) => key,
        None => std::env::var("PAYMASTER_PRIVATE_KEY").map_err(|_| {
            anyhow::anyhow!("no signer key: pass --private-key or set PAYMASTER_PRIVATE_KEY")
        })?,
    };

    let mut config = PolicyConfig::base_sepolia(&args.gateway_contract)?;
    if let Some(chain_id) = args.chain_id {
        config = config.with_chain_id(chain_id);
    }
    let paymaster = Paymaster::new(&private_key, &args.eth_rpc_url, config)?;

    let server_addr: SocketAddr = args.rpc_server_addr.parse()?;
    let paymaster_rpc = PaymasterApiServerImpl::new(Arc::new(paymaster));

    info!("Starting sponsorship paymaster RPC server on {}", server_addr);

    let server_handle = start_server(server_addr, paymaster_rpc).await?;

    tokio::signal::ctrl_c().await?;
    server_handle.stop()?;
    info!("Server stopped");

    Ok(())
}

async fn start_server(
    server_addr: SocketAddr,
    paymaster_rpc: PaymasterApiServerImpl,
) -> anyhow::Result<ServerHandle> {
    let server = ServerBuilder::default().build(server_addr).await?;
    Ok(server.start(paymaster_rpc.into_rpc()))
}
