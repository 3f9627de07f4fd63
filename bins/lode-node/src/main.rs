//! Lode full node binary.
//!
//! Starts a full node with RocksDB storage: validates and links blocks,
//! follows the heaviest chain, and optionally mines.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::info;

use lode_core::constants::DEFAULT_P2P_PORT;
use lode_core::genesis::ROOT_WORK_TARGET;
use lode_core::types::PubKey;
use lode_node_lib::{Node, NodeConfig};

/// Lode full node.
#[derive(Parser, Debug)]
#[command(
    name = "lode-node",
    version,
    about = "Lode full node with RocksDB storage"
)]
struct Args {
    /// Data directory for blockchain storage
    #[arg(long, default_value = None)]
    data_dir: Option<PathBuf>,

    /// P2P port offered to peers
    #[arg(long, default_value_t = DEFAULT_P2P_PORT)]
    p2p_port: u16,

    /// Mine blocks
    #[arg(long)]
    mine: bool,

    /// Public key (hex, 32 bytes) credited with mined coins
    #[arg(long, requires = "mine")]
    coinbase: Option<String>,

    /// Work target for mined blocks
    #[arg(long, default_value_t = ROOT_WORK_TARGET)]
    mine_work_target: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> anyhow::Result<(NodeConfig, String)> {
        let defaults = NodeConfig::default();
        let data_dir = self.data_dir.unwrap_or(defaults.data_dir);

        let coinbase = match self.coinbase {
            Some(hex_key) => {
                let bytes = hex::decode(&hex_key).context("coinbase is not valid hex")?;
                let array: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("coinbase must be 32 bytes"))?;
                PubKey(array)
            }
            None => {
                if self.mine {
                    bail!("--mine requires --coinbase");
                }
                PubKey::ZERO
            }
        };

        let config = NodeConfig {
            data_dir,
            p2p_port: self.p2p_port,
            mine: self.mine,
            coinbase,
            mine_work_target: self.mine_work_target,
            log_level: self.log_level,
        };
        Ok((config, self.log_format))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let (config, log_format) = args.into_config()?;

    init_logging(&config.log_level, &log_format);

    info!("Lode Full Node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("p2p_port: {}", config.p2p_port);
    info!("mine: {}", config.mine);

    std::fs::create_dir_all(&config.data_dir).context("failed to create data_dir")?;

    // Peers come from the transport layer; the reference binary runs
    // standalone.
    let node = Node::new(config, Vec::new()).context("failed to start node")?;

    info!(
        head = %node.head_hash(),
        height = node.head_height(),
        "node initialized"
    );
    info!("Lode node running (Ctrl+C to stop)");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("received Ctrl+C, shutting down...");
    };

    tokio::select! {
        _ = node.run() => {
            info!("node control loops exited");
        }
        _ = shutdown_signal => {
            node.stop();
        }
    }

    info!("Lode node shutdown complete");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output (suitable for log
/// aggregation pipelines). Any other value defaults to human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
