//! Node configuration for the Lode full node.
//!
//! Provides [`NodeConfig`] with defaults for the data directory, P2P port,
//! mining, and logging. The configuration can be customized
//! programmatically or from the CLI.

use std::path::PathBuf;

use lode_core::constants::DEFAULT_P2P_PORT;
use lode_core::genesis::ROOT_WORK_TARGET;
use lode_core::types::PubKey;

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Port offered to peers for the block protocol.
    pub p2p_port: u16,
    /// Whether to run the miner.
    pub mine: bool,
    /// Key credited with the coins mined blocks issue.
    pub coinbase: PubKey,
    /// Work target the miner stamps on its candidates.
    pub mine_work_target: u64,
    /// Log level filter string (e.g. "info", "debug", "lode_node=trace").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lode");

        Self {
            data_dir,
            p2p_port: DEFAULT_P2P_PORT,
            mine: false,
            coinbase: PubKey::ZERO,
            mine_work_target: ROOT_WORK_TARGET,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_p2p_port() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.p2p_port, DEFAULT_P2P_PORT);
    }

    #[test]
    fn default_log_level_is_info() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn default_data_dir_ends_with_lode() {
        let cfg = NodeConfig::default();
        assert!(
            cfg.data_dir.ends_with("lode"),
            "data_dir should end with 'lode': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn mining_disabled_by_default() {
        let cfg = NodeConfig::default();
        assert!(!cfg.mine);
    }

    #[test]
    fn db_path_appends_chaindata() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/lode-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/lode-test/chaindata"));
    }
}
