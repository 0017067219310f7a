//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use bitnode_consensus::Network;
use bitnode_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network (mainnet, testnet, regtest).
    #[serde(default)]
    pub network: Network,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Sync tuning.
    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let network = args
            .network
            .as_deref()
            .map(str::parse::<Network>)
            .transpose()
            .context("Invalid --network")?;

        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default_for_network(network.unwrap_or_default())
        };

        // Override with CLI args
        if let Some(network) = network {
            config.network = network;
        }
        if let Some(ref data_dir) = args.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(ref level) = args.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    /// Create default config for a network.
    pub fn default_for_network(network: Network) -> Self {
        let data_dir = match network {
            Network::Mainnet => PathBuf::from(".bitnode"),
            Network::Testnet => PathBuf::from(".bitnode-testnet"),
            Network::Regtest => PathBuf::from(".bitnode-regtest"),
        };

        Self {
            network,
            data_dir,
            log_level: default_log_level(),
            sync: SyncConfig::default(),
        }
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default_for_network(Network::Mainnet);
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.sync, SyncConfig::default());
    }

    #[test]
    fn test_testnet_config() {
        let config = NodeConfig::default_for_network(Network::Testnet);
        assert!(config.data_dir.to_string_lossy().contains("testnet"));
    }

    #[test]
    fn test_file_then_cli_overrides() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bitnode.toml");
        std::fs::write(
            &path,
            "network = \"testnet\"\ndata_dir = \"/srv/chain\"\n\n[sync]\nblock_batch_size = 8\n",
        )
        .unwrap();

        let args = Args::parse_from(["bitnode", "--log-level", "debug", "info"]);
        let config = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.data_dir, PathBuf::from("/srv/chain"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.sync.block_batch_size, 8);
        assert_eq!(config.sync.solo_block_lookahead, 20);

        let args = Args::parse_from(["bitnode", "--network", "regtest", "info"]);
        let config = NodeConfig::load(&path, &args).unwrap();
        assert_eq!(config.network, Network::Regtest);
    }

    #[test]
    fn test_missing_file_uses_network_defaults() {
        let tmp = TempDir::new().unwrap();
        let args = Args::parse_from(["bitnode", "--network", "regtest", "info"]);
        let config = NodeConfig::load(&tmp.path().join("absent.toml"), &args).unwrap();
        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.data_dir, PathBuf::from(".bitnode-regtest"));

        let saved = tmp.path().join("saved.toml");
        config.save(&saved).unwrap();
        let reloaded = NodeConfig::load(&saved, &Args::parse_from(["bitnode", "info"])).unwrap();
        assert_eq!(reloaded.data_dir, config.data_dir);
    }
}
