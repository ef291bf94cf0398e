//! Daemon configuration (ambient stack, SPEC_FULL.md §Ambient Stack).
//!
//! Loaded from a TOML file the way the daemon's teacher-repo ancestor does:
//! `load_or_create` reads an existing file or writes network-appropriate
//! defaults the first time a node is started for a given network.
//!
//! Note: some methods appear as "dead code" in library checks because
//! they're only used by the binary (main.rs) or the CLI.

use crate::network_type::NetworkType;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[allow(dead_code)]
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("timed")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".timed")
    }
}

#[allow(dead_code)]
pub fn get_network_data_dir(network: &NetworkType) -> PathBuf {
    let base = get_data_dir();
    match network {
        NetworkType::Mainnet => base,
        NetworkType::Testnet => base.join("testnet"),
        NetworkType::Regtest => base.join("regtest"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub consensus: ConsensusConfig,
    pub settlement: SettlementConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default = "default_network")]
    pub network: String,
    /// Masternode operator key, hex-encoded 32-byte secret scalar. Absent
    /// means this node runs in observer-only mode (no block production,
    /// no finality voting).
    #[serde(default)]
    pub operator_key_hex: Option<String>,
}

fn default_network() -> String {
    "testnet".to_string()
}

impl NodeConfig {
    #[allow(dead_code)]
    pub fn network_type(&self) -> NetworkType {
        match self.network.to_lowercase().as_str() {
            "mainnet" => NetworkType::Mainnet,
            "regtest" => NetworkType::Regtest,
            _ => NetworkType::Testnet,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_address: String,
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_max_peers")]
    pub max_peers: u32,
}

fn default_max_peers() -> u32 {
    50
}

impl NetworkConfig {
    #[allow(dead_code)]
    pub fn full_listen_address(&self, network_type: &NetworkType) -> String {
        if self.listen_address.contains(':') {
            self.listen_address.clone()
        } else {
            format!("{}:{}", self.listen_address, network_type.default_p2p_port())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Extra wall-clock delay (seconds) a high-availability secondary adds
    /// before attempting production, so a primary sharing the same operator
    /// key gets first chance at the slot.
    #[serde(default)]
    pub ha_production_delay_secs: i64,
    /// Skip the mint/burn-claim validation path entirely (regtest-only
    /// convenience; never set on mainnet/testnet).
    #[serde(default)]
    pub skip_mint_validation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    #[serde(default)]
    pub force_rebuild_from_chain: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig {
                name: "timed-node".to_string(),
                network: "testnet".to_string(),
                operator_key_hex: None,
            },
            network: NetworkConfig {
                listen_address: "0.0.0.0".to_string(),
                bootstrap_peers: vec![],
                max_peers: default_max_peers(),
            },
            storage: StorageConfig {
                data_dir: String::new(),
            },
            consensus: ConsensusConfig {
                ha_production_delay_secs: 0,
                skip_mint_validation: false,
            },
            settlement: SettlementConfig {
                force_rebuild_from_chain: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                file_path: None,
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn load_or_create(path: &str, network_type: &NetworkType) -> Result<Self, Box<dyn std::error::Error>> {
        let data_dir = get_network_data_dir(network_type);
        fs::create_dir_all(&data_dir)?;

        if fs::metadata(path).is_ok() {
            let mut config = Self::load_from_file(path)?;
            if config.storage.data_dir.is_empty() {
                config.storage.data_dir = data_dir.to_string_lossy().to_string();
            }
            Ok(config)
        } else {
            let mut config = Self::default();
            config.node.network = match network_type {
                NetworkType::Mainnet => "mainnet".to_string(),
                NetworkType::Testnet => "testnet".to_string(),
                NetworkType::Regtest => "regtest".to_string(),
            };
            config.storage.data_dir = data_dir.to_string_lossy().to_string();
            config.save_to_file(path)?;
            Ok(config)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.node.name, config.node.name);
    }

    #[test]
    fn load_or_create_writes_then_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();
        let created = Config::load_or_create(path_str, &NetworkType::Testnet).unwrap();
        assert_eq!(created.node.network, "testnet");
        let reloaded = Config::load_or_create(path_str, &NetworkType::Testnet).unwrap();
        assert_eq!(reloaded.node.network, created.node.network);
    }
}
