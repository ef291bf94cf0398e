//! Network type definitions.
//!
//! Note: Some methods appear as "dead code" in library checks because they're
//! only used by the binary (main.rs) or by the CLI.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Copy, PartialEq, Eq, Hash)]
pub enum NetworkType {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkType {
    #[allow(dead_code)]
    pub fn magic_bytes(&self) -> [u8; 4] {
        match self {
            NetworkType::Mainnet => [0xC0, 0x1D, 0x7E, 0x4D],
            NetworkType::Testnet => [0x54, 0x45, 0x53, 0x54], // "TEST"
            NetworkType::Regtest => [0x52, 0x45, 0x47, 0x54], // "REGT"
        }
    }

    pub fn default_p2p_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 24000,
            NetworkType::Testnet => 24100,
            NetworkType::Regtest => 24200,
        }
    }

    #[allow(dead_code)]
    pub fn default_rpc_port(&self) -> u16 {
        match self {
            NetworkType::Mainnet => 24001,
            NetworkType::Testnet => 24101,
            NetworkType::Regtest => 24201,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkType::Mainnet => write!(f, "Mainnet"),
            NetworkType::Testnet => write!(f, "Testnet"),
            NetworkType::Regtest => write!(f, "Regtest"),
        }
    }
}

impl std::str::FromStr for NetworkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(format!("unknown network type: {other}")),
        }
    }
}
