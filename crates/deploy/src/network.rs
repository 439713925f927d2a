//! Target networks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default RPC endpoint of the local test validator.
pub const LOCALHOST_RPC_URL: &str = "http://127.0.0.1:8899";
/// Default RPC endpoint of the public devnet cluster.
pub const DEVNET_RPC_URL: &str = "https://api.devnet.solana.com";

/// A deploy destination.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    Localhost,
    Devnet,
}

impl Network {
    /// Directory the program build for this network is written to: `<root>/target/<network>`.
    pub fn deploy_dir(&self, root: &Path) -> PathBuf {
        root.join("target").join(self.to_string())
    }
}

/// RPC endpoints per network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkEndpoints {
    pub localhost: String,
    pub devnet: String,
}

impl Default for NetworkEndpoints {
    fn default() -> Self {
        Self {
            localhost: LOCALHOST_RPC_URL.to_string(),
            devnet: DEVNET_RPC_URL.to_string(),
        }
    }
}

impl NetworkEndpoints {
    pub fn rpc_url(&self, network: Network) -> &str {
        match network {
            Network::Localhost => &self.localhost,
            Network::Devnet => &self.devnet,
        }
    }
}
