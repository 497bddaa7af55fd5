//! Layered node configuration: a TOML file under the configured data
//! directory (or `--config`), overridable by `SOLE_*` environment
//! variables, deserialized straight into the same config structs each
//! crate already exposes. Missing keys fall back to that crate's own
//! `Default`, so a brand-new node can start from an empty or absent file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_api::ApiConfig;
use sole_consensus::ConsensusParams;
use sole_mining::MiningConfig;
use sole_network::NetworkConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("sole-data")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for the chain database, node identity, and wallet
    /// file; everything else under it is a fixed filename.
    pub data_dir: PathBuf,
    pub network: NetworkConfig,
    pub api: ApiConfig,
    pub mining: MiningConfig,
    pub consensus: ConsensusParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: default_data_dir(),
            network: NetworkConfig::default(),
            api: ApiConfig::default(),
            mining: MiningConfig::default(),
            consensus: ConsensusParams::default(),
        }
    }
}

impl NodeConfig {
    /// Loads `path` (if present) layered under environment overrides
    /// prefixed `SOLE_` (nested fields separated by `__`, e.g.
    /// `SOLE_NETWORK__LISTEN_ADDR`). A missing file is not an error — the
    /// result is just `NodeConfig::default()` with any env overrides
    /// applied.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("SOLE").separator("__"));
        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn chain_dir(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_dir.join("identity.key")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }
}
