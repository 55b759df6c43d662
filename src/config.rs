//! Node configuration
//!
//! Consensus tunables that differ between networks live in [`ChainParams`];
//! everything about the local process lives in [`NodeConfig`]. Both load
//! from TOML and fall back to defaults for missing fields.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::consensus::{normalize, Target};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Network-wide consensus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    /// Largest accepted serialized block, in bytes
    pub max_block_size: usize,
    /// Blocks between difficulty retargets
    pub difficulty_adjustment_span: u32,
    /// Desired seconds between blocks
    pub target_time_per_block: u64,
    /// Bound on how far one retarget may move the target
    pub difficulty_change_ratio_limit: u64,
    /// Number of preceding blocks whose median bounds a new timestamp
    pub blocks_clock_check: u32,
    /// Reward is the SUPPLY balance divided by this
    pub reward_division: u64,
    /// Easiest acceptable target
    #[serde(with = "hex_target")]
    pub minimum_target: Target,
    /// Depth of the history query
    pub query_max_blocks: u32,
}

impl Default for ChainParams {
    fn default() -> Self {
        let mut minimum_target = [0u8; 32];
        minimum_target[2..5].copy_from_slice(&[0xff, 0xff, 0xff]);
        Self {
            max_block_size: 1_048_576,
            difficulty_adjustment_span: 128,
            target_time_per_block: 60,
            difficulty_change_ratio_limit: 4,
            blocks_clock_check: 16,
            reward_division: 2_000_000,
            minimum_target,
            query_max_blocks: 1000,
        }
    }
}

impl ChainParams {
    /// Local development network: nearly every hash meets the floor
    pub fn devnet() -> Self {
        let mut minimum_target = [0u8; 32];
        minimum_target[..3].copy_from_slice(&[0xff, 0xff, 0xff]);
        Self {
            minimum_target,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty_adjustment_span == 0 {
            return Err(ConfigError::Invalid("difficulty_adjustment_span cannot be 0".into()));
        }
        if self.target_time_per_block == 0 {
            return Err(ConfigError::Invalid("target_time_per_block cannot be 0".into()));
        }
        if self.difficulty_change_ratio_limit == 0 {
            return Err(ConfigError::Invalid("difficulty_change_ratio_limit cannot be 0".into()));
        }
        if self.reward_division == 0 {
            return Err(ConfigError::Invalid("reward_division cannot be 0".into()));
        }
        if normalize(&self.minimum_target) != self.minimum_target {
            return Err(ConfigError::Invalid(
                "minimum_target must keep at most 3 significant bytes".into(),
            ));
        }
        Ok(())
    }
}

/// Local node settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Directory of the sled ledger
    pub data_dir: PathBuf,
    /// Address credited by locally mined blocks; mining is off without one
    pub miner_address: Option<String>,
    /// Mining worker threads, 0 for one per core
    pub mining_threads: usize,
    /// Consensus parameters
    pub chain: ChainParams,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            miner_address: None,
            mining_threads: 0,
            chain: ChainParams::default(),
        }
    }
}

impl NodeConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(contents)?;
        config.chain.validate()?;
        Ok(config)
    }
}

mod hex_target {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::consensus::Target;

    pub fn serialize<S: Serializer>(target: &Target, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(target))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Target, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("target must be 32 bytes"))
    }
}
