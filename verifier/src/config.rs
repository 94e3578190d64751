//! The verifier configuration file (TOML). Key names match the options
//! the deployment tooling has always used, hence the camelCase.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ethereum_types::Address;
use serde::Deserialize;

use crate::shards::SHARD_COUNT;

pub const DEFAULT_POW_MIN_MS: u64 = 5_000;
pub const DEFAULT_POW_MAX_MS: u64 = 12_000;
pub const DEFAULT_PRUNE_DEPTH: usize = 4;
pub const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 10_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Hex-encoded 20-byte address credited as block producer.
    pub beneficiary: String,
    /// RLP-encoded genesis block, relative to the config file.
    pub genesis_block: PathBuf,
    /// JSON account dump for the genesis state, relative to the config
    /// file.
    pub genesis_data: PathBuf,
    /// Host lists for the 16 storage shards, in shard order.
    #[serde(default)]
    pub storage: Vec<Vec<String>>,
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Lower bound of the simulated proof-of-stake delay, ms.
    #[serde(default = "default_pow_min")]
    pub pow_min: u64,
    /// Upper bound of the simulated proof-of-stake delay, ms.
    #[serde(default = "default_pow_max")]
    pub pow_max: u64,
    /// Cap on transactions gathered per block; absent means unbounded.
    pub max_tx_per_block: Option<usize>,
    /// Trie cache depth retained across prunes.
    #[serde(default = "default_prune_depth")]
    pub prune_depth: usize,
    /// Unify all per-transaction witnesses into one bag per height.
    #[serde(default)]
    pub share_bag: bool,
    /// Synthesize absent sender accounts instead of rejecting.
    #[serde(default)]
    pub generate_from_accounts: bool,
    /// Skip sender-nonce equality enforcement.
    #[serde(default)]
    pub disable_nonce_check: bool,

    /// Directory the relative paths resolve against; set at load time.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RpcConfig {
    /// How long to wait for a shard connection before failing startup,
    /// ms.
    #[serde(default = "default_storage_timeout")]
    pub storage_timeout: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            storage_timeout: DEFAULT_STORAGE_TIMEOUT_MS,
        }
    }
}

fn default_pow_min() -> u64 {
    DEFAULT_POW_MIN_MS
}

fn default_pow_max() -> u64 {
    DEFAULT_POW_MAX_MS
}

fn default_prune_depth() -> usize {
    DEFAULT_PRUNE_DEPTH
}

fn default_storage_timeout() -> u64 {
    DEFAULT_STORAGE_TIMEOUT_MS
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read config {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("unable to parse config {}", path.display()))?;
        config.config_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pow_min > self.pow_max {
            bail!("powMin ({}) exceeds powMax ({})", self.pow_min, self.pow_max);
        }
        if !self.storage.is_empty() && self.storage.len() != SHARD_COUNT {
            bail!(
                "storage must list hosts for all {} shards, got {}",
                SHARD_COUNT,
                self.storage.len()
            );
        }
        self.beneficiary()?;
        Ok(())
    }

    /// The parsed beneficiary address.
    pub fn beneficiary(&self) -> Result<Address> {
        let hex_str = self.beneficiary.trim_start_matches("0x");
        let bytes = hex::decode(hex_str).context("beneficiary is not valid hex")?;
        if bytes.len() != 20 {
            bail!("beneficiary must be 20 bytes, got {}", bytes.len());
        }
        Ok(Address::from_slice(&bytes))
    }

    pub fn genesis_block_path(&self) -> PathBuf {
        self.config_dir.join(&self.genesis_block)
    }

    pub fn genesis_data_path(&self) -> PathBuf {
        self.config_dir.join(&self.genesis_data)
    }
}
