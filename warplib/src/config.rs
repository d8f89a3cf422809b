//! Wallet configuration

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use warp_sync::sync::{SyncOptions, BATCH_SIZE, CHECKPOINT_INTERVAL, MAX_CHECKPOINTS};

pub use crate::wallet::fees::FeeRule;
pub use warp_sync::keys::address::ChainType;

/// Default number of blocks between the chain tip and the anchor of new transactions
pub const DEFAULT_ANCHOR_OFFSET: u32 = 3;
/// Default number of blocks after which an unmined transaction expires
pub const DEFAULT_EXPIRY_DELTA: u32 = 40;
/// Default interval between mempool polls
pub const DEFAULT_MEMPOOL_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// File name of a persisted wallet
pub const WALLET_NAME: &str = "warp-wallet.json";

/// Errors associated with loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the file
    #[error("failed to read config. {0}")]
    Io(#[from] io::Error),
    /// File is not a valid configuration
    #[error("failed to parse config. {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration of a wallet instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Chain the wallet operates on
    pub chain: ChainType,
    /// Blocks per fetch
    pub batch_size: u32,
    /// Block interval between checkpoints
    pub checkpoint_interval: u32,
    /// Checkpoints retained for re-org recovery
    pub max_checkpoints: usize,
    /// Fee rule used by the transaction planner
    pub fee_rule: FeeRule,
    /// Anchor offset used when the caller does not specify one
    pub default_anchor_offset: u32,
    /// Blocks after the current height until a new transaction expires
    pub expiry_delta: u32,
    /// Interval between mempool polls
    pub mempool_poll_interval: Duration,
    /// Directory the wallet is persisted to. The wallet is kept in memory only if not set.
    pub wallet_dir: Option<PathBuf>,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            chain: ChainType::default(),
            batch_size: BATCH_SIZE,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            max_checkpoints: MAX_CHECKPOINTS,
            fee_rule: FeeRule::default(),
            default_anchor_offset: DEFAULT_ANCHOR_OFFSET,
            expiry_delta: DEFAULT_EXPIRY_DELTA,
            mempool_poll_interval: DEFAULT_MEMPOOL_POLL_INTERVAL,
            wallet_dir: None,
        }
    }
}

impl WalletConfig {
    /// Loads a configuration from a JSON file. Missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path)?;

        Ok(serde_json::from_reader(io::BufReader::new(file))?)
    }

    /// Sets the chain
    pub fn with_chain(mut self, chain: ChainType) -> Self {
        self.chain = chain;
        self
    }

    /// Sets the number of blocks per fetch
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the block interval between checkpoints
    pub fn with_checkpoint_interval(mut self, checkpoint_interval: u32) -> Self {
        self.checkpoint_interval = checkpoint_interval;
        self
    }

    /// Sets the number of retained checkpoints
    pub fn with_max_checkpoints(mut self, max_checkpoints: usize) -> Self {
        self.max_checkpoints = max_checkpoints;
        self
    }

    /// Sets the fee rule
    pub fn with_fee_rule(mut self, fee_rule: FeeRule) -> Self {
        self.fee_rule = fee_rule;
        self
    }

    /// Sets the default anchor offset
    pub fn with_default_anchor_offset(mut self, anchor_offset: u32) -> Self {
        self.default_anchor_offset = anchor_offset;
        self
    }

    /// Sets the expiry delta of new transactions
    pub fn with_expiry_delta(mut self, expiry_delta: u32) -> Self {
        self.expiry_delta = expiry_delta;
        self
    }

    /// Sets the mempool poll interval
    pub fn with_mempool_poll_interval(mut self, interval: Duration) -> Self {
        self.mempool_poll_interval = interval;
        self
    }

    /// Sets the persistence directory
    pub fn with_wallet_dir(mut self, wallet_dir: impl Into<PathBuf>) -> Self {
        self.wallet_dir = Some(wallet_dir.into());
        self
    }

    /// Path of the persisted wallet file, if persistence is enabled.
    pub fn wallet_path(&self) -> Option<PathBuf> {
        self.wallet_dir.as_ref().map(|dir| dir.join(WALLET_NAME))
    }

    /// Sync options with the batch and checkpoint parameters of this configuration.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            batch_size: self.batch_size,
            checkpoint_interval: self.checkpoint_interval,
            max_checkpoints: self.max_checkpoints,
            ..Default::default()
        }
    }
}

/// Default directory for persisted wallets of the given chain.
pub fn default_wallet_dir(chain: ChainType) -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("warp").join(chain.to_string()))
}

/// Installs a `tracing` subscriber writing to stdout, filtered by `RUST_LOG` with `info` as the default level.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
