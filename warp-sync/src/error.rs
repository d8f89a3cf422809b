//! Sync error types

use std::fmt::Debug;

use crate::client::ClientError;
use crate::primitives::{BlockHash, BlockHeight};
use crate::witness::TreeError;

/// Errors associated with a sync invocation
#[derive(Debug, thiserror::Error)]
pub enum SyncError<E: Debug> {
    /// Network or server fault. The caller may retry, sync resumes from the last checkpoint.
    #[error("data source unavailable. {0}")]
    DataSourceUnavailable(#[from] ClientError),
    /// No checkpoint matches the block source's chain
    #[error("chain fork below the oldest checkpoint at height {0}")]
    ChainFork(BlockHeight),
    /// Sync was cancelled by the caller
    #[error("sync cancelled")]
    Cancelled,
    /// Wallet state is inconsistent with the chain. Requires a full rescan.
    #[error("corrupt checkpoint. {0}")]
    CorruptCheckpoint(String),
    /// Block data could not be scanned
    #[error("scan error. {0}")]
    ScanError(#[from] ScanError),
    /// Commitment tree error
    #[error("commitment tree error. {0}")]
    TreeError(#[from] TreeError),
    /// Error from the wallet while reading or writing sync data
    #[error("wallet error. {0:?}")]
    WalletError(E),
}

/// Errors associated with scanning block data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    /// Block does not connect to the previous block
    #[error(
        "continuity error. block at height {height} has prev hash {prev_hash} but previous block has hash {expected}"
    )]
    ContinuityError {
        /// Height of the block that failed to connect
        height: BlockHeight,
        /// Previous block hash recorded in the block
        prev_hash: BlockHash,
        /// Hash of the previous block known to the wallet
        expected: BlockHash,
    },
    /// Block source returned a block at an unexpected height
    #[error("expected block at height {expected} but received height {received}")]
    UnexpectedHeight {
        /// Height that was requested next
        expected: BlockHeight,
        /// Height that was received
        received: BlockHeight,
    },
}
