//! Module for reading and updating the fields of [`crate::primitives::SyncState`] which tracks the wallet's checkpoints
//! and for rolling back wallet data to a checkpoint.

use tokio::sync::mpsc;

use crate::client::{self, FetchRequest};
use crate::error::SyncError;
use crate::primitives::{BlockHeight, BlockId, Checkpoint, ShieldedProtocol};
use crate::traits::{SyncCommitmentTrees, SyncNotes, SyncTransactions, SyncWallet};
use crate::witness::CommitmentTrees;

use super::spend;

/// Returns the latest checkpoint of the wallet, the resume point for sync.
pub(super) fn last_checkpoint<W>(wallet: &W) -> Result<BlockId, SyncError<W::Error>>
where
    W: SyncWallet,
{
    wallet
        .get_sync_state()
        .map_err(SyncError::WalletError)?
        .last_checkpoint()
        .map(Checkpoint::block_id)
        .ok_or_else(|| SyncError::CorruptCheckpoint("wallet has no checkpoints".to_string()))
}

/// Creates the first checkpoint from the tree state of the block before the wallet birthday.
///
/// Does nothing if the wallet already has a checkpoint.
pub(super) async fn initialize_sync_state<W>(
    fetch_request_sender: &mpsc::UnboundedSender<FetchRequest>,
    wallet: &mut W,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncCommitmentTrees,
{
    if wallet
        .get_sync_state()
        .map_err(SyncError::WalletError)?
        .last_checkpoint()
        .is_some()
    {
        return Ok(());
    }

    let birthday = wallet.get_birthday().map_err(SyncError::WalletError)?;
    let start_height = birthday.saturating_sub(1);
    tracing::info!("Initializing sync state at height {}.", start_height);
    let tree_state = client::get_tree_state(fetch_request_sender, start_height).await?;

    let mut trees = CommitmentTrees::from_tree_state(&tree_state);
    trees.checkpoint(tree_state.height)?;
    let checkpoint = Checkpoint::from_parts(
        BlockId {
            height: tree_state.height,
            hash: tree_state.hash,
        },
        tree_state.time,
        trees.size(ShieldedProtocol::Sapling),
        trees.size(ShieldedProtocol::Orchard),
        Default::default(),
    );

    *wallet
        .get_commitment_trees_mut()
        .map_err(SyncError::WalletError)? = trees;
    wallet
        .get_sync_state_mut()
        .map_err(SyncError::WalletError)?
        .checkpoints_mut()
        .insert(checkpoint.height(), checkpoint);

    Ok(())
}

/// Verifies the wallet's checkpoints against the block source.
///
/// Walks back from the latest checkpoint to the highest checkpoint whose block hash still matches the block source and
/// rewinds the wallet to it. Checkpoints above the chain tip are treated as re-orged. Returns the height the wallet
/// was rewound to, or `None` if the latest checkpoint is still valid.
pub(super) async fn verify_checkpoints<W>(
    fetch_request_sender: &mpsc::UnboundedSender<FetchRequest>,
    wallet: &mut W,
    chain_tip: BlockId,
) -> Result<Option<BlockHeight>, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let checkpoints: Vec<BlockId> = wallet
        .get_sync_state()
        .map_err(SyncError::WalletError)?
        .checkpoints()
        .values()
        .rev()
        .map(Checkpoint::block_id)
        .collect();
    let latest_height = checkpoints
        .first()
        .map(|checkpoint| checkpoint.height)
        .ok_or_else(|| SyncError::CorruptCheckpoint("wallet has no checkpoints".to_string()))?;

    for checkpoint in &checkpoints {
        if checkpoint.height > chain_tip.height {
            continue;
        }
        let hash = if checkpoint.height == chain_tip.height {
            chain_tip.hash
        } else {
            let range = checkpoint.height..checkpoint.height + 1;
            match client::get_compact_block_range(fetch_request_sender, range)
                .await?
                .first()
            {
                Some(block) => block.hash,
                None => continue,
            }
        };
        if hash != checkpoint.hash {
            continue;
        }

        if checkpoint.height == latest_height {
            return Ok(None);
        }
        tracing::warn!(
            "Re-org detected. Rewinding wallet from height {} to checkpoint at height {}.",
            latest_height,
            checkpoint.height
        );
        truncate_wallet_data(wallet, checkpoint.height)?;
        return Ok(Some(checkpoint.height));
    }

    let oldest_height = checkpoints
        .last()
        .map_or(latest_height, |checkpoint| checkpoint.height);

    Err(SyncError::ChainFork(oldest_height))
}

/// Creates a checkpoint at the end of the block `block_id`, prunes the oldest checkpoints beyond `max_checkpoints` and
/// commits the batch to the wallet.
pub(super) fn create_checkpoint<W>(
    wallet: &mut W,
    block_id: BlockId,
    time: u32,
    max_checkpoints: usize,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncCommitmentTrees,
{
    spend::expire_pending_spends(
        wallet.get_notes_mut().map_err(SyncError::WalletError)?,
        block_id.height,
    );

    let trees = wallet
        .get_commitment_trees_mut()
        .map_err(SyncError::WalletError)?;
    trees.checkpoint(block_id.height)?;
    let sapling_tree_size = trees.size(ShieldedProtocol::Sapling);
    let orchard_tree_size = trees.size(ShieldedProtocol::Orchard);

    let balances = wallet
        .get_confirmed_balances()
        .map_err(SyncError::WalletError)?;
    let checkpoint = Checkpoint::from_parts(
        block_id,
        time,
        sapling_tree_size,
        orchard_tree_size,
        balances,
    );

    let checkpoints = wallet
        .get_sync_state_mut()
        .map_err(SyncError::WalletError)?
        .checkpoints_mut();
    checkpoints.insert(block_id.height, checkpoint);
    let mut pruned = Vec::new();
    while checkpoints.len() > max_checkpoints.max(1) {
        if let Some((height, _)) = checkpoints.pop_first() {
            pruned.push(height);
        }
    }

    let trees = wallet
        .get_commitment_trees_mut()
        .map_err(SyncError::WalletError)?;
    for height in pruned {
        trees.remove_checkpoint(height);
    }
    tracing::debug!("Checkpoint created at height {}.", block_id.height);

    wallet.commit_batch().map_err(SyncError::WalletError)
}

/// Removes all wallet data above the given `truncate_height`.
///
/// `truncate_height` must be the height of a checkpoint. Notes received above it are dropped and spends above it are
/// reverted.
pub fn truncate_wallet_data<W>(
    wallet: &mut W,
    truncate_height: BlockHeight,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    wallet
        .get_commitment_trees_mut()
        .map_err(SyncError::WalletError)?
        .rewind_to_checkpoint(truncate_height)?;
    wallet
        .get_sync_state_mut()
        .map_err(SyncError::WalletError)?
        .checkpoints_mut()
        .retain(|height, _| *height <= truncate_height);
    wallet
        .truncate_notes(truncate_height)
        .map_err(SyncError::WalletError)?;
    wallet
        .truncate_wallet_transactions(truncate_height)
        .map_err(SyncError::WalletError)
}

/// Discards the effects of blocks applied since the latest checkpoint.
pub(super) fn rewind_to_last_checkpoint<W>(wallet: &mut W) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let checkpoint = last_checkpoint(wallet)?;
    truncate_wallet_data(wallet, checkpoint.height)
}

/// Rewinds the wallet to the highest checkpoint at or below `height` and returns the checkpoint height.
pub fn rewind_to<W>(wallet: &mut W, height: BlockHeight) -> Result<BlockHeight, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let checkpoint_height = wallet
        .get_sync_state()
        .map_err(SyncError::WalletError)?
        .checkpoint_at_or_below(height)
        .map(Checkpoint::height)
        .ok_or_else(|| {
            SyncError::CorruptCheckpoint(format!("no checkpoint at or below height {height}"))
        })?;
    truncate_wallet_data(wallet, checkpoint_height)?;

    Ok(checkpoint_height)
}

/// Rewinds the wallet so the next sync scans again from `height`.
///
/// If no checkpoint exists below `height` all sync data is cleared and the next sync starts from the wallet birthday.
pub fn rescan_from<W>(wallet: &mut W, height: BlockHeight) -> Result<BlockHeight, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let has_checkpoint = wallet
        .get_sync_state()
        .map_err(SyncError::WalletError)?
        .checkpoint_at_or_below(height.saturating_sub(1))
        .is_some();
    if has_checkpoint {
        return rewind_to(wallet, height.saturating_sub(1));
    }

    tracing::info!("Clearing sync data for full rescan.");
    reset_wallet_data(wallet)?;
    let birthday = wallet.get_birthday().map_err(SyncError::WalletError)?;

    Ok(birthday.saturating_sub(1))
}

/// Clears all sync data. The next sync starts from the wallet birthday.
pub fn reset_wallet_data<W>(wallet: &mut W) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    wallet
        .get_sync_state_mut()
        .map_err(SyncError::WalletError)?
        .checkpoints_mut()
        .clear();
    *wallet
        .get_commitment_trees_mut()
        .map_err(SyncError::WalletError)? = CommitmentTrees::default();
    wallet
        .get_notes_mut()
        .map_err(SyncError::WalletError)?
        .clear();
    wallet
        .get_wallet_transactions_mut()
        .map_err(SyncError::WalletError)?
        .clear();

    Ok(())
}
