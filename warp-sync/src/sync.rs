//! Entrypoint for sync engine

use std::cmp;
use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{self, fetch::fetch, BlockSource, ClientError, FetchRequest};
use crate::error::{ScanError, SyncError};
use crate::note_encryption::try_memo_decryption;
use crate::primitives::{
    AccountId, BlockHeight, BlockId, CompactBlock, NoteData, NoteId, ShieldedProtocol, TxId,
    WalletNote, WalletTransaction,
};
use crate::scan::{blocks_within_budget, trial_decrypt_batch, DecryptedBlock, ScanningKeys};
use crate::traits::{SyncCommitmentTrees, SyncNotes, SyncTransactions, SyncWallet};

use spend::SpendIndex;

pub(crate) mod spend;
pub mod state;
mod transparent;

pub use state::{rescan_from, reset_wallet_data, rewind_to, truncate_wallet_data};

/// Default number of blocks fetched and trial decrypted per batch
pub const BATCH_SIZE: u32 = 100;
/// Default block interval between checkpoints
pub const CHECKPOINT_INTERVAL: u32 = 100;
/// Default number of checkpoints retained for re-org recovery
pub const MAX_CHECKPOINTS: usize = 20;
// a continuity error while scanning is retried after verifying checkpoints against the new chain
const MAX_CONTINUITY_RETRIES: u32 = 3;

/// Callback receiving sync progress after each processed block
pub type ProgressCallback = Arc<dyn Fn(SyncProgress) + Send + Sync>;

/// Progress of a sync invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncProgress {
    /// Last processed block
    pub height: BlockHeight,
    /// Height the current pass is scanning to
    pub target: BlockHeight,
    /// Cost consumed by this invocation
    pub cost: u64,
}

/// Parameters of a single sync invocation
#[derive(Clone)]
pub struct SyncOptions {
    /// Height to sync to. Defaults to the chain tip and is capped at the chain tip.
    pub target: Option<BlockHeight>,
    /// Trial decryption cost after which sync yields with partial progress saved
    pub cost_budget: Option<u64>,
    /// Fetch full transactions of received notes and decrypt their memos
    pub get_tx_detail: bool,
    /// If non-zero, sync first to `target - anchor_offset` so a checkpoint exists at the anchor height
    pub anchor_offset: u32,
    /// Blocks per fetch
    pub batch_size: u32,
    /// Block interval between checkpoints. A checkpoint is also created at the end of every batch.
    pub checkpoint_interval: u32,
    /// Checkpoints retained for re-org recovery
    pub max_checkpoints: usize,
    /// Cooperative cancellation, checked between blocks
    pub cancel: CancellationToken,
    /// Progress callback
    pub progress: Option<ProgressCallback>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            target: None,
            cost_budget: None,
            get_tx_detail: false,
            anchor_offset: 0,
            batch_size: BATCH_SIZE,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            max_checkpoints: MAX_CHECKPOINTS,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }
}

impl std::fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOptions")
            .field("target", &self.target)
            .field("cost_budget", &self.cost_budget)
            .field("get_tx_detail", &self.get_tx_detail)
            .field("anchor_offset", &self.anchor_offset)
            .field("batch_size", &self.batch_size)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .field("max_checkpoints", &self.max_checkpoints)
            .finish_non_exhaustive()
    }
}

/// Result of a sync invocation that was not cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncResult {
    /// Height of the latest checkpoint
    pub height: BlockHeight,
    /// False if the cost budget was exhausted before the target was reached
    pub complete: bool,
    /// Cost consumed by this invocation
    pub cost: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanOutcome {
    Complete,
    BudgetExhausted,
    Cancelled,
}

// memo of a received note, decrypted from the full transaction after the block is applied
#[derive(Debug, Clone, Copy)]
struct MemoRequest {
    txid: TxId,
    output_index: usize,
    note_id: NoteId,
    account_id: AccountId,
    protocol: ShieldedProtocol,
}

struct Scanner<'a> {
    fetch_request_sender: &'a mpsc::UnboundedSender<FetchRequest>,
    options: &'a SyncOptions,
    keys: ScanningKeys,
    cost: u64,
    blocks_processed: u64,
}

impl Scanner<'_> {
    // at least one block is processed per invocation so sync always progresses
    fn budget_exhausted(&self) -> bool {
        self.blocks_processed > 0
            && self
                .options
                .cost_budget
                .is_some_and(|budget| self.cost >= budget)
    }

    fn blocks_within_budget(&self, blocks: &[CompactBlock]) -> usize {
        blocks_within_budget(
            blocks,
            &self.keys,
            self.cost,
            self.blocks_processed,
            self.options.cost_budget,
        )
    }
}

/// Syncs a wallet to the latest state of the blockchain
///
/// Resumes from the wallet's latest checkpoint. Checkpoints are verified against the block source first and the
/// wallet is rewound to the highest checkpoint still on the best chain.
pub async fn sync<S, W>(
    source: Arc<S>,
    wallet: &mut W,
    options: SyncOptions,
) -> Result<SyncResult, SyncError<W::Error>>
where
    S: BlockSource,
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    tracing::info!("Syncing wallet...");

    // create channel for sending fetch requests and launch fetcher task
    let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
    let fetcher_handle = tokio::spawn(fetch(fetch_request_receiver, source));

    let result = sync_inner(&fetch_request_sender, wallet, &options).await;

    drop(fetch_request_sender);
    if let Err(e) = fetcher_handle.await {
        tracing::warn!("Fetch task failed. {}", e);
    }

    match &result {
        Ok(sync_result) if sync_result.complete => {
            tracing::info!("Sync complete at height {}.", sync_result.height)
        }
        Ok(sync_result) => tracing::info!(
            "Cost budget exhausted. Sync paused at height {}.",
            sync_result.height
        ),
        Err(SyncError::Cancelled) => tracing::info!("Sync cancelled."),
        Err(e) => tracing::warn!("Sync failed. {}", e),
    }

    result
}

async fn sync_inner<W>(
    fetch_request_sender: &mpsc::UnboundedSender<FetchRequest>,
    wallet: &mut W,
    options: &SyncOptions,
) -> Result<SyncResult, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let chain_tip = client::get_chain_tip(fetch_request_sender).await?;
    state::initialize_sync_state(fetch_request_sender, wallet).await?;
    state::verify_checkpoints(fetch_request_sender, wallet, chain_tip).await?;

    let ufvks = wallet
        .get_unified_full_viewing_keys()
        .map_err(SyncError::WalletError)?;
    let transparent_addresses = wallet
        .get_transparent_addresses()
        .map_err(SyncError::WalletError)?;
    let keys =
        ScanningKeys::from_account_ufvks(&ufvks).with_transparent_addresses(transparent_addresses);

    let target = options
        .target
        .map_or(chain_tip.height, |target| cmp::min(target, chain_tip.height));
    let wallet_height = state::last_checkpoint(wallet)?.height;
    let anchor_height = target.saturating_sub(options.anchor_offset);
    let mut pass_targets = Vec::with_capacity(2);
    if options.anchor_offset > 0 && anchor_height > wallet_height && anchor_height < target {
        pass_targets.push(anchor_height);
    }
    pass_targets.push(target);

    let mut scanner = Scanner {
        fetch_request_sender,
        options,
        keys,
        cost: 0,
        blocks_processed: 0,
    };
    for pass_target in pass_targets {
        tracing::debug!("Scanning to height {}.", pass_target);
        match scan_to(&mut scanner, wallet, pass_target).await? {
            ScanOutcome::Complete => (),
            ScanOutcome::BudgetExhausted => {
                return Ok(SyncResult {
                    height: state::last_checkpoint(wallet)?.height,
                    complete: false,
                    cost: scanner.cost,
                })
            }
            ScanOutcome::Cancelled => return Err(SyncError::Cancelled),
        }
    }

    Ok(SyncResult {
        height: state::last_checkpoint(wallet)?.height,
        complete: true,
        cost: scanner.cost,
    })
}

// scans batches from the latest checkpoint until `target` is checkpointed
async fn scan_to<W>(
    scanner: &mut Scanner<'_>,
    wallet: &mut W,
    mut target: BlockHeight,
) -> Result<ScanOutcome, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let mut continuity_retries = 0;

    loop {
        let previous_block = state::last_checkpoint(wallet)?;
        if previous_block.height >= target {
            return Ok(ScanOutcome::Complete);
        }
        if scanner.budget_exhausted() {
            tracing::info!(
                "Cost budget exhausted after height {}.",
                previous_block.height
            );
            return Ok(ScanOutcome::BudgetExhausted);
        }

        let start_height = previous_block.height + 1;
        let end_height = cmp::min(start_height + scanner.options.batch_size.max(1), target + 1);
        let blocks = client::get_compact_block_range(
            scanner.fetch_request_sender,
            start_height..end_height,
        )
        .await?;
        if blocks.is_empty() {
            return Err(SyncError::DataSourceUnavailable(ClientError::NotFound(
                format!("compact blocks {}..{}", start_height, end_height),
            )));
        }
        tracing::debug!(
            "Fetched {} blocks from height {}.",
            blocks.len(),
            start_height
        );
        let affordable = scanner.blocks_within_budget(&blocks);
        let blocks = &blocks[..affordable];
        let decrypted_blocks = trial_decrypt_batch(blocks, &scanner.keys);

        match scan_batch(
            scanner,
            wallet,
            previous_block,
            blocks,
            decrypted_blocks,
            target,
        )
        .await
        {
            Ok(ScanOutcome::Complete) => continuity_retries = 0,
            Ok(outcome) => return Ok(outcome),
            Err(e) => {
                // discard blocks applied since the last checkpoint
                state::rewind_to_last_checkpoint(wallet)?;
                match e {
                    SyncError::ScanError(ScanError::ContinuityError { height, .. })
                        if continuity_retries < MAX_CONTINUITY_RETRIES =>
                    {
                        continuity_retries += 1;
                        tracing::warn!("Re-org detected at height {}.", height);
                        let chain_tip = client::get_chain_tip(scanner.fetch_request_sender).await?;
                        state::verify_checkpoints(scanner.fetch_request_sender, wallet, chain_tip)
                            .await?;
                        target = cmp::min(target, chain_tip.height);
                    }
                    e => return Err(e),
                }
            }
        }
    }
}

// applies a batch of blocks in order. the last applied block is always checkpointed before returning `Ok`.
async fn scan_batch<W>(
    scanner: &mut Scanner<'_>,
    wallet: &mut W,
    mut previous_block: BlockId,
    blocks: &[CompactBlock],
    decrypted_blocks: Vec<DecryptedBlock>,
    target: BlockHeight,
) -> Result<ScanOutcome, SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    let mut spend_index =
        SpendIndex::from_notes(wallet.get_notes().map_err(SyncError::WalletError)?);
    let mut memo_requests = Vec::new();
    let mut unsaved_block_time = None;
    let mut outcome = ScanOutcome::Complete;
    let checkpoint_interval = scanner.options.checkpoint_interval.max(1);

    for (block, decrypted_block) in blocks.iter().zip(decrypted_blocks) {
        if scanner.options.cancel.is_cancelled() {
            tracing::info!("Sync cancelled after height {}.", previous_block.height);
            outcome = ScanOutcome::Cancelled;
            break;
        }
        if scanner.budget_exhausted() {
            tracing::info!(
                "Cost budget exhausted after height {}.",
                previous_block.height
            );
            outcome = ScanOutcome::BudgetExhausted;
            break;
        }

        let expected_height = previous_block.height + 1;
        if block.height != expected_height {
            return Err(ScanError::UnexpectedHeight {
                expected: expected_height,
                received: block.height,
            }
            .into());
        }
        if block.prev_hash != previous_block.hash {
            return Err(ScanError::ContinuityError {
                height: block.height,
                prev_hash: block.prev_hash,
                expected: previous_block.hash,
            }
            .into());
        }

        apply_block(
            wallet,
            block,
            &decrypted_block,
            &scanner.keys,
            &mut spend_index,
            &mut memo_requests,
            scanner.options.get_tx_detail,
        )?;
        scanner.cost += decrypted_block.cost;
        scanner.blocks_processed += 1;
        previous_block = block.block_id();
        unsaved_block_time = Some(block.time);

        if let Some(progress) = &scanner.options.progress {
            progress(SyncProgress {
                height: block.height,
                target,
                cost: scanner.cost,
            });
        }

        if u32::from(block.height) % checkpoint_interval == 0 || block.height == target {
            save_checkpoint(scanner, wallet, previous_block, block.time, &mut memo_requests)
                .await?;
            unsaved_block_time = None;
        }
    }

    if let Some(time) = unsaved_block_time {
        save_checkpoint(scanner, wallet, previous_block, time, &mut memo_requests).await?;
    }

    Ok(outcome)
}

async fn save_checkpoint<W>(
    scanner: &Scanner<'_>,
    wallet: &mut W,
    block_id: BlockId,
    time: u32,
    memo_requests: &mut Vec<MemoRequest>,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncCommitmentTrees,
{
    if !memo_requests.is_empty() {
        fetch_memos(
            scanner.fetch_request_sender,
            wallet,
            &scanner.keys,
            memo_requests,
        )
        .await?;
    }

    state::create_checkpoint(wallet, block_id, time, scanner.options.max_checkpoints)
}

/// Applies the outputs, spends and tree updates of a single block to the wallet.
///
/// Every shielded output is appended to its pool's tree in block order. Outputs decrypted by the wallet are marked
/// for witness tracking and stored as wallet notes.
fn apply_block<W>(
    wallet: &mut W,
    block: &CompactBlock,
    decrypted_block: &DecryptedBlock,
    keys: &ScanningKeys,
    spend_index: &mut SpendIndex,
    memo_requests: &mut Vec<MemoRequest>,
    get_tx_detail: bool,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    for (tx_index, transaction) in block.vtx.iter().enumerate() {
        let mut received_notes = Vec::new();

        for (output_index, output) in transaction.outputs.iter().enumerate() {
            let decrypted_note = decrypted_block.notes.get(&(tx_index, output_index));
            let position = wallet
                .get_commitment_trees_mut()
                .map_err(SyncError::WalletError)?
                .append(output.protocol, output.cmx, decrypted_note.is_some())?;
            let Some(decrypted_note) = decrypted_note else {
                continue;
            };

            let scanning_key = keys
                .account_key(decrypted_note.account_id, output.protocol)
                .ok_or_else(|| {
                    SyncError::CorruptCheckpoint(format!(
                        "no viewing key for account {}",
                        decrypted_note.account_id
                    ))
                })?;
            let note_id = NoteId::Shielded {
                protocol: output.protocol,
                position,
            };
            let note = &decrypted_note.note;
            let wallet_note = WalletNote::from_parts(
                note_id,
                decrypted_note.account_id,
                note.value(),
                block.height,
                transaction.txid,
                NoteData::Shielded {
                    recipient: *note.recipient().pk_d(),
                    rseed: note.rseed(),
                    cmx: output.cmx,
                    nullifier: scanning_key.fvk().derive_nullifier(&output.cmx, position),
                },
            );
            tracing::debug!(
                "Received note {:?} of value {} for account {}.",
                note_id,
                note.value(),
                decrypted_note.account_id
            );
            spend_index.insert(&wallet_note);
            wallet
                .insert_note(wallet_note)
                .map_err(SyncError::WalletError)?;
            received_notes.push(note_id);

            if get_tx_detail {
                memo_requests.push(MemoRequest {
                    txid: transaction.txid,
                    output_index,
                    note_id,
                    account_id: decrypted_note.account_id,
                    protocol: output.protocol,
                });
            }
        }

        for wallet_note in transparent::scan_transparent_outputs(block, transaction, keys) {
            spend_index.insert(&wallet_note);
            received_notes.push(wallet_note.id());
            wallet
                .insert_note(wallet_note)
                .map_err(SyncError::WalletError)?;
        }

        if !received_notes.is_empty() {
            wallet
                .get_wallet_transactions_mut()
                .map_err(SyncError::WalletError)?
                .entry(transaction.txid)
                .or_insert_with(|| {
                    WalletTransaction::new(transaction.txid, block.height, block.time)
                })
                .received_notes_mut()
                .extend(received_notes);
        }
    }

    // nullifiers are checked after the whole block so notes received and spent in the same block are detected
    spend::update_spent_notes(wallet, block, spend_index).map_err(SyncError::WalletError)?;

    let trees = wallet
        .get_commitment_trees()
        .map_err(SyncError::WalletError)?;
    for (protocol, expected_size) in [
        (
            ShieldedProtocol::Sapling,
            block.chain_metadata.sapling_commitment_tree_size,
        ),
        (
            ShieldedProtocol::Orchard,
            block.chain_metadata.orchard_commitment_tree_size,
        ),
    ] {
        if trees.size(protocol) != expected_size {
            return Err(SyncError::CorruptCheckpoint(format!(
                "{:?} tree size {} does not match chain tree size {} at height {}",
                protocol,
                trees.size(protocol),
                expected_size,
                block.height
            )));
        }
    }

    Ok(())
}

// decrypts the memos of received notes from their full transactions
async fn fetch_memos<W>(
    fetch_request_sender: &mpsc::UnboundedSender<FetchRequest>,
    wallet: &mut W,
    keys: &ScanningKeys,
    memo_requests: &mut Vec<MemoRequest>,
) -> Result<(), SyncError<W::Error>>
where
    W: SyncWallet + SyncNotes,
{
    let txids: BTreeSet<TxId> = memo_requests.iter().map(|request| request.txid).collect();

    for txid in txids {
        let (transaction, _) =
            client::get_transaction_and_block_height(fetch_request_sender, txid).await?;

        for request in memo_requests.iter().filter(|request| request.txid == txid) {
            let Some(output) = transaction.shielded_outputs.get(request.output_index) else {
                tracing::warn!(
                    "Transaction {} has no output at index {}.",
                    txid,
                    request.output_index
                );
                continue;
            };
            let Some(scanning_key) = keys.account_key(request.account_id, request.protocol) else {
                continue;
            };
            let memo = try_memo_decryption(
                scanning_key.ivk(),
                &output.ephemeral_key,
                &output.memo_ciphertext,
            );
            if let Some(note) = wallet
                .get_notes_mut()
                .map_err(SyncError::WalletError)?
                .get_mut(&request.note_id)
            {
                note.set_memo(memo);
            }
        }
    }
    memo_requests.clear();

    Ok(())
}
