//! Module for handling all connections to the block source

use std::future::Future;
use std::ops::Range;

use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::primitives::{BlockHeight, BlockId, CompactBlock, TreeState, TxId};
use crate::transaction::Transaction;

pub mod fetch;

/// Errors associated with the block source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Network or server fault. Retryable by the caller.
    #[error("block source unavailable. {0}")]
    Unavailable(String),
    /// Requested data does not exist on the block source
    #[error("not found. {0}")]
    NotFound(String),
    /// Block source rejected a transaction
    #[error("transaction rejected. {0}")]
    Rejected(String),
    /// Fetch task stopped before returning a response
    #[error("fetch task closed")]
    FetchTaskClosed,
}

/// Contract the sync engine requires from a block-data server.
///
/// Block ranges are end exclusive and must be returned in ascending height order.
pub trait BlockSource: Send + Sync + 'static {
    /// Height and hash of the chain tip.
    fn get_latest_block(&self) -> impl Future<Output = Result<BlockId, ClientError>> + Send;

    /// Compact blocks in `block_range`.
    fn get_block_range(
        &self,
        block_range: Range<BlockHeight>,
    ) -> impl Future<Output = Result<Vec<CompactBlock>, ClientError>> + Send;

    /// Commitment tree frontiers at the end of the block at `block_height`.
    fn get_tree_state(
        &self,
        block_height: BlockHeight,
    ) -> impl Future<Output = Result<TreeState, ClientError>> + Send;

    /// Full transaction and the height of the block it was mined in.
    fn get_transaction(
        &self,
        txid: TxId,
    ) -> impl Future<Output = Result<(Transaction, BlockHeight), ClientError>> + Send;

    /// Unconfirmed transactions in the mempool.
    fn get_mempool(&self) -> impl Future<Output = Result<Vec<Transaction>, ClientError>> + Send;

    /// Submits a raw transaction to the network.
    fn send_transaction(
        &self,
        raw_transaction: Vec<u8>,
    ) -> impl Future<Output = Result<TxId, ClientError>> + Send;
}

type Response<T> = oneshot::Sender<Result<T, ClientError>>;

/// Fetch requests are created and sent to the [`crate::client::fetch::fetch`] task when a connection to the block
/// source is required.
///
/// Each variant includes a [`tokio::sync::oneshot::Sender`] for returning the fetched data to the requester.
#[derive(Debug)]
pub enum FetchRequest {
    /// Gets the height and hash of the chain tip.
    ChainTip(Response<BlockId>),
    /// Gets the specified range of compact blocks (end exclusive).
    CompactBlockRange(Response<Vec<CompactBlock>>, Range<BlockHeight>),
    /// Gets the tree state for a specified block height.
    TreeState(Response<TreeState>, BlockHeight),
    /// Get a full transaction by txid.
    Transaction(Response<(Transaction, BlockHeight)>, TxId),
}

async fn request<T>(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    create_request: impl FnOnce(Response<T>) -> FetchRequest,
) -> Result<T, ClientError> {
    let (sender, receiver) = oneshot::channel();
    fetch_request_sender
        .send(create_request(sender))
        .map_err(|_| ClientError::FetchTaskClosed)?;

    receiver.await.map_err(|_| ClientError::FetchTaskClosed)?
}

/// Gets the height and hash of the chain tip.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_chain_tip(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
) -> Result<BlockId, ClientError> {
    request(fetch_request_sender, FetchRequest::ChainTip).await
}

/// Gets the specified range of compact blocks (end exclusive).
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_compact_block_range(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    block_range: Range<BlockHeight>,
) -> Result<Vec<CompactBlock>, ClientError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::CompactBlockRange(sender, block_range)
    })
    .await
}

/// Gets the tree state at the end of the block at `block_height`.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_tree_state(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    block_height: BlockHeight,
) -> Result<TreeState, ClientError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::TreeState(sender, block_height)
    })
    .await
}

/// Gets a full transaction for a specified txid.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_transaction_and_block_height(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    txid: TxId,
) -> Result<(Transaction, BlockHeight), ClientError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::Transaction(sender, txid)
    })
    .await
}
