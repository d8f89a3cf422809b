//! Queue and prioritise fetch requests to fetch data from the block source

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::client::{BlockSource, FetchRequest};

/// Receives [`crate::client::FetchRequest`]'s via an [`tokio::sync::mpsc::UnboundedReceiver`] for queueing,
/// prioritisation and fetching from the block source.
/// Returns the data specified in the [`crate::client::FetchRequest`] variant via the provided
/// [`tokio::sync::oneshot::Sender`].
///
/// Allows all requests to the block source to be handled from a single task. Returns when the fetch request channel
/// is closed and all queued requests are answered.
pub async fn fetch<S: BlockSource>(
    mut fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    source: Arc<S>,
) {
    let mut fetch_request_queue: Vec<FetchRequest> = Vec::new();

    loop {
        if receive_fetch_requests(&mut fetch_request_receiver, &mut fetch_request_queue).await {
            return;
        }

        if let Some(request) = select_fetch_request(&mut fetch_request_queue) {
            fetch_from_source(source.as_ref(), request).await;
        }
    }
}

// receives fetch requests and populates the fetch request queue
//
// returns `true` if the fetch request channel is closed and all fetch requests have been completed,
// signalling sync is complete and no longer needs to fetch data from the block source.
async fn receive_fetch_requests(
    receiver: &mut UnboundedReceiver<FetchRequest>,
    fetch_request_queue: &mut Vec<FetchRequest>,
) -> bool {
    // if there are no fetch requests to process, sleep until the next fetch request is received
    // or channel is closed
    if fetch_request_queue.is_empty() {
        match receiver.recv().await {
            Some(fetch_request) => fetch_request_queue.push(fetch_request),
            None => return true,
        }
    }
    // receive all remaining fetch requests from channel
    loop {
        match receiver.try_recv() {
            Ok(fetch_request) => fetch_request_queue.push(fetch_request),
            Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => {
                if fetch_request_queue.is_empty() {
                    return true;
                } else {
                    break;
                }
            }
        }
    }

    false
}

// chain tip requests are answered first as they decide the sync target
fn select_fetch_request(fetch_request_queue: &mut Vec<FetchRequest>) -> Option<FetchRequest> {
    if fetch_request_queue.is_empty() {
        return None;
    }
    let index = fetch_request_queue
        .iter()
        .position(|request| matches!(request, FetchRequest::ChainTip(_)))
        .unwrap_or(0);

    Some(fetch_request_queue.remove(index))
}

// a dropped receiver means the requester is no longer interested in the response
async fn fetch_from_source<S: BlockSource>(source: &S, fetch_request: FetchRequest) {
    match fetch_request {
        FetchRequest::ChainTip(sender) => {
            tracing::debug!("Fetching chain tip.");
            let _ = sender.send(source.get_latest_block().await);
        }
        FetchRequest::CompactBlockRange(sender, block_range) => {
            tracing::debug!("Fetching compact blocks. {:?}", &block_range);
            let _ = sender.send(source.get_block_range(block_range).await);
        }
        FetchRequest::TreeState(sender, block_height) => {
            tracing::debug!("Fetching tree state. {}", block_height);
            let _ = sender.send(source.get_tree_state(block_height).await);
        }
        FetchRequest::Transaction(sender, txid) => {
            tracing::debug!("Fetching transaction. {}", txid);
            let _ = sender.send(source.get_transaction(txid).await);
        }
    }
}
