//! Warp testutils
//! Holds functionality for warp testing

pub mod assertions;
pub mod mock_chain;
pub mod scenarios;

use std::sync::Arc;

use warp_sync::client::BlockSource;
use warp_sync::keys::address::Receiver;
use warp_sync::primitives::{AccountId, BlockHeight, PoolType};
use warp_sync::sync::{SyncOptions, SyncResult};

use crate::lightclient::LightClient;

/// Cancels the sync of `options` once the block at `height` has been processed.
pub fn cancel_after(options: SyncOptions, height: BlockHeight) -> SyncOptions {
    let cancel = options.cancel.clone();
    let inner = options.progress.clone();

    SyncOptions {
        progress: Some(Arc::new(move |progress| {
            if let Some(inner) = &inner {
                inner(progress);
            }
            if progress.height >= height {
                cancel.cancel();
            }
        })),
        ..options
    }
}

/// Syncs a client to the chain tip with a checkpoint at the configured anchor offset.
pub async fn sync_to_tip<S: BlockSource>(client: &LightClient<S>) -> SyncResult {
    client
        .start_sync(None, true, client.config().default_anchor_offset)
        .await
        .expect("sync to chain tip")
}

/// Receiver of an account in `pool`.
pub async fn account_receiver<S: BlockSource>(
    client: &LightClient<S>,
    account_id: AccountId,
    pool: PoolType,
) -> Receiver {
    client
        .wallet()
        .read()
        .await
        .account(account_id)
        .expect("account exists")
        .receiver(pool)
        .expect("account has a receiver for the pool")
}
