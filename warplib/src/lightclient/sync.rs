//! Sync operations of [`LightClient`]

use warp_sync::client::BlockSource;
use warp_sync::error::SyncError;
use warp_sync::primitives::BlockHeight;
use warp_sync::sync::{SyncOptions, SyncResult};

use super::{persist, LightClient, LightClientError};

impl<S: BlockSource> LightClient<S> {
    /// Syncs the wallet to the chain tip.
    ///
    /// With a `cost_budget` the sync yields once the budget of trial decryptions is spent and returns an incomplete
    /// [`SyncResult`]. With a non-zero `anchor_offset` a checkpoint is created at `tip - anchor_offset` on the way.
    /// Fails with [`LightClientError::SyncAlreadyRunning`] while another sync is running.
    pub async fn start_sync(
        &self,
        cost_budget: Option<u64>,
        get_tx_detail: bool,
        anchor_offset: u32,
    ) -> Result<SyncResult, LightClientError> {
        self.sync_with_options(SyncOptions {
            cost_budget,
            get_tx_detail,
            anchor_offset,
            ..self.config.sync_options()
        })
        .await
    }

    /// Syncs the wallet with explicit sync options.
    ///
    /// [`Self::cancel_sync`] cancels the token of `options`. After a cancelled sync the wallet keeps every block
    /// processed before the cancellation.
    pub async fn sync_with_options(
        &self,
        options: SyncOptions,
    ) -> Result<SyncResult, LightClientError> {
        let _sync_guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| LightClientError::SyncAlreadyRunning)?;
        *self.sync_cancel.write().await = Some(options.cancel.clone());

        let mut wallet = self.wallet.read().await.clone();
        let result = warp_sync::sync::sync(self.source.clone(), &mut wallet, options).await;
        *self.sync_cancel.write().await = None;

        // the engine leaves the wallet at a checkpoint unless its state is inconsistent
        let keep_wallet = !matches!(
            result,
            Err(SyncError::CorruptCheckpoint(_) | SyncError::TreeError(_) | SyncError::WalletError(_))
        );
        if keep_wallet {
            *self.wallet.write().await = wallet;
        }
        self.mempool_state.write().await.reset();

        Ok(result?)
    }

    /// Cancels a running sync. Returns false if no sync is running.
    pub async fn cancel_sync(&self) -> bool {
        match self.sync_cancel.read().await.as_ref() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true while a sync is running.
    pub fn is_syncing(&self) -> bool {
        self.sync_lock.try_lock().is_err()
    }

    /// Rewinds the wallet to the highest checkpoint at or below `height` and returns its height.
    pub async fn rewind_to(&self, height: BlockHeight) -> Result<BlockHeight, LightClientError> {
        let _sync_guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| LightClientError::SyncAlreadyRunning)?;
        let mut wallet = self.wallet.write().await;
        let checkpoint_height = warp_sync::sync::rewind_to(&mut *wallet, height)?;
        persist(&wallet)?;
        self.mempool_state.write().await.reset();
        tracing::info!("Wallet rewound to height {}.", checkpoint_height);

        Ok(checkpoint_height)
    }

    /// Discards wallet data from `height` so the next sync scans those blocks again. Returns the new wallet height.
    pub async fn rescan_from(&self, height: BlockHeight) -> Result<BlockHeight, LightClientError> {
        let _sync_guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| LightClientError::SyncAlreadyRunning)?;
        let mut wallet = self.wallet.write().await;
        let wallet_height = warp_sync::sync::rescan_from(&mut *wallet, height)?;
        persist(&wallet)?;
        self.mempool_state.write().await.reset();
        tracing::info!("Rescanning from height {}.", wallet_height + 1);

        Ok(wallet_height)
    }
}
