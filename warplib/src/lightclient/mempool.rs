//! Mempool monitoring of [`LightClient`]

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use warp_sync::client::BlockSource;
use warp_sync::mempool::{MempoolMonitor, MempoolWallet, UnspentIndex};
use warp_sync::primitives::{AccountId, MempoolEntry, PoolType, PoolValues};
use warp_sync::scan::ScanningKeys;

use crate::wallet::LightWallet;

use super::{LightClient, LightClientError};

/// Wallet as seen by the mempool monitor.
#[derive(Debug, Clone)]
struct WalletHandle(Arc<RwLock<LightWallet>>);

impl MempoolWallet for WalletHandle {
    async fn scanning_data(&self) -> Option<(ScanningKeys, UnspentIndex)> {
        let wallet = self.0.read().await;
        let ufvks = wallet.unified_full_viewing_keys();
        if ufvks.is_empty() {
            return None;
        }
        let keys = ScanningKeys::from_account_ufvks(&ufvks)
            .with_transparent_addresses(wallet.transparent_addresses());

        Some((keys, UnspentIndex::from_notes(wallet.notes().values())))
    }
}

impl<S: BlockSource> LightClient<S> {
    /// Starts polling the mempool in the background. Returns false if the monitor is already running.
    pub async fn start_mempool_monitor(&self) -> bool {
        let mut monitor = self.mempool_monitor.lock().await;
        if monitor.as_ref().is_some_and(|monitor| !monitor.is_finished()) {
            return false;
        }
        *monitor = Some(MempoolMonitor::spawn(
            self.source.clone(),
            Arc::new(WalletHandle(self.wallet.clone())),
            self.mempool_state.clone(),
            self.config.mempool_poll_interval,
            CancellationToken::new(),
        ));

        true
    }

    /// Stops the mempool monitor and discards provisional entries.
    pub async fn stop_mempool_monitor(&self) {
        if let Some(monitor) = self.mempool_monitor.lock().await.take() {
            monitor.stop().await;
        }
        self.mempool_state.write().await.reset();
    }

    /// Polls the mempool once without the background monitor.
    pub async fn poll_mempool(&self) -> Result<(), LightClientError> {
        warp_sync::mempool::poll_mempool(
            self.source.as_ref(),
            &WalletHandle(self.wallet.clone()),
            &self.mempool_state,
        )
        .await?;

        Ok(())
    }

    /// Provisional entries of an account from the last mempool poll.
    pub async fn get_mempool_entries(&self, account_id: AccountId) -> Vec<MempoolEntry> {
        self.mempool_state
            .read()
            .await
            .entries()
            .iter()
            .filter(|entry| entry.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Balance of an account including unconfirmed mempool transactions.
    ///
    /// The value of every note not spent on chain plus the provisional deltas of the last mempool poll.
    pub async fn get_mempool_balance(
        &self,
        account_id: AccountId,
    ) -> Result<PoolValues, LightClientError> {
        let committed = self
            .wallet
            .read()
            .await
            .balance_with_confirmations(account_id, 0)?
            .total();
        let deltas = self.mempool_state.read().await.deltas();

        let mut balance = PoolValues::default();
        for pool in PoolType::ALL {
            let delta = deltas.get(&(account_id, pool)).copied().unwrap_or_default();
            let provisional = i128::from(committed.get(pool)) + i128::from(delta);
            *balance.get_mut(pool) = u64::try_from(provisional.max(0)).unwrap_or(u64::MAX);
        }

        Ok(balance)
    }
}
