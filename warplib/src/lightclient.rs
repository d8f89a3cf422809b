//! Entrypoint to the wallet engine
//!
//! A [`LightClient`] is the context object of one wallet: it owns the wallet state store, the block source and the
//! background tasks working on them. Several clients can run in one process without sharing any state.
//!
//! Sync works on a copy of the wallet that replaces the shared wallet when the sync returns, so reads never wait for
//! a running sync. Operations that change the wallet wait for a running sync to finish first.

use std::io;
use std::sync::Arc;

use getset::Getters;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use warp_sync::client::{BlockSource, ClientError};
use warp_sync::error::SyncError;
use warp_sync::keys::address::{AddressError, ChainType};
use warp_sync::keys::transparent::TransparentAddress;
use warp_sync::keys::{seed_from_phrase, KeyError, UnifiedFullViewingKey};
use warp_sync::mempool::{MempoolMonitor, MempoolState};
use warp_sync::primitives::{AccountId, BlockHeight, Checkpoint, NoteId, PoolType, WalletNote};
use warp_sync::transaction::TransactionError;

use crate::config::WalletConfig;
use crate::wallet::balance::AccountBalance;
use crate::wallet::error::WalletError;
use crate::wallet::propose::ProposeError;
use crate::wallet::send::SignError;
use crate::wallet::summary::TransactionSummary;
use crate::wallet::LightWallet;

pub mod mempool;
pub mod send;
pub mod sync;

/// Errors returned by [`LightClient`] operations
#[allow(missing_docs)] // error types document themselves
#[derive(Debug, thiserror::Error)]
pub enum LightClientError {
    #[error("sync is already running")]
    SyncAlreadyRunning,
    #[error("sync failed. {0}")]
    Sync(#[from] SyncError<WalletError>),
    #[error("wallet error. {0}")]
    Wallet(#[from] WalletError),
    #[error("failed to plan transaction. {0}")]
    Propose(#[from] ProposeError),
    #[error("failed to sign transaction. {0}")]
    Sign(#[from] SignError),
    #[error("block source error. {0}")]
    Client(#[from] ClientError),
    #[error("invalid transaction. {0}")]
    Transaction(#[from] TransactionError),
    #[error("key error. {0}")]
    Key(#[from] KeyError),
    #[error("address error. {0}")]
    Address(#[from] AddressError),
}

/// Account overview returned by [`LightClient::get_accounts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Account id
    pub account_id: AccountId,
    /// Display name
    pub name: String,
    /// Derivation index, `None` for imported viewing keys
    pub index: Option<u32>,
    /// True if the account can not spend
    pub watch_only: bool,
}

/// Wallet engine context
#[derive(Getters)]
pub struct LightClient<S: BlockSource> {
    #[getset(get = "pub")]
    config: WalletConfig,
    #[getset(get = "pub")]
    source: Arc<S>,
    /// Shared wallet state store
    #[getset(get = "pub")]
    wallet: Arc<RwLock<LightWallet>>,
    // held by the sync task and by operations that change the wallet
    sync_lock: Arc<Mutex<()>>,
    sync_cancel: RwLock<Option<CancellationToken>>,
    mempool_state: Arc<RwLock<MempoolState>>,
    mempool_monitor: Mutex<Option<MempoolMonitor>>,
}

impl<S: BlockSource> std::fmt::Debug for LightClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn persist(wallet: &LightWallet) -> Result<(), WalletError> {
    if let Some(path) = wallet.wallet_path() {
        wallet.save(path)?;
    }

    Ok(())
}

impl<S: BlockSource> LightClient<S> {
    /// Creates a client for an existing wallet.
    pub fn new(config: WalletConfig, source: Arc<S>, wallet: LightWallet) -> Self {
        LightClient {
            config,
            source,
            wallet: Arc::new(RwLock::new(wallet)),
            sync_lock: Arc::new(Mutex::new(())),
            sync_cancel: RwLock::new(None),
            mempool_state: Arc::new(RwLock::new(MempoolState::default())),
            mempool_monitor: Mutex::new(None),
        }
    }

    /// Creates a client with a new wallet without accounts. The wallet is saved to the configured wallet directory.
    pub fn create(config: WalletConfig, source: Arc<S>, birthday: BlockHeight) -> Self {
        let mut wallet = LightWallet::new(config.chain, birthday);
        wallet.set_wallet_path(config.wallet_path());

        Self::new(config, source, wallet)
    }

    /// Creates a client for the wallet saved in the configured wallet directory.
    pub fn load(config: WalletConfig, source: Arc<S>) -> Result<Self, LightClientError> {
        let path = config.wallet_path().ok_or_else(|| {
            WalletError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no wallet directory configured",
            ))
        })?;
        let wallet = LightWallet::load(path)?;
        if *wallet.chain() != config.chain {
            return Err(WalletError::Corrupt(format!(
                "wallet is for chain {} but client is configured for {}",
                wallet.chain(),
                config.chain
            ))
            .into());
        }

        Ok(Self::new(config, source, wallet))
    }

    /// Saves the wallet to its wallet file.
    pub async fn save(&self) -> Result<(), LightClientError> {
        let wallet = self.wallet.read().await;
        let path = wallet
            .wallet_path()
            .cloned()
            .or_else(|| self.config.wallet_path())
            .ok_or_else(|| {
                WalletError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no wallet directory configured",
                ))
            })?;
        wallet.save(path)?;

        Ok(())
    }

    /// Chain of the wallet.
    pub fn chain(&self) -> ChainType {
        self.config.chain
    }

    /// Height of the latest checkpoint.
    pub async fn wallet_height(&self) -> Option<BlockHeight> {
        self.wallet.read().await.wallet_height()
    }

    // runs `f` on the wallet once no sync is running and saves the result
    async fn update_wallet<T>(
        &self,
        f: impl FnOnce(&mut LightWallet) -> Result<T, WalletError>,
    ) -> Result<T, LightClientError> {
        let _sync_guard = self.sync_lock.lock().await;
        let mut wallet = self.wallet.write().await;
        let value = f(&mut *wallet)?;
        persist(&wallet)?;

        Ok(value)
    }

    /// Adds the account at `index` derived from a mnemonic seed phrase.
    ///
    /// Notes received before the account was added are found by [`Self::rescan_from`].
    pub async fn new_account(
        &self,
        name: &str,
        seed_phrase: &str,
        index: u32,
    ) -> Result<AccountId, LightClientError> {
        let seed = seed_from_phrase(seed_phrase)?;
        self.update_wallet(|wallet| wallet.add_account_from_seed(name, &seed, index))
            .await
    }

    /// Adds a watch-only account from an encoded unified full viewing key.
    pub async fn import_viewing_key(
        &self,
        name: &str,
        encoded_ufvk: &str,
    ) -> Result<AccountId, LightClientError> {
        let ufvk = UnifiedFullViewingKey::decode(self.config.chain, encoded_ufvk)?;
        self.update_wallet(|wallet| wallet.import_viewing_key(name, ufvk))
            .await
    }

    /// Renames an account.
    pub async fn rename_account(
        &self,
        account_id: AccountId,
        name: &str,
    ) -> Result<(), LightClientError> {
        self.update_wallet(|wallet| wallet.rename_account(account_id, name))
            .await
    }

    /// Deletes an account with its notes. Ids of other accounts do not change.
    pub async fn delete_account(&self, account_id: AccountId) -> Result<(), LightClientError> {
        self.update_wallet(|wallet| wallet.delete_account(account_id))
            .await
    }

    /// Accounts of the wallet.
    pub async fn get_accounts(&self) -> Vec<AccountInfo> {
        self.wallet
            .read()
            .await
            .accounts()
            .map(|(account_id, account)| AccountInfo {
                account_id,
                name: account.name().clone(),
                index: account.index(),
                watch_only: account.is_watch_only(),
            })
            .collect()
    }

    /// Encoded address of an account. `None` selects the unified address.
    ///
    /// Returns `None` if the account has no receiver for the pool.
    pub async fn get_address(
        &self,
        account_id: AccountId,
        pool: Option<PoolType>,
    ) -> Result<Option<String>, LightClientError> {
        let address = self.wallet.read().await.address(account_id, pool)?;

        Ok(address
            .map(|address| address.encode(self.config.chain))
            .transpose()?)
    }

    /// Derives the next transparent address of an account.
    pub async fn new_transparent_address(
        &self,
        account_id: AccountId,
    ) -> Result<TransparentAddress, LightClientError> {
        self.update_wallet(|wallet| wallet.new_transparent_address(account_id))
            .await
    }

    /// Excludes a note from transaction planning, or includes it again.
    pub async fn exclude_note(
        &self,
        account_id: AccountId,
        note_id: NoteId,
        excluded: bool,
    ) -> Result<(), LightClientError> {
        self.update_wallet(|wallet| wallet.exclude_note(account_id, note_id, excluded))
            .await
    }

    /// Balance of an account per pool, counting notes with at least `min_confirmations` blocks on top as spendable.
    pub async fn get_balances(
        &self,
        account_id: AccountId,
        min_confirmations: u32,
    ) -> Result<AccountBalance, LightClientError> {
        Ok(self
            .wallet
            .read()
            .await
            .balance_with_confirmations(account_id, min_confirmations)?)
    }

    /// Notes of an account including spent notes.
    pub async fn get_notes(&self, account_id: AccountId) -> Result<Vec<WalletNote>, LightClientError> {
        let wallet = self.wallet.read().await;
        wallet.account(account_id)?;

        Ok(wallet.account_notes(account_id).cloned().collect())
    }

    /// Transactions of an account ordered by height.
    pub async fn get_txs(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionSummary>, LightClientError> {
        Ok(self
            .wallet
            .read()
            .await
            .transaction_summaries(account_id)?)
    }

    /// Checkpoints ordered by height.
    pub async fn get_checkpoints(&self) -> Vec<Checkpoint> {
        self.wallet
            .read()
            .await
            .sync_state()
            .checkpoints()
            .values()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use testvectors::seeds::{ABANDON_ABOUT_SEED, ZOO_WRONG_SEED};

    use crate::testutils::mock_chain::MockChain;

    use super::*;

    fn client() -> LightClient<MockChain> {
        LightClient::create(
            WalletConfig::default(),
            Arc::new(MockChain::new()),
            BlockHeight::from_u32(1),
        )
    }

    #[tokio::test]
    async fn accounts_are_managed_through_the_client() {
        let client = client();
        let first = client.new_account("first", ABANDON_ABOUT_SEED, 0).await.unwrap();
        let second = client.new_account("second", ZOO_WRONG_SEED, 0).await.unwrap();
        assert!(matches!(
            client.new_account("again", ABANDON_ABOUT_SEED, 0).await,
            Err(LightClientError::Wallet(WalletError::DuplicateAccount(0)))
        ));

        client.rename_account(second, "renamed").await.unwrap();
        client.delete_account(first).await.unwrap();
        let accounts = client.get_accounts().await;
        assert_eq!(
            accounts,
            vec![AccountInfo {
                account_id: second,
                name: "renamed".to_string(),
                index: Some(0),
                watch_only: false,
            }]
        );
    }

    #[tokio::test]
    async fn viewing_key_import_is_watch_only() {
        let client = client();
        let account_id = client.new_account("main", ABANDON_ABOUT_SEED, 0).await.unwrap();
        let encoded = client
            .wallet()
            .read()
            .await
            .account(account_id)
            .unwrap()
            .ufvk()
            .encode(client.chain())
            .unwrap();

        let watcher = LightClient::create(
            WalletConfig::default(),
            Arc::new(MockChain::new()),
            BlockHeight::from_u32(1),
        );
        let imported = watcher.import_viewing_key("watch", &encoded).await.unwrap();
        assert!(watcher.get_accounts().await[0].watch_only);
        assert_eq!(
            watcher.get_address(imported, Some(PoolType::ORCHARD)).await.unwrap(),
            client.get_address(account_id, Some(PoolType::ORCHARD)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn wallet_is_saved_and_loaded_from_wallet_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalletConfig::default().with_wallet_dir(dir.path());
        let chain = Arc::new(MockChain::new());

        let client = LightClient::create(config.clone(), chain.clone(), BlockHeight::from_u32(1));
        let account_id = client.new_account("main", ABANDON_ABOUT_SEED, 0).await.unwrap();
        let address = client.get_address(account_id, None).await.unwrap();
        assert!(config.wallet_path().unwrap().exists());

        let loaded = LightClient::load(config, chain).unwrap();
        assert_eq!(loaded.get_address(account_id, None).await.unwrap(), address);
    }

    #[tokio::test]
    async fn invalid_seed_phrase_is_rejected() {
        let client = client();
        assert!(matches!(
            client.new_account("main", "not a mnemonic", 0).await,
            Err(LightClientError::Key(_))
        ));
    }
}
