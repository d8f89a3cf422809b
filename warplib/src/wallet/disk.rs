//! Wallet persistence
//!
//! The wallet is stored as a single JSON document. Writes go to a temporary file next to the wallet file which is
//! then renamed over it, so a crash leaves either the previous or the new wallet on disk.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::error::WalletError;
use super::LightWallet;

fn temp_path(path: &Path) -> PathBuf {
    let mut file_name = path.file_name().unwrap_or_default().to_os_string();
    file_name.push(".tmp");
    path.with_file_name(file_name)
}

impl LightWallet {
    /// Writes the wallet to `path`, replacing the file atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WalletError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = temp_path(path);

        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp_path, path)?;
        tracing::debug!("Wallet saved to {}.", path.display());

        Ok(())
    }

    /// Reads a wallet written by [`Self::save`]. The wallet keeps saving to `path` after each synced batch.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let mut wallet: LightWallet = serde_json::from_reader(BufReader::new(file))?;
        wallet.set_wallet_path(Some(path.to_path_buf()));
        tracing::info!("Wallet loaded from {}.", path.display());

        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use warp_sync::keys::address::ChainType;
    use warp_sync::primitives::{AccountId, BlockHeight, PoolType};
    use warp_sync::traits::SyncWallet;

    use super::*;

    #[test]
    fn saved_wallet_loads_with_accounts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallets").join("wallet.json");

        let mut wallet = LightWallet::new(ChainType::Regtest, BlockHeight::from_u32(10));
        let account_id = wallet.add_account_from_seed("main", &[7u8; 32], 0).unwrap();
        wallet.new_transparent_address(account_id).unwrap();
        wallet.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = LightWallet::load(&path).unwrap();
        assert_eq!(loaded.wallet_path(), Some(&path));
        assert_eq!(loaded.birthday(), BlockHeight::from_u32(10));
        assert_eq!(
            loaded.account(account_id).unwrap(),
            wallet.account(account_id).unwrap()
        );
        assert_eq!(
            loaded.address(AccountId::ZERO, Some(PoolType::ORCHARD)).unwrap(),
            wallet.address(AccountId::ZERO, Some(PoolType::ORCHARD)).unwrap()
        );
        assert_eq!(loaded.transparent_addresses().len(), 2);
    }

    #[test]
    fn commit_batch_writes_wallet_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let mut wallet = LightWallet::new(ChainType::Regtest, BlockHeight::from_u32(1));
        wallet.commit_batch().unwrap();
        assert!(!path.exists());

        wallet.set_wallet_path(Some(path.clone()));
        wallet.commit_batch().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_wallet_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        fs::write(&path, b"not a wallet").unwrap();

        assert!(matches!(LightWallet::load(&path), Err(WalletError::Json(_))));
    }
}
