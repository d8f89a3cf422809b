//! Errors for [`crate::wallet`] and sub-modules

use warp_sync::keys::KeyError;
use warp_sync::primitives::{AccountId, NoteId};
use warp_sync::witness::TreeError;

/// Errors associated with the wallet state store
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// No account with this ID exists
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),
    /// No note with this ID exists in the account
    #[error("unknown note {0:?}")]
    UnknownNote(NoteId),
    /// Account was created from a seed and is already tracked
    #[error("account at index {0} already exists")]
    DuplicateAccount(u32),
    /// Viewing key is already tracked by an account
    #[error("viewing key already tracked by account {0}")]
    DuplicateViewingKey(AccountId),
    /// Account is watch-only
    #[error("account {0} has no spending key")]
    NoSpendingKey(AccountId),
    /// Key derivation or key encoding failed
    #[error("key error. {0}")]
    KeyError(#[from] KeyError),
    /// Commitment tree error
    #[error("commitment tree error. {0}")]
    TreeError(#[from] TreeError),
    /// Wallet state violates an invariant
    #[error("corrupt wallet state. {0}")]
    Corrupt(String),
    /// Failed to read or write the wallet file
    #[error("wallet file io error. {0}")]
    Io(#[from] std::io::Error),
    /// Wallet file is not valid
    #[error("wallet file encoding error. {0}")]
    Json(#[from] serde_json::Error),
}
