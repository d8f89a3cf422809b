#![warn(missing_docs)]
//! Warp sync engine
//!
//! Entrypoint: [`crate::sync::sync`]
//!
//! Terminology:
//! Chain height - highest block height of best chain from the block source
//! Wallet height - highest block height fully processed by the wallet. This is always the height of the latest
//!                 checkpoint, or the block before the wallet birthday if the wallet has never synced.
//! Checkpoint - snapshot of block hash, commitment tree sizes and account balances at a block boundary. Checkpoints
//!              are the resume point for sync and the rollback point for re-orgs.
//! Cost - the unit of trial decryption work. One output trial decrypted with one viewing key costs one unit.

pub mod client;
pub mod error;
pub mod keys;
pub mod mempool;
pub mod note_encryption;
#[allow(missing_docs)]
pub mod primitives;
pub mod scan;
pub mod sync;
pub mod traits;
pub mod transaction;
pub mod tree;
pub(crate) mod utils;
pub mod witness;

pub use utils::vec_map;
