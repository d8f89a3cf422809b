#![warn(missing_docs)]
//! Warplib
//!
//! Wallet engine on top of [`warp_sync`]. Holds the wallet state store, transaction planning and signing and the
//! [`lightclient::LightClient`] context that ties them to a block source.

pub mod config;
pub mod lightclient;
pub mod wallet;

#[cfg(any(test, feature = "test-elevation"))]
pub mod testutils;
