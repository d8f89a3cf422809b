//! Common test setups.
//!
//! Every scenario runs on a [`MockChain`] mined to [`BASE_HEIGHT`]. Clients are created with a birthday just above
//! the base height and use a fixed fee so change values are exact.
//! HELPERS:
//! If you need a wallet with no funds, use [`unfunded`].
//! If you need a funded wallet, use [`funded`].
//! If you need a funded wallet and a recipient on the same chain, use [`funded_recipient`].

use std::sync::Arc;

use testvectors::block_rewards::{FIXED_TEST_FEE, FUNDING_NOTE_VALUE};
use testvectors::seeds::{ABANDON_ABOUT_SEED, ZOO_WRONG_SEED};
use testvectors::BASE_HEIGHT;
use warp_sync::primitives::{AccountId, BlockHeight, Memo, PoolType};

use crate::config::{FeeRule, WalletConfig};
use crate::lightclient::LightClient;

use super::mock_chain::MockChain;
use super::{account_receiver, sync_to_tip};

/// A client with one account on a shared mock chain.
#[derive(Debug)]
pub struct Scenario {
    /// Block source of the client
    pub chain: Arc<MockChain>,
    /// Client under test
    pub client: LightClient<MockChain>,
    /// The client's account
    pub account: AccountId,
}

/// Configuration used by every scenario client.
pub fn test_config() -> WalletConfig {
    WalletConfig::default().with_fee_rule(FeeRule::Fixed(FIXED_TEST_FEE))
}

/// Birthday of scenario clients.
pub fn birthday() -> BlockHeight {
    BlockHeight::from_u32(BASE_HEIGHT + 1)
}

async fn client_with_account(
    chain: Arc<MockChain>,
    seed_phrase: &str,
) -> (LightClient<MockChain>, AccountId) {
    let client = LightClient::create(test_config(), chain, birthday());
    let account = client
        .new_account("main", seed_phrase, 0)
        .await
        .expect("scenario account");

    (client, account)
}

/// A synced wallet without funds.
pub async fn unfunded() -> Scenario {
    let chain = Arc::new(MockChain::new());
    chain.mine_to(BlockHeight::from_u32(BASE_HEIGHT)).await;
    let (client, account) = client_with_account(chain.clone(), ABANDON_ABOUT_SEED).await;
    sync_to_tip(&client).await;

    Scenario {
        chain,
        client,
        account,
    }
}

/// A wallet holding one note of [`FUNDING_NOTE_VALUE`] in `pool`, synced with enough blocks on top to spend it
/// at the default anchor offset.
pub async fn funded(pool: PoolType) -> Scenario {
    let scenario = unfunded().await;
    let receiver = account_receiver(&scenario.client, scenario.account, pool).await;
    scenario
        .chain
        .mine_payment(receiver, FUNDING_NOTE_VALUE, Memo::Empty)
        .await;
    scenario
        .chain
        .mine_blocks(scenario.client.config().default_anchor_offset)
        .await;
    sync_to_tip(&scenario.client).await;

    scenario
}

/// A funded wallet plus a synced recipient client without funds on the same chain.
pub async fn funded_recipient(pool: PoolType) -> (Scenario, LightClient<MockChain>, AccountId) {
    let scenario = funded(pool).await;
    let (recipient, recipient_account) =
        client_with_account(scenario.chain.clone(), ZOO_WRONG_SEED).await;
    sync_to_tip(&recipient).await;

    (scenario, recipient, recipient_account)
}
