use std::sync::Arc;

use testvectors::block_rewards::{FIXED_TEST_FEE, FUNDING_NOTE_VALUE};
use testvectors::seeds::ABANDON_ABOUT_SEED;
use testvectors::BASE_HEIGHT;
use warp_sync::error::SyncError;
use warp_sync::keys::address::Address;
use warp_sync::primitives::{BlockHeight, Memo, NoteStatus, PoolType};
use warplib::lightclient::{LightClient, LightClientError};
use warplib::testutils::assertions::assert_checkpoints_consistent;
use warplib::testutils::mock_chain::MockChain;
use warplib::testutils::scenarios::{birthday, funded_recipient, test_config, unfunded};
use warplib::testutils::{account_receiver, sync_to_tip};
use warplib::wallet::propose::{FundingPolicy, Recipient};

#[tokio::test]
async fn reorged_note_is_removed() {
    let scenario = unfunded().await;
    let client = &scenario.client;
    scenario.chain.mine_blocks(2).await;
    client.start_sync(None, false, 0).await.unwrap();
    let stable_checkpoint = client.wallet_height().await.unwrap();

    let receiver = account_receiver(client, scenario.account, PoolType::SAPLING).await;
    scenario
        .chain
        .mine_payment(receiver, 5_000, Memo::Empty)
        .await;
    scenario.chain.mine_blocks(1).await;
    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(client.get_notes(scenario.account).await.unwrap().len(), 1);
    let tip = client.wallet_height().await.unwrap();
    let reorged_hash = client
        .get_checkpoints()
        .await
        .last()
        .map(|checkpoint| checkpoint.hash())
        .unwrap();

    scenario.chain.reorg(stable_checkpoint + 1).await;
    let result = client.start_sync(None, false, 0).await.unwrap();

    assert_eq!(result.height, tip);
    assert!(client.get_notes(scenario.account).await.unwrap().is_empty());
    assert!(client.get_txs(scenario.account).await.unwrap().is_empty());
    assert_eq!(
        client
            .get_balances(scenario.account, 0)
            .await
            .unwrap()
            .total()
            .total(),
        0
    );
    let checkpoints = client.get_checkpoints().await;
    assert_ne!(checkpoints.last().unwrap().hash(), reorged_hash);
    assert!(checkpoints
        .iter()
        .any(|checkpoint| checkpoint.height() == stable_checkpoint));
    assert_checkpoints_consistent(client).await;
}

#[tokio::test]
async fn reorged_spend_is_reverted() {
    let (scenario, recipient, recipient_account) = funded_recipient(PoolType::ORCHARD).await;
    let client = &scenario.client;
    let receiver = account_receiver(&recipient, recipient_account, PoolType::ORCHARD).await;
    let before_spend = client.wallet_height().await.unwrap();

    client
        .send(
            scenario.account,
            &[Recipient::new(Address::from(receiver), 400_000)],
            &FundingPolicy::default(),
        )
        .await
        .unwrap();
    scenario.chain.mine_blocks(1).await;
    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(
        client
            .get_balances(scenario.account, 0)
            .await
            .unwrap()
            .total()
            .get(PoolType::ORCHARD),
        FUNDING_NOTE_VALUE - 400_000 - FIXED_TEST_FEE
    );

    // the spending transaction is dropped by the re-org
    scenario.chain.reorg(before_spend + 1).await;
    client.start_sync(None, false, 0).await.unwrap();

    let notes = client.get_notes(scenario.account).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].value(), FUNDING_NOTE_VALUE);
    assert_eq!(notes[0].status(), NoteStatus::Unspent);
    assert_eq!(
        client
            .get_balances(scenario.account, 0)
            .await
            .unwrap()
            .total()
            .get(PoolType::ORCHARD),
        FUNDING_NOTE_VALUE
    );

    // the reverted note can be spent again
    scenario.chain.mine_blocks(3).await;
    sync_to_tip(client).await;
    client
        .send(
            scenario.account,
            &[Recipient::new(Address::from(receiver), 400_000)],
            &FundingPolicy::default(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn rewind_to_restores_checkpoint() {
    let scenario = unfunded().await;
    let client = &scenario.client;
    let receiver = account_receiver(client, scenario.account, PoolType::ORCHARD).await;
    scenario.chain.mine_blocks(1).await;
    client.start_sync(None, false, 0).await.unwrap();
    let checkpoint = client.wallet_height().await.unwrap();

    scenario
        .chain
        .mine_payment(receiver, 9_000, Memo::Empty)
        .await;
    scenario.chain.mine_blocks(1).await;
    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(client.get_notes(scenario.account).await.unwrap().len(), 1);

    // rewinds to the highest checkpoint at or below the requested height
    let rewound = client.rewind_to(checkpoint + 1).await.unwrap();
    assert_eq!(rewound, checkpoint);
    assert_eq!(client.wallet_height().await, Some(checkpoint));
    assert!(client.get_notes(scenario.account).await.unwrap().is_empty());

    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(client.get_notes(scenario.account).await.unwrap().len(), 1);
    assert!(client.wallet_height().await > Some(checkpoint));
}

#[tokio::test]
async fn reorg_below_oldest_checkpoint_is_a_chain_fork() {
    let chain = Arc::new(MockChain::new());
    chain.mine_to(BlockHeight::from_u32(BASE_HEIGHT)).await;
    let client = LightClient::create(
        test_config().with_max_checkpoints(2),
        chain.clone(),
        birthday(),
    );
    let account = client
        .new_account("main", ABANDON_ABOUT_SEED, 0)
        .await
        .unwrap();
    client.start_sync(None, false, 0).await.unwrap();
    for _ in 0..3 {
        chain.mine_blocks(1).await;
        client.start_sync(None, false, 0).await.unwrap();
    }

    let checkpoints = client.get_checkpoints().await;
    assert_eq!(checkpoints.len(), 2);
    let oldest = checkpoints[0].height();
    let wallet_height = client.wallet_height().await;

    // replaces every block from the oldest retained checkpoint upwards
    chain.reorg(oldest).await;
    match client.start_sync(None, false, 0).await {
        Err(LightClientError::Sync(SyncError::ChainFork(height))) => assert_eq!(height, oldest),
        other => panic!("expected chain fork, got {other:?}"),
    }

    assert_eq!(client.get_checkpoints().await, checkpoints);
    assert_eq!(client.wallet_height().await, wallet_height);
    assert!(client.get_notes(account).await.unwrap().is_empty());
    assert!(!client.is_syncing());
}
