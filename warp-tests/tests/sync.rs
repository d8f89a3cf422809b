use std::sync::{mpsc, Arc, Mutex};

use testvectors::seeds::ABANDON_ABOUT_SEED;
use warp_sync::error::SyncError;
use warp_sync::primitives::{AccountId, BlockHeight, Memo, PoolType, ShieldedProtocol};
use warp_sync::sync::SyncOptions;
use warplib::lightclient::{LightClient, LightClientError};
use warplib::testutils::assertions::assert_checkpoints_consistent;
use warplib::testutils::mock_chain::MockChain;
use warplib::testutils::scenarios::test_config;
use warplib::testutils::{account_receiver, cancel_after};

async fn client_synced_to_100() -> (Arc<MockChain>, LightClient<MockChain>, AccountId) {
    let chain = Arc::new(MockChain::new());
    chain.mine_to(BlockHeight::from_u32(100)).await;
    let client = LightClient::create(test_config(), chain.clone(), BlockHeight::from_u32(91));
    let account = client
        .new_account("main", ABANDON_ABOUT_SEED, 0)
        .await
        .unwrap();
    let result = client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(100));

    (chain, client, account)
}

// blocks 101 to 105 with one orchard output of 50 to the account at 103
async fn mine_payment_at_103(chain: &MockChain, client: &LightClient<MockChain>, account: AccountId) {
    chain.mine_blocks(2).await;
    let receiver = account_receiver(client, account, PoolType::ORCHARD).await;
    chain.mine_payment(receiver, 50, Memo::Empty).await;
    chain.mine_blocks(2).await;
}

async fn orchard_tree_size(client: &LightClient<MockChain>) -> u64 {
    client
        .wallet()
        .read()
        .await
        .commitment_trees()
        .size(ShieldedProtocol::Orchard)
}

#[tokio::test]
async fn sync_to_tip_finds_received_note() {
    let (chain, client, account) = client_synced_to_100().await;
    let tree_size = orchard_tree_size(&client).await;
    mine_payment_at_103(&chain, &client, account).await;

    let result = client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(105));
    assert!(result.complete);

    let balance = client.get_balances(account, 0).await.unwrap();
    assert_eq!(balance.total().get(PoolType::ORCHARD), 50);
    assert_eq!(orchard_tree_size(&client).await, tree_size + 1);
    assert_eq!(
        client.wallet_height().await,
        Some(BlockHeight::from_u32(105))
    );
    let notes = client.get_notes(account).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].height(), BlockHeight::from_u32(103));
    assert_checkpoints_consistent(&client).await;
}

#[tokio::test]
async fn cancelled_sync_stops_at_block_boundary() {
    let (chain, client, account) = client_synced_to_100().await;
    mine_payment_at_103(&chain, &client, account).await;

    let options = cancel_after(
        SyncOptions {
            anchor_offset: 0,
            ..client.config().sync_options()
        },
        BlockHeight::from_u32(102),
    );
    let result = client.sync_with_options(options).await;
    assert!(matches!(
        result,
        Err(LightClientError::Sync(SyncError::Cancelled))
    ));
    assert_eq!(
        client.wallet_height().await,
        Some(BlockHeight::from_u32(102))
    );
    assert!(client.get_notes(account).await.unwrap().is_empty());
    assert!(!client.is_syncing());

    let result = client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(105));
    assert_eq!(
        client.get_balances(account, 0).await.unwrap().total().get(PoolType::ORCHARD),
        50
    );
}

#[tokio::test]
async fn second_sync_without_new_blocks_changes_nothing() {
    let (chain, client, account) = client_synced_to_100().await;
    mine_payment_at_103(&chain, &client, account).await;
    client.start_sync(None, false, 0).await.unwrap();

    let checkpoints = client.get_checkpoints().await;
    let balance = client.get_balances(account, 1).await.unwrap();
    let tree_size = orchard_tree_size(&client).await;

    let result = client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(105));
    assert_eq!(result.cost, 0);
    assert_eq!(client.get_checkpoints().await, checkpoints);
    assert_eq!(client.get_balances(account, 1).await.unwrap(), balance);
    assert_eq!(orchard_tree_size(&client).await, tree_size);
}

#[tokio::test]
async fn cost_budget_yields_with_progress_saved() {
    let (chain, client, account) = client_synced_to_100().await;
    mine_payment_at_103(&chain, &client, account).await;

    let first = client.start_sync(Some(1), false, 0).await.unwrap();
    assert!(!first.complete);
    assert_eq!(first.height, BlockHeight::from_u32(103));
    // at most one block beyond the budget
    assert!(first.cost >= 1 && first.cost <= 2);

    let second = client.start_sync(Some(1), false, 0).await.unwrap();
    assert!(second.complete);
    assert_eq!(second.height, BlockHeight::from_u32(105));
    assert_eq!(client.get_notes(account).await.unwrap().len(), 1);
}

#[tokio::test]
async fn anchor_offset_creates_checkpoint_below_tip() {
    let (chain, client, _account) = client_synced_to_100().await;
    chain.mine_blocks(10).await;

    client.start_sync(None, false, 3).await.unwrap();
    let heights: Vec<BlockHeight> = client
        .get_checkpoints()
        .await
        .iter()
        .map(|checkpoint| checkpoint.height())
        .collect();
    assert!(heights.contains(&BlockHeight::from_u32(107)));
    assert!(heights.contains(&BlockHeight::from_u32(110)));
}

#[tokio::test]
async fn unavailable_source_keeps_last_checkpoint() {
    let (chain, client, _account) = client_synced_to_100().await;
    chain.mine_blocks(5).await;
    chain.set_unavailable(true).await;

    assert!(matches!(
        client.start_sync(None, false, 0).await,
        Err(LightClientError::Sync(SyncError::DataSourceUnavailable(_)))
    ));
    assert_eq!(
        client.wallet_height().await,
        Some(BlockHeight::from_u32(100))
    );

    chain.set_unavailable(false).await;
    let result = client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(105));
}

#[tokio::test]
async fn rescan_finds_notes_of_new_account() {
    let (chain, client, _account) = client_synced_to_100().await;
    let second = client
        .new_account("second", ABANDON_ABOUT_SEED, 1)
        .await
        .unwrap();
    let receiver = account_receiver(&client, second, PoolType::SAPLING).await;
    chain.mine_payment(receiver, 70, Memo::Empty).await;
    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(client.get_notes(second).await.unwrap().len(), 1);

    client.rescan_from(BlockHeight::from_u32(101)).await.unwrap();
    assert_eq!(
        client.wallet_height().await,
        Some(BlockHeight::from_u32(100))
    );
    assert!(client.get_notes(second).await.unwrap().is_empty());
    client.start_sync(None, false, 0).await.unwrap();
    assert_eq!(
        client.get_balances(second, 0).await.unwrap().total().get(PoolType::SAPLING),
        70
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_sync_is_rejected_while_running() {
    let (chain, client, _account) = client_synced_to_100().await;
    chain.mine_blocks(3).await;
    let client = Arc::new(client);

    let (started_sender, started_receiver) = mpsc::channel();
    let (release_sender, release_receiver) = mpsc::channel::<()>();
    let release_receiver = Mutex::new(release_receiver);
    let options = SyncOptions {
        anchor_offset: 0,
        progress: Some(Arc::new(move |progress| {
            if progress.height == BlockHeight::from_u32(101) {
                let _ = started_sender.send(());
                let _ = release_receiver.lock().unwrap().recv();
            }
        })),
        ..client.config().sync_options()
    };
    let handle = tokio::spawn({
        let client = client.clone();
        async move { client.sync_with_options(options).await }
    });

    tokio::task::spawn_blocking(move || started_receiver.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(client.is_syncing());
    assert!(matches!(
        client.start_sync(None, false, 0).await,
        Err(LightClientError::SyncAlreadyRunning)
    ));
    // reads are served from the wallet state before the sync
    assert_eq!(
        client.wallet_height().await,
        Some(BlockHeight::from_u32(100))
    );

    release_sender.send(()).unwrap();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.height, BlockHeight::from_u32(103));
    assert!(!client.is_syncing());
}
