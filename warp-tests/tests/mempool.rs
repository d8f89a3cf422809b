use testvectors::block_rewards::{FIXED_TEST_FEE, FUNDING_NOTE_VALUE};
use warp_sync::keys::address::Address;
use warp_sync::primitives::PoolType;
use warplib::testutils::scenarios::funded_recipient;
use warplib::testutils::{account_receiver, sync_to_tip};
use warplib::wallet::propose::{FundingPolicy, Recipient};

#[tokio::test]
async fn unconfirmed_payment_shows_in_mempool_balance() {
    let (scenario, recipient, recipient_account) = funded_recipient(PoolType::SAPLING).await;
    let receiver = account_receiver(&recipient, recipient_account, PoolType::SAPLING).await;

    let txid = scenario
        .client
        .send(
            scenario.account,
            &[Recipient::new(Address::from(receiver), 300_000)],
            &FundingPolicy::default(),
        )
        .await
        .unwrap();
    assert_eq!(scenario.chain.mempool_txids().await, vec![txid]);

    recipient.poll_mempool().await.unwrap();
    scenario.client.poll_mempool().await.unwrap();

    let entries = recipient.get_mempool_entries(recipient_account).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].txid, txid);
    assert_eq!(entries[0].value_delta, 300_000);
    assert_eq!(
        recipient
            .get_mempool_balance(recipient_account)
            .await
            .unwrap()
            .get(PoolType::SAPLING),
        300_000
    );
    // confirmed balances are unaffected
    assert_eq!(
        recipient
            .get_balances(recipient_account, 0)
            .await
            .unwrap()
            .total()
            .total(),
        0
    );
    assert_eq!(
        scenario
            .client
            .get_mempool_balance(scenario.account)
            .await
            .unwrap()
            .get(PoolType::SAPLING),
        FUNDING_NOTE_VALUE - 300_000 - FIXED_TEST_FEE
    );
}

#[tokio::test]
async fn mined_block_clears_mempool_entries() {
    let (scenario, recipient, recipient_account) = funded_recipient(PoolType::ORCHARD).await;
    let receiver = account_receiver(&recipient, recipient_account, PoolType::ORCHARD).await;
    scenario
        .client
        .send(
            scenario.account,
            &[Recipient::new(Address::from(receiver), 20_000)],
            &FundingPolicy::default(),
        )
        .await
        .unwrap();
    recipient.poll_mempool().await.unwrap();
    assert_eq!(recipient.get_mempool_entries(recipient_account).await.len(), 1);

    scenario.chain.mine_blocks(1).await;
    recipient.poll_mempool().await.unwrap();
    assert!(recipient
        .get_mempool_entries(recipient_account)
        .await
        .is_empty());

    sync_to_tip(&recipient).await;
    assert_eq!(
        recipient
            .get_mempool_balance(recipient_account)
            .await
            .unwrap()
            .get(PoolType::ORCHARD),
        20_000
    );
}

#[tokio::test]
async fn mempool_monitor_starts_once() {
    let (scenario, _recipient, _recipient_account) = funded_recipient(PoolType::ORCHARD).await;
    let client = &scenario.client;

    assert!(client.start_mempool_monitor().await);
    assert!(!client.start_mempool_monitor().await);
    client.stop_mempool_monitor().await;
    assert!(client.get_mempool_entries(scenario.account).await.is_empty());
    assert!(client.start_mempool_monitor().await);
    client.stop_mempool_monitor().await;
}
