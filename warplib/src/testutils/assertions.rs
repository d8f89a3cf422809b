//! contains functions that compare wallet state with expected values

use warp_sync::client::BlockSource;
use warp_sync::primitives::{AccountId, PoolType, PoolValues, TxId};

use crate::config::FeeRule;
use crate::lightclient::LightClient;
use crate::wallet::propose::TransactionPlan;

#[allow(missing_docs)] // error types document themselves
#[derive(Debug, thiserror::Error)]
pub enum PlanToTransactionComparisonError {
    #[error("transaction {0} is not recorded for the account")]
    MissingRecord(TxId),
    #[error("mismatch: recorded spent value {recorded} but plan spends {planned}")]
    SpentMismatch { recorded: u64, planned: u64 },
    #[error("mismatch: recorded change {recorded} but plan returns {planned}")]
    ChangeMismatch { recorded: u64, planned: u64 },
}

/// Checks that inputs cover outputs plus fee exactly and that the fee follows `fee_rule`.
pub fn assert_plan_balanced(plan: &TransactionPlan, fee_rule: &FeeRule) {
    assert_eq!(
        plan.total_input(),
        plan.total_output() + plan.fee(),
        "plan is not balanced: {plan:?}"
    );
    if let FeeRule::Fixed(fee) = fee_rule {
        assert_eq!(plan.fee(), *fee);
    }
}

/// Compares a mined transaction as recorded by the sender's wallet with the plan it was built from.
///
/// The account must have synced past the block the transaction was mined in.
pub async fn compare_plan_with_record<S: BlockSource>(
    client: &LightClient<S>,
    account_id: AccountId,
    plan: &TransactionPlan,
    txid: TxId,
) -> Result<(), PlanToTransactionComparisonError> {
    let summaries = client.get_txs(account_id).await.unwrap_or_default();
    let summary = summaries
        .iter()
        .find(|summary| summary.txid == txid)
        .ok_or(PlanToTransactionComparisonError::MissingRecord(txid))?;

    if summary.spent.total() != plan.total_input() {
        return Err(PlanToTransactionComparisonError::SpentMismatch {
            recorded: summary.spent.total(),
            planned: plan.total_input(),
        });
    }
    if summary.received.total() != plan.change() {
        return Err(PlanToTransactionComparisonError::ChangeMismatch {
            recorded: summary.received.total(),
            planned: plan.change(),
        });
    }

    Ok(())
}

/// Checks the spendable balance of an account per pool.
pub async fn assert_spendable_balance<S: BlockSource>(
    client: &LightClient<S>,
    account_id: AccountId,
    expected: [(PoolType, u64); 3],
) {
    let balance = client
        .get_balances(account_id, 1)
        .await
        .expect("account exists");
    let mut values = PoolValues::default();
    for (pool, value) in expected {
        *values.get_mut(pool) = value;
    }
    assert_eq!(balance.spendable, values, "spendable balance of {account_id}");
}

/// Checks that checkpoints are ordered, their tree sizes never shrink and the latest one is at the wallet height.
pub async fn assert_checkpoints_consistent<S: BlockSource>(client: &LightClient<S>) {
    let checkpoints = client.get_checkpoints().await;
    for pair in checkpoints.windows(2) {
        assert!(pair[0].height() < pair[1].height());
        assert!(pair[0].sapling_tree_size() <= pair[1].sapling_tree_size());
        assert!(pair[0].orchard_tree_size() <= pair[1].orchard_tree_size());
    }
    assert_eq!(
        checkpoints.last().map(|checkpoint| checkpoint.height()),
        client.wallet_height().await
    );
}
