//! Transaction planning
//!
//! Plans select wallet notes to fund a list of recipients. Candidate notes are ordered first by pool, pools of the
//! recipients before other pools, and then largest value first with ties broken by lower height and then by note
//! id. Notes are taken in this order until the outputs and the fee are covered, so the same wallet state always
//! produces the same plan.

use std::collections::{BTreeMap, BTreeSet};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use warp_sync::keys::address::{Address, Receiver};
use warp_sync::primitives::{
    AccountId, BlockHeight, Memo, NoteId, PoolType, PoolValues, ShieldedProtocol, WalletNote,
};
use warp_sync::tree::AuthPath;

use crate::config::WalletConfig;

use super::error::WalletError;
use super::fees::{ActionCounts, FeeRule};
use super::LightWallet;

/// Fee estimation is repeated until the fee is stable, at most this many times.
pub const MAX_FEE_ATTEMPTS: usize = 10;

/// Errors that can result from planning a transaction
#[derive(Debug, thiserror::Error)]
pub enum ProposeError {
    /// Spendable notes do not cover the outputs and fee
    #[error("insufficient funds in {pool}. {shortfall} more required")]
    InsufficientFunds {
        /// Primary pool of the request
        pool: PoolType,
        /// Missing value
        shortfall: u64,
    },
    /// Address could not be decoded
    #[error("invalid address. {0}")]
    InvalidAddress(String),
    /// Address has no receiver for the requested pool
    #[error("address has no receiver for pool {0}")]
    NoReceiverForPool(PoolType),
    /// Recipient amount or note split size is zero
    #[error("zero value output")]
    ZeroValue,
    /// Fee included in the payment is not smaller than the first output
    #[error("fee {fee} exceeds output value {value}")]
    FeeExceedsValue {
        /// Required fee
        fee: u64,
        /// Value of the output paying the fee
        value: u64,
    },
    /// Fee estimation did not converge
    #[error("transaction too complex. fee did not converge after {MAX_FEE_ATTEMPTS} attempts")]
    TooComplex,
    /// Requested values do not fit in a u64
    #[error("requested value overflows")]
    ValueOverflow,
    /// Wallet has not synced a checkpoint yet
    #[error("wallet is not synced")]
    NotSynced,
    /// Wallet data error
    #[error("wallet error. {0}")]
    Wallet(#[from] WalletError),
}

/// Recipient of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Destination address
    pub address: Address,
    /// Amount to send
    pub value: u64,
    /// Pool of the address to pay to. Defaults to the most private receiver of the address.
    pub pool: Option<PoolType>,
    /// Memo of shielded outputs
    pub memo: Option<Memo>,
    /// Splits the payment into outputs of at most this value
    pub max_amount_per_note: Option<u64>,
}

impl Recipient {
    /// Recipient of `value` at `address` with defaults for everything else.
    pub fn new(address: Address, value: u64) -> Self {
        Recipient {
            address,
            value,
            pool: None,
            memo: None,
            max_amount_per_note: None,
        }
    }

    /// Sets the memo.
    pub fn with_memo(mut self, memo: Memo) -> Self {
        self.memo = Some(memo);
        self
    }

    /// Sets the pool to pay to.
    pub fn with_pool(mut self, pool: PoolType) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Sets the maximum value of each output.
    pub fn with_max_amount_per_note(mut self, max_amount_per_note: u64) -> Self {
        self.max_amount_per_note = Some(max_amount_per_note);
        self
    }
}

/// Pools notes may be spent from, relative to the pools of the outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivacyPolicy {
    /// Only the pools of the outputs
    SamePoolOnly,
    /// The pools of the outputs and both shielded pools
    #[default]
    AnyShielded,
    /// Any pool
    AnyPool,
}

/// Funding constraints of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Deducts the fee from the first output
    pub fee_included: bool,
    /// Blocks required on top of a note's block before it is spent
    pub min_confirmations: u32,
    /// Cross pool funding
    pub privacy_policy: PrivacyPolicy,
    /// Restricts inputs to these pools
    pub source_pools: Option<BTreeSet<PoolType>>,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        FundingPolicy {
            fee_included: false,
            min_confirmations: 1,
            privacy_policy: PrivacyPolicy::default(),
            source_pools: None,
        }
    }
}

/// Note selected as transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct PlannedInput {
    /// Spent note as of planning
    note: WalletNote,
    /// Authentication path against the plan's anchor, shielded notes only
    witness: Option<AuthPath>,
}

/// Output of a planned transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    /// Receiver of the output
    pub receiver: Receiver,
    /// Value of the output
    pub value: u64,
    /// Memo, ignored for transparent outputs
    pub memo: Memo,
    /// Change returned to the sending account
    pub is_change: bool,
}

/// Unsigned transaction with selected inputs and their witnesses.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct TransactionPlan {
    #[getset(get_copy = "pub")]
    account_id: AccountId,
    #[getset(get = "pub")]
    inputs: Vec<PlannedInput>,
    #[getset(get = "pub")]
    outputs: Vec<PlannedOutput>,
    #[getset(get_copy = "pub")]
    fee: u64,
    /// Height of the checkpoint the witnesses are anchored at
    #[getset(get_copy = "pub")]
    anchor_height: BlockHeight,
    /// Tree roots at the anchor height of the pools spent from
    #[getset(get = "pub")]
    anchors: BTreeMap<ShieldedProtocol, [u8; 32]>,
    /// Wallet height when the plan was created
    #[getset(get_copy = "pub")]
    wallet_height: BlockHeight,
    #[getset(get_copy = "pub")]
    expiry_height: BlockHeight,
}

impl TransactionPlan {
    /// Sum of the input values.
    pub fn total_input(&self) -> u64 {
        self.inputs.iter().map(|input| input.note.value()).sum()
    }

    /// Sum of the output values including change.
    pub fn total_output(&self) -> u64 {
        self.outputs.iter().map(|output| output.value).sum()
    }

    /// Value returned to the sending account.
    pub fn change(&self) -> u64 {
        self.outputs
            .iter()
            .filter(|output| output.is_change)
            .map(|output| output.value)
            .sum()
    }

    /// Input values per pool.
    pub fn input_values(&self) -> PoolValues {
        let mut values = PoolValues::default();
        for input in &self.inputs {
            *values.get_mut(input.note.pool()) += input.note.value();
        }
        values
    }
}

// default pool preference for funding, most private first
const POOL_PREFERENCE: [PoolType; 3] = [PoolType::ORCHARD, PoolType::SAPLING, PoolType::TRANSPARENT];

// resolves recipients to outputs, splitting by max amount per note
fn resolve_outputs(recipients: &[Recipient]) -> Result<Vec<PlannedOutput>, ProposeError> {
    let mut outputs = Vec::new();
    for recipient in recipients {
        if recipient.value == 0 {
            return Err(ProposeError::ZeroValue);
        }
        let receiver = match recipient.pool {
            Some(pool) => recipient
                .address
                .receiver(pool)
                .ok_or(ProposeError::NoReceiverForPool(pool))?,
            None => recipient
                .address
                .preferred_receiver()
                .ok_or(ProposeError::InvalidAddress(
                    "address has no receivers".to_string(),
                ))?,
        };
        let memo = match receiver {
            Receiver::Transparent(_) => Memo::Empty,
            Receiver::Shielded(_) => recipient.memo.clone().unwrap_or(Memo::Empty),
        };
        let chunk = match recipient.max_amount_per_note {
            Some(0) => return Err(ProposeError::ZeroValue),
            Some(max) => max,
            None => recipient.value,
        };

        let mut remaining = recipient.value;
        while remaining > 0 {
            let value = remaining.min(chunk);
            outputs.push(PlannedOutput {
                receiver,
                value,
                memo: memo.clone(),
                is_change: false,
            });
            remaining -= value;
        }
    }

    Ok(outputs)
}

// pools inputs may be taken from, in preference order
fn funding_pools(outputs: &[PlannedOutput], policy: &FundingPolicy) -> Vec<PoolType> {
    let mut output_values = PoolValues::default();
    for output in outputs {
        *output_values.get_mut(output.receiver.pool()) += output.value;
    }
    let mut pools: Vec<PoolType> = POOL_PREFERENCE
        .into_iter()
        .filter(|pool| output_values.get(*pool) > 0)
        .collect();
    // stable sort keeps the preference order for equal values
    pools.sort_by_key(|pool| std::cmp::Reverse(output_values.get(*pool)));

    for pool in POOL_PREFERENCE {
        if pools.contains(&pool) {
            continue;
        }
        let allowed = match policy.privacy_policy {
            PrivacyPolicy::SamePoolOnly => false,
            PrivacyPolicy::AnyShielded => pool.is_shielded(),
            PrivacyPolicy::AnyPool => true,
        };
        if allowed {
            pools.push(pool);
        }
    }
    if let Some(source_pools) = &policy.source_pools {
        pools.retain(|pool| source_pools.contains(pool));
    }

    pools
}

fn action_counts(inputs: &[&WalletNote], outputs: &[PlannedOutput]) -> ActionCounts {
    let mut counts = ActionCounts::default();
    for note in inputs {
        counts.add_input(note.pool());
    }
    for output in outputs {
        counts.add_output(output.receiver.pool());
    }
    counts
}

fn note_total(notes: &[&WalletNote]) -> u64 {
    notes
        .iter()
        .fold(0u64, |total, note| total.saturating_add(note.value()))
}

// value the inputs must cover
fn required_value(requested: u64, fee: u64, fee_included: bool) -> Result<u64, ProposeError> {
    if fee_included {
        Ok(requested)
    } else {
        requested
            .checked_add(fee)
            .ok_or(ProposeError::ValueOverflow)
    }
}

// takes candidates in order until `target` is covered. returns `None` if all candidates do not cover it.
fn select<'a>(candidates: &[&'a WalletNote], target: u64) -> Option<Vec<&'a WalletNote>> {
    let mut selected = Vec::new();
    let mut total = 0u64;
    for note in candidates {
        if total >= target {
            break;
        }
        total = total.saturating_add(note.value());
        selected.push(*note);
    }

    (total >= target).then_some(selected)
}

// pool holding the bulk of the input value, preference order breaks ties
fn change_pool(inputs: &[&WalletNote], pools: &[PoolType]) -> PoolType {
    let mut values = PoolValues::default();
    for note in inputs {
        *values.get_mut(note.pool()) += note.value();
    }

    pools
        .iter()
        .copied()
        .chain(POOL_PREFERENCE)
        .fold(None, |bulk: Option<PoolType>, pool| match bulk {
            Some(bulk) if values.get(bulk) >= values.get(pool) => Some(bulk),
            _ => Some(pool),
        })
        .unwrap_or(PoolType::ORCHARD)
}

struct Selection<'a> {
    inputs: Vec<&'a WalletNote>,
    outputs: Vec<PlannedOutput>,
    fee: u64,
}

fn finish_selection<'a>(
    inputs: Vec<&'a WalletNote>,
    mut outputs: Vec<PlannedOutput>,
    fee: u64,
    fee_included: bool,
    change: Option<PlannedOutput>,
) -> Result<Selection<'a>, ProposeError> {
    if fee_included {
        let first = outputs.first_mut().ok_or(ProposeError::ZeroValue)?;
        if first.value <= fee {
            return Err(ProposeError::FeeExceedsValue {
                fee,
                value: first.value,
            });
        }
        first.value -= fee;
    }
    outputs.extend(change);

    Ok(Selection {
        inputs,
        outputs,
        fee,
    })
}

impl LightWallet {
    /// Notes of an account eligible as inputs of a transaction anchored at `anchor_height`.
    fn eligible_notes(
        &self,
        account_id: AccountId,
        pools: &[PoolType],
        confirmed_height: BlockHeight,
        anchor_height: BlockHeight,
    ) -> Vec<&WalletNote> {
        let mut notes: Vec<&WalletNote> = self
            .account_notes(account_id)
            .filter(|note| note.is_spendable())
            .filter(|note| pools.contains(&note.pool()))
            .filter(|note| note.height() <= confirmed_height)
            .filter(|note| !note.pool().is_shielded() || note.height() <= anchor_height)
            .collect();
        let pool_rank = |note: &WalletNote| pools.iter().position(|pool| *pool == note.pool());
        notes.sort_by(|a, b| {
            pool_rank(a)
                .cmp(&pool_rank(b))
                .then(b.value().cmp(&a.value()))
                .then(a.height().cmp(&b.height()))
                .then(a.id().cmp(&b.id()))
        });

        notes
    }

    fn change_receiver(
        &self,
        account_id: AccountId,
        pool: PoolType,
    ) -> Result<Receiver, ProposeError> {
        let account = self.account(account_id)?;

        account
            .receiver(pool)
            .or_else(|| {
                POOL_PREFERENCE
                    .into_iter()
                    .find_map(|pool| account.receiver(pool))
            })
            .ok_or(ProposeError::NoReceiverForPool(pool))
    }

    // selects inputs covering the outputs and a fee that is stable for the final selection
    fn select_inputs<'a>(
        &self,
        account_id: AccountId,
        candidates: &[&'a WalletNote],
        pools: &[PoolType],
        outputs: Vec<PlannedOutput>,
        fee_included: bool,
        fee_rule: &FeeRule,
    ) -> Result<Selection<'a>, ProposeError> {
        let primary_pool = pools
            .first()
            .copied()
            .unwrap_or(PoolType::ORCHARD);
        let requested = outputs
            .iter()
            .try_fold(0u64, |total, output| total.checked_add(output.value))
            .ok_or(ProposeError::ValueOverflow)?;
        let mut fee = fee_rule.fee(&action_counts(&[], &outputs));
        // inputs paying the outputs and their fee but not the larger fee of a change output
        let mut without_change: Option<Selection<'a>> = None;

        for _ in 0..MAX_FEE_ATTEMPTS {
            let target = required_value(requested, fee, fee_included)?;
            let Some(inputs) = select(candidates, target) else {
                if let Some(selection) = without_change.take() {
                    tracing::debug!(
                        "No inputs left to fund a change output. Paying fee {} without change.",
                        selection.fee
                    );
                    return Ok(selection);
                }
                let available = note_total(candidates);
                let required = if fee_included {
                    requested
                } else {
                    requested.saturating_add(fee.max(fee_rule.fee(&action_counts(candidates, &outputs))))
                };
                return Err(ProposeError::InsufficientFunds {
                    pool: primary_pool,
                    shortfall: required.saturating_sub(available),
                });
            };
            let input_total = note_total(&inputs);

            let fee_without_change = fee_rule.fee(&action_counts(&inputs, &outputs));
            let paid_without_change = required_value(requested, fee_without_change, fee_included)?;
            if input_total == paid_without_change {
                return finish_selection(inputs, outputs, fee_without_change, fee_included, None);
            }

            let pool = change_pool(&inputs, pools);
            let change_receiver = self.change_receiver(account_id, pool)?;
            let mut with_change = outputs.clone();
            with_change.push(PlannedOutput {
                receiver: change_receiver,
                value: 0,
                memo: Memo::Empty,
                is_change: true,
            });
            let fee_with_change = fee_rule.fee(&action_counts(&inputs, &with_change));
            let paid_with_change = required_value(requested, fee_with_change, fee_included)?;
            if input_total == paid_with_change {
                // an empty change output is dropped, miners receive the difference to the smaller fee
                return finish_selection(inputs, outputs, fee_with_change, fee_included, None);
            }
            if input_total > paid_with_change {
                let change = PlannedOutput {
                    receiver: change_receiver,
                    value: input_total - paid_with_change,
                    memo: Memo::Empty,
                    is_change: true,
                };
                return finish_selection(inputs, outputs, fee_with_change, fee_included, Some(change));
            }
            if input_total > paid_without_change {
                without_change = Some(finish_selection(
                    inputs,
                    outputs.clone(),
                    input_total - requested,
                    fee_included,
                    None,
                )?);
            }

            tracing::debug!("Fee increased from {} to {}. Reselecting inputs.", fee, fee_with_change);
            fee = fee_with_change;
        }

        without_change.ok_or(ProposeError::TooComplex)
    }

    /// Plans a payment from an account to a list of recipients.
    ///
    /// Shielded inputs are anchored at the highest checkpoint at or below `wallet height - anchor_offset` and their
    /// witnesses are taken at that checkpoint. Planning does not change the wallet.
    pub fn create_payment_plan(
        &self,
        config: &WalletConfig,
        account_id: AccountId,
        recipients: &[Recipient],
        anchor_offset: u32,
        policy: &FundingPolicy,
    ) -> Result<TransactionPlan, ProposeError> {
        self.account(account_id)?;
        let outputs = resolve_outputs(recipients)?;
        if outputs.is_empty() {
            return Err(ProposeError::ZeroValue);
        }
        let wallet_height = self.wallet_height().ok_or(ProposeError::NotSynced)?;
        let anchor_height = self
            .sync_state()
            .checkpoint_at_or_below(wallet_height.saturating_sub(anchor_offset))
            .map(|checkpoint| checkpoint.height())
            .ok_or(ProposeError::NotSynced)?;
        let confirmed_height = wallet_height.saturating_sub(policy.min_confirmations);

        let pools = funding_pools(&outputs, policy);
        let candidates = self.eligible_notes(account_id, &pools, confirmed_height, anchor_height);

        let selection = self.select_inputs(
            account_id,
            &candidates,
            &pools,
            outputs,
            policy.fee_included,
            &config.fee_rule,
        )?;

        let mut inputs = Vec::with_capacity(selection.inputs.len());
        let mut anchors = BTreeMap::new();
        for note in selection.inputs {
            let witness = match note.id() {
                NoteId::Shielded { protocol, position } => {
                    let witness = self
                        .commitment_trees()
                        .witness_at_checkpoint(protocol, position, anchor_height)
                        .map_err(WalletError::from)?;
                    let anchor = self
                        .commitment_trees()
                        .root_at_checkpoint(protocol, anchor_height)
                        .ok_or_else(|| {
                            WalletError::Corrupt(format!(
                                "no {protocol:?} tree checkpoint at anchor height {anchor_height}"
                            ))
                        })?;
                    anchors.insert(protocol, anchor);
                    Some(witness)
                }
                NoteId::Transparent(_) => None,
            };
            inputs.push(PlannedInput {
                note: note.clone(),
                witness,
            });
        }

        let plan = TransactionPlan {
            account_id,
            inputs,
            outputs: selection.outputs,
            fee: selection.fee,
            anchor_height,
            anchors,
            wallet_height,
            expiry_height: wallet_height + 1 + config.expiry_delta,
        };
        tracing::info!(
            "Planned transaction with {} inputs, {} outputs and fee {}.",
            plan.inputs.len(),
            plan.outputs.len(),
            plan.fee
        );

        Ok(plan)
    }

    /// Plans a transfer between two pools of the same account.
    ///
    /// Without a `value` every eligible note of `from` is spent and the fee is deducted from the transferred value.
    pub fn create_transfer_plan(
        &self,
        config: &WalletConfig,
        account_id: AccountId,
        from: PoolType,
        to: PoolType,
        value: Option<u64>,
        anchor_offset: u32,
        min_confirmations: u32,
    ) -> Result<TransactionPlan, ProposeError> {
        let receiver = self
            .account(account_id)?
            .receiver(to)
            .ok_or(ProposeError::NoReceiverForPool(to))?;
        let policy = FundingPolicy {
            fee_included: value.is_none(),
            min_confirmations,
            privacy_policy: PrivacyPolicy::AnyPool,
            source_pools: Some(BTreeSet::from([from])),
        };
        let value = match value {
            Some(value) => value,
            None => {
                let wallet_height = self.wallet_height().ok_or(ProposeError::NotSynced)?;
                let anchor_height = self
                    .sync_state()
                    .checkpoint_at_or_below(wallet_height.saturating_sub(anchor_offset))
                    .map(|checkpoint| checkpoint.height())
                    .ok_or(ProposeError::NotSynced)?;
                let available = note_total(&self.eligible_notes(
                    account_id,
                    &[from],
                    wallet_height.saturating_sub(min_confirmations),
                    anchor_height,
                ));
                if available == 0 {
                    let mut counts = ActionCounts::default();
                    counts.add_output(to);
                    return Err(ProposeError::InsufficientFunds {
                        pool: from,
                        shortfall: config.fee_rule.fee(&counts),
                    });
                }
                available
            }
        };

        self.create_payment_plan(
            config,
            account_id,
            &[Recipient::new(Address::from(receiver), value)],
            anchor_offset,
            &policy,
        )
    }

    /// Plans spending all transparent coins of an account into a shielded pool.
    pub fn create_shield_plan(
        &self,
        config: &WalletConfig,
        account_id: AccountId,
        to: ShieldedProtocol,
        min_confirmations: u32,
    ) -> Result<TransactionPlan, ProposeError> {
        self.create_transfer_plan(
            config,
            account_id,
            PoolType::TRANSPARENT,
            PoolType::Shielded(to),
            None,
            0,
            min_confirmations,
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use test_case::test_case;
    use warp_sync::keys::shielded::PaymentAddress;
    use warp_sync::keys::address::ChainType;
    use warp_sync::primitives::{
        BlockHash, BlockId, Checkpoint, NoteData, Nullifier, TxId,
    };
    use warp_sync::traits::{SyncCommitmentTrees, SyncNotes, SyncWallet};

    use super::*;

    pub(crate) const SEED: [u8; 32] = [5u8; 32];

    pub(crate) fn config() -> WalletConfig {
        WalletConfig::default().with_fee_rule(FeeRule::Fixed(10))
    }

    pub(crate) fn stranger(pool: PoolType) -> Address {
        match pool {
            PoolType::Transparent => Address::Transparent(
                warp_sync::keys::transparent::TransparentAddress([9u8; 20]),
            ),
            PoolType::Shielded(protocol) => {
                Address::Shielded(PaymentAddress::from_parts(protocol, [9u8; 32]))
            }
        }
    }

    // wallet with notes of the given values appended to the orchard tree at height 10 and checkpointed at 10
    pub(crate) fn wallet_with_notes(values: &[(PoolType, u64)]) -> LightWallet {
        let mut wallet = LightWallet::new(ChainType::Regtest, BlockHeight::from_u32(1));
        wallet.add_account_from_seed("main", &SEED, 0).unwrap();
        let height = BlockHeight::from_u32(10);

        for (i, (pool, value)) in values.iter().enumerate() {
            let txid = TxId::from_bytes([i as u8 + 1; 32]);
            let note = match pool {
                PoolType::Shielded(protocol) => {
                    let cmx = [i as u8 + 1; 32];
                    let position = wallet
                        .get_commitment_trees_mut()
                        .unwrap()
                        .append(*protocol, cmx, true)
                        .unwrap();
                    WalletNote::from_parts(
                        NoteId::Shielded {
                            protocol: *protocol,
                            position,
                        },
                        AccountId::ZERO,
                        *value,
                        height,
                        txid,
                        NoteData::Shielded {
                            recipient: [0u8; 32],
                            rseed: [0u8; 32],
                            cmx,
                            nullifier: Nullifier::from_bytes([i as u8 + 1; 32]),
                        },
                    )
                }
                PoolType::Transparent => {
                    let address = *wallet
                        .account(AccountId::ZERO)
                        .unwrap()
                        .transparent_addresses()
                        .values()
                        .next()
                        .unwrap();
                    WalletNote::from_parts(
                        NoteId::Transparent(warp_sync::primitives::OutPoint { txid, index: 0 }),
                        AccountId::ZERO,
                        *value,
                        height,
                        txid,
                        NoteData::Transparent {
                            address,
                            address_index: 0,
                        },
                    )
                }
            };
            wallet.insert_note(note).unwrap();
        }

        // pad each tree so every witness has a right sibling
        for protocol in [ShieldedProtocol::Sapling, ShieldedProtocol::Orchard] {
            wallet
                .get_commitment_trees_mut()
                .unwrap()
                .append(protocol, [0xEE; 32], false)
                .unwrap();
        }
        wallet
            .get_commitment_trees_mut()
            .unwrap()
            .checkpoint(height)
            .unwrap();
        let checkpoint = Checkpoint::from_parts(
            BlockId {
                height,
                hash: BlockHash::from_bytes([1u8; 32]),
            },
            0,
            wallet.commitment_trees().size(ShieldedProtocol::Sapling),
            wallet.commitment_trees().size(ShieldedProtocol::Orchard),
            BTreeMap::new(),
        );
        wallet
            .get_sync_state_mut()
            .unwrap()
            .checkpoints_mut()
            .insert(height, checkpoint);
        wallet
    }

    pub(crate) fn zero_conf() -> FundingPolicy {
        FundingPolicy {
            min_confirmations: 0,
            ..Default::default()
        }
    }

    #[test]
    fn single_note_payment_returns_change() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 1000)]);
        let plan = wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
                0,
                &zero_conf(),
            )
            .unwrap();

        assert_eq!(plan.inputs().len(), 1);
        assert_eq!(plan.fee(), 10);
        assert_eq!(plan.outputs().len(), 2);
        assert_eq!(plan.outputs()[0].value, 400);
        assert_eq!(plan.change(), 590);
        assert_eq!(plan.total_input(), plan.total_output() + plan.fee());
        assert!(plan.inputs()[0].witness().is_some());
        assert!(plan.anchors().contains_key(&ShieldedProtocol::Orchard));
        assert_eq!(plan.expiry_height(), BlockHeight::from_u32(10 + 1 + 40));
    }

    #[test]
    fn selection_prefers_largest_notes() {
        let wallet = wallet_with_notes(&[
            (PoolType::ORCHARD, 100),
            (PoolType::ORCHARD, 700),
            (PoolType::ORCHARD, 300),
        ]);
        let plan = wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 900)],
                0,
                &zero_conf(),
            )
            .unwrap();

        let values: Vec<u64> = plan.inputs().iter().map(|input| input.note().value()).collect();
        assert_eq!(values, vec![700, 300]);
        assert_eq!(plan.change(), 90);
    }

    #[test]
    fn shortfall_includes_fee() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 300), (PoolType::ORCHARD, 200)]);
        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[Recipient::new(stranger(PoolType::ORCHARD), 600)],
            0,
            &zero_conf(),
        );

        assert!(matches!(
            result,
            Err(ProposeError::InsufficientFunds {
                pool: PoolType::ORCHARD,
                shortfall: 110
            })
        ));
    }

    #[test]
    fn exact_amount_has_no_change() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 410)]);
        let plan = wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
                0,
                &zero_conf(),
            )
            .unwrap();

        assert_eq!(plan.outputs().len(), 1);
        assert_eq!(plan.change(), 0);
    }

    #[test_case(PrivacyPolicy::SamePoolOnly => false; "same pool only")]
    #[test_case(PrivacyPolicy::AnyShielded => true; "any shielded")]
    #[test_case(PrivacyPolicy::AnyPool => true; "any pool")]
    fn cross_pool_funding(privacy_policy: PrivacyPolicy) -> bool {
        let wallet = wallet_with_notes(&[(PoolType::SAPLING, 1000)]);
        let policy = FundingPolicy {
            privacy_policy,
            ..zero_conf()
        };

        wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
                0,
                &policy,
            )
            .is_ok()
    }

    #[test]
    fn same_pool_notes_are_spent_first() {
        let wallet = wallet_with_notes(&[(PoolType::SAPLING, 5000), (PoolType::ORCHARD, 1000)]);
        let plan = wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
                0,
                &zero_conf(),
            )
            .unwrap();

        assert_eq!(plan.inputs().len(), 1);
        assert_eq!(plan.inputs()[0].note().pool(), PoolType::ORCHARD);
    }

    #[test]
    fn fee_included_is_deducted_from_first_output() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 1000)]);
        let policy = FundingPolicy {
            fee_included: true,
            ..zero_conf()
        };
        let plan = wallet
            .create_payment_plan(
                &config(),
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 1000)],
                0,
                &policy,
            )
            .unwrap();

        assert_eq!(plan.outputs().len(), 1);
        assert_eq!(plan.outputs()[0].value, 990);
        assert_eq!(plan.fee(), 10);
    }

    #[test]
    fn large_payments_are_split() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 1000)]);
        let recipient =
            Recipient::new(stranger(PoolType::ORCHARD), 250).with_max_amount_per_note(100);
        let plan = wallet
            .create_payment_plan(&config(), AccountId::ZERO, &[recipient], 0, &zero_conf())
            .unwrap();

        let values: Vec<u64> = plan
            .outputs()
            .iter()
            .filter(|output| !output.is_change)
            .map(|output| output.value)
            .collect();
        assert_eq!(values, vec![100, 100, 50]);
    }

    #[test]
    fn unconfirmed_and_excluded_notes_are_not_selected() {
        let mut wallet = wallet_with_notes(&[(PoolType::ORCHARD, 1000), (PoolType::ORCHARD, 50)]);
        let large = wallet
            .notes()
            .values()
            .find(|note| note.value() == 1000)
            .unwrap()
            .id();
        wallet.exclude_note(AccountId::ZERO, large, true).unwrap();

        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
            0,
            &zero_conf(),
        );
        assert!(matches!(
            result,
            Err(ProposeError::InsufficientFunds { shortfall: 360, .. })
        ));

        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[Recipient::new(stranger(PoolType::ORCHARD), 10)],
            0,
            &FundingPolicy::default(),
        );
        assert!(matches!(
            result,
            Err(ProposeError::InsufficientFunds { shortfall: 20, .. })
        ));
    }

    #[test]
    fn shield_plan_spends_all_transparent_coins() {
        let wallet = wallet_with_notes(&[
            (PoolType::TRANSPARENT, 600),
            (PoolType::TRANSPARENT, 400),
            (PoolType::ORCHARD, 5000),
        ]);
        let plan = wallet
            .create_shield_plan(&config(), AccountId::ZERO, ShieldedProtocol::Orchard, 0)
            .unwrap();

        assert_eq!(plan.inputs().len(), 2);
        assert!(plan
            .inputs()
            .iter()
            .all(|input| input.note().pool() == PoolType::TRANSPARENT));
        assert_eq!(plan.outputs().len(), 1);
        assert_eq!(plan.outputs()[0].receiver.pool(), PoolType::ORCHARD);
        assert_eq!(plan.outputs()[0].value, 990);
        assert!(plan.anchors().is_empty());
    }

    #[test]
    fn zip317_fee_grows_with_inputs() {
        let wallet = wallet_with_notes(&[
            (PoolType::ORCHARD, 9000),
            (PoolType::ORCHARD, 9000),
            (PoolType::ORCHARD, 9000),
        ]);
        let config = WalletConfig::default();
        let plan = wallet
            .create_payment_plan(
                &config,
                AccountId::ZERO,
                &[Recipient::new(stranger(PoolType::ORCHARD), 10_000)],
                0,
                &zero_conf(),
            )
            .unwrap();

        // 3 inputs and 2 outputs are 3 logical actions
        assert_eq!(plan.inputs().len(), 3);
        assert_eq!(plan.fee(), 15_000);
        assert_eq!(plan.change(), 2_000);
        assert_eq!(plan.total_input(), plan.total_output() + plan.fee());
    }

    #[test]
    fn remainder_goes_to_fee_when_change_is_unaffordable() {
        // 10_000 fee without change and 15_000 with a change output
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 14_000)]);
        let plan = wallet
            .create_payment_plan(
                &WalletConfig::default(),
                AccountId::ZERO,
                &[
                    Recipient::new(stranger(PoolType::ORCHARD), 1_000),
                    Recipient::new(stranger(PoolType::ORCHARD), 1_000),
                ],
                0,
                &zero_conf(),
            )
            .unwrap();

        assert_eq!(plan.inputs().len(), 1);
        assert_eq!(plan.outputs().len(), 2);
        assert_eq!(plan.change(), 0);
        assert_eq!(plan.fee(), 12_000);
        assert_eq!(plan.total_input(), plan.total_output() + plan.fee());
    }

    #[test]
    fn empty_account_shortfall_is_value_plus_fee() {
        let wallet = wallet_with_notes(&[]);
        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[Recipient::new(stranger(PoolType::ORCHARD), 400)],
            0,
            &zero_conf(),
        );

        assert!(matches!(
            result,
            Err(ProposeError::InsufficientFunds {
                pool: PoolType::ORCHARD,
                shortfall: 410
            })
        ));
    }

    #[test]
    fn shield_without_transparent_coins_is_short_by_the_fee() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 5000)]);

        assert!(matches!(
            wallet.create_shield_plan(&config(), AccountId::ZERO, ShieldedProtocol::Orchard, 0),
            Err(ProposeError::InsufficientFunds {
                pool: PoolType::TRANSPARENT,
                shortfall: 10
            })
        ));
    }

    #[test]
    fn overflowing_request_is_rejected() {
        let wallet = wallet_with_notes(&[(PoolType::ORCHARD, 1000)]);
        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[
                Recipient::new(stranger(PoolType::ORCHARD), u64::MAX),
                Recipient::new(stranger(PoolType::ORCHARD), 1),
            ],
            0,
            &zero_conf(),
        );
        assert!(matches!(result, Err(ProposeError::ValueOverflow)));

        let result = wallet.create_payment_plan(
            &config(),
            AccountId::ZERO,
            &[Recipient::new(stranger(PoolType::ORCHARD), u64::MAX - 5)],
            0,
            &zero_conf(),
        );
        assert!(matches!(result, Err(ProposeError::ValueOverflow)));
    }
}
