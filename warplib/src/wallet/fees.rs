//! Fee rules

use serde::{Deserialize, Serialize};

use warp_sync::primitives::PoolType;

/// Marginal fee per logical action of the standard fee rule
pub const MARGINAL_FEE: u64 = 5_000;
/// Actions that are paid for even if the transaction has fewer
pub const GRACE_ACTIONS: u64 = 2;

/// Input and output counts per pool of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionCounts {
    inputs: [u64; 3],
    outputs: [u64; 3],
}

impl ActionCounts {
    /// Counts an input of the given pool.
    pub fn add_input(&mut self, pool: PoolType) {
        self.inputs[pool.index()] += 1;
    }

    /// Counts an output of the given pool.
    pub fn add_output(&mut self, pool: PoolType) {
        self.outputs[pool.index()] += 1;
    }

    /// Logical actions. Each pool contributes the larger of its input and output count.
    pub fn logical_actions(&self) -> u64 {
        self.inputs
            .iter()
            .zip(self.outputs.iter())
            .map(|(inputs, outputs)| *inputs.max(outputs))
            .sum()
    }
}

/// Rule computing the fee of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeRule {
    /// Fee proportional to the logical actions of the transaction
    Zip317 {
        /// Fee per logical action
        marginal_fee: u64,
        /// Minimum number of charged actions
        grace_actions: u64,
    },
    /// Flat fee
    Fixed(u64),
}

impl Default for FeeRule {
    fn default() -> Self {
        FeeRule::Zip317 {
            marginal_fee: MARGINAL_FEE,
            grace_actions: GRACE_ACTIONS,
        }
    }
}

impl FeeRule {
    /// Fee of a transaction with the given action counts.
    pub fn fee(&self, counts: &ActionCounts) -> u64 {
        match self {
            FeeRule::Zip317 {
                marginal_fee,
                grace_actions,
            } => marginal_fee.saturating_mul(counts.logical_actions().max(*grace_actions)),
            FeeRule::Fixed(fee) => *fee,
        }
    }
}
