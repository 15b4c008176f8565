//! Balance adjustments and the order in which they take row locks.
//!
//! Each adjustment locks its account row until the transaction ends. Two
//! transfers that touch the same pair of accounts must lock them in the same
//! order or they can each end up holding one row while waiting on the other.
//! The order used everywhere is ascending [`AccountId`].

use serde::{Deserialize, Serialize};
use simplebank_common::{AccountId, TransferStep};

use crate::account::AddAccountBalanceParams;
use crate::transfer::TransferParams;

/// Which side of a transfer an adjustment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceSide {
    From,
    To,
}

/// One signed balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceAdjustment {
    pub side: BalanceSide,
    pub account_id: AccountId,
    pub delta: i64,
}

impl BalanceAdjustment {
    /// The transfer step reported when this adjustment fails.
    pub fn step(&self) -> TransferStep {
        match self.side {
            BalanceSide::From => TransferStep::AdjustFromBalance,
            BalanceSide::To => TransferStep::AdjustToBalance,
        }
    }

    pub fn params(&self) -> AddAccountBalanceParams {
        AddAccountBalanceParams {
            id: self.account_id,
            amount: self.delta,
        }
    }
}

/// Both adjustments of a transfer, arranged in lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPlan {
    pub first: BalanceAdjustment,
    pub second: BalanceAdjustment,
}

impl LockPlan {
    /// Arrange the debit of the source and the credit of the destination so
    /// the lower account id is adjusted first, whatever the direction.
    pub fn for_transfer(params: &TransferParams) -> Self {
        let debit = BalanceAdjustment {
            side: BalanceSide::From,
            account_id: params.from_account_id,
            delta: -params.amount,
        };
        let credit = BalanceAdjustment {
            side: BalanceSide::To,
            account_id: params.to_account_id,
            delta: params.amount,
        };

        if params.from_account_id < params.to_account_id {
            Self {
                first: debit,
                second: credit,
            }
        } else {
            Self {
                first: credit,
                second: debit,
            }
        }
    }

    /// Account ids in the order their rows will be locked.
    pub fn lock_sequence(&self) -> [AccountId; 2] {
        [self.first.account_id, self.second.account_id]
    }
}
