//! Simulation scenarios.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use simplebank_common::AccountId;
use simplebank_ledger::TransferParams;

/// Shape of the generated transfer load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Every transfer goes from the first account to the second.
    OneWay,
    /// Transfers alternate between the first two accounts, so their
    /// balances end where they started.
    Interleaved,
    /// Random pairs of distinct accounts.
    Random,
}

impl Scenario {
    /// Load a scenario by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "one-way" => Ok(Self::OneWay),
            "interleaved" => Ok(Self::Interleaved),
            "random" => Ok(Self::Random),
            _ => Err(anyhow::anyhow!(
                "Unknown scenario: {} (expected one-way, interleaved or random)",
                name
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OneWay => "one-way",
            Self::Interleaved => "interleaved",
            Self::Random => "random",
        }
    }

    /// Build `count` transfers of `amount` over `accounts`.
    pub fn plan<R: Rng>(
        &self,
        accounts: &[AccountId],
        count: usize,
        amount: i64,
        rng: &mut R,
    ) -> anyhow::Result<Vec<TransferParams>> {
        if accounts.len() < 2 {
            anyhow::bail!("scenario {} needs at least 2 accounts", self);
        }
        if amount <= 0 {
            anyhow::bail!("transfer amount must be positive, got {}", amount);
        }
        let (a, b) = (accounts[0], accounts[1]);

        let plan = (0..count)
            .map(|i| match self {
                Self::OneWay => TransferParams::new(a, b, amount),
                Self::Interleaved if i % 2 == 1 => TransferParams::new(b, a, amount),
                Self::Interleaved => TransferParams::new(a, b, amount),
                Self::Random => {
                    let from = rng.gen_range(0..accounts.len());
                    // Shift by 1..len so the destination never equals the source.
                    let to = (from + rng.gen_range(1..accounts.len())) % accounts.len();
                    TransferParams::new(accounts[from], accounts[to], amount)
                }
            })
            .collect();

        Ok(plan)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
