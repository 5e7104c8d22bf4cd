use crate::{Result, WagerError};
use rollbux_core::MAX_AMOUNT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How many times a payout credit is attempted before the wager is
    /// quarantined.
    pub payout_attempts: u32,
    /// Base delay between payout attempts; grows linearly per attempt.
    pub payout_backoff: Duration,
    /// Largest stake a wager may carry. 0 means no limit beyond the ledger's.
    pub max_stake: u64,
    /// Balance granted to newly registered accounts.
    pub starting_balance: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payout_attempts: 5,
            payout_backoff: Duration::from_millis(50),
            max_stake: 0,
            starting_balance: 0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.payout_attempts == 0 {
            return Err(WagerError::config("Payout attempts must be greater than 0"));
        }

        if self.payout_backoff > Duration::from_secs(5) {
            return Err(WagerError::config(
                "Payout backoff cannot exceed 5 seconds",
            ));
        }

        if self.max_stake > MAX_AMOUNT / 2 {
            return Err(WagerError::config(format!(
                "Max stake cannot exceed {}",
                MAX_AMOUNT / 2
            )));
        }

        if self.starting_balance > MAX_AMOUNT {
            return Err(WagerError::config("Starting balance is out of range"));
        }

        Ok(())
    }

    /// Reject stakes above the configured ceiling.
    pub fn check_stake(&self, stake: u64) -> Result<()> {
        if self.max_stake > 0 && stake > self.max_stake {
            return Err(WagerError::invalid_amount(format!(
                "Stake {} exceeds the maximum of {}",
                stake, self.max_stake
            )));
        }
        Ok(())
    }
}
