use crate::{Result, WagerError};
use chrono::{DateTime, Utc};
use rollbux_core::MAX_AMOUNT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type WagerId = Uuid;

/// The two outcomes of a flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinSide {
    Heads,
    Tails,
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heads => f.write_str("Heads"),
            Self::Tails => f.write_str("Tails"),
        }
    }
}

impl FromStr for CoinSide {
    type Err = WagerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "heads" | "h" => Ok(Self::Heads),
            "tails" | "t" => Ok(Self::Tails),
            other => Err(WagerError::InvalidPrediction(other.to_string())),
        }
    }
}

/// Wager lifecycle: Open -> Matched -> Settled, or Open -> Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerStatus {
    Open,
    Matched,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub host: String,
    pub stake: u64,
    pub prediction: CoinSide,
    pub created_at: DateTime<Utc>,
    pub status: WagerStatus,
    pub joiner: Option<String>,
    pub outcome: Option<CoinSide>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Wager {
    /// A fresh Open wager. The stake must be positive and small enough that
    /// the pot (twice the stake) fits the ledger.
    pub fn new(host: impl Into<String>, stake: u64, prediction: CoinSide) -> Result<Self> {
        if stake == 0 {
            return Err(WagerError::invalid_amount("Stake must be positive"));
        }
        if stake > MAX_AMOUNT / 2 {
            return Err(WagerError::invalid_amount(format!(
                "Stake {} exceeds the maximum of {}",
                stake,
                MAX_AMOUNT / 2
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            host: host.into(),
            stake,
            prediction,
            created_at: Utc::now(),
            status: WagerStatus::Open,
            joiner: None,
            outcome: None,
            settled_at: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == WagerStatus::Open
    }

    /// Both stakes together; what the winner is credited.
    pub fn pot(&self) -> u64 {
        self.stake * 2
    }

    /// Who takes the pot for a given outcome. `None` until a joiner exists.
    pub fn winner_for(&self, outcome: CoinSide) -> Option<&str> {
        if outcome == self.prediction {
            Some(&self.host)
        } else {
            self.joiner.as_deref()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wager_validation() {
        let wager = Wager::new("alice", 40, CoinSide::Heads).unwrap();
        assert!(wager.is_open());
        assert_eq!(wager.pot(), 80);
        assert!(wager.joiner.is_none());

        assert!(matches!(
            Wager::new("alice", 0, CoinSide::Heads),
            Err(WagerError::InvalidAmount(_))
        ));
        assert!(matches!(
            Wager::new("alice", MAX_AMOUNT, CoinSide::Tails),
            Err(WagerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_winner_for() {
        let mut wager = Wager::new("alice", 10, CoinSide::Tails).unwrap();
        assert_eq!(wager.winner_for(CoinSide::Tails), Some("alice"));
        assert_eq!(wager.winner_for(CoinSide::Heads), None);

        wager.joiner = Some("bob".to_string());
        assert_eq!(wager.winner_for(CoinSide::Heads), Some("bob"));
    }

    #[test]
    fn test_coin_side_parsing() {
        assert_eq!("Heads".parse::<CoinSide>().unwrap(), CoinSide::Heads);
        assert_eq!("tails".parse::<CoinSide>().unwrap(), CoinSide::Tails);
        assert!("edge".parse::<CoinSide>().is_err());
    }
}
