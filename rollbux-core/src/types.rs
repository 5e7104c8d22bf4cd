use crate::error::{LedgerError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Largest amount a single balance or posting may hold. SQLite stores
/// integers as i64.
pub const MAX_AMOUNT: u64 = i64::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub identity: String,
    pub balance: u64,
    pub frozen: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    Deposit,
    Withdrawal,
    Stake,
    Payout,
    Refund,
    Adjustment,
}

impl EntryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Stake => "stake",
            Self::Payout => "payout",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "stake" => Ok(Self::Stake),
            "payout" => Ok(Self::Payout),
            "refund" => Ok(Self::Refund),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(LedgerError::internal(format!(
                "Unknown ledger entry reason: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EntryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annotation attached to a debit or credit and written to the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Posting {
    pub reason: EntryReason,
    pub wager_id: Option<Uuid>,
}

impl Posting {
    pub fn new(reason: EntryReason) -> Self {
        Self {
            reason,
            wager_id: None,
        }
    }

    pub fn for_wager(reason: EntryReason, wager_id: Uuid) -> Self {
        Self {
            reason,
            wager_id: Some(wager_id),
        }
    }
}

/// One row of the balance journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub identity: String,
    pub delta: i64, // +ve for credits, -ve for debits
    pub balance_after: u64,
    pub reason: EntryReason,
    pub wager_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}

/// The authenticated identity behind a live connection.
///
/// The session layer builds one after verifying credentials and hands it to
/// every ledger or wager call; nothing in the core stores it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    identity: String,
}

impl Principal {
    pub fn authenticated(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Reject requests that try to act on behalf of someone else.
    pub fn authorize(&self, requested: &str) -> Result<()> {
        if self.identity == requested {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                principal: self.identity.clone(),
                requested: requested.to_string(),
            })
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// Check that an amount fits the ledger's integer range.
pub fn check_amount(amount: u64) -> Result<u64> {
    if amount > MAX_AMOUNT {
        return Err(LedgerError::invalid_amount(format!(
            "{} exceeds the maximum of {}",
            amount, MAX_AMOUNT
        )));
    }
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_authorize() {
        let principal = Principal::authenticated("alice");
        assert!(principal.authorize("alice").is_ok());

        let err = principal.authorize("bob").unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
    }

    #[test]
    fn test_entry_reason_names() {
        for reason in [
            EntryReason::Deposit,
            EntryReason::Withdrawal,
            EntryReason::Stake,
            EntryReason::Payout,
            EntryReason::Refund,
            EntryReason::Adjustment,
        ] {
            assert_eq!(EntryReason::parse(reason.as_str()).unwrap(), reason);
        }
        assert!(EntryReason::parse("bonus").is_err());
    }

    #[test]
    fn test_check_amount() {
        assert_eq!(check_amount(40).unwrap(), 40);
        assert!(check_amount(u64::MAX).is_err());
    }
}
