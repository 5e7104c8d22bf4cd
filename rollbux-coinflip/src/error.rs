use rollbux_core::LedgerError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WagerError>;

#[derive(Error, Debug)]
pub enum WagerError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Wager not found: {0}")]
    NotFound(Uuid),

    #[error("Wager {0} has already been claimed")]
    AlreadyClaimed(Uuid),

    #[error("Only the host can cancel wager {0}")]
    NotOwner(Uuid),

    #[error("Cannot join your own wager {0}")]
    SelfJoin(Uuid),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid prediction: {0}")]
    InvalidPrediction(String),

    #[error("Ledger inconsistency on wager {wager_id}: {detail}")]
    Inconsistency { wager_id: Uuid, detail: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WagerError {
    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => match e {
                LedgerError::AccountNotFound { .. } => "NotFound",
                LedgerError::AlreadyExists { .. } => "AlreadyExists",
                LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
                LedgerError::InvalidAmount(_) => "InvalidAmount",
                LedgerError::InvalidIdentity(_) => "InvalidIdentity",
                LedgerError::Frozen { .. } => "Frozen",
                LedgerError::Unauthorized { .. } => "Unauthorized",
                LedgerError::Config(_) => "Config",
                _ => "Internal",
            },
            Self::NotFound(_) => "NotFound",
            Self::AlreadyClaimed(_) => "AlreadyClaimed",
            Self::NotOwner(_) => "NotOwner",
            Self::SelfJoin(_) => "SelfJoin",
            Self::InvalidAmount(_) => "InvalidAmount",
            Self::InvalidPrediction(_) => "InvalidPrediction",
            Self::Inconsistency { .. } => "Inconsistency",
            Self::Config(_) => "Config",
            Self::Serialization(_) | Self::Internal(_) => "Internal",
        }
    }

    /// Expected, side-effect free rejections of a caller's request.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_recoverable(),
            Self::NotFound(_)
            | Self::AlreadyClaimed(_)
            | Self::NotOwner(_)
            | Self::SelfJoin(_)
            | Self::InvalidAmount(_)
            | Self::InvalidPrediction(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frozen_account_is_a_plain_rejection() {
        let frozen = WagerError::from(LedgerError::Frozen {
            identity: "alice".to_string(),
        });
        assert_eq!(frozen.code(), "Frozen");
        assert!(frozen.is_recoverable());

        let stuck = WagerError::Inconsistency {
            wager_id: Uuid::new_v4(),
            detail: "payout failed".to_string(),
        };
        assert!(!stuck.is_recoverable());
    }
}
