use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {identity}")]
    AccountNotFound { identity: String },

    #[error("Account already exists: {identity}")]
    AlreadyExists { identity: String },

    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Account {identity} is frozen pending reconciliation")]
    Frozen { identity: String },

    #[error("Unauthorized: {principal} cannot act as {requested}")]
    Unauthorized { principal: String, requested: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn not_found(identity: impl Into<String>) -> Self {
        Self::AccountNotFound {
            identity: identity.into(),
        }
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Expected rejections, including a halted account. They leave no side
    /// effects behind and can be reported straight back to the requester.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AccountNotFound { .. }
                | Self::AlreadyExists { .. }
                | Self::InsufficientFunds { .. }
                | Self::InvalidAmount(_)
                | Self::InvalidIdentity(_)
                | Self::Frozen { .. }
                | Self::Unauthorized { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let frozen = LedgerError::Frozen {
            identity: "alice".to_string(),
        };
        assert!(frozen.is_recoverable());
        assert!(LedgerError::not_found("bob").is_recoverable());
        assert!(!LedgerError::internal("disk gone").is_recoverable());
        assert!(!LedgerError::config("bad").is_recoverable());
    }
}
