use rollbux_coinflip::WagerError;
use rollbux_core::LedgerError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("{0}")]
    Wager(#[from] WagerError),

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<LedgerError> for ServerError {
    fn from(e: LedgerError) -> Self {
        Self::Wager(WagerError::Ledger(e))
    }
}

impl ServerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Wager(e) => e.code(),
            Self::NotLoggedIn => "NotLoggedIn",
            Self::InvalidCredentials => "InvalidCredentials",
            Self::BadRequest(_) => "BadRequest",
            Self::Config(_) => "Config",
            Self::Storage(_) | Self::Io(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let err: ServerError = LedgerError::Unauthorized {
            principal: "alice".to_string(),
            requested: "bob".to_string(),
        }
        .into();
        assert_eq!(err.code(), "Unauthorized");
        assert_eq!(ServerError::NotLoggedIn.code(), "NotLoggedIn");
        assert_eq!(ServerError::bad_request("x").code(), "BadRequest");
    }
}
