//! Line-delimited JSON messages exchanged with clients.

use crate::error::{Result, ServerError};
use rollbux_coinflip::{LedgerEvent, WagerError, WagerId};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    CreateCoinflip {
        amount: Number,
        choice: String,
        #[serde(default)]
        username: Option<String>,
    },
    JoinCoinflip {
        wager_id: WagerId,
        #[serde(default)]
        username: Option<String>,
    },
    CancelCoinflip {
        wager_id: WagerId,
        #[serde(default)]
        username: Option<String>,
    },
    ListCoinflips,
    Deposit {
        amount: Number,
        #[serde(default)]
        username: Option<String>,
    },
    Withdraw {
        amount: Number,
        #[serde(default)]
        username: Option<String>,
    },
    Balance {
        #[serde(default)]
        username: Option<String>,
    },
}

impl Request {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| ServerError::bad_request(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Login { .. } => "login",
            Self::CreateCoinflip { .. } => "create_coinflip",
            Self::JoinCoinflip { .. } => "join_coinflip",
            Self::CancelCoinflip { .. } => "cancel_coinflip",
            Self::ListCoinflips => "list_coinflips",
            Self::Deposit { .. } => "deposit",
            Self::Withdraw { .. } => "withdraw",
            Self::Balance { .. } => "balance",
        }
    }

    /// The identity a request claims to act as, if it names one.
    pub fn acting_as(&self) -> Option<&str> {
        match self {
            Self::CreateCoinflip { username, .. }
            | Self::JoinCoinflip { username, .. }
            | Self::CancelCoinflip { username, .. }
            | Self::Deposit { username, .. }
            | Self::Withdraw { username, .. }
            | Self::Balance { username } => username.as_deref(),
            _ => None,
        }
    }
}

/// Whole, non-negative currency amounts only.
pub fn parse_amount(number: &Number) -> std::result::Result<u64, WagerError> {
    number.as_u64().ok_or_else(|| {
        WagerError::invalid_amount(format!(
            "{} is not a non-negative whole amount",
            number
        ))
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok {
        request: &'static str,
        data: Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        request: Option<&'static str>,
        code: &'static str,
        message: String,
    },
    Event {
        event: LedgerEvent,
    },
}

impl Response {
    pub fn ok(request: &'static str, data: impl Serialize) -> Result<Self> {
        let data = serde_json::to_value(data).map_err(WagerError::from)?;
        Ok(Self::Ok { request, data })
    }

    pub fn error(request: Option<&'static str>, err: &ServerError) -> Self {
        Self::Error {
            request,
            code: err.code(),
            message: err.to_string(),
        }
    }

    /// One line of output, newline included.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).map_err(WagerError::from)?;
        line.push('\n');
        Ok(line)
    }
}
