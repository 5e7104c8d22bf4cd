pub mod accounts;
pub mod serve;

pub use accounts::{
    adjust_balance, list_accounts, register_account, show_history, show_supply, unfreeze_account,
};
pub use serve::serve;
