use crate::accounts::AccountStore;
use crate::error::Result;
use crate::types::{Account, Posting};
use async_trait::async_trait;
use std::sync::Arc;

/// Receives every committed balance change, inside the account's exclusive
/// section. Must not block.
pub trait BalanceObserver: Send + Sync {
    fn balance_changed(&self, identity: &str, balance: u64);
}

/// Balance operations the wager engine needs from an account backend.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn register(&self, identity: &str, initial_balance: u64) -> Result<Account>;

    async fn get_balance(&self, identity: &str) -> Result<u64>;

    async fn try_debit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64>;

    async fn credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64>;

    /// Credit that ignores the freeze, for money owed to a halted account.
    async fn force_credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64>;

    async fn freeze(&self, identity: &str) -> Result<()>;

    async fn unfreeze(&self, identity: &str) -> Result<()>;

    async fn is_frozen(&self, identity: &str) -> Result<bool>;

    fn observe(&self, observer: Arc<dyn BalanceObserver>);
}

#[async_trait]
impl Ledger for AccountStore {
    async fn register(&self, identity: &str, initial_balance: u64) -> Result<Account> {
        AccountStore::register(self, identity, initial_balance).await
    }

    async fn get_balance(&self, identity: &str) -> Result<u64> {
        AccountStore::get_balance(self, identity).await
    }

    async fn try_debit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        AccountStore::try_debit(self, identity, amount, posting).await
    }

    async fn credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        AccountStore::credit(self, identity, amount, posting).await
    }

    async fn force_credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        AccountStore::force_credit(self, identity, amount, posting).await
    }

    async fn freeze(&self, identity: &str) -> Result<()> {
        AccountStore::freeze(self, identity).await
    }

    async fn unfreeze(&self, identity: &str) -> Result<()> {
        AccountStore::unfreeze(self, identity).await
    }

    async fn is_frozen(&self, identity: &str) -> Result<bool> {
        AccountStore::is_frozen(self, identity).await
    }

    fn observe(&self, observer: Arc<dyn BalanceObserver>) {
        self.add_observer(observer);
    }
}
