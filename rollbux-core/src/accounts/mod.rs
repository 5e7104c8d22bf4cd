//! In-memory account balances backed by the durable ledger tables.
//!
//! Every identity owns its own async mutex. A debit or credit holds that
//! mutex while it checks the balance, writes the new balance and journal row
//! to storage, and finally updates the cached value, so readers never see a
//! balance that storage does not also hold.

pub mod ledger;

pub use ledger::{BalanceObserver, Ledger};

use crate::error::{LedgerError, Result};
use crate::storage::{LedgerStore, Storage};
use crate::types::{check_amount, Account, LedgerEntry, Posting};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug)]
struct AccountCell {
    balance: u64,
    frozen: bool,
    created_at: DateTime<Utc>,
}

pub struct AccountStore {
    storage: Arc<Storage>,
    accounts: RwLock<HashMap<String, Arc<Mutex<AccountCell>>>>,
    observers: RwLock<Vec<Arc<dyn BalanceObserver>>>,
}

impl AccountStore {
    /// Load every persisted account into memory.
    pub async fn open(storage: Arc<Storage>) -> Result<Self> {
        let persisted = LedgerStore::new(&storage).load_accounts().await?;

        let accounts = persisted
            .into_iter()
            .map(|account| {
                let cell = AccountCell {
                    balance: account.balance,
                    frozen: account.frozen,
                    created_at: account.created_at,
                };
                (account.identity, Arc::new(Mutex::new(cell)))
            })
            .collect::<HashMap<_, _>>();

        tracing::info!("Loaded {} accounts", accounts.len());

        Ok(Self {
            storage,
            accounts: RwLock::new(accounts),
            observers: RwLock::new(Vec::new()),
        })
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Be told of every balance change, in the order the changes commit.
    pub fn add_observer(&self, observer: Arc<dyn BalanceObserver>) {
        self.observers.write().push(observer);
    }

    // Called with the account's section held.
    fn notify(&self, identity: &str, balance: u64) {
        for observer in self.observers.read().iter() {
            observer.balance_changed(identity, balance);
        }
    }

    /// Create an account. Identity uniqueness is enforced by the
    /// `accounts` primary key, so concurrent registrations of one name
    /// cannot both succeed.
    pub async fn register(&self, identity: &str, initial_balance: u64) -> Result<Account> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(LedgerError::InvalidIdentity(
                "identity cannot be empty".to_string(),
            ));
        }
        check_amount(initial_balance)?;

        if self.accounts.read().contains_key(identity) {
            return Err(LedgerError::AlreadyExists {
                identity: identity.to_string(),
            });
        }

        let account = Account {
            identity: identity.to_string(),
            balance: initial_balance,
            frozen: false,
            created_at: Utc::now(),
        };
        LedgerStore::new(&self.storage)
            .insert_account(&account)
            .await?;

        let cell = AccountCell {
            balance: account.balance,
            frozen: false,
            created_at: account.created_at,
        };
        self.accounts
            .write()
            .insert(account.identity.clone(), Arc::new(Mutex::new(cell)));

        tracing::info!(
            "Registered account '{}' with balance {}",
            identity,
            initial_balance
        );
        Ok(account)
    }

    fn cell(&self, identity: &str) -> Result<Arc<Mutex<AccountCell>>> {
        self.accounts
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| LedgerError::not_found(identity))
    }

    pub fn exists(&self, identity: &str) -> bool {
        self.accounts.read().contains_key(identity)
    }

    pub async fn get_balance(&self, identity: &str) -> Result<u64> {
        let cell = self.cell(identity)?;
        let account = cell.lock().await;
        Ok(account.balance)
    }

    pub async fn account(&self, identity: &str) -> Result<Account> {
        let cell = self.cell(identity)?;
        let account = cell.lock().await;
        Ok(Account {
            identity: identity.to_string(),
            balance: account.balance,
            frozen: account.frozen,
            created_at: account.created_at,
        })
    }

    /// Check `balance >= amount` and subtract, as one step. Returns the new
    /// balance.
    pub async fn try_debit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        if amount == 0 {
            return Err(LedgerError::invalid_amount("Debit amount must be positive"));
        }
        check_amount(amount)?;

        let cell = self.cell(identity)?;
        let mut account = cell.lock().await;

        if account.frozen {
            return Err(LedgerError::Frozen {
                identity: identity.to_string(),
            });
        }

        if account.balance < amount {
            tracing::debug!(
                "Debit of {} from '{}' rejected, balance {}",
                amount,
                identity,
                account.balance
            );
            return Err(LedgerError::InsufficientFunds {
                need: amount,
                available: account.balance,
            });
        }

        let new_balance = account.balance - amount;
        LedgerStore::new(&self.storage)
            .apply(identity, -(amount as i64), new_balance, &posting)
            .await?;
        account.balance = new_balance;
        self.notify(identity, new_balance);

        tracing::debug!(
            "Debited {} from '{}' ({}), balance {}",
            amount,
            identity,
            posting.reason,
            new_balance
        );
        Ok(new_balance)
    }

    /// Add to a balance. Returns the new balance.
    pub async fn credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        self.apply_credit(identity, amount, posting, false).await
    }

    /// Credit an account even while it is frozen. Settles money owed to a
    /// halted account without lifting the halt.
    pub async fn force_credit(&self, identity: &str, amount: u64, posting: Posting) -> Result<u64> {
        self.apply_credit(identity, amount, posting, true).await
    }

    async fn apply_credit(
        &self,
        identity: &str,
        amount: u64,
        posting: Posting,
        ignore_freeze: bool,
    ) -> Result<u64> {
        check_amount(amount)?;

        let cell = self.cell(identity)?;
        let mut account = cell.lock().await;

        if account.frozen && !ignore_freeze {
            return Err(LedgerError::Frozen {
                identity: identity.to_string(),
            });
        }

        let new_balance = account
            .balance
            .checked_add(amount)
            .and_then(|b| check_amount(b).ok())
            .ok_or_else(|| {
                LedgerError::invalid_amount(format!(
                    "Credit of {} would overflow the balance of '{}'",
                    amount, identity
                ))
            })?;

        if amount == 0 {
            return Ok(new_balance);
        }

        LedgerStore::new(&self.storage)
            .apply(identity, amount as i64, new_balance, &posting)
            .await?;
        account.balance = new_balance;
        self.notify(identity, new_balance);

        tracing::debug!(
            "Credited {} to '{}' ({}), balance {}",
            amount,
            identity,
            posting.reason,
            new_balance
        );
        Ok(new_balance)
    }

    /// Halt debits and credits on an account until it is reconciled.
    ///
    /// The in-memory flag is set first so the halt takes effect even when
    /// storage is the thing that is failing.
    pub async fn freeze(&self, identity: &str) -> Result<()> {
        let cell = self.cell(identity)?;
        let mut account = cell.lock().await;
        account.frozen = true;

        if let Err(e) = LedgerStore::new(&self.storage)
            .set_frozen(identity, true)
            .await
        {
            tracing::error!("Failed to persist freeze of '{}': {}", identity, e);
            return Err(e);
        }

        tracing::warn!("Account '{}' frozen", identity);
        Ok(())
    }

    pub async fn unfreeze(&self, identity: &str) -> Result<()> {
        let cell = self.cell(identity)?;
        let mut account = cell.lock().await;

        LedgerStore::new(&self.storage)
            .set_frozen(identity, false)
            .await?;
        account.frozen = false;

        tracing::info!("Account '{}' unfrozen", identity);
        Ok(())
    }

    pub async fn is_frozen(&self, identity: &str) -> Result<bool> {
        let cell = self.cell(identity)?;
        let account = cell.lock().await;
        Ok(account.frozen)
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let cells: Vec<(String, Arc<Mutex<AccountCell>>)> = self
            .accounts
            .read()
            .iter()
            .map(|(identity, cell)| (identity.clone(), cell.clone()))
            .collect();

        let mut accounts = Vec::with_capacity(cells.len());
        for (identity, cell) in cells {
            let account = cell.lock().await;
            accounts.push(Account {
                identity,
                balance: account.balance,
                frozen: account.frozen,
                created_at: account.created_at,
            });
        }

        accounts.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(accounts)
    }

    /// Sum of every balance. Escrowed stakes are not included.
    pub async fn total_supply(&self) -> Result<u64> {
        let accounts = self.list_accounts().await?;
        Ok(accounts.iter().map(|a| a.balance).sum())
    }

    pub async fn history(&self, identity: &str, limit: usize) -> Result<Vec<LedgerEntry>> {
        if !self.exists(identity) {
            return Err(LedgerError::not_found(identity));
        }
        LedgerStore::new(&self.storage).history(identity, limit).await
    }
}
