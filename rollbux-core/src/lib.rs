//! Rollbux core - durable account ledger
//!
//! Balances live in SQLite and are cached in memory behind one async mutex
//! per account. All currency movement goes through [`AccountStore`] (or the
//! [`Ledger`] trait it implements), which guarantees that a balance never
//! goes negative and that every change is journaled.

pub mod accounts;
pub mod error;
pub mod storage;
pub mod types;

pub use accounts::{AccountStore, BalanceObserver, Ledger};
pub use error::{LedgerError, Result};
pub use storage::Storage;
pub use types::{Account, EntryReason, LedgerEntry, Posting, Principal, MAX_AMOUNT};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_store_creation() {
        let temp_dir = tempdir().unwrap();
        let storage = Arc::new(
            Storage::new(&temp_dir.path().join("rollbux.db"))
                .await
                .unwrap(),
        );
        let store = AccountStore::open(storage).await.unwrap();

        let account = store.register("alice", 10).await.unwrap();
        assert_eq!(account.identity, "alice");
        assert_eq!(account.balance, 10);
        assert!(!account.frozen);
    }
}
