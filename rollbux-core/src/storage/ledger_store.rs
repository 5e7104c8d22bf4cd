use crate::error::{LedgerError, Result};
use crate::storage::Storage;
use crate::types::{Account, EntryReason, LedgerEntry, Posting};
use chrono::{DateTime, Utc};
use rusqlite::{params, ErrorCode};
use uuid::Uuid;

/// Row-level access to the `accounts` and `ledger_entries` tables.
///
/// Callers are responsible for serialising writes per identity; this type
/// only guarantees that a balance update and its journal row land together.
pub struct LedgerStore<'a> {
    storage: &'a Storage,
}

impl<'a> LedgerStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn insert_account(&self, account: &Account) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT INTO accounts (identity, balance, frozen, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                account.identity,
                account.balance as i64,
                account.frozen,
                account.created_at.timestamp(),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(LedgerError::AlreadyExists {
                    identity: account.identity.clone(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        if account.balance > 0 {
            tx.execute(
                "INSERT INTO ledger_entries (identity, delta, balance_after, reason, wager_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
                params![
                    account.identity,
                    account.balance as i64,
                    account.balance as i64,
                    EntryReason::Adjustment.as_str(),
                    account.created_at.timestamp(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub async fn load_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT identity, balance, frozen, created_at
             FROM accounts ORDER BY identity",
        )?;

        let accounts = stmt
            .query_map([], |row| {
                Ok(Account {
                    identity: row.get(0)?,
                    balance: row.get::<_, i64>(1)? as u64,
                    frozen: row.get(2)?,
                    created_at: DateTime::from_timestamp(row.get(3)?, 0)
                        .unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(accounts)
    }

    /// Write a new balance and its journal row in one transaction.
    pub async fn apply(
        &self,
        identity: &str,
        delta: i64,
        balance_after: u64,
        posting: &Posting,
    ) -> Result<()> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE accounts SET balance = ?1 WHERE identity = ?2",
            params![balance_after as i64, identity],
        )?;
        if updated == 0 {
            return Err(LedgerError::not_found(identity));
        }

        tx.execute(
            "INSERT INTO ledger_entries (identity, delta, balance_after, reason, wager_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity,
                delta,
                balance_after as i64,
                posting.reason.as_str(),
                posting.wager_id.map(|id| id.to_string()),
                Utc::now().timestamp(),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub async fn set_frozen(&self, identity: &str, frozen: bool) -> Result<()> {
        let conn = self.storage.get_connection().await;

        let updated = conn.execute(
            "UPDATE accounts SET frozen = ?1 WHERE identity = ?2",
            params![frozen, identity],
        )?;
        if updated == 0 {
            return Err(LedgerError::not_found(identity));
        }

        Ok(())
    }

    /// Most recent journal rows first.
    pub async fn history(&self, identity: &str, limit: usize) -> Result<Vec<LedgerEntry>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, identity, delta, balance_after, reason, wager_id, timestamp
             FROM ledger_entries WHERE identity = ?1 ORDER BY id DESC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![identity, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, identity, delta, balance_after, reason, wager_id, timestamp) in rows {
            let wager_id = wager_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| LedgerError::internal(format!("Corrupt wager id in journal: {}", e)))?;

            entries.push(LedgerEntry {
                id,
                identity,
                delta,
                balance_after: balance_after as u64,
                reason: EntryReason::parse(&reason)?,
                wager_id,
                timestamp: DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now),
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn account(identity: &str, balance: u64) -> Account {
        Account {
            identity: identity.to_string(),
            balance,
            frozen: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_reload() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("ledger.db");

        {
            let storage = Storage::new(&db_path).await.unwrap();
            let store = LedgerStore::new(&storage);
            store.insert_account(&account("alice", 100)).await.unwrap();
            store
                .apply("alice", -40, 60, &Posting::new(EntryReason::Withdrawal))
                .await
                .unwrap();
            store.set_frozen("alice", true).await.unwrap();
        }

        let storage = Storage::new(&db_path).await.unwrap();
        let store = LedgerStore::new(&storage);
        let accounts = store.load_accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].balance, 60);
        assert!(accounts[0].frozen);

        let history = store.history("alice", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].delta, -40);
        assert_eq!(history[0].reason, EntryReason::Withdrawal);
        assert_eq!(history[1].reason, EntryReason::Adjustment);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LedgerStore::new(&storage);

        store.insert_account(&account("alice", 0)).await.unwrap();
        let err = store.insert_account(&account("alice", 5)).await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_apply_unknown_identity() {
        let storage = Storage::in_memory().await.unwrap();
        let store = LedgerStore::new(&storage);

        let err = store
            .apply("ghost", 10, 10, &Posting::new(EntryReason::Deposit))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { .. }));
    }
}
