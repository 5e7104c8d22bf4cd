//! Password credentials, kept next to the accounts in the same database.

use crate::error::{Result, ServerError};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rollbux_core::Storage;
use rusqlite::{params, OptionalExtension};
use sha2::Sha256;
use std::sync::Arc;

const PBKDF2_ROUNDS: u32 = 100_000;
const SALT_LEN: usize = 16;

pub struct CredentialStore {
    storage: Arc<Storage>,
    rounds: u32,
}

impl CredentialStore {
    pub async fn new(storage: Arc<Storage>) -> Result<Self> {
        Self::with_rounds(storage, PBKDF2_ROUNDS).await
    }

    pub async fn with_rounds(storage: Arc<Storage>, rounds: u32) -> Result<Self> {
        {
            let conn = storage.get_connection().await;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS credentials (
                    identity TEXT PRIMARY KEY,
                    salt TEXT NOT NULL,
                    hash TEXT NOT NULL,
                    FOREIGN KEY (identity) REFERENCES accounts(identity)
                )",
                [],
            )?;
        }

        Ok(Self { storage, rounds })
    }

    /// Store (or replace) the password for an existing account.
    pub async fn set_password(&self, identity: &str, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(ServerError::bad_request("Password cannot be empty"));
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = self.derive(password, &salt);

        let conn = self.storage.get_connection().await;
        conn.execute(
            "INSERT INTO credentials (identity, salt, hash) VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET salt = excluded.salt, hash = excluded.hash",
            params![identity, hex::encode(salt), hash],
        )?;

        tracing::debug!("Stored credentials for '{}'", identity);
        Ok(())
    }

    pub async fn verify(&self, identity: &str, password: &str) -> Result<bool> {
        let stored: Option<(String, String)> = {
            let conn = self.storage.get_connection().await;
            conn.query_row(
                "SELECT salt, hash FROM credentials WHERE identity = ?1",
                params![identity],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let Some((salt, hash)) = stored else {
            return Ok(false);
        };
        let salt = hex::decode(salt)
            .map_err(|e| ServerError::config(format!("Corrupt salt for '{}': {}", identity, e)))?;

        Ok(self.derive(password, &salt) == hash)
    }

    fn derive(&self, password: &str, salt: &[u8]) -> String {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, self.rounds, &mut key);
        hex::encode(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollbux_core::AccountStore;

    async fn setup() -> (Arc<AccountStore>, CredentialStore) {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let accounts = Arc::new(AccountStore::open(storage.clone()).await.unwrap());
        let credentials = CredentialStore::with_rounds(storage, 1_000).await.unwrap();
        (accounts, credentials)
    }

    #[tokio::test]
    async fn test_password_roundtrip() {
        let (accounts, credentials) = setup().await;
        accounts.register("alice", 0).await.unwrap();

        credentials.set_password("alice", "hunter2").await.unwrap();
        assert!(credentials.verify("alice", "hunter2").await.unwrap());
        assert!(!credentials.verify("alice", "hunter3").await.unwrap());
        assert!(!credentials.verify("bob", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn test_password_reset_and_validation() {
        let (accounts, credentials) = setup().await;
        accounts.register("alice", 0).await.unwrap();

        credentials.set_password("alice", "first").await.unwrap();
        credentials.set_password("alice", "second").await.unwrap();
        assert!(!credentials.verify("alice", "first").await.unwrap());
        assert!(credentials.verify("alice", "second").await.unwrap());

        assert!(matches!(
            credentials.set_password("alice", "").await,
            Err(ServerError::BadRequest(_))
        ));
        // No account, no credentials.
        assert!(credentials.set_password("ghost", "pw").await.is_err());
    }
}
