use crate::auth::CredentialStore;
use crate::config::ServerConfig;
use crate::server;
use crate::session::AppState;
use anyhow::{Context, Result};
use rollbux_coinflip::CoinflipEngine;
use rollbux_core::{AccountStore, Storage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub async fn serve(
    config: &ServerConfig,
    storage: Arc<Storage>,
    accounts: Arc<AccountStore>,
) -> Result<()> {
    let credentials = Arc::new(CredentialStore::new(storage).await?);
    let engine = Arc::new(CoinflipEngine::with_random_coin(
        accounts,
        config.engine.clone(),
    )?);

    if config.reconcile_interval_secs > 0 {
        tokio::spawn(reconcile_loop(
            engine.clone(),
            Duration::from_secs(config.reconcile_interval_secs),
        ));
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on {}", addr);

    let state = Arc::new(AppState {
        engine: engine.clone(),
        credentials,
    });

    tokio::select! {
        result = server::run(state, listener) => result?,
        _ = tokio::signal::ctrl_c() => shutdown(&engine).await,
    }

    Ok(())
}

/// Return every open stake to its host and report what is still owed.
async fn shutdown(engine: &CoinflipEngine) {
    tracing::info!("Shutting down");

    let refunded = engine.refund_open_wagers().await;
    if !refunded.is_empty() {
        tracing::info!("Refunded {} open wagers", refunded.len());
    }

    for entry in engine.quarantined().await {
        tracing::error!(
            "Wager {} still quarantined: {} owed {}",
            entry.wager.id,
            entry.winner,
            entry.payout
        );
    }
}

/// Periodically retry payouts that failed earlier.
async fn reconcile_loop(engine: Arc<CoinflipEngine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;

        for entry in engine.quarantined().await {
            match engine.reconcile(entry.wager.id).await {
                Ok(settlement) => tracing::info!(
                    "Reconciled wager {}: '{}' paid {}",
                    settlement.wager.id,
                    settlement.winner,
                    settlement.payout
                ),
                Err(e) => tracing::warn!("Wager {} still unreconciled: {}", entry.wager.id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollbux_coinflip::{CoinSide, EngineConfig};
    use rollbux_core::Principal;

    #[tokio::test]
    async fn test_shutdown_refunds_open_stakes() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let accounts = Arc::new(AccountStore::open(storage).await.unwrap());
        accounts.register("alice", 100).await.unwrap();
        let engine = CoinflipEngine::with_random_coin(accounts.clone(), EngineConfig::default()).unwrap();

        let alice = Principal::authenticated("alice");
        engine.create_wager(&alice, 40, CoinSide::Heads).await.unwrap();
        engine.create_wager(&alice, 25, CoinSide::Tails).await.unwrap();
        assert_eq!(accounts.get_balance("alice").await.unwrap(), 35);

        shutdown(&engine).await;

        assert_eq!(accounts.get_balance("alice").await.unwrap(), 100);
        assert!(engine.list_open().await.is_empty());
    }
}
