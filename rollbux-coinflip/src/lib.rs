//! Rollbux coinflip - two-player wagers settled against the account ledger
//!
//! A host escrows a stake and predicts a side. The first joiner to claim the
//! wager matches the stake, the coin is flipped and the whole pot is paid to
//! exactly one of them. Every step is announced on the [`EventBus`].

pub mod coin;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod wager;

pub use coin::{CoinSource, FixedCoin, RandomCoin};
pub use config::EngineConfig;
pub use engine::{CoinflipEngine, QuarantinedWager, Settlement};
pub use error::{Result, WagerError};
pub use events::{EventBus, EventKind, LedgerEvent, Subscription, Topic};
pub use registry::{CancelTicket, ClaimTicket, MatchedWager, WagerRegistry};
pub use wager::{CoinSide, Wager, WagerId, WagerStatus};

use rollbux_core::Ledger;
use std::sync::Arc;

/// Engine with a fair coin and default settings.
pub fn create_engine(ledger: Arc<dyn Ledger>) -> Result<CoinflipEngine> {
    CoinflipEngine::with_random_coin(ledger, EngineConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollbux_core::{AccountStore, Principal, Storage};

    #[tokio::test]
    async fn test_engine_creation() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let accounts = Arc::new(AccountStore::open(storage).await.unwrap());
        let engine = create_engine(accounts).unwrap();

        engine.register("alice").await.unwrap();
        let alice = Principal::authenticated("alice");
        assert_eq!(engine.balance(&alice).await.unwrap(), 0);
        assert!(engine.list_open().await.is_empty());
    }
}
