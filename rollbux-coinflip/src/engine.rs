use crate::coin::{CoinSource, RandomCoin};
use crate::events::{EventBus, EventKind, Subscription, Topic};
use crate::registry::{MatchedWager, WagerRegistry};
use crate::{CoinSide, EngineConfig, Result, Wager, WagerError, WagerId, WagerStatus};
use chrono::{DateTime, Utc};
use rollbux_core::{Account, EntryReason, Ledger, LedgerError, Posting, Principal};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result of a claimed wager.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub wager: Wager,
    pub outcome: CoinSide,
    pub winner: String,
    pub payout: u64,
    pub winner_balance: u64,
}

/// A Matched wager whose payout could not be applied. Its pot is still owed
/// to `winner`; both parties stay frozen until every quarantined wager
/// naming them is reconciled.
#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedWager {
    pub wager: Wager,
    pub joiner: String,
    pub outcome: CoinSide,
    pub winner: String,
    pub payout: u64,
    pub reason: String,
    pub since: DateTime<Utc>,
}

pub struct CoinflipEngine {
    ledger: Arc<dyn Ledger>,
    registry: WagerRegistry,
    events: Arc<EventBus>,
    coin: Arc<dyn CoinSource>,
    config: EngineConfig,
    // Held across freezes and unfreezes so halts never interleave.
    quarantine: Mutex<HashMap<WagerId, QuarantinedWager>>,
}

impl CoinflipEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        coin: Arc<dyn CoinSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventBus::new());
        ledger.observe(events.clone());

        Ok(Self {
            ledger,
            registry: WagerRegistry::new(),
            events,
            coin,
            config,
            quarantine: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_random_coin(ledger: Arc<dyn Ledger>, config: EngineConfig) -> Result<Self> {
        Self::new(ledger, Arc::new(RandomCoin), config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &WagerRegistry {
        &self.registry
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        self.events.subscribe(topic)
    }

    /// Create an account with the configured starting balance.
    pub async fn register(&self, identity: &str) -> Result<Account> {
        let account = self
            .ledger
            .register(identity, self.config.starting_balance)
            .await?;
        Ok(account)
    }

    pub async fn balance(&self, principal: &Principal) -> Result<u64> {
        Ok(self.ledger.get_balance(principal.identity()).await?)
    }

    /// Stake currently held in escrow by the principal's Open wagers.
    pub async fn escrow(&self, principal: &Principal) -> u64 {
        self.registry.open_stake_of(principal.identity()).await
    }

    pub async fn deposit(&self, principal: &Principal, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(WagerError::invalid_amount("Deposit amount must be positive"));
        }

        let identity = principal.identity();
        let balance = self
            .ledger
            .credit(identity, amount, Posting::new(EntryReason::Deposit))
            .await?;

        tracing::info!("'{}' deposited {}, balance {}", identity, amount, balance);
        Ok(balance)
    }

    pub async fn withdraw(&self, principal: &Principal, amount: u64) -> Result<u64> {
        let identity = principal.identity();
        let balance = self
            .ledger
            .try_debit(identity, amount, Posting::new(EntryReason::Withdrawal))
            .await?;

        tracing::info!("'{}' withdrew {}, balance {}", identity, amount, balance);
        Ok(balance)
    }

    /// Debit the host's stake into escrow and list the wager.
    pub async fn create_wager(
        &self,
        principal: &Principal,
        stake: u64,
        prediction: CoinSide,
    ) -> Result<Wager> {
        self.config.check_stake(stake)?;
        let wager = Wager::new(principal.identity(), stake, prediction)?;

        self.ledger
            .try_debit(
                &wager.host,
                stake,
                Posting::for_wager(EntryReason::Stake, wager.id),
            )
            .await?;

        // Published before the wager is listed, so no claim can overtake it.
        self.events.publish(EventKind::WagerOpened {
            wager: wager.clone(),
        });

        if let Err(e) = self.registry.insert(wager.clone()) {
            // Listing failed: the stake goes back to the host.
            tracing::error!("Failed to list wager {}: {}", wager.id, e);
            self.ledger
                .force_credit(
                    &wager.host,
                    stake,
                    Posting::for_wager(EntryReason::Refund, wager.id),
                )
                .await?;
            return Err(e);
        }

        tracing::info!(
            "Wager {} opened by '{}': {} on {}",
            wager.id,
            wager.host,
            stake,
            prediction
        );
        Ok(wager)
    }

    /// Claim an Open wager, debit the joiner and settle it in one exclusive
    /// section.
    pub async fn join_wager(&self, principal: &Principal, wager_id: WagerId) -> Result<Settlement> {
        let joiner = principal.identity();
        let ticket = self.registry.try_claim(wager_id, joiner).await?;
        let stake = ticket.wager().stake;

        // A halted host could not be paid; refuse before touching the joiner.
        // On any failure the ticket drops and the wager stays Open.
        let host = ticket.wager().host.clone();
        if self.ledger.is_frozen(&host).await? {
            tracing::warn!(
                "'{}' tried to join wager {} of frozen account '{}'",
                joiner,
                wager_id,
                host
            );
            return Err(LedgerError::Frozen { identity: host }.into());
        }

        if let Err(e) = self
            .ledger
            .try_debit(
                joiner,
                stake,
                Posting::for_wager(EntryReason::Stake, wager_id),
            )
            .await
        {
            tracing::warn!("'{}' could not join wager {}: {}", joiner, wager_id, e);
            return Err(e.into());
        }

        let matched = ticket.commit(joiner);
        self.events.publish(EventKind::WagerClaimed {
            wager_id,
            host,
            joiner: joiner.to_string(),
            stake,
        });

        tracing::info!("Wager {} claimed by '{}'", wager_id, joiner);
        self.resolve(matched).await
    }

    /// Draw the outcome and pay the pot to exactly one party.
    async fn resolve(&self, matched: MatchedWager<'_>) -> Result<Settlement> {
        let outcome = self.coin.flip();
        let wager = matched.wager();
        let winner = if outcome == wager.prediction {
            wager.host.clone()
        } else {
            matched.joiner().to_string()
        };
        let payout = wager.pot();
        let wager_id = wager.id;

        match self.pay_with_retry(&winner, payout, wager_id).await {
            Ok(winner_balance) => {
                let joiner = matched.joiner().to_string();
                let settled = matched.settle(outcome);

                self.events.publish(EventKind::WagerSettled {
                    wager_id,
                    host: settled.host.clone(),
                    joiner,
                    outcome,
                    winner: winner.clone(),
                    payout,
                });

                tracing::info!(
                    "Wager {} settled on {}. Winner: '{}' (+{})",
                    wager_id,
                    outcome,
                    winner,
                    payout
                );

                Ok(Settlement {
                    wager: settled,
                    outcome,
                    winner,
                    payout,
                    winner_balance,
                })
            }
            Err(cause) => {
                let joiner = matched.joiner().to_string();
                let stuck = matched.quarantine();
                Err(self
                    .escalate(stuck, joiner, outcome, winner, payout, cause)
                    .await)
            }
        }
    }

    async fn pay_with_retry(
        &self,
        winner: &str,
        payout: u64,
        wager_id: WagerId,
    ) -> std::result::Result<u64, LedgerError> {
        let mut attempt = 1u32;
        loop {
            let posting = Posting::for_wager(EntryReason::Payout, wager_id);
            match self.ledger.force_credit(winner, payout, posting).await {
                Ok(balance) => return Ok(balance),
                Err(e) if attempt >= self.config.payout_attempts => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Payout of {} to '{}' for wager {} failed (attempt {}/{}): {}",
                        payout,
                        winner,
                        wager_id,
                        attempt,
                        self.config.payout_attempts,
                        e
                    );
                    tokio::time::sleep(self.config.payout_backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Park a wager whose payout failed and halt both accounts.
    async fn escalate(
        &self,
        wager: Wager,
        joiner: String,
        outcome: CoinSide,
        winner: String,
        payout: u64,
        cause: LedgerError,
    ) -> WagerError {
        let wager_id = wager.id;
        let detail = format!("payout of {} to '{}' failed: {}", payout, winner, cause);
        tracing::error!(
            "Inconsistency on wager {}: {}. Freezing '{}' and '{}'",
            wager_id,
            detail,
            wager.host,
            joiner
        );

        let host = wager.host.clone();
        let mut quarantine = self.quarantine.lock().await;
        quarantine.insert(
            wager_id,
            QuarantinedWager {
                wager,
                joiner: joiner.clone(),
                outcome,
                winner,
                payout,
                reason: detail.clone(),
                since: Utc::now(),
            },
        );

        for identity in [&host, &joiner] {
            if let Err(e) = self.ledger.freeze(identity).await {
                tracing::error!("Failed to freeze '{}': {}", identity, e);
            }
        }

        WagerError::Inconsistency { wager_id, detail }
    }

    pub async fn quarantined(&self) -> Vec<QuarantinedWager> {
        let mut stuck: Vec<_> = self.quarantine.lock().await.values().cloned().collect();
        stuck.sort_by(|a, b| a.since.cmp(&b.since));
        stuck
    }

    /// Retry the payout of a quarantined wager with the outcome it already
    /// drew. A party is unfrozen only once no other quarantined wager names
    /// them; on failure the wager stays quarantined and both stay frozen.
    pub async fn reconcile(&self, wager_id: WagerId) -> Result<Settlement> {
        let mut quarantine = self.quarantine.lock().await;
        let entry = quarantine
            .remove(&wager_id)
            .ok_or(WagerError::NotFound(wager_id))?;

        let posting = Posting::for_wager(EntryReason::Payout, wager_id);
        let paid = self
            .ledger
            .force_credit(&entry.winner, entry.payout, posting)
            .await;
        let winner_balance = match paid {
            Ok(balance) => balance,
            Err(cause) => {
                let detail = format!(
                    "payout of {} to '{}' failed: {}",
                    entry.payout, entry.winner, cause
                );
                tracing::error!("Reconciling wager {} failed: {}", wager_id, detail);
                quarantine.insert(
                    wager_id,
                    QuarantinedWager {
                        reason: detail.clone(),
                        ..entry
                    },
                );
                return Err(WagerError::Inconsistency { wager_id, detail });
            }
        };

        for identity in [&entry.wager.host, &entry.joiner] {
            let still_owed = quarantine
                .values()
                .any(|other| &other.wager.host == identity || &other.joiner == identity);
            if still_owed {
                tracing::warn!(
                    "'{}' stays frozen, other quarantined wagers name them",
                    identity
                );
                continue;
            }
            if let Err(e) = self.ledger.unfreeze(identity).await {
                tracing::error!("Failed to unfreeze '{}': {}", identity, e);
            }
        }
        drop(quarantine);

        let mut settled = entry.wager.clone();
        settled.status = WagerStatus::Settled;
        settled.outcome = Some(entry.outcome);
        settled.settled_at = Some(Utc::now());
        self.registry.record_settled(wager_id);

        self.events.publish(EventKind::WagerSettled {
            wager_id,
            host: settled.host.clone(),
            joiner: entry.joiner.clone(),
            outcome: entry.outcome,
            winner: entry.winner.clone(),
            payout: entry.payout,
        });

        tracing::info!(
            "Wager {} reconciled, '{}' paid {}",
            wager_id,
            entry.winner,
            entry.payout
        );
        Ok(Settlement {
            wager: settled,
            outcome: entry.outcome,
            winner: entry.winner,
            payout: entry.payout,
            winner_balance,
        })
    }

    /// Open wagers that can be joined right now. Wagers of frozen hosts are
    /// held back until the host is reconciled.
    pub async fn list_open(&self) -> Vec<Wager> {
        let mut frozen: HashMap<String, bool> = HashMap::new();
        let mut joinable = Vec::new();

        for wager in self.registry.list_open().await {
            let halted = match frozen.get(&wager.host) {
                Some(halted) => *halted,
                None => {
                    let halted = match self.ledger.is_frozen(&wager.host).await {
                        Ok(halted) => halted,
                        Err(e) => {
                            tracing::warn!("Could not check host '{}': {}", wager.host, e);
                            true
                        }
                    };
                    frozen.insert(wager.host.clone(), halted);
                    halted
                }
            };
            if !halted {
                joinable.push(wager);
            }
        }

        joinable
    }

    /// Cancel an Open wager and refund the host's escrow.
    pub async fn cancel_wager(&self, principal: &Principal, wager_id: WagerId) -> Result<Wager> {
        let ticket = self
            .registry
            .try_cancel(wager_id, principal.identity())
            .await?;
        let wager = ticket.wager();

        // A failed refund leaves the wager Open with its escrow intact.
        self.ledger
            .credit(
                &wager.host,
                wager.stake,
                Posting::for_wager(EntryReason::Refund, wager_id),
            )
            .await?;

        let cancelled = ticket.commit();
        self.events.publish(EventKind::WagerCancelled {
            wager_id,
            host: cancelled.host.clone(),
            stake: cancelled.stake,
        });

        tracing::info!(
            "Wager {} cancelled by '{}', {} refunded",
            wager_id,
            cancelled.host,
            cancelled.stake
        );
        Ok(cancelled)
    }

    /// Cancel every Open wager and return the stakes to their hosts, frozen
    /// or not. Used on shutdown; wagers claimed meanwhile are skipped.
    pub async fn refund_open_wagers(&self) -> Vec<Wager> {
        let mut refunded = Vec::new();

        for open in self.registry.list_open().await {
            let ticket = match self.registry.try_cancel(open.id, &open.host).await {
                Ok(ticket) => ticket,
                Err(e) => {
                    tracing::debug!("Skipping refund of wager {}: {}", open.id, e);
                    continue;
                }
            };

            let wager = ticket.wager();
            let posting = Posting::for_wager(EntryReason::Refund, wager.id);
            if let Err(e) = self
                .ledger
                .force_credit(&wager.host, wager.stake, posting)
                .await
            {
                tracing::error!(
                    "Failed to refund {} to '{}' for wager {}: {}",
                    wager.stake,
                    wager.host,
                    wager.id,
                    e
                );
                continue;
            }

            let cancelled = ticket.commit();
            self.events.publish(EventKind::WagerCancelled {
                wager_id: cancelled.id,
                host: cancelled.host.clone(),
                stake: cancelled.stake,
            });
            tracing::info!(
                "Wager {} refunded {} to '{}' on shutdown",
                cancelled.id,
                cancelled.stake,
                cancelled.host
            );
            refunded.push(cancelled);
        }

        refunded
    }
}
