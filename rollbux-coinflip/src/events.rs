//! Wager and balance notifications.
//!
//! Every subscriber owns an unbounded FIFO queue. Publishing never waits on
//! a subscriber, and events reach each queue in the order they were
//! published, which is what keeps Opened, Claimed and Settled in order for a
//! single wager.

use crate::{CoinSide, Wager, WagerId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rollbux_core::BalanceObserver;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    WagerOpened {
        wager: Wager,
    },
    WagerClaimed {
        wager_id: WagerId,
        host: String,
        joiner: String,
        stake: u64,
    },
    WagerSettled {
        wager_id: WagerId,
        host: String,
        joiner: String,
        outcome: CoinSide,
        winner: String,
        payout: u64,
    },
    WagerCancelled {
        wager_id: WagerId,
        host: String,
        stake: u64,
    },
    BalanceChanged {
        identity: String,
        balance: u64,
    },
}

impl EventKind {
    pub fn wager_id(&self) -> Option<WagerId> {
        match self {
            Self::WagerOpened { wager } => Some(wager.id),
            Self::WagerClaimed { wager_id, .. }
            | Self::WagerSettled { wager_id, .. }
            | Self::WagerCancelled { wager_id, .. } => Some(*wager_id),
            Self::BalanceChanged { .. } => None,
        }
    }

    /// Whether `identity` is a party to this event.
    pub fn involves(&self, identity: &str) -> bool {
        match self {
            Self::WagerOpened { wager } => wager.host == identity,
            Self::WagerClaimed { host, joiner, .. } | Self::WagerSettled { host, joiner, .. } => {
                host == identity || joiner == identity
            }
            Self::WagerCancelled { host, .. } => host == identity,
            Self::BalanceChanged { identity: owner, .. } => owner == identity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEvent {
    /// Strictly increasing across the bus; lets consumers drop duplicates.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    All,
    Identity(String),
}

impl Topic {
    fn matches(&self, kind: &EventKind) -> bool {
        match self {
            Self::All => true,
            Self::Identity(identity) => kind.involves(identity),
        }
    }
}

struct Subscriber {
    id: u64,
    topic: Topic,
    sender: mpsc::UnboundedSender<LedgerEvent>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    sequence: AtomicU64,
    next_subscriber: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);

        tracing::debug!("Subscriber {} registered for {:?}", id, topic);
        self.subscribers.lock().push(Subscriber { id, topic, sender });

        Subscription { id, receiver }
    }

    /// Queue an event for every matching subscriber. Returns its sequence
    /// number.
    pub fn publish(&self, kind: EventKind) -> u64 {
        let mut subscribers = self.subscribers.lock();

        // Assigned under the lock so sequence order is delivery order.
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = LedgerEvent {
            sequence,
            timestamp: Utc::now(),
            kind,
        };

        subscribers.retain(|subscriber| {
            if !subscriber.topic.matches(&event.kind) {
                return !subscriber.sender.is_closed();
            }
            match subscriber.sender.send(event.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("Dropping closed subscriber {}", subscriber.id);
                    false
                }
            }
        });

        sequence
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

// Runs inside the account's exclusive section, so per-account balance events
// leave in commit order.
impl BalanceObserver for EventBus {
    fn balance_changed(&self, identity: &str, balance: u64) {
        self.publish(EventKind::BalanceChanged {
            identity: identity.to_string(),
            balance,
        });
    }
}

pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<LedgerEvent>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<LedgerEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LedgerEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything already queued.
    pub fn drain(&mut self) -> Vec<LedgerEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoinSide;

    fn balance(identity: &str, balance: u64) -> EventKind {
        EventKind::BalanceChanged {
            identity: identity.to_string(),
            balance,
        }
    }

    #[test]
    fn test_topic_filtering() {
        let bus = EventBus::new();
        let mut all = bus.subscribe(Topic::All);
        let mut alice = bus.subscribe(Topic::Identity("alice".to_string()));

        bus.publish(balance("alice", 10));
        bus.publish(balance("bob", 20));

        let everything = all.drain();
        assert_eq!(everything.len(), 2);
        assert!(everything[0].sequence < everything[1].sequence);

        let mine = alice.drain();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].kind, balance("alice", 10));
    }

    #[test]
    fn test_closed_subscribers_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe(Topic::All);
        let gone = bus.subscribe(Topic::Identity("bob".to_string()));
        assert_eq!(bus.subscriber_count(), 2);

        drop(gone);
        bus.publish(balance("alice", 1));
        assert_eq!(bus.subscriber_count(), 1);
        drop(keep);
    }

    #[test]
    fn test_event_serialization() {
        let wager = Wager::new("alice", 40, CoinSide::Heads).unwrap();
        let event = LedgerEvent {
            sequence: 7,
            timestamp: Utc::now(),
            kind: EventKind::WagerSettled {
                wager_id: wager.id,
                host: "alice".to_string(),
                joiner: "bob".to_string(),
                outcome: CoinSide::Heads,
                winner: "alice".to_string(),
                payout: 80,
            },
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "wager_settled");
        assert_eq!(json["sequence"], 7);
        assert_eq!(json["outcome"], "Heads");
        assert_eq!(json["payout"], 80);
    }

    #[tokio::test]
    async fn test_recv_in_publish_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::All);

        for i in 0..5 {
            bus.publish(balance("alice", i));
        }

        for i in 0..5 {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.kind, balance("alice", i));
        }
    }
}
