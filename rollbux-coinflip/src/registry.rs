//! Catalog of open wagers.
//!
//! Each wager sits behind its own async mutex. Claiming or cancelling hands
//! out a ticket that holds that mutex, so the caller can move money before
//! the state change commits and every competing caller waits, then sees the
//! committed state. Dropping a ticket without committing leaves the wager
//! Open. A wager leaves the catalog as soon as it is matched or cancelled,
//! keeping a status tombstone so late callers still get the right rejection.
//! Only the most recent tombstones are kept; older ids read as not found.

use crate::{CoinSide, Result, Wager, WagerError, WagerId, WagerStatus};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slot = Arc<Mutex<Wager>>;

pub const DEFAULT_TOMBSTONES: usize = 10_000;

/// Terminal statuses of recently closed wagers, oldest evicted first.
struct Tombstones {
    statuses: HashMap<WagerId, WagerStatus>,
    order: VecDeque<WagerId>,
    capacity: usize,
}

impl Tombstones {
    fn new(capacity: usize) -> Self {
        Self {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn record(&mut self, id: WagerId, status: WagerStatus) {
        if self.statuses.insert(id, status).is_some() {
            return;
        }

        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &WagerId) -> Option<WagerStatus> {
        self.statuses.get(id).copied()
    }

    fn len(&self) -> usize {
        self.statuses.len()
    }
}

pub struct WagerRegistry {
    wagers: RwLock<HashMap<WagerId, Slot>>,
    closed: RwLock<Tombstones>,
}

impl Default for WagerRegistry {
    fn default() -> Self {
        Self::with_tombstone_capacity(DEFAULT_TOMBSTONES)
    }
}

impl WagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` terminal statuses around for late callers.
    pub fn with_tombstone_capacity(capacity: usize) -> Self {
        Self {
            wagers: RwLock::new(HashMap::new()),
            closed: RwLock::new(Tombstones::new(capacity)),
        }
    }

    /// Record a new Open wager. Does not move funds.
    pub fn open(&self, host: &str, stake: u64, prediction: CoinSide) -> Result<WagerId> {
        let wager = Wager::new(host, stake, prediction)?;
        self.insert(wager)
    }

    /// Publish an already-built wager. Only Open wagers are accepted.
    pub fn insert(&self, wager: Wager) -> Result<WagerId> {
        if !wager.is_open() {
            return Err(WagerError::internal(format!(
                "Wager {} is {:?}, only open wagers can be listed",
                wager.id, wager.status
            )));
        }

        let id = wager.id;
        let mut wagers = self.wagers.write();
        if wagers.contains_key(&id) {
            return Err(WagerError::internal(format!("Duplicate wager id {}", id)));
        }
        wagers.insert(id, Arc::new(Mutex::new(wager)));

        Ok(id)
    }

    fn slot(&self, id: WagerId) -> Result<Slot> {
        if let Some(slot) = self.wagers.read().get(&id) {
            return Ok(slot.clone());
        }

        match self.closed.read().get(&id) {
            Some(WagerStatus::Matched | WagerStatus::Settled) => {
                Err(WagerError::AlreadyClaimed(id))
            }
            _ => Err(WagerError::NotFound(id)),
        }
    }

    fn close(&self, id: WagerId, status: WagerStatus) {
        // Tombstone first so there is no window where the id is unknown.
        self.closed.write().record(id, status);
        self.wagers.write().remove(&id);
    }

    /// Settle a wager previously pulled out by [`MatchedWager::quarantine`].
    pub(crate) fn record_settled(&self, id: WagerId) {
        self.closed.write().record(id, WagerStatus::Settled);
    }

    /// Status of a wager that has left the catalog, while its tombstone lasts.
    pub fn closed_status(&self, id: WagerId) -> Option<WagerStatus> {
        self.closed.read().get(&id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.closed.read().len()
    }

    /// Take the exclusive claim on an Open wager.
    ///
    /// Only one ticket per wager exists at a time; once one commits, every
    /// later caller gets `AlreadyClaimed`.
    pub async fn try_claim(&self, id: WagerId, joiner: &str) -> Result<ClaimTicket<'_>> {
        let slot = self.slot(id)?;
        let guard = slot.lock_owned().await;

        match guard.status {
            WagerStatus::Open => {}
            WagerStatus::Matched | WagerStatus::Settled => {
                return Err(WagerError::AlreadyClaimed(id));
            }
            WagerStatus::Cancelled => return Err(WagerError::NotFound(id)),
        }

        if guard.host == joiner {
            return Err(WagerError::SelfJoin(id));
        }

        Ok(ClaimTicket {
            registry: self,
            guard,
        })
    }

    /// Take the exclusive right to cancel an Open wager owned by `requester`.
    pub async fn try_cancel(&self, id: WagerId, requester: &str) -> Result<CancelTicket<'_>> {
        let slot = self.slot(id)?;
        let guard = slot.lock_owned().await;

        if guard.status == WagerStatus::Cancelled {
            return Err(WagerError::NotFound(id));
        }
        if guard.host != requester {
            return Err(WagerError::NotOwner(id));
        }
        if guard.status != WagerStatus::Open {
            return Err(WagerError::AlreadyClaimed(id));
        }

        Ok(CancelTicket {
            registry: self,
            guard,
        })
    }

    pub async fn get(&self, id: WagerId) -> Result<Wager> {
        let slot = self.slot(id)?;
        let wager = slot.lock().await;
        Ok(wager.clone())
    }

    /// Point-in-time snapshot of Open wagers, oldest first.
    pub async fn list_open(&self) -> Vec<Wager> {
        let slots: Vec<Slot> = self.wagers.read().values().cloned().collect();

        let mut open = Vec::with_capacity(slots.len());
        for slot in slots {
            let wager = slot.lock().await;
            if wager.is_open() {
                open.push(wager.clone());
            }
        }

        open.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        open
    }

    /// Escrow currently held in Open wagers hosted by `identity`.
    pub async fn open_stake_of(&self, identity: &str) -> u64 {
        self.list_open()
            .await
            .iter()
            .filter(|w| w.host == identity)
            .map(|w| w.stake)
            .sum()
    }

    /// Wagers still Open, including any with a claim or cancel pending.
    pub fn len(&self) -> usize {
        self.wagers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on an Open wager, pending the joiner's debit.
pub struct ClaimTicket<'a> {
    registry: &'a WagerRegistry,
    guard: OwnedMutexGuard<Wager>,
}

impl<'a> ClaimTicket<'a> {
    pub fn wager(&self) -> &Wager {
        &self.guard
    }

    /// Open -> Matched. The wager leaves the catalog now, so listings never
    /// wait on its payout; it stays locked until settled or quarantined.
    pub fn commit(mut self, joiner: &str) -> MatchedWager<'a> {
        self.guard.status = WagerStatus::Matched;
        self.guard.joiner = Some(joiner.to_string());
        self.registry.close(self.guard.id, WagerStatus::Matched);

        MatchedWager {
            registry: self.registry,
            guard: self.guard,
        }
    }
}

/// A claimed wager awaiting its payout.
pub struct MatchedWager<'a> {
    registry: &'a WagerRegistry,
    guard: OwnedMutexGuard<Wager>,
}

impl<'a> MatchedWager<'a> {
    pub fn wager(&self) -> &Wager {
        &self.guard
    }

    pub fn joiner(&self) -> &str {
        self.guard.joiner.as_deref().unwrap_or_default()
    }

    /// Matched -> Settled, and drop the wager from the registry.
    pub fn settle(mut self, outcome: CoinSide) -> Wager {
        self.guard.status = WagerStatus::Settled;
        self.guard.outcome = Some(outcome);
        self.guard.settled_at = Some(Utc::now());

        let settled = self.guard.clone();
        self.registry.close(settled.id, WagerStatus::Settled);
        settled
    }

    /// Release a wager whose payout could not be applied. It stays Matched.
    pub fn quarantine(self) -> Wager {
        self.guard.clone()
    }
}

/// Exclusive hold on an Open wager, pending the host's refund.
pub struct CancelTicket<'a> {
    registry: &'a WagerRegistry,
    guard: OwnedMutexGuard<Wager>,
}

impl<'a> CancelTicket<'a> {
    pub fn wager(&self) -> &Wager {
        &self.guard
    }

    /// Open -> Cancelled, and drop the wager from the registry.
    pub fn commit(mut self) -> Wager {
        self.guard.status = WagerStatus::Cancelled;
        self.guard.settled_at = Some(Utc::now());

        let cancelled = self.guard.clone();
        self.registry.close(cancelled.id, WagerStatus::Cancelled);
        cancelled
    }
}
