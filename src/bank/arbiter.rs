//! Bank arbiter - one lease, strict FIFO wait queue
//!
//! Invariants:
//!   - at most one lease is granted at any time
//!   - the wait queue never contains the holder, nor any bot twice

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::BankViolation;

#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub lease_id: u64,
    pub holder: String,
    pub acquired_at: Instant,
    pub granted_at: DateTime<Utc>,
    /// Overdue warning already emitted
    pub warned: bool,
}

impl Lease {
    pub fn held_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.acquired_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    Granted(Lease),
    /// 1-based position in the wait queue
    Queued { position: usize },
}

/// What removing a bot from the arbiter did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Eviction {
    pub released: bool,
    pub dequeued: bool,
    /// Lease granted to the next waiter, if the bot was the holder
    pub next: Option<Lease>,
}

impl Eviction {
    pub fn changed(&self) -> bool {
        self.released || self.dequeued
    }
}

/// Serializable view of the lease state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub holder: Option<String>,
    pub lease_id: Option<u64>,
    pub held_for_ms: Option<u64>,
    pub waiting: Vec<String>,
}

#[derive(Debug, Default)]
pub struct BankArbiter {
    lease: Option<Lease>,
    waiting: VecDeque<String>,
    lease_counter: u64,
}

impl BankArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.holder.as_str())
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn waiting(&self) -> Vec<String> {
        self.waiting.iter().cloned().collect()
    }

    /// 1-based queue position of a waiting bot
    pub fn position(&self, bot_id: &str) -> Option<usize> {
        self.waiting.iter().position(|b| b == bot_id).map(|i| i + 1)
    }

    pub fn is_holder(&self, bot_id: &str) -> bool {
        self.holder() == Some(bot_id)
    }

    pub fn acquire(&mut self, bot_id: &str, now: Instant) -> Result<AcquireOutcome, BankViolation> {
        if self.is_holder(bot_id) || self.position(bot_id).is_some() {
            return Err(BankViolation::DoubleAcquire {
                bot_id: bot_id.to_string(),
            });
        }
        if self.lease.is_none() {
            let lease = self.grant(bot_id.to_string(), now);
            return Ok(AcquireOutcome::Granted(lease));
        }
        self.waiting.push_back(bot_id.to_string());
        let position = self.waiting.len();
        debug!(bot_id, position, "bank busy, queued");
        Ok(AcquireOutcome::Queued { position })
    }

    /// Release by the holder; grants the head of the queue next
    pub fn release(&mut self, bot_id: &str, now: Instant) -> Result<Option<Lease>, BankViolation> {
        if !self.is_holder(bot_id) {
            return Err(BankViolation::NotHolder {
                bot_id: bot_id.to_string(),
                holder: self.holder().map(str::to_string),
            });
        }
        self.end_lease(now);
        Ok(self.grant_next(now))
    }

    /// Drop the lease or leave the queue, whichever applies. Removing a bot
    /// that is neither holding nor waiting changes nothing.
    pub fn evict(&mut self, bot_id: &str, now: Instant) -> Eviction {
        let mut eviction = Eviction::default();
        if let Some(index) = self.waiting.iter().position(|b| b == bot_id) {
            self.waiting.remove(index);
            eviction.dequeued = true;
        }
        if self.is_holder(bot_id) {
            self.end_lease(now);
            eviction.released = true;
            eviction.next = self.grant_next(now);
        }
        eviction
    }

    /// The current lease if it passed `ceiling` and was not reported yet
    pub fn take_overdue(&mut self, now: Instant, ceiling: Duration) -> Option<Lease> {
        let lease = self.lease.as_mut()?;
        if lease.warned || lease.held_for(now) <= ceiling {
            return None;
        }
        lease.warned = true;
        Some(lease.clone())
    }

    pub fn occupancy(&self, now: Instant) -> Occupancy {
        Occupancy {
            holder: self.holder().map(str::to_string),
            lease_id: self.lease.as_ref().map(|l| l.lease_id),
            held_for_ms: self
                .lease
                .as_ref()
                .map(|l| l.held_for(now).as_millis() as u64),
            waiting: self.waiting(),
        }
    }

    pub fn check_invariant(&self) -> bool {
        let holder_waiting = self
            .holder()
            .map(|h| self.waiting.iter().any(|b| b == h))
            .unwrap_or(false);
        let duplicates = self
            .waiting
            .iter()
            .enumerate()
            .any(|(i, b)| self.waiting.iter().skip(i + 1).any(|o| o == b));
        !holder_waiting && !duplicates
    }

    fn end_lease(&mut self, now: Instant) {
        if let Some(lease) = self.lease.take() {
            info!(
                bot_id = %lease.holder,
                lease_id = lease.lease_id,
                held_ms = lease.held_for(now).as_millis() as u64,
                "bank lease released"
            );
        }
    }

    fn grant_next(&mut self, now: Instant) -> Option<Lease> {
        let next = self.waiting.pop_front()?;
        Some(self.grant(next, now))
    }

    fn grant(&mut self, holder: String, now: Instant) -> Lease {
        self.lease_counter += 1;
        let lease = Lease {
            lease_id: self.lease_counter,
            holder,
            acquired_at: now,
            granted_at: Utc::now(),
            warned: false,
        };
        info!(bot_id = %lease.holder, lease_id = lease.lease_id, "bank lease granted");
        self.lease = Some(lease.clone());
        lease
    }
}
