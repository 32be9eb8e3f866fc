//! Write Buffer Pool
//!
//! Process-wide byte budget shared by every writer of one task.
//!
//! ## Concurrency
//! - All accounting happens under one `parking_lot::Mutex`, so the
//!   check-and-add in `reserve` is atomic across threads.
//! - The lock is never held while a victim is reclaimed: reclaiming calls
//!   back into `release`, and the victim's owner may live on another thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::config::{Config, VictimPolicy};
use crate::error::{Result, StrataError};

/// Pool-assigned identity of a memory owner (one per writer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WriterId(u64);

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "writer-{}", self.0)
    }
}

/// Owners in one group can preempt each other; usually one group per
/// writer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolGroup(u64);

#[derive(Debug)]
struct Owner {
    group: PoolGroup,
    reserved: u64,
    last_write: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    used: u64,
    tick: u64,
    owners: HashMap<WriterId, Owner>,
}

/// Shared write buffer budget with preemptive reclaim
///
/// Invariant: `used_bytes() == Σ reserved_by(owner) <= budget()` at every
/// observation point.
pub struct WriteBufferPool {
    budget: u64,
    page_size: u64,
    policy: VictimPolicy,
    state: Mutex<PoolState>,
    next_owner: AtomicU64,
    next_group: AtomicU64,
    preempt_count: AtomicU64,
}

impl WriteBufferPool {
    pub fn new(budget: u64, page_size: u64, policy: VictimPolicy) -> Self {
        Self {
            budget,
            page_size,
            policy,
            state: Mutex::new(PoolState::default()),
            next_owner: AtomicU64::new(1),
            next_group: AtomicU64::new(1),
            preempt_count: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.write_buffer_size, config.page_size, config.victim_policy)
    }

    /// Allocate a new preemption group
    pub fn new_group(&self) -> PoolGroup {
        PoolGroup(self.next_group.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a memory owner
    pub fn register(&self, group: PoolGroup) -> WriterId {
        let id = WriterId(self.next_owner.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        state.owners.insert(
            id,
            Owner {
                group,
                reserved: 0,
                last_write: tick,
            },
        );
        id
    }

    /// Remove an owner, returning whatever it still held to the pool
    pub fn unregister(&self, owner: WriterId) -> u64 {
        let mut state = self.state.lock();
        match state.owners.remove(&owner) {
            Some(removed) => {
                state.used -= removed.reserved;
                removed.reserved
            }
            None => 0,
        }
    }

    /// Record a write so least-recently-written ordering stays accurate
    pub fn touch(&self, owner: WriterId) {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;
        if let Some(entry) = state.owners.get_mut(&owner) {
            entry.last_write = tick;
        }
    }

    /// Account `bytes` without preempting anyone
    pub fn try_reserve(&self, owner: WriterId, bytes: u64) -> bool {
        let mut state = self.state.lock();
        Self::grant_locked(&mut state, self.budget, owner, bytes)
    }

    /// Account `bytes` for `owner`, preempting victims until they fit
    ///
    /// `reclaim(victim)` must free the victim's buffer (flush or spill) and
    /// call [`release`](Self::release) for what it freed, returning that
    /// amount. The victim may be `owner` itself.
    pub fn reserve<F>(&self, owner: WriterId, bytes: u64, mut reclaim: F) -> Result<()>
    where
        F: FnMut(WriterId) -> Result<u64>,
    {
        if bytes > self.budget {
            return Err(StrataError::ResourceExhausted {
                requested: bytes,
                budget: self.budget,
            });
        }

        loop {
            let victim = {
                let mut state = self.state.lock();
                if Self::grant_locked(&mut state, self.budget, owner, bytes) {
                    return Ok(());
                }

                let group = state
                    .owners
                    .get(&owner)
                    .map(|o| o.group)
                    .ok_or_else(|| StrataError::Storage(format!("{} is not registered", owner)))?;

                match self.select_victim(&state, group) {
                    Some(victim) => victim,
                    None => {
                        return Err(StrataError::ResourceExhausted {
                            requested: bytes,
                            budget: self.budget,
                        })
                    }
                }
            };

            self.preempt_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%owner, %victim, bytes, "preempting write buffer");

            let freed = reclaim(victim)?;
            if freed == 0 {
                return Err(StrataError::ResourceExhausted {
                    requested: bytes,
                    budget: self.budget,
                });
            }
        }
    }

    /// Return bytes after a flush, spill or writer expiry
    pub fn release(&self, owner: WriterId, bytes: u64) {
        let mut state = self.state.lock();
        let returned = match state.owners.get_mut(&owner) {
            Some(entry) => {
                let returned = bytes.min(entry.reserved);
                entry.reserved -= returned;
                returned
            }
            None => 0,
        };
        state.used -= returned;
    }

    // =========================================================================
    // Gauges
    // =========================================================================

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used
    }

    pub fn reserved_by(&self, owner: WriterId) -> u64 {
        self.state
            .lock()
            .owners
            .get(&owner)
            .map(|o| o.reserved)
            .unwrap_or(0)
    }

    /// Number of forced reclaims so far
    pub fn preempt_count(&self) -> u64 {
        self.preempt_count.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn grant_locked(state: &mut PoolState, budget: u64, owner: WriterId, bytes: u64) -> bool {
        if state.used + bytes > budget {
            return false;
        }
        state.tick += 1;
        let tick = state.tick;
        match state.owners.get_mut(&owner) {
            Some(entry) => {
                entry.reserved += bytes;
                entry.last_write = tick;
                state.used += bytes;
                true
            }
            None => false,
        }
    }

    fn select_victim(&self, state: &PoolState, group: PoolGroup) -> Option<WriterId> {
        let candidates = state
            .owners
            .iter()
            .filter(|(_, o)| o.group == group && o.reserved > 0);

        match self.policy {
            VictimPolicy::LargestBuffer => candidates
                .max_by(|(_, a), (_, b)| {
                    a.reserved
                        .cmp(&b.reserved)
                        .then_with(|| b.last_write.cmp(&a.last_write))
                })
                .map(|(id, _)| *id),
            VictimPolicy::LeastRecentlyWritten => candidates
                .min_by_key(|(_, o)| o.last_write)
                .map(|(id, _)| *id),
        }
    }
}
