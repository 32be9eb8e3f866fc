//! Write buffer pool tests

use std::sync::Arc;
use std::thread;

use strata::memory::{WriteBufferPool, WriterId};
use strata::{StrataError, VictimPolicy};

// =============================================================================
// Helper Functions
// =============================================================================

fn pool(budget: u64, policy: VictimPolicy) -> WriteBufferPool {
    WriteBufferPool::new(budget, 32, policy)
}

/// Reclaim closure that frees everything the victim holds
fn release_all(pool: &WriteBufferPool) -> impl FnMut(WriterId) -> strata::Result<u64> + '_ {
    move |victim| {
        let held = pool.reserved_by(victim);
        pool.release(victim, held);
        Ok(held)
    }
}

// =============================================================================
// Accounting
// =============================================================================

#[test]
fn test_reserve_and_release_accounting() {
    let pool = pool(256, VictimPolicy::LargestBuffer);
    let group = pool.new_group();
    let a = pool.register(group);
    let b = pool.register(group);

    pool.reserve(a, 64, |_| Ok(0)).unwrap();
    pool.reserve(b, 96, |_| Ok(0)).unwrap();
    assert_eq!(pool.used_bytes(), 160);
    assert_eq!(pool.reserved_by(a), 64);
    assert_eq!(pool.reserved_by(b), 96);

    pool.release(a, 32);
    assert_eq!(pool.used_bytes(), 128);
    assert_eq!(pool.reserved_by(a), 32);
    assert_eq!(pool.preempt_count(), 0);
}

#[test]
fn test_release_never_goes_below_zero() {
    let pool = pool(256, VictimPolicy::LargestBuffer);
    let owner = pool.register(pool.new_group());

    pool.reserve(owner, 32, |_| Ok(0)).unwrap();
    pool.release(owner, 1000);
    assert_eq!(pool.used_bytes(), 0);
    assert_eq!(pool.reserved_by(owner), 0);
}

#[test]
fn test_unregister_returns_reservation() {
    let pool = pool(256, VictimPolicy::LargestBuffer);
    let owner = pool.register(pool.new_group());

    pool.reserve(owner, 128, |_| Ok(0)).unwrap();
    assert_eq!(pool.unregister(owner), 128);
    assert_eq!(pool.used_bytes(), 0);
    assert_eq!(pool.unregister(owner), 0);
}

#[test]
fn test_try_reserve_does_not_preempt() {
    let pool = pool(64, VictimPolicy::LargestBuffer);
    let group = pool.new_group();
    let a = pool.register(group);
    let b = pool.register(group);

    assert!(pool.try_reserve(a, 64));
    assert!(!pool.try_reserve(b, 32));
    assert_eq!(pool.preempt_count(), 0);
    assert_eq!(pool.used_bytes(), 64);
}

// =============================================================================
// Preemption
// =============================================================================

#[test]
fn test_reserve_preempts_largest_buffer() {
    let pool = pool(256, VictimPolicy::LargestBuffer);
    let group = pool.new_group();
    let small = pool.register(group);
    let large = pool.register(group);
    let writer = pool.register(group);

    pool.reserve(small, 64, |_| Ok(0)).unwrap();
    pool.reserve(large, 192, |_| Ok(0)).unwrap();

    let mut victims = Vec::new();
    let mut reclaim = release_all(&pool);
    pool.reserve(writer, 32, |victim| {
        victims.push(victim);
        reclaim(victim)
    })
    .unwrap();

    assert_eq!(victims, vec![large]);
    assert_eq!(pool.preempt_count(), 1);
    assert_eq!(pool.reserved_by(small), 64);
    assert_eq!(pool.reserved_by(writer), 32);
    assert_eq!(pool.used_bytes(), 96);
}

#[test]
fn test_reserve_preempts_least_recently_written() {
    let pool = pool(128, VictimPolicy::LeastRecentlyWritten);
    let group = pool.new_group();
    let old = pool.register(group);
    let recent = pool.register(group);
    let writer = pool.register(group);

    pool.reserve(old, 32, |_| Ok(0)).unwrap();
    pool.reserve(recent, 96, |_| Ok(0)).unwrap();
    pool.touch(recent);

    let mut victims = Vec::new();
    let mut reclaim = release_all(&pool);
    pool.reserve(writer, 32, |victim| {
        victims.push(victim);
        reclaim(victim)
    })
    .unwrap();

    assert_eq!(victims, vec![old]);
    assert_eq!(pool.reserved_by(recent), 96);
}

#[test]
fn test_requesting_writer_can_be_its_own_victim() {
    let pool = pool(64, VictimPolicy::LargestBuffer);
    let owner = pool.register(pool.new_group());

    pool.reserve(owner, 64, |_| Ok(0)).unwrap();

    let mut victims = Vec::new();
    let mut reclaim = release_all(&pool);
    pool.reserve(owner, 32, |victim| {
        victims.push(victim);
        reclaim(victim)
    })
    .unwrap();

    assert_eq!(victims, vec![owner]);
    assert_eq!(pool.reserved_by(owner), 32);
    assert_eq!(pool.preempt_count(), 1);
}

#[test]
fn test_victims_are_chosen_within_the_group() {
    let pool = pool(128, VictimPolicy::LargestBuffer);
    let other = pool.register(pool.new_group());
    let group = pool.new_group();
    let writer = pool.register(group);

    pool.reserve(other, 128, |_| Ok(0)).unwrap();

    let result = pool.reserve(writer, 32, |_| panic!("no victim in this group"));
    assert!(matches!(result, Err(StrataError::ResourceExhausted { .. })));
    assert_eq!(pool.reserved_by(other), 128);
}

#[test]
fn test_request_above_budget_is_exhausted() {
    let pool = pool(64, VictimPolicy::LargestBuffer);
    let owner = pool.register(pool.new_group());

    match pool.reserve(owner, 96, |_| Ok(0)) {
        Err(StrataError::ResourceExhausted { requested, budget }) => {
            assert_eq!(requested, 96);
            assert_eq!(budget, 64);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(pool.used_bytes(), 0);
}

#[test]
fn test_reclaim_freeing_nothing_is_exhausted() {
    let pool = pool(64, VictimPolicy::LargestBuffer);
    let group = pool.new_group();
    let a = pool.register(group);
    let b = pool.register(group);

    pool.reserve(a, 64, |_| Ok(0)).unwrap();
    let result = pool.reserve(b, 32, |_| Ok(0));
    assert!(matches!(result, Err(StrataError::ResourceExhausted { .. })));
    assert_eq!(pool.used_bytes(), 64);
}

#[test]
fn test_reclaim_error_propagates() {
    let pool = pool(64, VictimPolicy::LargestBuffer);
    let group = pool.new_group();
    let a = pool.register(group);
    let b = pool.register(group);

    pool.reserve(a, 64, |_| Ok(0)).unwrap();
    let result = pool.reserve(b, 32, |_| Err(StrataError::Storage("disk full".into())));
    assert!(matches!(result, Err(StrataError::Storage(_))));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_reservations_never_exceed_budget() {
    let pool = Arc::new(pool(512, VictimPolicy::LargestBuffer));
    let group = pool.new_group();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let owner = pool.register(group);
                for i in 0..500u64 {
                    let bytes = 32 * (1 + i % 4);
                    pool.reserve(owner, bytes, |victim| {
                        let held = pool.reserved_by(victim);
                        pool.release(victim, held);
                        Ok(held.max(1))
                    })
                    .unwrap();
                    assert!(pool.used_bytes() <= pool.budget());
                    if i % 3 == 0 {
                        pool.release(owner, bytes);
                    }
                }
                pool.unregister(owner);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(pool.used_bytes(), 0);
}
