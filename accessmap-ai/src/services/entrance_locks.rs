//! Per-entrance exclusive locks
//!
//! Every write that recomputes an entrance's record holds that entrance's
//! lock, so a recomputation always sees a fully appended history and record
//! swaps for one entrance never interleave. Different entrances proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::EntranceId;

/// Entries are pruned once the map grows past this and they are idle
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Clone, Default)]
pub struct EntranceLocks {
    inner: Arc<Mutex<HashMap<EntranceId, Arc<Mutex<()>>>>>,
}

impl EntranceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one entrance
    pub async fn acquire(&self, id: EntranceId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() > PRUNE_THRESHOLD {
                // Only the map holds idle locks
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Lock two entrances, always in ascending id order
    ///
    /// Returns one guard when both ids are the same entrance.
    pub async fn acquire_pair(&self, a: EntranceId, b: EntranceId) -> Vec<OwnedMutexGuard<()>> {
        if a == b {
            return vec![self.acquire(a).await];
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first_guard = self.acquire(first).await;
        let second_guard = self.acquire(second).await;
        vec![first_guard, second_guard]
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_entrance_is_exclusive() {
        let locks = EntranceLocks::new();
        let guard = locks.acquire(EntranceId(1)).await;

        let contender = locks.clone();
        let waiting = tokio::spawn(async move {
            let _g = contender.acquire(EntranceId(1)).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_different_entrances_do_not_block() {
        let locks = EntranceLocks::new();
        let _a = locks.acquire(EntranceId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(EntranceId(2))).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);
    }

    #[tokio::test]
    async fn test_pair_in_either_order_does_not_deadlock() {
        let locks = EntranceLocks::new();

        let mut tasks = Vec::new();
        for i in 0..20 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
                let _guards = locks.acquire_pair(EntranceId(a), EntranceId(b)).await;
                tokio::task::yield_now().await;
            }));
        }

        for task in tasks {
            tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        }
        assert_eq!(locks.acquire_pair(EntranceId(3), EntranceId(3)).await.len(), 1);
    }
}
