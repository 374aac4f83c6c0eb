//! Execution slots
//!
//! At most one plan in flight per `(chain, loan asset)`. A plan holds its slot
//! from planning until its terminal result; the guard releases it on drop.

use alloy_primitives::Address;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::config::SlotPolicy;
use crate::errors::{ArbError, ArbResult};

type SlotKey = (u64, Address);

pub struct ExecutionSlots {
    slots: DashMap<SlotKey, Arc<Mutex<()>>>,
    policy: SlotPolicy,
}

/// Exclusive hold on one slot
pub struct SlotGuard {
    key: SlotKey,
    _guard: OwnedMutexGuard<()>,
}

impl SlotGuard {
    pub fn chain_id(&self) -> u64 {
        self.key.0
    }

    pub fn asset(&self) -> Address {
        self.key.1
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        debug!("Released slot chain {} asset {:?}", self.key.0, self.key.1);
    }
}

impl ExecutionSlots {
    pub fn new(policy: SlotPolicy) -> Self {
        Self {
            slots: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    /// `Queue` waits for the slot; `Drop` fails fast with `SlotBusy`
    pub async fn acquire(&self, chain_id: u64, asset: Address) -> ArbResult<SlotGuard> {
        let key = (chain_id, asset);
        // Clone out of the map so no shard lock is held across the await
        let slot = self.slots.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone();

        let guard = match self.policy {
            SlotPolicy::Queue => slot.lock_owned().await,
            SlotPolicy::Drop => slot.try_lock_owned().map_err(|_| ArbError::SlotBusy {
                chain_id,
                asset: format!("{:?}", asset),
            })?,
        };

        debug!("Acquired slot chain {} asset {:?}", chain_id, asset);
        Ok(SlotGuard { key, _guard: guard })
    }

    pub fn is_busy(&self, chain_id: u64, asset: &Address) -> bool {
        let Some(slot) = self.slots.get(&(chain_id, *asset)).map(|s| s.value().clone()) else {
            return false;
        };
        let busy = slot.try_lock().is_err();
        busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn contend(policy: SlotPolicy, tasks: usize) -> (usize, usize, usize) {
        let slots = Arc::new(ExecutionSlots::new(policy));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));
        let asset = Address::repeat_byte(7);

        let mut handles = Vec::new();
        for _ in 0..tasks {
            let slots = slots.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_guard) = slots.acquire(1, asset).await else {
                    return;
                };
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        (max_seen.load(Ordering::SeqCst), completed.load(Ordering::SeqCst), tasks)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_queue_runs_everything_one_at_a_time() {
        let (max_seen, completed, tasks) = contend(SlotPolicy::Queue, 16).await;
        assert_eq!(max_seen, 1);
        assert_eq!(completed, tasks);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_drop_never_overlaps() {
        let (max_seen, completed, _) = contend(SlotPolicy::Drop, 16).await;
        assert_eq!(max_seen, 1);
        assert!(completed >= 1);
    }

    #[tokio::test]
    async fn test_drop_policy_reports_busy() {
        let slots = ExecutionSlots::new(SlotPolicy::Drop);
        let asset = Address::repeat_byte(1);

        let held = slots.acquire(1, asset).await.unwrap();
        assert!(slots.is_busy(1, &asset));
        assert!(matches!(slots.acquire(1, asset).await, Err(ArbError::SlotBusy { chain_id: 1, .. })));

        // Other chains and assets are independent
        assert!(slots.acquire(2, asset).await.is_ok());
        assert!(slots.acquire(1, Address::repeat_byte(2)).await.is_ok());

        drop(held);
        assert!(!slots.is_busy(1, &asset));
        assert!(slots.acquire(1, asset).await.is_ok());
    }
}
