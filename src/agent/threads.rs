//! Per-thread execution serialization.
//!
//! Checkpoint writes are not commutative, so at most one orchestrator run may
//! be in flight per thread. Independent threads proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct ThreadRegistry {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the execution lock for a thread, creating it on first use.
    pub async fn lock(&self, thread_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(thread_id).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn same_thread_submissions_are_serialized() {
        let registry = Arc::new(ThreadRegistry::new());
        let thread_id = Uuid::new_v4();
        let in_flight = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let in_flight = Arc::clone(&in_flight);
            handles.push(tokio::spawn(async move {
                let _guard = registry.lock(thread_id).await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst);
                assert_eq!(now, 0, "two executions overlapped on one thread");
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn independent_threads_run_in_parallel() {
        let registry = ThreadRegistry::new();
        let guard_a = registry.lock(Uuid::new_v4()).await;
        // A second thread's lock must not block behind the first.
        let guard_b = registry.lock(Uuid::new_v4()).await;
        drop(guard_a);
        drop(guard_b);
    }
}
