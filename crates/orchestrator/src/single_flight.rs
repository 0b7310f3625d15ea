use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Arena of per-phone-number locks. Holding the guard for a phone makes the
/// read-transition-write sequence for that phone a critical section, while
/// unrelated phones proceed in parallel.
#[derive(Default)]
pub struct PhoneLockArena {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PhoneLockArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, phone: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(phone.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::PhoneLockArena;

    #[tokio::test]
    async fn same_phone_is_serialized() {
        let arena = Arc::new(PhoneLockArena::new());
        let in_section = Arc::new(AtomicU32::new(0));
        let max_seen = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let arena = Arc::clone(&arena);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = arena.acquire("+34600111222").await;
                let current = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "critical section must be exclusive");
    }

    #[tokio::test]
    async fn different_phones_do_not_block_each_other() {
        let arena = PhoneLockArena::new();

        let first = arena.acquire("+34600111222").await;
        // Must resolve immediately even while the first guard is held.
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            arena.acquire("+34600999888"),
        )
        .await
        .expect("unrelated phone must not wait");

        drop(first);
        drop(second);
    }
}
