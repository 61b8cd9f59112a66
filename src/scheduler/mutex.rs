/// Keyed per-account mutex registry
///
/// Workers serialize publishes within one account so quota consumption and
/// posted order stay coherent. Entries are held weakly; once the last worker
/// drops its Arc the slot is reclaimed on the next sweep.
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct AccountLocks {
    slots: StdMutex<HashMap<i64, Weak<AsyncMutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the lock for one account
    pub fn for_account(&self, account_id: i64) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap();

        if let Some(existing) = slots.get(&account_id).and_then(Weak::upgrade) {
            return existing;
        }

        let fresh = Arc::new(AsyncMutex::new(()));
        slots.insert(account_id, Arc::downgrade(&fresh));

        // Opportunistic sweep of dead entries
        slots.retain(|_, weak| weak.strong_count() > 0);

        fresh
    }

    #[cfg(test)]
    pub fn live_slots(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_account_gets_same_lock() {
        let locks = AccountLocks::new();
        let a = locks.for_account(1);
        let b = locks.for_account(1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn distinct_accounts_get_distinct_locks() {
        let locks = AccountLocks::new();
        let a = locks.for_account(1);
        let b = locks.for_account(2);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn dropped_locks_are_evicted() {
        let locks = AccountLocks::new();
        for id in 0..32 {
            let _lock = locks.for_account(id);
            // dropped immediately
        }
        let _keep = locks.for_account(99);
        assert!(locks.live_slots() <= 2);
    }

    #[tokio::test]
    async fn lock_serializes_critical_sections() {
        let locks = Arc::new(AccountLocks::new());
        let counter = Arc::new(StdMutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            handles.push(tokio::spawn(async move {
                let lock = locks.for_account(7);
                let _guard = lock.lock().await;
                let mut n = counter.lock().unwrap();
                *n += 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*counter.lock().unwrap(), 8);
    }
}
