//! Keyed exclusive locks.
//!
//! One `Mutex<()>` per key, created on first use. Holding the guard for a
//! set id is the exclusive right to read-modify-write that set's pointer and
//! positions; a second caller on the same key waits until the guard drops.
//! Distinct keys never contend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

pub struct KeyedLocks<K> {
    locks: RwLock<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Copy> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create(&self, key: K) -> Arc<Mutex<()>> {
        // Fast path: read lock
        {
            let locks = self.locks.read().await;
            if let Some(lock) = locks.get(&key) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        self.get_or_create(key).await.lock_owned().await
    }

    /// Drop the lock entry for a key that no longer exists.
    pub async fn forget(&self, key: &K) {
        self.locks.write().await.remove(key);
    }

    /// Drop entries nobody holds or waits on. Returns how many were removed.
    pub async fn prune_idle(&self) -> usize {
        let mut locks = self.locks.write().await;
        let before = locks.len();
        // The map holds one reference; any other is a guard or a waiter
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Number of keys with a lock entry.
    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K: Eq + Hash + Copy> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
