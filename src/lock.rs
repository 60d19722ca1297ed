//! Named, time-bounded mutual exclusion for protocol runs.
//!
//! A lock is held through a [LockKey] returned by [LockService::acquire].
//! Every holder gets a lease: once it runs out the lock is handed to the next
//! waiter even if the holder never released it, and the holder's key stops
//! being valid.

use crate::abiencode::types::Hash;
use parking_lot::Mutex;
use std::collections::{hash_map, HashMap};
use thiserror::Error;
use tokio::{
    sync::oneshot,
    time::{sleep_until, Duration, Instant},
};
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The key does not (or no longer) own the lock.
    #[error("invalid key for lock {0}")]
    InvalidLockKey(String),
}

/// Ownership token of a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey(u64);

#[derive(Debug)]
struct Entry {
    key: LockKey,
    expires_at: Instant,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Entry {
    fn wake_all(self) {
        for waiter in self.waiters {
            // The waiter may have given up already.
            let _ = waiter.send(());
        }
    }
}

pub fn channel_lock_name(channel_id: &Hash) -> String {
    format!("channel:{}", channel_id)
}

pub fn app_lock_name(channel_id: &Hash, app_identity_hash: &Hash) -> String {
    format!("channel:{}:app:{}", channel_id, app_identity_hash)
}

#[derive(Debug, Default)]
pub struct LockService {
    locks: Mutex<HashMap<String, Entry>>,
}

impl LockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `name` is free (released or its lease ran out) and takes
    /// it for at most `lease`.
    pub async fn acquire(&self, name: &str, lease: Duration) -> LockKey {
        loop {
            let (woken, holder_expires_at) = {
                let mut locks = self.locks.lock();
                let now = Instant::now();
                let key = LockKey(rand::random());

                match locks.entry(name.to_owned()) {
                    hash_map::Entry::Vacant(v) => {
                        v.insert(Entry {
                            key,
                            expires_at: now + lease,
                            waiters: Vec::new(),
                        });
                        debug!(lock = name, "acquired");
                        return key;
                    }
                    hash_map::Entry::Occupied(mut o) if o.get().expires_at <= now => {
                        warn!(lock = name, "lease of previous holder expired, forcing release");
                        let entry = o.get_mut();
                        entry.key = key;
                        entry.expires_at = now + lease;
                        return key;
                    }
                    hash_map::Entry::Occupied(mut o) => {
                        let (tx, rx) = oneshot::channel();
                        let entry = o.get_mut();
                        // Waiters that timed out are gone for good.
                        entry.waiters.retain(|w| !w.is_closed());
                        entry.waiters.push(tx);
                        (rx, entry.expires_at)
                    }
                }
            };

            debug!(lock = name, "waiting");
            tokio::select! {
                _ = woken => {}
                _ = sleep_until(holder_expires_at) => {}
            }
        }
    }

    /// Releases `name` if `key` owns it. A key whose lease ran out is
    /// rejected, even if nobody took over the lock in the meantime.
    pub fn release(&self, name: &str, key: LockKey) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        match locks.entry(name.to_owned()) {
            hash_map::Entry::Occupied(o) if o.get().key == key => {
                let expired = o.get().expires_at <= Instant::now();
                o.remove().wake_all();
                if expired {
                    warn!(lock = name, "release after lease expired");
                    return Err(LockError::InvalidLockKey(name.to_owned()));
                }
                debug!(lock = name, "released");
                Ok(())
            }
            _ => Err(LockError::InvalidLockKey(name.to_owned())),
        }
    }

    /// Whether `key` currently owns `name` with time left on its lease.
    pub fn is_held(&self, name: &str, key: LockKey) -> bool {
        self.locks
            .lock()
            .get(name)
            .map_or(false, |e| e.key == key && e.expires_at > Instant::now())
    }
}
