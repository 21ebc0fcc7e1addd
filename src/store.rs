//! Key-value store collaborator seam.
//!
//! The production deployment points this trait at an external store
//! with TTL, atomic increment and set-if-absent primitives. The crate
//! ships an in-memory implementation used by the demo mode and the
//! test suite, plus a fault-injecting wrapper for outage tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::breaker::Transient;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store operation timed out")]
    Timeout,
    #[error("store connection failed: {0}")]
    Connection(String),
    /// The store itself refused the request (bad key, wrong type).
    /// Logical, not transient: never trips the circuit.
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Connection(_))
    }
}

/// Operations the cache layer needs from the store. All mutating
/// window/counter operations are atomic at the store; the application
/// never does read-then-write on them.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Atomic set-if-absent. Returns true when the key was set by this
    /// call (i.e. it did not exist).
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;
    /// Record one event in a sliding window and return the number of
    /// events inside the window, including this one. Atomic.
    async fn window_add(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
    /// Count events currently inside the window without recording.
    async fn window_count(&self, key: &str, window: Duration) -> Result<u64, StoreError>;
    /// Add a member to a TTL-bounded set; returns the cardinality
    /// after the add. Atomic.
    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<u64, StoreError>;
    async fn set_card(&self, key: &str) -> Result<u64, StoreError>;
    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;
}

// Bounded growth for in-memory windows, mirroring what the external
// store enforces via trimmed sorted sets.
const MAX_WINDOW_ENTRIES: usize = 1000;

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, (String, Instant)>,
    windows: HashMap<String, Vec<Instant>>,
    sets: HashMap<String, (HashSet<String>, Instant)>,
}

/// In-memory store for demo mode and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        match inner.values.get(key) {
            Some((value, expiry)) => {
                if *expiry <= Instant::now() {
                    inner.values.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .values
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.values.remove(key);
        inner.windows.remove(key);
        inner.sets.remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        let live = inner
            .values
            .get(key)
            .map(|(_, expiry)| *expiry > now)
            .unwrap_or(false);
        if live {
            return Ok(false);
        }
        inner
            .values
            .insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn window_add(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        let entries = inner.windows.entry(key.to_string()).or_default();
        entries.push(now);
        entries.retain(|t| now.duration_since(*t) <= window);
        if entries.len() > MAX_WINDOW_ENTRIES {
            let excess = entries.len() - MAX_WINDOW_ENTRIES;
            entries.drain(0..excess);
        }
        Ok(entries.len() as u64)
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.windows.get_mut(key) {
            Some(entries) => {
                entries.retain(|t| now.duration_since(*t) <= window);
                Ok(entries.len() as u64)
            }
            None => Ok(0),
        }
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        let entry = inner
            .sets
            .entry(key.to_string())
            .or_insert_with(|| (HashSet::new(), now + ttl));
        if entry.1 <= now {
            entry.0.clear();
        }
        entry.0.insert(member.to_string());
        entry.1 = now + ttl;
        Ok(entry.0.len() as u64)
    }

    async fn set_card(&self, key: &str) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.sets.get(key) {
            Some((members, expiry)) if *expiry > now => Ok(members.len() as u64),
            Some(_) => {
                inner.sets.remove(key);
                Ok(0)
            }
            None => Ok(0),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.sets.get(key) {
            Some((members, expiry)) if *expiry > now => Ok(members.contains(member)),
            Some(_) => {
                inner.sets.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }
}

/// Wraps another store and fails every operation with a connection
/// error while `down` is set. Used to simulate outages in tests.
pub struct FlakyStore<S> {
    inner: S,
    down: AtomicBool,
}

impl<S> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        FlakyStore {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Connection("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FlakyStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_nx(key, value, ttl).await
    }

    async fn window_add(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.window_add(key, window).await
    }

    async fn window_count(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.window_count(key, window).await
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.set_add(key, member, ttl).await
    }

    async fn set_card(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.set_card(key).await
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.set_contains(key, member).await
    }
}
