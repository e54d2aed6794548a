use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Source of the current time, injectable so expiry can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convert a std duration to chrono, saturating instead of failing
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// In-memory key/value cache with per-entry time-to-live
///
/// Expired entries are dropped lazily on access; there is no background
/// sweep. Writes replace the whole entry under the write lock, so a reader
/// either sees the previous value or the new one. Concurrent misses for the
/// same key may both populate it; the last write wins.
///
/// When `max_entries` is non-zero and the cache is full, an insert first
/// drops expired entries and then the entry closest to expiry.
pub struct ExpiringCache<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            max_entries,
        }
    }

    /// Look up a live entry. An expired entry is evicted and reported absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();

        {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.write();
        // Re-check: another writer may have refreshed the key in between
        if let Some(entry) = entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
            entries.remove(key);
            trace!(?key, "Evicted expired cache entry");
        }

        None
    }

    /// Insert or replace `key`, live for `ttl` from now. A zero TTL is a no-op.
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }

        let expires_at = self
            .clock
            .now()
            .checked_add_signed(to_chrono(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.put_until(key, value, expires_at);
    }

    /// Insert or replace `key`, live until `expires_at`. An instant that is
    /// not in the future stores nothing.
    pub fn put_until(&self, key: K, value: V, expires_at: DateTime<Utc>) {
        let now = self.clock.now();
        if expires_at <= now {
            return;
        }

        let mut entries = self.write();

        if self.max_entries > 0
            && entries.len() >= self.max_entries
            && !entries.contains_key(&key)
        {
            entries.retain(|_, entry| entry.expires_at > now);

            if entries.len() >= self.max_entries {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());

                if let Some(victim) = soonest {
                    debug!(key = ?victim, "Cache full, evicting entry closest to expiry");
                    entries.remove(&victim);
                }
            }
        }

        entries.insert(key, Entry { value, expires_at });
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn invalidate_all(&self) {
        self.write().clear();
    }

    /// Number of stored entries, including not yet evicted expired ones
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<K, Entry<V>>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K, V> fmt::Debug for ExpiringCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.entries.read().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("ExpiringCache")
            .field("len", &len)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + to_chrono(by);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
