//! In-memory rate limit storage.

use std::time::{Duration, Instant};

use dashmap::{DashMap, mapref::entry::Entry};

use super::{CounterRecord, CounterStorage, StorageError};

#[derive(Debug, Clone, Copy)]
struct Slot {
    record: CounterRecord,
    expires_at: Instant,
}

impl Slot {
    fn live(&self, now: Instant) -> Option<CounterRecord> {
        (self.expires_at > now).then_some(self.record)
    }
}

/// In-memory rate limit storage implementation.
///
/// Updates run under the map's entry lock, so concurrent hits on one key are never lost.
/// At most `max_entries` counters are held; expired ones are purged when a new key would
/// exceed that bound.
pub struct InMemoryStorage {
    slots: DashMap<String, Slot>,
    max_entries: usize,
}

impl InMemoryStorage {
    /// Create a new in-memory storage instance holding at most `max_entries` counters.
    pub fn new(max_entries: u64) -> Self {
        Self {
            slots: DashMap::new(),
            max_entries: usize::try_from(max_entries).unwrap_or(usize::MAX),
        }
    }

    /// Number of counters currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no counter is held.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Makes room for a new key. Must not be called while holding an entry of the map.
    fn reserve(&self, key: &str, now: Instant) -> Result<(), StorageError> {
        if self.slots.len() < self.max_entries || self.slots.contains_key(key) {
            return Ok(());
        }

        self.slots.retain(|_, slot| slot.expires_at > now);
        log::debug!("Purged expired counters, {} left", self.slots.len());

        if self.slots.len() < self.max_entries {
            Ok(())
        } else {
            Err(StorageError::Full(self.max_entries))
        }
    }

    #[cfg(test)]
    pub(crate) fn peek(&self, key: &str) -> Option<CounterRecord> {
        self.slots.get(key).and_then(|slot| slot.live(Instant::now()))
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl CounterStorage for InMemoryStorage {
    async fn update<F>(&self, key: &str, ttl: Duration, f: F) -> Result<CounterRecord, StorageError>
    where
        F: Fn(Option<CounterRecord>) -> CounterRecord + Send + Sync,
    {
        let now = Instant::now();
        self.reserve(key, now)?;

        let expires_at = now + ttl;

        let record = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let record = f(occupied.get().live(now));
                occupied.insert(Slot { record, expires_at });

                record
            }
            Entry::Vacant(vacant) => {
                let record = f(None);
                vacant.insert(Slot { record, expires_at });

                record
            }
        };

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jiff::Timestamp;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn start() -> Timestamp {
        Timestamp::from_second(1_700_000_000).unwrap()
    }

    fn hit(record: Option<CounterRecord>) -> CounterRecord {
        record.unwrap_or_else(|| CounterRecord::empty(start())).hit()
    }

    #[tokio::test]
    async fn missing_key_starts_empty() {
        let storage = InMemoryStorage::default();

        let record = storage.update("ratelimit:address:1.2.3.4:/login", MINUTE, hit).await.unwrap();

        assert_eq!(record.current, 1);
        assert_eq!(storage.peek("other"), None);
    }

    #[tokio::test]
    async fn update_sees_previous_write() {
        let storage = InMemoryStorage::default();

        storage.update("a", MINUTE, hit).await.unwrap();
        storage.update("a", MINUTE, hit).await.unwrap();

        assert_eq!(storage.peek("a").map(|record| record.current), Some(2));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_none() {
        let storage = InMemoryStorage::default();

        storage.update("a", Duration::ZERO, hit).await.unwrap();
        let record = storage.update("a", MINUTE, hit).await.unwrap();

        assert_eq!(record.current, 1);
    }

    #[tokio::test]
    async fn full_store_purges_expired_counters() {
        let storage = InMemoryStorage::new(2);

        storage.update("a", Duration::ZERO, hit).await.unwrap();
        storage.update("b", MINUTE, hit).await.unwrap();
        storage.update("c", MINUTE, hit).await.unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.peek("a"), None);

        let error = storage.update("d", MINUTE, hit).await.unwrap_err();
        assert!(matches!(error, StorageError::Full(2)));

        // existing keys keep counting
        assert_eq!(storage.update("b", MINUTE, hit).await.unwrap().current, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_updates_are_not_lost() {
        let storage = Arc::new(InMemoryStorage::default());

        let tasks: Vec<_> = (0..400)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.update("burst", MINUTE, hit).await.unwrap() })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(storage.peek("burst").map(|record| record.current), Some(400));
    }
}
