use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use crate::error::StoreError;
use crate::store::{namespaced, CounterRecord, Store, DEFAULT_NAMESPACE};
use crate::utils::fnv1a_folded;

pub const DEFAULT_STORE_CAPACITY: usize = 1024;

/// How long a record outlives its last write unless told otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// One slot of the [HashTable] backing array.
#[derive(Debug, Clone, Default)]
pub(crate) enum Slot {
    /// Never used since the last rehash. Ends a probe.
    #[default]
    Empty,
    /// Held a key that was deleted. Probes continue past it, inserts may reuse it.
    Deleted,
    /// `expires_at: None` never expires.
    Occupied { key: String, value: Vec<u8>, expires_at: Option<Instant> },
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        match self {
            Slot::Occupied { expires_at, .. } => expires_at.map_or(true, |at| at > now),
            _ => false,
        }
    }
}

/// [HashTable] maps string keys to encoded values using open addressing
/// with linear probing and FNV-1a hashing.
///
/// Keys compare ASCII-case-insensitively. The table doubles once half of
/// its slots hold live entries, so a probe always reaches an empty slot.
/// Expired entries read as absent and are dropped at the next rehash.
#[derive(Debug, Clone)]
pub(crate) struct HashTable {
    slots: Vec<Slot>,
    /// occupied slots, expired or not
    len: usize,
    /// [Slot::Deleted] slots
    deleted: usize,
}

impl HashTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Slot::Empty; capacity.max(2)],
            len: 0,
            deleted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn index_of(key: &str, capacity: usize) -> usize {
        (fnv1a_folded(key) % capacity as u64) as usize
    }

    /// Index of the occupied slot holding `key`, expired or not.
    fn find(&self, key: &str) -> Option<usize> {
        let capacity = self.capacity();
        let mut index = Self::index_of(key, capacity);

        for _ in 0..capacity {
            match &self.slots[index] {
                Slot::Empty => return None,
                Slot::Occupied { key: k, .. } if k.eq_ignore_ascii_case(key) => return Some(index),
                _ => {}
            }
            index = (index + 1) % capacity;
        }

        None
    }

    /// First reusable slot on the probe path of `key`.
    fn vacant(&self, key: &str) -> usize {
        let capacity = self.capacity();
        let mut index = Self::index_of(key, capacity);

        while let Slot::Occupied { .. } = self.slots[index] {
            index = (index + 1) % capacity;
        }

        index
    }

    pub fn get(&self, key: &str, now: Instant) -> Option<&[u8]> {
        let slot = &self.slots[self.find(key)?];
        match slot {
            Slot::Occupied { value, .. } if slot.is_live(now) => Some(value.as_slice()),
            _ => None,
        }
    }

    pub fn insert(
        &mut self,
        key: String,
        value: Vec<u8>,
        expires_at: Option<Instant>,
        now: Instant,
    ) {
        if let Some(index) = self.find(&key) {
            if let Slot::Occupied { value: v, expires_at: e, .. } = &mut self.slots[index] {
                *v = value;
                *e = expires_at;
            }
            return;
        }

        if self.len + self.deleted >= self.capacity() / 2 {
            self.rehash(now);
        }

        let index = self.vacant(&key);
        if let Slot::Deleted = self.slots[index] {
            self.deleted -= 1;
        }
        self.slots[index] = Slot::Occupied { key, value, expires_at };
        self.len += 1;
    }

    /// Tombstone the slot of `key`. Returns the value only if it had not expired.
    pub fn remove(&mut self, key: &str, now: Instant) -> Option<Vec<u8>> {
        let index = self.find(key)?;
        let live = self.slots[index].is_live(now);

        match mem::replace(&mut self.slots[index], Slot::Deleted) {
            Slot::Occupied { value, .. } => {
                self.len -= 1;
                self.deleted += 1;
                live.then_some(value)
            }
            other => {
                self.slots[index] = other;
                None
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.fill(Slot::Empty);
        self.len = 0;
        self.deleted = 0;
    }

    /// Rebuild the backing array, dropping tombstones and expired entries.
    /// Capacity doubles when the live entries alone reach the load limit;
    /// otherwise the rebuild only compacts.
    fn rehash(&mut self, now: Instant) {
        let old_capacity = self.capacity();
        let live: Vec<Slot> = mem::take(&mut self.slots)
            .into_iter()
            .filter(|slot| slot.is_live(now))
            .collect();

        let capacity = if live.len() >= old_capacity / 2 {
            old_capacity * 2
        } else {
            old_capacity
        };
        let expired = self.len - live.len();

        self.slots = vec![Slot::Empty; capacity];
        self.len = live.len();
        self.deleted = 0;

        for slot in live {
            if let Slot::Occupied { key, .. } = &slot {
                let index = self.vacant(key);
                self.slots[index] = slot;
            }
        }

        tracing::debug!(
            from = old_capacity,
            to = capacity,
            len = self.len,
            expired,
            "rehashed memory store table"
        );
    }
}

impl Default for HashTable {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

/// [MemStore] stores data in process memory, in a [HashTable] guarded by a
/// table-wide read-write lock.
///
/// A record expires [DEFAULT_TTL] after its last write, or after the TTL set
/// with [with_ttl](Self::with_ttl). Keep the TTL at least as long as the rate
/// limit window, or counts are forgotten before their window closes.
///
/// Cloning a [MemStore] is cheap, and clones share the same table.
#[derive(Debug, Clone)]
pub struct MemStore {
    pub(crate) namespace: String,
    pub(crate) ttl: Option<Duration>,
    pub(crate) table: Arc<RwLock<HashTable>>,
}

impl MemStore {
    /// Create a [MemStore] with `capacity` initial slots. The capacity
    /// grows automatically.
    pub fn new(capacity: usize) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: Some(DEFAULT_TTL),
            table: Arc::new(RwLock::new(HashTable::new(capacity))),
        }
    }

    pub fn with_namespace<T: ToString>(mut self, namespace: T) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    /// Expire every record `ttl` after its last write.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Keep records until they are deleted.
    pub fn without_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    /// Number of occupied slots. Expired records count until the table
    /// next rehashes.
    pub async fn len(&self) -> usize {
        self.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of slots in the backing array.
    pub async fn capacity(&self) -> usize {
        self.table.read().await.capacity()
    }

    /// Drop every record, keeping the current capacity.
    pub async fn clear(&self) {
        self.table.write().await.clear()
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.namespace, key)
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new(DEFAULT_STORE_CAPACITY)
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    type Error = StoreError;

    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        let key = self.key(key);
        let table = self.table.read().await;

        match table.get(&key, Instant::now()) {
            Some(bytes) => Ok(Some(CounterRecord::from_bytes(bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, record: &CounterRecord) -> Result<(), Self::Error> {
        let key = self.key(key);
        let value = record.to_bytes()?;
        let now = Instant::now();
        let expires_at = self.ttl.and_then(|ttl| now.checked_add(ttl));

        self.table.write().await.insert(key, value, expires_at, now);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        let key = self.key(key);
        let removed = self.table.write().await.remove(&key, Instant::now());

        removed
            .map(|bytes| CounterRecord::from_bytes(&bytes))
            .transpose()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use super::*;

    fn record(count: u32) -> CounterRecord {
        CounterRecord {
            window_start: Utc::now(),
            count,
        }
    }

    /// `n` distinct keys whose home slot in a table of `capacity` is the same.
    fn colliding_keys(capacity: usize, n: usize) -> Vec<String> {
        let target = HashTable::index_of("k0", capacity);
        (0..)
            .map(|i| format!("k{}", i))
            .filter(|k| HashTable::index_of(k, capacity) == target)
            .take(n)
            .collect()
    }

    #[tokio::test]
    async fn get_set_del() -> anyhow::Result<()> {
        let store = MemStore::default();

        assert_eq!(store.get("127.0.0.1").await?, None);

        let first = record(1);
        store.set("127.0.0.1", &first).await?;
        assert_eq!(store.get("127.0.0.1").await?, Some(first));

        let second = record(2);
        store.set("127.0.0.1", &second).await?;
        assert_eq!(store.get("127.0.0.1").await?, Some(second));
        assert_eq!(store.len().await, 1);

        assert_eq!(store.del("127.0.0.1").await?, Some(second));
        assert_eq!(store.get("127.0.0.1").await?, None);
        assert_eq!(store.del("127.0.0.1").await?, None);
        assert!(store.is_empty().await);

        Ok(())
    }

    #[tokio::test]
    async fn keys_ignore_case() -> anyhow::Result<()> {
        let store = MemStore::default();
        let value = record(3);

        store.set("FE80::1", &value).await?;
        assert_eq!(store.get("fe80::1").await?, Some(value));

        store.set("fe80::1", &record(4)).await?;
        assert_eq!(store.len().await, 1);

        Ok(())
    }

    #[tokio::test]
    async fn namespaces_are_isolated() -> anyhow::Result<()> {
        let a = MemStore::default().with_namespace("a");
        // a clone shares the table, the namespace keeps the keys apart
        let b = a.clone().with_namespace("b");

        a.set("key", &record(1)).await?;
        assert!(b.get("key").await?.is_none());
        assert_eq!(a.get("key").await?.map(|r| r.count), Some(1));

        b.set("key", &record(2)).await?;
        assert_eq!(a.get("key").await?.map(|r| r.count), Some(1));
        assert_eq!(b.get("key").await?.map(|r| r.count), Some(2));
        assert_eq!(a.len().await, 2);

        Ok(())
    }

    #[tokio::test]
    async fn growth_keeps_every_key() -> anyhow::Result<()> {
        let store = MemStore::default();
        let n = 3 * DEFAULT_STORE_CAPACITY;

        for i in 0..n {
            store.set(&format!("10.0.{}.{}", i / 256, i % 256), &record(i as u32 + 1)).await?;
        }

        assert_eq!(store.len().await, n);
        assert!(store.capacity().await > 2 * n);

        for i in 0..n {
            let got = store.get(&format!("10.0.{}.{}", i / 256, i % 256)).await?;
            assert_eq!(got.map(|r| r.count), Some(i as u32 + 1));
        }

        Ok(())
    }

    #[test]
    fn grows_at_half_capacity() {
        let now = Instant::now();
        let mut table = HashTable::new(8);

        for i in 0..4 {
            table.insert(format!("key-{}", i), vec![i], None, now);
        }
        assert_eq!(table.capacity(), 8);

        table.insert("key-4".to_string(), vec![4], None, now);
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.len(), 5);

        // overwrites never grow the table
        for _ in 0..100 {
            table.insert("key-0".to_string(), vec![0], None, now);
        }
        assert_eq!(table.capacity(), 16);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn delete_keeps_probe_chain() {
        let now = Instant::now();
        let mut table = HashTable::new(64);
        let keys = colliding_keys(64, 3);

        for (i, key) in keys.iter().enumerate() {
            table.insert(key.clone(), vec![i as u8], None, now);
        }

        // the middle key sits between the other two on the same probe path
        assert_eq!(table.remove(&keys[1], now), Some(vec![1]));
        assert_eq!(table.get(&keys[0], now), Some(&[0u8][..]));
        assert_eq!(table.get(&keys[1], now), None);
        assert_eq!(table.get(&keys[2], now), Some(&[2u8][..]));

        // the freed slot is reused without duplicating a key further down the chain
        table.insert(keys[2].clone(), vec![22], None, now);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&keys[2], now), Some(&[22u8][..]));

        table.insert(keys[1].clone(), vec![11], None, now);
        assert_eq!(table.deleted, 0);
        assert_eq!(table.get(&keys[1], now), Some(&[11u8][..]));
    }

    #[test]
    fn churn_compacts_tombstones() {
        let now = Instant::now();
        let mut table = HashTable::new(16);

        for i in 0..1000 {
            let key = format!("client-{}", i);
            table.insert(key.clone(), vec![1], None, now);
            table.remove(&key, now);
        }

        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 16);
        assert!(table.len + table.deleted <= table.capacity() / 2);
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let now = Instant::now();
        let ttl = Duration::from_secs(10);
        let mut table = HashTable::new(16);

        table.insert("short".to_string(), vec![1], Some(now + ttl), now);
        table.insert("forever".to_string(), vec![2], None, now);

        let later = now + 2 * ttl;
        assert_eq!(table.get("short", now), Some(&[1u8][..]));
        assert_eq!(table.get("short", later), None);
        assert_eq!(table.get("forever", later), Some(&[2u8][..]));
        assert_eq!(table.remove("short", later), None);

        // rewriting an expired key revives it in place
        table.insert("forever".to_string(), vec![3], Some(later + ttl), later);
        assert_eq!(table.get("forever", later), Some(&[3u8][..]));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn expired_entries_are_reclaimed() {
        let ttl = Duration::from_millis(10);
        let mut now = Instant::now();
        let mut table = HashTable::new(64);

        // every round writes 30 fresh keys once the previous round has expired
        for round in 0..200 {
            for i in 0..30 {
                table.insert(format!("10.{}.0.{}", round, i), vec![1], Some(now + ttl), now);
            }
            now += 2 * ttl;
        }

        assert_eq!(table.capacity(), 64);
        assert!(table.len() <= 32);

        // live entries still survive the rehash that drops the expired ones
        for i in 0..30 {
            table.insert(format!("live-{}", i), vec![2], None, now);
        }
        for i in 0..30 {
            assert_eq!(table.get(&format!("live-{}", i), now), Some(&[2u8][..]));
        }
        assert_eq!(table.len(), 30);
    }

    #[tokio::test]
    async fn ttl_bounds_memory_under_key_churn() -> anyhow::Result<()> {
        let store = MemStore::new(64).with_ttl(Duration::from_millis(10));

        for round in 0..5 {
            for i in 0..30 {
                store.set(&format!("10.{}.0.{}", round, i), &record(1)).await?;
            }
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        assert!(store.get("10.0.0.0").await?.is_none());
        assert_eq!(store.capacity().await, 64);
        assert!(store.len().await <= 32);

        Ok(())
    }

    #[tokio::test]
    async fn without_ttl_keeps_records() -> anyhow::Result<()> {
        let store = MemStore::new(64).with_ttl(Duration::from_millis(1)).without_ttl();

        store.set("A", &record(1)).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get("A").await?.is_some());

        Ok(())
    }

    #[tokio::test]
    async fn clear() -> anyhow::Result<()> {
        let store = MemStore::new(8);

        store.set("John", &record(1)).await?;
        store.set("Meg", &record(3)).await?;

        let cloned = store.clone();
        cloned.clear().await;

        assert!(store.get("John").await?.is_none());
        assert!(store.get("Meg").await?.is_none());
        assert_eq!(store.capacity().await, 8);

        Ok(())
    }
}
