use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod mem_store;
#[allow(unused_imports)]
pub use mem_store::*;

#[cfg(feature = "redis-store")]
pub mod redis_store;

/// Namespace prefixed to every key unless a store is told otherwise.
pub const DEFAULT_NAMESPACE: &str = "x-ratelimit";

/// [CounterRecord] is the persisted state of one key: when its current
/// window started and how many requests were seen since.
///
/// Every store encodes it as JSON, `{"Timestamp": "<RFC 3339>", "Counter": n}`,
/// so records stay readable by other clients of a shared backend.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    #[serde(rename = "Timestamp")]
    pub window_start: DateTime<Utc>,
    #[serde(rename = "Counter")]
    pub count: u32,
}

impl CounterRecord {
    /// A fresh record, counting the request that opened the window.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            count: 1,
        }
    }

    /// Time since the window opened. A window that starts in the future
    /// (clock skew between writers) counts as just opened.
    pub fn elapsed_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.window_start).to_std().unwrap_or_default()
    }

    /// Check if the window has closed at `now`.
    pub fn expired_at(&self, window: Duration, now: DateTime<Utc>) -> bool {
        self.elapsed_at(now) >= window
    }

    /// The instant the window closes.
    pub fn expire_date(&self, window: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| self.window_start.checked_add_signed(w))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub(crate) fn to_bytes(self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// [Store] is where [CounterRecord]s live, such as in process memory
/// ([MemStore]) or in Redis (`RedisStore`, feature `redis-store`).
///
/// All methods are implemented in an async manner; dropping the returned
/// future abandons the call. Implementations must prefix keys with a
/// namespace so they do not collide with unrelated data in the backend.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// [Error] represents possible errors that may
    /// occur during the execution of a function.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the record stored under `key`, `None` if there is none.
    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error>;

    /// Create or overwrite the record stored under `key`.
    async fn set(&self, key: &str, record: &CounterRecord) -> Result<(), Self::Error>;

    /// Remove the record stored under `key` and return it, if the store
    /// can tell. Deleting a missing key is not an error.
    async fn del(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error>;
}

#[async_trait::async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    type Error = T::Error;

    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, record: &CounterRecord) -> Result<(), Self::Error> {
        (**self).set(key, record).await
    }

    async fn del(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        (**self).del(key).await
    }
}

pub(crate) fn namespaced(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}
