use chrono::Utc;
use tokio::sync::Mutex;
use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::store::{CounterRecord, Store};
use crate::utils::{client_ip, fnv1a_folded, RequestMetadata};

/// Number of locks a [Controller] spreads its keys over.
pub const LOCK_STRIPES: usize = 64;

/// [Controller] applies a fixed-window [RateLimitConfig] to the records kept
/// in a [Store].
///
/// For every key, [consume](Self::consume) admits at most `limit` requests
/// per window. Updates to one key are serialized by one of [LOCK_STRIPES]
/// locks, so concurrent callers never lose an increment, while unrelated
/// keys rarely wait on each other.
///
/// Share a [Controller] between workers with an [Arc](std::sync::Arc).
pub struct Controller<S: Store> {
    store: S,
    config: RateLimitConfig,
    locks: Box<[Mutex<()>]>,
}

impl<S: Store> Controller<S> {
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Evaluate the skip predicate of the config, if there is one.
    pub fn is_skipped(&self) -> bool {
        self.config.skip.as_ref().is_some_and(|skip| skip())
    }

    fn lock_for(&self, key: &str) -> &Mutex<()> {
        &self.locks[(fnv1a_folded(key) % self.locks.len() as u64) as usize]
    }

    /// Count one request for `key`.
    ///
    /// Returns the updated record, or `Ok(None)` for whitelisted keys, which
    /// are admitted without touching the store. Once `limit` requests have
    /// been counted in the current window, fails with
    /// [Error::RateLimitExceeded] until the window closes.
    pub async fn consume(&self, key: &str) -> Result<Option<CounterRecord>, Error<S::Error>> {
        if self.config.is_whitelisted(key) {
            tracing::trace!(key, "whitelisted");
            return Ok(None);
        }

        let _guard = self.lock_for(key).lock().await;
        let now = Utc::now();

        let record = match self.store.get(key).await.map_err(Error::Store)? {
            None => {
                tracing::debug!(key, "opening window");
                CounterRecord::new(now)
            }
            Some(record) if record.expired_at(self.config.window, now) => {
                tracing::debug!(key, count = record.count, "window expired, resetting");
                CounterRecord::new(now)
            }
            Some(record) if record.count >= self.config.limit => {
                let until = record.expire_date(self.config.window);
                tracing::debug!(key, count = record.count, %until, "rate limit exceeded");
                return Err(Error::RateLimitExceeded { until });
            }
            Some(record) => CounterRecord {
                count: record.count + 1,
                ..record
            },
        };

        self.store.set(key, &record).await.map_err(Error::Store)?;
        Ok(Some(record))
    }

    /// The number of requests counted for `key` in its current window.
    ///
    /// Despite the name this is the count consumed so far, not the quota left;
    /// subtract it from `limit` for the latter. Fails with [Error::NotFound]
    /// before the first [consume](Self::consume) of `key`. The read is not
    /// ordered against concurrent updates.
    pub async fn remaining(&self, key: &str) -> Result<u32, Error<S::Error>> {
        match self.store.get(key).await.map_err(Error::Store)? {
            Some(record) => Ok(record.count),
            None => Err(Error::NotFound { key: key.to_string() }),
        }
    }

    /// Start a new window for `key`, as if this were its first request.
    pub async fn reset(&self, key: &str) -> Result<CounterRecord, Error<S::Error>> {
        let _guard = self.lock_for(key).lock().await;

        let record = CounterRecord::new(Utc::now());
        self.store.set(key, &record).await.map_err(Error::Store)?;

        tracing::debug!(key, "reset");
        Ok(record)
    }

    /// Forget `key`, returning its last record if the store reports one.
    pub async fn delete(&self, key: &str) -> Result<Option<CounterRecord>, Error<S::Error>> {
        let _guard = self.lock_for(key).lock().await;
        self.store.del(key).await.map_err(Error::Store)
    }

    /// The client IP of a request, see [client_ip].
    pub fn get_ip<R: RequestMetadata + ?Sized>(&self, req: &R) -> Result<String, Error<S::Error>> {
        client_ip(req)
            .map(|ip| ip.to_string())
            .ok_or(Error::IpNotFound)
    }
}
