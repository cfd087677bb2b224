use std::sync::Arc;
use std::time::Duration;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use crate::error::StoreError;
use crate::store::{namespaced, CounterRecord, Store, DEFAULT_NAMESPACE};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// [RedisStore] stores data in redis, as JSON strings under
/// `<prefix>:<key>`.
///
/// Redis itself keeps records alive until deleted, unless a TTL is set
/// with [with_ttl](Self::with_ttl).
#[derive(Clone)]
pub struct RedisStore {
    pub(crate) inner: Arc<RedisStoreInner>,
}

impl RedisStore {
    /// create from a [redis::Client]
    pub fn from_client<T: ToString>(client: redis::Client, prefix: T) -> Self {
        Self {
            inner: Arc::new(RedisStoreInner {
                client,
                prefix: prefix.to_string(),
                ttl: None,
            }),
        }
    }

    /// create from `REDIS_URL`, or [DEFAULT_REDIS_URL], with the default prefix.
    pub fn from_env() -> RedisResult<Self> {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
        let client = redis::Client::open(url.as_str())?;

        tracing::info!(url = %url, "using redis store");
        Ok(Self::from_client(client, DEFAULT_NAMESPACE))
    }

    /// Expire every record `ttl` after its last write.
    ///
    /// Call before the store is cloned or shared.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.ttl = Some(ttl);
        } else {
            self.inner = Arc::new(RedisStoreInner {
                client: self.inner.client.clone(),
                prefix: self.inner.prefix.clone(),
                ttl: Some(ttl),
            });
        }
        self
    }
}

#[async_trait::async_trait]
impl Store for RedisStore {
    type Error = StoreError;

    async fn get(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        let redis_key = self.inner.get_key(key);
        let mut conn = self.inner.conn().await?;

        let value: Option<String> = conn.get(&redis_key).await?;
        match value {
            Some(json) => Ok(Some(CounterRecord::from_bytes(json.as_bytes())?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, record: &CounterRecord) -> Result<(), Self::Error> {
        let redis_key = self.inner.get_key(key);
        let value = record.to_bytes()?;
        let mut conn = self.inner.conn().await?;

        // SET {key} {json} [PX {ttl in milliseconds}]
        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(value);
        if let Some(ttl) = self.inner.ttl {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            cmd.arg("PX").arg(millis);
        }
        cmd.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    async fn del(&self, key: &str) -> Result<Option<CounterRecord>, Self::Error> {
        let redis_key = self.inner.get_key(key);
        let mut conn = self.inner.conn().await?;

        // GET {key}
        // DEL {key}
        // in one MULTI, so the returned record is the one deleted
        let (value,): (Option<String>,) = redis::pipe()
            .atomic()
            .get(&redis_key)
            .del(&redis_key).ignore()
            .query_async(&mut conn)
            .await?;

        value
            .map(|json| CounterRecord::from_bytes(json.as_bytes()))
            .transpose()
            .map_err(Into::into)
    }
}

pub(crate) struct RedisStoreInner {
    /// the redis client
    pub client: redis::Client,
    /// the prefix which would prepend to redis-key
    pub prefix: String,
    /// expiry applied on every write
    pub ttl: Option<Duration>,
}

impl RedisStoreInner {
    pub fn get_key<T: AsRef<str>>(&self, key: T) -> String {
        namespaced(&self.prefix, key.as_ref())
    }

    pub async fn conn(&self) -> RedisResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }
}
