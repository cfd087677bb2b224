use chrono::{DateTime, Utc};

/// [Error] is returned by the [Controller](crate::controller::Controller).
///
/// `E` is the error type of the [Store](crate::store::Store) backing the controller,
/// surfaced unchanged through [Error::Store].
#[derive(Debug, thiserror::Error)]
pub enum Error<E = StoreError> {
    /// [RateLimitExceeded] indicates that the limit has been reached
    /// and returns the time when the key is admitted again.
    #[error("client has exceeded rate limit for given period, until {}", .until.timestamp())]
    RateLimitExceeded { until: DateTime<Utc> },

    /// No record exists yet for the key.
    #[error("no rate limit record for key `{key}`")]
    NotFound { key: String },

    /// None of the request's headers nor its remote address held a valid IP.
    #[error("ip not found")]
    IpNotFound,

    #[error("store error: {0}")]
    Store(#[source] E),
}

impl<E> Error<E> {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

/// Errors raised by the stores shipped with this crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record could not be encoded to, or decoded from, its JSON form.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis-store")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
