use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LIMIT: u32 = 100;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub const ENV_LIMIT: &str = "XRATELIMIT_LIMIT";
pub const ENV_WINDOW_SECS: &str = "XRATELIMIT_WINDOW_SECS";
pub const ENV_WHITELIST: &str = "XRATELIMIT_WHITELIST";

pub(crate) type SkipFunc = Arc<dyn Fn() -> bool + Send + Sync + 'static>;

/// [RateLimitConfig] is the policy attached to a [Controller](crate::controller::Controller).
///
/// At most [limit](Self::limit) requests are admitted per key in every
/// fixed window of length [window](Self::window). Keys in the
/// [whitelist](Self::whitelist) are never counted.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Length of the counting window.
    pub window: Duration,
    /// Maximum requests admitted per window.
    pub limit: u32,
    /// Keys exempt from limiting, compared case-insensitively.
    pub whitelist: Vec<String>,
    pub(crate) skip: Option<SkipFunc>,
}

impl RateLimitConfig {
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            window,
            limit,
            whitelist: Vec::new(),
            skip: None,
        }
    }

    pub fn with_whitelist<I, T>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.whitelist = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Install a predicate that, when it returns `true`, lets adapters bypass
    /// limiting for the request entirely.
    pub fn with_skip(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.skip = Some(Arc::new(f));
        self
    }

    pub fn is_whitelisted(&self, key: &str) -> bool {
        self.whitelist.iter().any(|k| k.eq_ignore_ascii_case(key))
    }

    /// Build from `XRATELIMIT_LIMIT`, `XRATELIMIT_WINDOW_SECS` and
    /// `XRATELIMIT_WHITELIST` (comma separated). Missing or unparsable
    /// values fall back to the defaults.
    pub fn from_env() -> Self {
        let limit = std::env::var(ENV_LIMIT)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_LIMIT);

        let window = std::env::var(ENV_WINDOW_SECS)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WINDOW);

        let whitelist = std::env::var(ENV_WHITELIST)
            .map(|s| parse_list(&s))
            .unwrap_or_default();

        Self::new(window, limit).with_whitelist(whitelist)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_LIMIT)
    }
}

impl Debug for RateLimitConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("window", &self.window)
            .field("limit", &self.limit)
            .field("whitelist", &self.whitelist)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

fn parse_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_ignores_case() {
        let config = RateLimitConfig::default().with_whitelist(["FE80::1", "10.0.0.1"]);

        assert!(config.is_whitelisted("fe80::1"));
        assert!(config.is_whitelisted("10.0.0.1"));
        assert!(!config.is_whitelisted("10.0.0.2"));
    }

    #[test]
    fn list_parsing_drops_blanks() {
        assert_eq!(parse_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn from_env() {
        std::env::set_var(ENV_LIMIT, "7");
        std::env::set_var(ENV_WINDOW_SECS, "not-a-number");
        std::env::set_var(ENV_WHITELIST, "127.0.0.1, ::1");

        let config = RateLimitConfig::from_env();
        assert_eq!(config.limit, 7);
        assert_eq!(config.window, DEFAULT_WINDOW);
        assert_eq!(config.whitelist, vec!["127.0.0.1", "::1"]);

        std::env::remove_var(ENV_LIMIT);
        std::env::remove_var(ENV_WINDOW_SECS);
        std::env::remove_var(ENV_WHITELIST);
    }
}
