//! # `xratelimit`: fixed-window RateLimiter for `actix-web`

//! ## Description
//! `xratelimit` counts requests per client key (by default the client IP) in fixed
//! windows and rejects requests once a key has used up its limit for the window.
//! It currently provides two storage options:
//! in-memory storage (`MemStore`), an open-addressing hash table living in the process,
//! and Redis storage (`RedisStore`).

//! ## Features
//! |    Feature    |  Component   |                                    Description                                    |
//! |:-------------:|:------------:|:---------------------------------------------------------------------------------:|
//! |   `default`   |  `MemStore`  |                               Store data in memory                                |
//! | `redis-store` | `RedisStore` | Store data using an async connection from [redis](https://crates.io/crates/redis) |

//! ## Usage
//! 1. Define a `Store` where records are kept.
//! 2. Define a `Controller` from the store and a `RateLimitConfig`: the window length,
//!    the request limit per window, and optionally a whitelist of keys and a skip predicate.
//! 3. Finally, add a `RateLimit` middleware to your HTTP Server using the `wrap`
//!    function (from `actix-web`).
//!
//! The `Controller` can also be used without `actix-web`: call `consume` for every
//! request and reject it on `Error::RateLimitExceeded`.

//! ### Examples
//! You can find examples in `demos` folder.

//! ### Store
//! The `Store` keeps one `CounterRecord` (window start, request count) per key.

//! Let's take `MemStore` as an example:

//! ```rust
//! // 1024 initial slots; the table grows automatically.
//! // records are dropped an hour after their last write unless `with_ttl` says otherwise.
//! let store = xratelimit::store::MemStore::new(1024);
//! ```

//! ### Controller
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use xratelimit::config::RateLimitConfig;
//! use xratelimit::controller::Controller;
//! use xratelimit::store::MemStore;
//!
//! // max 100 requests per minute, localhost is never limited.
//! let config = RateLimitConfig::new(Duration::from_secs(60), 100)
//!     .with_whitelist(["127.0.0.1"]);
//! let controller = Arc::new(Controller::new(MemStore::default(), config));
//! ```

//! ### RateLimiter
//! Define a `RateLimit` and `wrap` to HTTP server:

//! ```rust,ignore
//! let rate_limiter = xratelimit::middleware::RateLimit::new(controller.clone())
//!     .with_do_rate_limit(|req| !req.path().starts_with("/healthz"));
//!
//! App::new()
//!     .wrap(rate_limiter)
//!     // ...
//! ```

//! Admitted responses carry `X-Ratelimit-Limit` (the configured limit) and
//! `X-Ratelimit-Remaining` (the number of requests counted in the current window).

pub mod store;
pub mod middleware;
pub mod error;
pub mod config;
pub mod controller;
pub mod utils;

pub use config::RateLimitConfig;
pub use controller::Controller;
pub use error::{Error, StoreError};
pub use store::{CounterRecord, Store};
