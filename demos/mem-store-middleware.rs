//! In this example, we create a RateLimiter with max 100 requests in 1 minute,
//! or whatever `XRATELIMIT_LIMIT` / `XRATELIMIT_WINDOW_SECS` say.
//! We use [store::MemStore] as our storage.

use std::process::exit;
use std::sync::Arc;
use actix_web::{App, HttpRequest, HttpServer, web};
use tracing_subscriber::EnvFilter;
use xratelimit::{store, Controller, RateLimitConfig};
use xratelimit::middleware::{RateLimit, RateLimitInfo};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,xratelimit=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    // first, create a store, using store::MemStore.
    // we initialize the capacity of our mem-store is 1024. The capacity would grow automatically.
    let store = store::MemStore::new(1024);

    // then, a controller shared by every worker.
    let controller = Arc::new(Controller::new(store, RateLimitConfig::from_env()));
    tracing::info!(config = ?controller.config(), "starting on 0.0.0.0:8080");

    // actix-web simple http-server starts here...
    HttpServer::new(move || {
        // finally, create a middleware for this worker.
        let rate_limiter = RateLimit::new(controller.clone())
            .with_do_rate_limit(|req| req.path() != "/exit");

        App::new()
            .wrap(rate_limiter)
            .service(web::resource("/hello").route(web::get().to(hello_world)))
            .service(web::resource("/exit").route(web::get().to(exit_program)))
    })
        .bind("0.0.0.0:8080")?
        .run()
        .await?;

    Ok(())
}

async fn hello_world(req: HttpRequest) -> String {
    match RateLimitInfo::get(&req) {
        Some(RateLimitInfo { limit, remaining: Some(used) }) => {
            format!("Hello, World! ({}/{})", used, limit)
        }
        _ => "Hello, World!".to_string(),
    }
}

async fn exit_program() -> &'static str {
    exit(0)
}
