//! In this example, we create a RateLimiter with max 3 requests in 10 secs.
//! We use [RedisStore] as our storage; records expire from redis after 1 minute.
//! Set `REDIS_URL` to point at your server.

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use actix_web::{App, HttpServer, web};
use xratelimit::{Controller, RateLimitConfig};
use xratelimit::middleware::RateLimit;
use xratelimit::store::redis_store::RedisStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let store = RedisStore::from_env()?.with_ttl(Duration::from_secs(60));
    let controller = Arc::new(Controller::new(
        store,
        RateLimitConfig::new(Duration::from_secs(10), 3),
    ));

    // actix-web simple http-server starts here...
    HttpServer::new(move || {
        App::new()
            .wrap(RateLimit::new(controller.clone()))
            .service(web::resource("/hello").route(web::get().to(hello_world)))
            .service(web::resource("/exit").route(web::get().to(exit_program)))
    })
        .bind("0.0.0.0:8080")?
        .run()
        .await?;

    Ok(())
}

async fn hello_world() -> &'static str {
    "Hello, World!"
}

async fn exit_program() -> &'static str {
    exit(0)
}
