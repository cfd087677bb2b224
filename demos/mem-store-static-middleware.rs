//! In this example, we create a RateLimiter stored in static with max 100 requests in 1 minute.
//! We use [store::MemStore] as our storage, and reset a client's window through `/reset`.
//!
//! Requests are keyed on the TCP peer address rather than `X-Real-IP` / `X-Forwarded-For`.
//! Those headers are set by the client unless a trusted proxy overwrites them, so a
//! whitelist matched against them could be bypassed by sending `X-Real-IP: 127.0.0.1`.

use std::process::exit;
use std::sync::Arc;
use std::time::Duration;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use lazy_static::lazy_static;
use xratelimit::{store, Controller, RateLimitConfig};
use xratelimit::middleware::RateLimit;

lazy_static! {
    static ref CONTROLLER: Arc<Controller<store::MemStore>> = Arc::new(Controller::new(
        store::MemStore::default(),
        RateLimitConfig::new(Duration::from_secs(60), 100).with_whitelist(["127.0.0.1", "::1"]),
    ));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    // actix-web simple http-server starts here...
    HttpServer::new(|| {
        let rate_limiter = RateLimit::new(CONTROLLER.clone())
            .with_do_rate_limit(|req| req.path() != "/reset")
            .with_find_identifier(peer_ip);

        App::new()
            .wrap(rate_limiter)
            .service(web::resource("/hello").route(web::get().to(hello_world)))
            .service(web::resource("/reset").route(web::post().to(reset)))
            .service(web::resource("/exit").route(web::get().to(exit_program)))
    })
        .bind("0.0.0.0:8080")?
        .run()
        .await?;

    Ok(())
}

/// The socket peer, never a forwarded header.
fn peer_ip(req: &HttpRequest) -> String {
    req.peer_addr().map(|addr| addr.ip().to_string()).unwrap_or_default()
}

async fn hello_world() -> &'static str {
    "Hello, World!"
}

async fn reset(req: HttpRequest) -> HttpResponse {
    match CONTROLLER.reset(&peer_ip(&req)).await {
        Ok(record) => {
            HttpResponse::Ok().body(format!("window restarted at {}", record.window_start))
        }
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn exit_program() -> &'static str {
    exit(0)
}
