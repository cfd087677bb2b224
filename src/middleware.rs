use std::rc::Rc;
use std::sync::Arc;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, HttpResponseBuilder};
use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use actix_web::http::StatusCode;
use chrono::Utc;
use futures_util::future::{LocalBoxFuture, Ready, ready};
use crate::controller::Controller;
use crate::error::Error;
use crate::store::Store;
use crate::utils::RequestMetadata;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RATE_LIMITED_UNTIL_HEADER: &str = "x-rate-limited-until";

const RATE_LIMITED_MESSAGE: &str = "client has exceeded rate limit for given period";

type FromRequestFunc<I> = Rc<dyn Fn(&HttpRequest) -> I>;

type FromRequestOnError<E, R> = Rc<dyn Fn(&HttpRequest, E) -> R>;

impl RequestMetadata for HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn remote_addr(&self) -> Option<String> {
        self.peer_addr().map(|addr| addr.to_string())
    }
}

/// [RateLimitInfo] is attached to the extensions of every request the
/// middleware admitted, so handlers can read the limit state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RateLimitInfo {
    pub limit: u32,
    /// Requests counted in the current window; `None` for whitelisted keys.
    pub remaining: Option<u32>,
}

impl RateLimitInfo {
    pub fn get(req: &HttpRequest) -> Option<Self> {
        req.extensions().get::<Self>().copied()
    }
}

/// [RateLimit] is the `actix-web` middleware counting requests against a
/// shared [Controller].
///
/// Admitted responses carry `X-Ratelimit-Limit` and `X-Ratelimit-Remaining`.
/// By default rejected requests get `429 Too Many Requests` and any other
/// failure (store error, no client IP) gets `500 Internal Server Error`.
pub struct RateLimit<T: Store> {
    controller: Arc<Controller<T>>,
    fn_do_rate_limit: Option<FromRequestFunc<bool>>,
    fn_find_identifier: Option<FromRequestFunc<String>>,
    fn_on_rate_limit_error: FromRequestOnError<Error<T::Error>, HttpResponse>,
    fn_on_error: FromRequestOnError<Error<T::Error>, HttpResponse>,
}

impl<T: Store + 'static> RateLimit<T> {
    /// create a new [RateLimit] middleware with default functions.
    pub fn new(controller: Arc<Controller<T>>) -> Self {
        Self {
            controller,
            fn_do_rate_limit: None,
            fn_find_identifier: None,
            fn_on_rate_limit_error: Rc::new(default_on_rate_limit_error::<T::Error>),
            fn_on_error: Rc::new(default_on_error::<T::Error>),
        }
    }

    /// Only requests for which `f` returns `true` are counted.
    pub fn with_do_rate_limit(mut self, f: impl Fn(&HttpRequest) -> bool + 'static) -> Self {
        self.fn_do_rate_limit = Some(Rc::new(f));
        self
    }

    /// Key requests by `f` instead of the client IP.
    pub fn with_find_identifier(mut self, f: impl Fn(&HttpRequest) -> String + 'static) -> Self {
        self.fn_find_identifier = Some(Rc::new(f));
        self
    }

    /// Count every request under one key, ignoring request headers entirely.
    pub fn with_fixed_key<K: ToString>(self, key: K) -> Self {
        let key = key.to_string();
        self.with_find_identifier(move |_| key.clone())
    }

    pub fn on_rate_limit_error(mut self, f: impl Fn(&HttpRequest, Error<T::Error>) -> HttpResponse + 'static) -> Self {
        self.fn_on_rate_limit_error = Rc::new(f);
        self
    }

    pub fn on_error(mut self, f: impl Fn(&HttpRequest, Error<T::Error>) -> HttpResponse + 'static) -> Self {
        self.fn_on_error = Rc::new(f);
        self
    }

    /// Count the request and report how many were counted so far,
    /// `None` when the key is whitelisted.
    async fn check(&self, req: &HttpRequest) -> Result<Option<u32>, Error<T::Error>> {
        let key = match &self.fn_find_identifier {
            Some(f) => f(req),
            None => self.controller.get_ip(req)?,
        };

        match self.controller.consume(&key).await? {
            Some(_) => self.controller.remaining(&key).await.map(Some),
            None => Ok(None),
        }
    }

    fn should_limit(&self, req: &HttpRequest) -> bool {
        !self.controller.is_skipped()
            && self.fn_do_rate_limit.as_ref().map_or(true, |f| f(req))
    }
}

impl<T: Store> Clone for RateLimit<T> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
            fn_do_rate_limit: self.fn_do_rate_limit.clone(),
            fn_find_identifier: self.fn_find_identifier.clone(),
            fn_on_rate_limit_error: self.fn_on_rate_limit_error.clone(),
            fn_on_error: self.fn_on_error.clone(),
        }
    }
}

impl<T, S, B> Transform<S, ServiceRequest> for RateLimit<T>
    where
        T: Store + 'static,
        S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
        S::Future: 'static,
        B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = S::Error;
    type Transform = RateLimitService<T, S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            inner: Rc::new(self.clone()),
            service: Rc::new(service),
        }))
    }
}

pub struct RateLimitService<T, S>
    where T: Store,
{
    inner: Rc<RateLimit<T>>,
    service: Rc<S>,
}

impl<T, S, B> Service<ServiceRequest> for RateLimitService<T, S>
    where
        T: Store + 'static,
        S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error> + 'static,
        S::Future: 'static,
        B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = S::Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, svc: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let inner = self.inner.clone();

        Box::pin(async move {
            if !inner.should_limit(svc.request()) {
                let res = service.call(svc).await?.map_into_left_body();
                return Ok(res);
            }

            let remaining = {
                let req = svc.request().clone();
                match inner.check(&req).await {
                    Ok(remaining) => remaining,
                    Err(e) if e.is_rate_limited() => {
                        tracing::warn!(path = req.path(), "rate limit exceeded");
                        let body = (inner.fn_on_rate_limit_error)(&req, e);
                        return Ok(ServiceResponse::new(req, body.map_into_right_body()));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, path = req.path(), "rate limiter failed");
                        let body = (inner.fn_on_error)(&req, e);
                        return Ok(ServiceResponse::new(req, body.map_into_right_body()));
                    }
                }
            };

            let limit = inner.controller.config().limit;
            svc.extensions_mut().insert(RateLimitInfo { limit, remaining });

            let mut res = service.call(svc).await?;

            let headers = res.headers_mut();
            headers.insert(HeaderName::from_static(LIMIT_HEADER), HeaderValue::from(limit));
            if let Some(remaining) = remaining {
                headers.insert(HeaderName::from_static(REMAINING_HEADER), HeaderValue::from(remaining));
            }

            Ok(res.map_into_left_body())
        })
    }
}

/// `429 Too Many Requests`, with `X-Rate-Limited-Until` (unix seconds) and
/// `Retry-After` when the end of the window is known.
pub fn default_on_rate_limit_error<E>(_: &HttpRequest, error: Error<E>) -> HttpResponse {
    let mut builder = HttpResponseBuilder::new(StatusCode::TOO_MANY_REQUESTS);

    if let Error::RateLimitExceeded { until } = error {
        let wait_ms = (until - Utc::now()).num_milliseconds().max(0);
        builder.insert_header((RATE_LIMITED_UNTIL_HEADER, until.timestamp().to_string()));
        builder.insert_header((RETRY_AFTER, ((wait_ms + 999) / 1000).to_string()));
    }

    builder.body(RATE_LIMITED_MESSAGE)
}

pub fn default_on_error<E>(_: &HttpRequest, _: Error<E>) -> HttpResponse {
    HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR)
}
