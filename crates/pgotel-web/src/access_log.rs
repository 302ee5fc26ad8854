//! Access log middleware.
//!
//! Scrapers and health probes hit the exporter every few seconds, so their
//! successful requests are logged at `debug!`. Anything else, and any failed
//! scrape, is logged at `info!` or above.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use tracing::{Level, debug, info, trace, warn};

/// What a request path is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// `/metrics`, `/metrics/prometheus`, `/healthcheck`.
    Poll,
    /// Swagger UI assets and the OpenAPI document.
    Docs,
    Other,
}

impl Route {
    fn of(path: &str) -> Self {
        if path == "/healthcheck" || path == "/metrics" || path.starts_with("/metrics/") {
            Route::Poll
        } else if path.starts_with("/swagger-ui") || path.starts_with("/api-docs/") {
            Route::Docs
        } else {
            Route::Other
        }
    }
}

fn log_level(route: Route, status: StatusCode) -> Level {
    if status.is_server_error() {
        return Level::WARN;
    }
    match route {
        Route::Poll if status.is_success() => Level::DEBUG,
        Route::Docs => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Logs method, path, client address, status and latency for every request.
#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = axum::response::Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = axum::response::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let route = Route::of(&path);
        let client = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status();
            let code = status.as_u16();
            let level = log_level(route, status);
            if level == Level::WARN {
                warn!(client, status = code, latency_ms, "{method} {path}");
            } else if level == Level::INFO {
                info!(client, status = code, latency_ms, "{method} {path}");
            } else if level == Level::DEBUG {
                debug!(client, status = code, latency_ms, "{method} {path}");
            } else {
                trace!(client, status = code, latency_ms, "{method} {path}");
            }
            Ok(response)
        })
    }
}
