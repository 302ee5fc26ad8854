//! HTTP request handlers: metric exposition and health.

use std::collections::BTreeMap;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Serialize;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::openapi::ApiDoc;
use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/metrics/prometheus", get(handle_prometheus))
        .route("/healthcheck", get(handle_healthcheck))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

// ============================================================
// Metrics
// ============================================================

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (
            status = 200,
            description = "Current snapshot as key to value; empty before the first collection",
            body = BTreeMap<String, f64>
        )
    )
)]
pub(crate) async fn handle_metrics(State(state): State<AppState>) -> Json<BTreeMap<String, f64>> {
    let values = state
        .store
        .current()
        .map(|snapshot| snapshot.values().clone())
        .unwrap_or_default();
    Json(values)
}

#[utoipa::path(
    get,
    path = "/metrics/prometheus",
    responses(
        (
            status = 200,
            description = "Registered gauges in the Prometheus text format",
            body = String
        ),
        (status = 500, description = "Encoding failed", body = String)
    )
)]
pub(crate) async fn handle_prometheus(State(state): State<AppState>) -> Response {
    match state.meter.encode() {
        Ok(text) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode prometheus metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================
// Health
// ============================================================

#[derive(Debug, Serialize, ToSchema)]
pub(crate) struct HealthStatus {
    /// The query catalog has at least one entry.
    catalog: bool,
    /// The latest collection cycle did not fail.
    collector: bool,
    /// The latest collection cycle reached the database.
    database: bool,
}

#[utoipa::path(
    get,
    path = "/healthcheck",
    responses(
        (status = 200, description = "Health of each subsystem", body = HealthStatus)
    )
)]
pub(crate) async fn handle_healthcheck(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        catalog: state.catalog_entries > 0,
        collector: state.status.consecutive_failures() == 0,
        database: state.status.database_reachable(),
    })
}
