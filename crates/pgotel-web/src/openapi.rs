//! OpenAPI documentation definition.

use utoipa::OpenApi;

use crate::handlers::HealthStatus;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::handle_metrics,
        crate::handlers::handle_prometheus,
        crate::handlers::handle_healthcheck,
    ),
    components(schemas(HealthStatus)),
    info(
        title = "pgotel API",
        version = "1.0",
        description = "PostgreSQL performance counters as JSON and Prometheus metrics"
    )
)]
pub(crate) struct ApiDoc;
