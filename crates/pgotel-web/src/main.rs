mod access_log;
mod background;
mod handlers;
mod openapi;
mod state;

use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use pgotel_core::collector::PgConnectionFactory;
use pgotel_core::{
    CollectionJob, Collector, InstrumentRegistry, PrometheusMeter, QueryCatalog, SnapshotStore,
};

use access_log::AccessLogLayer;
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "pgotel_web=info,pgotel_core=info";

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(
    name = "pgotel-web",
    about = "PostgreSQL metrics exporter",
    version = pgotel_core::VERSION
)]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:9187", env = "PGOTEL_LISTEN")]
    listen: String,

    /// PostgreSQL connection string.
    /// If not specified, built from PGHOST/PGPORT/PGUSER/PGPASSWORD/PGDATABASE.
    #[arg(long, env = "PGOTEL_CONNECTION_STRING", hide_env_values = true)]
    connection_string: Option<String>,

    /// Prefix for exported metric names.
    #[arg(long, default_value = "pgotel", env = "PGOTEL_NAMESPACE")]
    namespace: String,

    /// Collection interval in seconds.
    #[arg(
        long,
        default_value = "15",
        env = "PGOTEL_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    interval: u64,

    /// Per-statement timeout in seconds.
    #[arg(long, default_value = "5", env = "PGOTEL_QUERY_TIMEOUT")]
    query_timeout: u64,

    /// Connect timeout in seconds.
    #[arg(long, default_value = "5", env = "PGOTEL_CONNECT_TIMEOUT")]
    connect_timeout: u64,
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = pgotel_core::VERSION, "starting");

    let addr: SocketAddr = match args.listen.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(listen = %args.listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let factory = match args.connection_string.as_deref() {
        Some(conn_str) => PgConnectionFactory::new(conn_str),
        None => PgConnectionFactory::from_env(),
    };
    let factory = match factory {
        Ok(f) => f
            .with_connect_timeout(Duration::from_secs(args.connect_timeout))
            .with_statement_timeout(Duration::from_secs(args.query_timeout)),
        Err(e) => {
            error!(error = %e, "invalid connection settings");
            process::exit(1);
        }
    };

    info!(database = ?factory.database(), "connection settings loaded");

    let meter = match PrometheusMeter::new(&args.namespace) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            error!(namespace = %args.namespace, error = %e, "invalid metric namespace");
            process::exit(1);
        }
    };

    let catalog = QueryCatalog::postgres();
    let catalog_entries = catalog.len();
    let store = Arc::new(SnapshotStore::new());
    let registry = Arc::new(InstrumentRegistry::new(meter.clone(), store.clone()));
    let job = Arc::new(CollectionJob::new(
        Collector::new(catalog),
        factory,
        store.clone(),
        registry,
    ));
    let registered = job.register_catalog_keys();
    info!(
        queries = catalog_entries,
        gauges = registered,
        namespace = meter.namespace(),
        interval_s = args.interval,
        "collector configured"
    );

    let shutdown = CancellationToken::new();
    let collection = tokio::spawn(background::tick_loop(
        Arc::clone(&job),
        Duration::from_secs(args.interval),
        shutdown.clone(),
    ));

    let state = AppState {
        store,
        meter,
        status: Arc::clone(job.status()),
        catalog_entries,
    };

    // axum layers: last .layer() = outermost
    let app = handlers::router(state)
        .layer(AccessLogLayer)
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .into_make_service_with_connect_info::<SocketAddr>();

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, "listening");

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    if let Err(e) = server.await {
        error!(error = %e, "server error");
        shutdown.cancel();
    }

    if let Err(e) = collection.await {
        error!(error = %e, "collection loop panicked");
    }
    info!("stopped");
}
