//! Shared application state.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::sync::Arc;

use pgotel_core::{CollectorStatus, PrometheusMeter, SnapshotStore};

/// Everything the HTTP handlers read. Handlers never touch the collector.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: Arc<SnapshotStore>,
    pub(crate) meter: Arc<PrometheusMeter>,
    pub(crate) status: Arc<CollectorStatus>,
    pub(crate) catalog_entries: usize,
}
