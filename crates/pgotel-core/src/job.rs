//! The periodic unit of work: collect, publish, register.
//!
//! The scheduler calls [`CollectionJob::execute`] once per period and never
//! runs two cycles at the same time. A failed cycle, or one cancelled before
//! it produced anything, leaves the previously published snapshot in place.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::{Collector, ConnectionFactory};
use crate::error::CollectError;
use crate::instruments::InstrumentRegistry;
use crate::store::SnapshotStore;

/// Outcome of one successful cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSummary {
    /// Keys in the published snapshot.
    pub keys: usize,
    /// Keys seen for the first time in this cycle.
    pub new_keys: usize,
    pub captured_at: DateTime<Utc>,
    /// Store generation of the published snapshot; `None` when the cycle was
    /// cancelled before it collected anything.
    pub generation: Option<u64>,
    pub duration: Duration,
}

/// Cycle bookkeeping read by the health endpoint.
#[derive(Debug, Default)]
pub struct CollectorStatus {
    cycles: AtomicU64,
    consecutive_failures: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl CollectorStatus {
    /// Cycles attempted, successful or not.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock()
    }

    /// True once a cycle has connected and while the latest one did.
    pub fn database_reachable(&self) -> bool {
        self.last_success().is_some() && self.consecutive_failures() == 0
    }

    fn record_success(&self, at: DateTime<Utc>) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_error.lock() = None;
        *self.last_success.lock() = Some(at);
    }

    fn record_failure(&self, e: &CollectError) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(e.to_string());
    }
}

pub struct CollectionJob<F: ConnectionFactory> {
    collector: Collector,
    factory: F,
    store: Arc<SnapshotStore>,
    registry: Arc<InstrumentRegistry>,
    status: Arc<CollectorStatus>,
}

impl<F: ConnectionFactory> CollectionJob<F> {
    pub fn new(
        collector: Collector,
        factory: F,
        store: Arc<SnapshotStore>,
        registry: Arc<InstrumentRegistry>,
    ) -> Self {
        Self {
            collector,
            factory,
            store,
            registry,
            status: Arc::default(),
        }
    }

    /// Registers gauges for every scalar key before the first cycle.
    pub fn register_catalog_keys(&self) -> usize {
        self.registry
            .ensure_registered_all(self.collector.catalog().scalar_keys())
    }

    /// Runs one cycle and publishes its snapshot.
    pub fn execute(&self, cancel: &CancellationToken) -> Result<CycleSummary, CollectError> {
        let start = Instant::now();

        let snapshot = match self.collector.run(&self.factory, cancel) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "collection cycle failed, keeping previous snapshot");
                self.status.record_failure(&e);
                return Err(e);
            }
        };

        if snapshot.is_empty() && cancel.is_cancelled() {
            debug!("cycle cancelled before collecting, keeping previous snapshot");
            return Ok(CycleSummary {
                keys: 0,
                new_keys: 0,
                captured_at: snapshot.captured_at(),
                generation: None,
                duration: start.elapsed(),
            });
        }

        let new_keys = self.registry.ensure_registered_all(snapshot.keys());
        let keys = snapshot.len();
        let captured_at = snapshot.captured_at();
        let generation = self.store.replace(snapshot);
        self.status.record_success(captured_at);

        if new_keys > 0 {
            info!(new_keys, total = self.registry.len(), "new metric keys registered");
        }

        Ok(CycleSummary {
            keys,
            new_keys,
            captured_at,
            generation: Some(generation),
            duration: start.elapsed(),
        })
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Shared with readers such as the health endpoint.
    pub fn status(&self) -> &Arc<CollectorStatus> {
        &self.status
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }
}
