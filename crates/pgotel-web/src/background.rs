//! Background processing: the periodic collection trigger.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pgotel_core::CollectionJob;
use pgotel_core::collector::ConnectionFactory;

// ============================================================
// Tick loop
// ============================================================

/// Runs one collection cycle per `interval` until `shutdown` fires.
///
/// Each cycle runs on the blocking pool and is awaited before the next tick,
/// so cycles never overlap; ticks missed while a cycle overruns are skipped.
pub(crate) async fn tick_loop<F>(
    job: Arc<CollectionJob<F>>,
    interval: Duration,
    shutdown: CancellationToken,
) where
    F: ConnectionFactory + 'static,
{
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut snapshot_count: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("collection loop stopped");
                return;
            }
            _ = tick.tick() => {}
        }

        let job_clone = Arc::clone(&job);
        let cancel = shutdown.child_token();
        let t0 = Instant::now();
        let result = tokio::task::spawn_blocking(move || job_clone.execute(&cancel)).await;
        let elapsed = t0.elapsed();

        match result {
            Ok(Ok(summary)) => match summary.generation {
                None => {
                    info!("tick cancelled before collecting, snapshot unchanged");
                }
                Some(generation) => {
                    snapshot_count += 1;
                    if snapshot_count == 1 {
                        info!(
                            duration_ms = elapsed.as_millis() as u64,
                            keys = summary.keys,
                            generation,
                            "first snapshot collected"
                        );
                    } else {
                        debug!(
                            duration_ms = elapsed.as_millis() as u64,
                            keys = summary.keys,
                            new_keys = summary.new_keys,
                            generation,
                            "tick completed"
                        );
                    }
                }
            },
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    consecutive_failures = job.status().consecutive_failures(),
                    "tick produced no snapshot"
                );
            }
            Err(e) => {
                error!(error = %e, "tick panicked in spawn_blocking");
            }
        }

        if elapsed > interval / 2 {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                interval_ms = interval.as_millis() as u64,
                "tick exceeded 50% of interval"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgotel_core::collector::mock::MockConnectionFactory;
    use pgotel_core::{
        Collector, InstrumentRegistry, MetricQuerySpec, PrometheusMeter, QueryCatalog,
        SnapshotStore,
    };

    fn job(factory: MockConnectionFactory) -> Arc<CollectionJob<MockConnectionFactory>> {
        let entries = vec![MetricQuerySpec::scalar("sql.lock_waits", "SELECT 1")];
        let catalog = QueryCatalog::new(entries).unwrap();
        let store = Arc::new(SnapshotStore::new());
        let meter = Arc::new(PrometheusMeter::new("pgotel").unwrap());
        let registry = Arc::new(InstrumentRegistry::new(meter, store.clone()));
        Arc::new(CollectionJob::new(
            Collector::new(catalog),
            factory,
            store,
            registry,
        ))
    }

    #[tokio::test]
    async fn publishes_until_shutdown() {
        let job = job(MockConnectionFactory::new().scalar("SELECT 1", "4"));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&job),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        for _ in 0..200 {
            if job.status().cycles() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(job.status().cycles() >= 3);
        assert_eq!(job.store().generation(), job.status().cycles());
        assert_eq!(job.store().value("sql.lock_waits"), Some(4.0));
        assert_eq!(job.factory().stats().open_connections(), 0);
    }

    #[tokio::test]
    async fn failed_cycles_do_not_stop_the_loop() {
        let factory = MockConnectionFactory::new().scalar("SELECT 1", "4");
        factory.set_connect_error(Some("connection refused"));
        let job = job(factory);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            Arc::clone(&job),
            Duration::from_millis(10),
            shutdown.clone(),
        ));

        for _ in 0..200 {
            if job.status().consecutive_failures() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        job.factory().set_connect_error(None);
        for _ in 0..200 {
            if job.status().database_reachable() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(job.status().database_reachable());
        assert_eq!(job.store().value("sql.lock_waits"), Some(4.0));
    }
}
