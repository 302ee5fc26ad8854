//! Gauge instruments for collected metrics.
//!
//! Every metric key gets exactly one gauge for the life of the process. The
//! gauge callback does not hold a value: it looks the key up in the current
//! snapshot each time the telemetry pipeline observes it, so a gauge
//! registered during the first cycle reports the latest cycle's value.

mod prom;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::error::InstrumentError;
use crate::store::SnapshotStore;

pub use prom::PrometheusMeter;

/// Value source of a gauge. `None` means "no observation this period".
pub type GaugeCallback = Box<dyn Fn() -> Option<f64> + Send + Sync>;

/// The telemetry side: something that can host observable gauges.
pub trait Meter: Send + Sync {
    /// Registers a gauge named `name` whose value is produced by `callback`
    /// at observation time.
    fn register_gauge(&self, name: &str, callback: GaugeCallback) -> Result<(), InstrumentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// The meter rejected the gauge; not retried.
    Unregistered,
    Registered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentHandle {
    pub key: String,
    pub state: RegistrationState,
}

/// Append-only set of per-key gauges.
pub struct InstrumentRegistry {
    meter: Arc<dyn Meter>,
    store: Arc<SnapshotStore>,
    handles: DashMap<String, InstrumentHandle>,
}

impl InstrumentRegistry {
    pub fn new(meter: Arc<dyn Meter>, store: Arc<SnapshotStore>) -> Self {
        Self {
            meter,
            store,
            handles: DashMap::new(),
        }
    }

    /// Registers a gauge for `key` unless one was already attempted.
    ///
    /// Returns true if this call created the handle. Concurrent callers for
    /// the same key are serialized on the map entry, so the meter sees at
    /// most one registration per key.
    pub fn ensure_registered(&self, key: &str) -> bool {
        if self.handles.contains_key(key) {
            return false;
        }

        let mut created = false;
        self.handles.entry(key.to_string()).or_insert_with(|| {
            created = true;
            let state = match self.meter.register_gauge(key, self.callback_for(key)) {
                Ok(()) => {
                    debug!(key, "gauge registered");
                    RegistrationState::Registered
                }
                Err(e) => {
                    warn!(key, error = %e, "gauge registration rejected");
                    RegistrationState::Unregistered
                }
            };
            InstrumentHandle {
                key: key.to_string(),
                state,
            }
        });
        created
    }

    /// Ensures every key is registered; returns how many were new.
    pub fn ensure_registered_all<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> usize {
        keys.into_iter()
            .filter(|key| self.ensure_registered(key))
            .count()
    }

    pub fn state(&self, key: &str) -> Option<RegistrationState> {
        self.handles.get(key).map(|h| h.state)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn callback_for(&self, key: &str) -> GaugeCallback {
        let store = Arc::clone(&self.store);
        let key = key.to_string();
        Box::new(move || store.value(&key))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use chrono::{Duration, Utc};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::thread;

    /// Meter that keeps callbacks so tests can observe them.
    #[derive(Default)]
    pub(crate) struct RecordingMeter {
        gauges: Mutex<Vec<(String, GaugeCallback)>>,
        reject: Mutex<Vec<String>>,
    }

    impl RecordingMeter {
        pub(crate) fn registrations(&self, name: &str) -> usize {
            self.gauges.lock().iter().filter(|(n, _)| n == name).count()
        }

        pub(crate) fn observe(&self, name: &str) -> Option<f64> {
            let gauges = self.gauges.lock();
            let (_, callback) = gauges.iter().find(|(n, _)| n == name)?;
            callback()
        }

        fn reject(&self, name: &str) {
            self.reject.lock().push(name.to_string());
        }
    }

    impl Meter for RecordingMeter {
        fn register_gauge(
            &self,
            name: &str,
            callback: GaugeCallback,
        ) -> Result<(), InstrumentError> {
            if self.reject.lock().iter().any(|n| n == name) {
                return Err(InstrumentError::InvalidName(name.to_string()));
            }
            self.gauges.lock().push((name.to_string(), callback));
            Ok(())
        }
    }

    fn snapshot(pairs: &[(&str, f64)], at: chrono::DateTime<Utc>) -> Snapshot {
        let values: BTreeMap<String, f64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        Snapshot::new(values, at)
    }

    fn registry() -> (Arc<RecordingMeter>, Arc<SnapshotStore>, InstrumentRegistry) {
        let meter = Arc::new(RecordingMeter::default());
        let store = Arc::new(SnapshotStore::new());
        let registry = InstrumentRegistry::new(meter.clone(), store.clone());
        (meter, store, registry)
    }

    #[test]
    fn ensure_registered_is_idempotent() {
        let (meter, _store, registry) = registry();
        assert!(registry.ensure_registered("sql.lock_waits"));
        assert!(!registry.ensure_registered("sql.lock_waits"));
        assert_eq!(meter.registrations("sql.lock_waits"), 1);
        assert_eq!(registry.state("sql.lock_waits"), Some(RegistrationState::Registered));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_registration_creates_one_instrument() {
        let (meter, _store, registry) = registry();
        let registry = Arc::new(registry);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        registry.ensure_registered("sql.database_size_A_data_ROWS");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(meter.registrations("sql.database_size_A_data_ROWS"), 1);
    }

    #[test]
    fn callback_reads_latest_snapshot() {
        let (meter, store, registry) = registry();
        let t0 = Utc::now();

        store.replace(snapshot(&[("k", 1.0)], t0));
        registry.ensure_registered("k");
        assert_eq!(meter.observe("k"), Some(1.0));

        store.replace(snapshot(&[("k", 2.0)], t0 + Duration::seconds(15)));
        registry.ensure_registered("k");
        assert_eq!(meter.observe("k"), Some(2.0));
    }

    #[test]
    fn missing_key_reports_no_observation() {
        let (meter, store, registry) = registry();
        registry.ensure_registered("gone");
        assert_eq!(meter.observe("gone"), None);

        store.replace(snapshot(&[("other", 5.0)], Utc::now()));
        assert_eq!(meter.observe("gone"), None);
    }

    #[test]
    fn rejected_registration_is_not_retried() {
        let (meter, _store, registry) = registry();
        meter.reject("bad key");
        assert!(registry.ensure_registered("bad key"));
        assert!(!registry.ensure_registered("bad key"));
        assert_eq!(registry.state("bad key"), Some(RegistrationState::Unregistered));
        assert_eq!(meter.registrations("bad key"), 0);
    }

    #[test]
    fn ensure_registered_all_counts_new_keys() {
        let (_meter, _store, registry) = registry();
        assert_eq!(registry.ensure_registered_all(["a", "b"]), 2);
        assert_eq!(registry.ensure_registered_all(["a", "b", "c"]), 1);
        assert_eq!(registry.len(), 3);
    }
}
