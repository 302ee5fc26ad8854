use std::sync::Arc;

use pgotel_core::collector::mock::MockConnectionFactory;
use pgotel_core::collector::{ResultRow, ResultSet};
use pgotel_core::{
    CollectionJob, Collector, InstrumentRegistry, MetricQuerySpec, PrometheusMeter, QueryCatalog,
    RegistrationState, RowExpansion, SnapshotStore,
};
use tokio_util::sync::CancellationToken;

const CONNECTIONS_SQL: &str = "SELECT count(*) FROM pg_stat_activity";
const FILES_SQL: &str = "SELECT database_name, file_name, file_type, size_mb FROM files";

fn files(rows: &[(&str, &str, &str, &str)]) -> ResultSet {
    ResultSet::new(
        rows.iter()
            .map(|&(db, file, kind, size)| {
                ResultRow::from_pairs(&[
                    ("database_name", db),
                    ("file_name", file),
                    ("file_type", kind),
                    ("size_mb", size),
                ])
            })
            .collect(),
    )
}

/// True if the exposition holds a sample for `key` with `value`.
fn has_sample(text: &str, key: &str, value: &str) -> bool {
    let suffix = format!(r#"{{key="{key}"}} {value}"#);
    text.lines().any(|line| line.ends_with(&suffix))
}

fn setup() -> (
    CollectionJob<MockConnectionFactory>,
    Arc<PrometheusMeter>,
) {
    let catalog = QueryCatalog::new(vec![
        MetricQuerySpec::scalar("sql.active_connections", CONNECTIONS_SQL),
        MetricQuerySpec::row_set(
            "sql.database_size",
            FILES_SQL,
            RowExpansion::new(&["database_name", "file_name", "file_type"], "size_mb"),
        ),
    ])
    .unwrap();

    let factory = MockConnectionFactory::new()
        .scalar(CONNECTIONS_SQL, "3")
        .rows(FILES_SQL, files(&[("A", "data", "ROWS", "100")]));

    let meter = Arc::new(PrometheusMeter::new("pgotel").unwrap());
    let store = Arc::new(SnapshotStore::new());
    let registry = Arc::new(InstrumentRegistry::new(meter.clone(), store.clone()));
    let job = CollectionJob::new(Collector::new(catalog), factory, store, registry);
    (job, meter)
}

#[test]
fn gauges_follow_the_latest_cycle() {
    let (job, meter) = setup();
    let cancel = CancellationToken::new();

    job.register_catalog_keys();
    job.execute(&cancel).unwrap();
    let text = meter.encode().unwrap();
    assert!(has_sample(&text, "sql.active_connections", "3"), "{text}");
    assert!(has_sample(&text, "sql.database_size_A_data_ROWS", "100"), "{text}");

    job.factory().set_scalar(CONNECTIONS_SQL, "8");
    job.factory()
        .set_rows(FILES_SQL, files(&[("A", "data", "ROWS", "150")]));
    job.execute(&cancel).unwrap();

    let text = meter.encode().unwrap();
    assert!(has_sample(&text, "sql.active_connections", "8"), "{text}");
    assert!(has_sample(&text, "sql.database_size_A_data_ROWS", "150"), "{text}");
}

#[test]
fn dynamic_keys_grow_and_are_never_retired() {
    let (job, meter) = setup();
    let cancel = CancellationToken::new();

    let first = job.execute(&cancel).unwrap();
    assert_eq!(first.new_keys, 2);

    job.factory().set_rows(
        FILES_SQL,
        files(&[("A", "data", "ROWS", "100"), ("B", "log", "LOG", "20")]),
    );
    let second = job.execute(&cancel).unwrap();
    assert_eq!(second.new_keys, 1);
    assert_eq!(job.registry().len(), 3);

    // B's file disappears: the gauge stays registered but reports nothing.
    job.factory()
        .set_rows(FILES_SQL, files(&[("A", "data", "ROWS", "100")]));
    let third = job.execute(&cancel).unwrap();
    assert_eq!(third.new_keys, 0);
    assert_eq!(
        job.registry().state("sql.database_size_B_log_LOG"),
        Some(RegistrationState::Registered)
    );
    assert_eq!(job.store().value("sql.database_size_B_log_LOG"), None);

    let text = meter.encode().unwrap();
    assert!(!text.contains("pgotel_sql_database_size_B_log_LOG"), "{text}");
    assert!(has_sample(&text, "sql.database_size_A_data_ROWS", "100"), "{text}");
}

#[test]
fn connection_outage_keeps_last_values_visible() {
    let (job, meter) = setup();
    let cancel = CancellationToken::new();

    job.execute(&cancel).unwrap();
    job.factory().set_connect_error(Some("connection refused"));
    assert!(job.execute(&cancel).is_err());

    assert_eq!(job.store().value("sql.active_connections"), Some(3.0));
    let text = meter.encode().unwrap();
    assert!(has_sample(&text, "sql.active_connections", "3"), "{text}");

    job.factory().set_connect_error(None);
    job.execute(&cancel).unwrap();
    assert!(job.status().database_reachable());
    assert_eq!(job.factory().stats().open_connections(), 0);
}

#[test]
fn database_names_differing_in_punctuation_each_get_a_gauge() {
    let (job, meter) = setup();
    job.factory().set_rows(
        FILES_SQL,
        files(&[("my.db", "data", "ROWS", "2"), ("my-db", "data", "ROWS", "5")]),
    );

    job.execute(&CancellationToken::new()).unwrap();

    for key in [
        "sql.database_size_my.db_data_ROWS",
        "sql.database_size_my-db_data_ROWS",
    ] {
        assert_eq!(
            job.registry().state(key),
            Some(RegistrationState::Registered),
            "{key}"
        );
    }
    let text = meter.encode().unwrap();
    assert!(has_sample(&text, "sql.database_size_my.db_data_ROWS", "2"), "{text}");
    assert!(has_sample(&text, "sql.database_size_my-db_data_ROWS", "5"), "{text}");
}
