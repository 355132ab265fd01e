use crate::{
    batch::{BatchProcessor, BatchReport},
    error::InternalError,
    identity::IdentityCache,
    model::Schema,
    obs::sink::{MetricsSink, with_metrics_sink},
    reconcile::MapperOptions,
    record::RawRecord,
    snapshot::{SnapshotProcessor, SnapshotReport},
    store::ObjectStore,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info};

///
/// SyncSession
///
/// Session-scoped handle with policy (mapper options, metrics) and
/// write-context routing. Every apply call is one reconciliation pass:
/// a fresh scoped write context, a fresh identity cache, one commit.
///

pub struct SyncSession<S: ObjectStore> {
    store: S,
    schema: Arc<Schema>,
    options: MapperOptions,
    metrics: Option<&'static dyn MetricsSink>,
}

impl<S: ObjectStore> SyncSession<S> {
    #[must_use]
    pub fn new(store: S, schema: Arc<Schema>) -> Self {
        Self {
            store,
            schema,
            options: MapperOptions::default(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn options(mut self, options: MapperOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub const fn metrics_sink(mut self, sink: &'static dyn MetricsSink) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // ---------------------------------------------------------------------
    // Apply entry points
    // ---------------------------------------------------------------------

    /// Apply a combined `{ "entities": { ... } }` payload, one authoritative
    /// batch per requested type, in the given order.
    pub fn apply_snapshot<T: AsRef<str>>(
        &mut self,
        payload: &JsonValue,
        requested_types: &[T],
    ) -> Result<SnapshotReport, InternalError> {
        self.run_in_context(|batch| {
            SnapshotProcessor::new(batch).process_snapshot(payload, requested_types)
        })
    }

    /// Apply a single-type `{ "data": [ ... ] }` payload.
    ///
    /// `Ok(None)` means the payload was malformed and nothing was applied.
    pub fn apply_data(
        &mut self,
        entity: &str,
        payload: &JsonValue,
        delete_not_provided: bool,
    ) -> Result<Option<BatchReport>, InternalError> {
        self.run_in_context(|mut batch| batch.process_data(entity, payload, delete_not_provided))
    }

    pub fn apply_records(
        &mut self,
        entity: &str,
        records: &[RawRecord],
        delete_not_provided: bool,
    ) -> Result<BatchReport, InternalError> {
        self.run_in_context(|mut batch| {
            batch.process_batch(entity, records, delete_not_provided)
        })
    }

    /// Drop all stored content at every level of the store.
    pub fn reset_storage(&mut self) {
        self.store.reset();
        info!("storage reset");
    }

    // ---------------------------------------------------------------------
    // Context routing
    // ---------------------------------------------------------------------

    // Open a scoped context, run `op`, then commit upward or throw the
    // context away. The context slot is always released.
    fn run_in_context<T>(
        &mut self,
        op: impl FnOnce(BatchProcessor<'_>) -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        let metrics = self.metrics;
        let policy = self.options.shape_mismatch;

        let result = with_metrics(metrics, || {
            let ctx = self.store.new_scoped_write_context()?;

            let outcome = {
                let schema = self.schema.as_ref();
                let mut cache = IdentityCache::new();
                self.store.scope(ctx).and_then(|mut scope| {
                    op(BatchProcessor::new(&mut scope, schema, &mut cache).policy(policy))
                })
            };

            let outcome = outcome.and_then(|value| {
                if self.store.has_pending_changes(ctx) {
                    self.store.save(ctx)?;
                }
                Ok(value)
            });
            self.store.discard(ctx);

            outcome
        });

        if let Err(err) = &result {
            error!(error = %err.display_with_class(), "reconciliation pass aborted");
        }

        result
    }
}

fn with_metrics<T>(sink: Option<&'static dyn MetricsSink>, f: impl FnOnce() -> T) -> T {
    if let Some(sink) = sink {
        with_metrics_sink(sink, f)
    } else {
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ID_FIELD,
        error::{ErrorClass, ErrorOrigin},
        obs::{MetricsEvent, metrics_report, metrics_reset_all},
        reconcile::ShapeMismatchPolicy,
        store::MemoryStore,
        test_support::{fixture_schema, record},
        value::Value,
    };
    use serde_json::json;
    use std::sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    };

    fn session() -> SyncSession<MemoryStore> {
        let schema = Arc::new(fixture_schema());
        SyncSession::new(MemoryStore::new(Arc::clone(&schema)), schema)
    }

    fn ids(session: &SyncSession<MemoryStore>, entity: &str) -> Vec<i64> {
        let view = session.store().view();
        let mut ids: Vec<_> = view
            .all(entity)
            .expect("fetch should succeed")
            .into_iter()
            .filter_map(|key| view.attribute(key, ID_FIELD).and_then(Value::as_int))
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn snapshot_is_committed_to_the_main_context() {
        let mut session = session();
        let payload = json!({
            "entities": {
                "Organization": [{ "id": 1, "name": "acme" }],
                "Contract": [{ "id": 10, "organization": { "id": 1, "referenceOnly": true } }]
            }
        });

        let report = session
            .apply_snapshot(&payload, &["Organization", "Contract"])
            .expect("snapshot should apply");

        assert!(report.accepted);
        assert_eq!(ids(&session, "Organization"), [1]);
        assert_eq!(ids(&session, "Contract"), [10]);

        let view = session.store().view();
        let org = view.all("Organization").expect("fetch should succeed")[0];
        assert_eq!(view.attribute(org, "name"), Some(&Value::from("acme")));
        assert_eq!(view.to_many(org, "contracts").len(), 1);
    }

    #[test]
    fn fatal_error_leaves_storage_untouched() {
        let mut session = session();
        session
            .apply_records("Device", &[record(json!({ "id": 1, "name": "kept" }))], false)
            .expect("seed should apply");

        let err = session
            .apply_records(
                "Device",
                &[
                    record(json!({ "id": 2 })),
                    record(json!({ "id": 3, "created": "not a date" })),
                ],
                true,
            )
            .expect_err("bad date should abort the pass");

        assert_eq!(err.origin, ErrorOrigin::Reconcile);
        assert_eq!(ids(&session, "Device"), [1]);
    }

    #[test]
    fn malformed_data_payload_is_rejected() {
        let mut session = session();

        let report = session
            .apply_data("Device", &json!({ "rows": [] }), true)
            .expect("malformed payload should not be fatal");
        assert!(report.is_none());

        let report = session
            .apply_data("Device", &json!({ "data": [{ "id": 4 }] }), true)
            .expect("payload should apply")
            .expect("payload should be accepted");
        assert_eq!(report.upserted, 1);
        assert_eq!(ids(&session, "Device"), [4]);
    }

    #[test]
    fn each_pass_starts_with_a_fresh_identity_cache() {
        let mut session = session();
        session
            .apply_records("Device", &[record(json!({ "id": 1 }))], false)
            .expect("first pass should apply");

        // a second pass must see the committed object rather than create one
        session
            .apply_records("Device", &[record(json!({ "id": 1, "name": "again" }))], false)
            .expect("second pass should apply");

        assert_eq!(ids(&session, "Device"), [1]);
    }

    #[test]
    fn configured_policy_reaches_the_reconciler() {
        let mut session = session().options(MapperOptions {
            shape_mismatch: ShapeMismatchPolicy::Fail,
        });

        let err = session
            .apply_records(
                "Organization",
                &[record(json!({ "id": 1, "contracts": { "id": 2 } }))],
                false,
            )
            .expect_err("fail policy should abort");

        assert_eq!(err.class, ErrorClass::InvariantViolation);
        assert!(ids(&session, "Organization").is_empty());
    }

    #[test]
    fn reset_storage_drops_everything() {
        let mut session = session();
        session
            .apply_records("Device", &[record(json!({ "id": 1 }))], false)
            .expect("seed should apply");

        session.reset_storage();

        assert!(ids(&session, "Device").is_empty());
    }

    #[test]
    fn global_metrics_count_batches_per_entity() {
        metrics_reset_all();
        let mut session = session();
        session
            .apply_records(
                "Device",
                &[
                    record(json!({ "id": 1 })),
                    record(json!({ "id": 2, "disabled": true })),
                ],
                true,
            )
            .expect("batch should apply");

        let report = metrics_report(None);
        let counters = report
            .counters
            .expect("counters should be recorded after a batch");
        assert_eq!(counters.ops.batches, 1);
        assert_eq!(counters.ops.records_upserted, 1);
        assert_eq!(counters.ops.skipped_disabled, 1);
    }

    struct RecordingSink {
        batches: AtomicU64,
        created: Mutex<Vec<String>>,
    }

    impl MetricsSink for RecordingSink {
        fn record(&self, event: MetricsEvent<'_>) {
            match event {
                MetricsEvent::BatchFinish { .. } => {
                    self.batches.fetch_add(1, Ordering::Relaxed);
                }
                MetricsEvent::EntityCreated { entity } => {
                    self.created
                        .lock()
                        .expect("sink lock should not be poisoned")
                        .push(entity.to_string());
                }
                _ => {}
            }
        }
    }

    #[test]
    fn session_sink_overrides_the_global_sink() {
        let sink: &'static RecordingSink = Box::leak(Box::new(RecordingSink {
            batches: AtomicU64::new(0),
            created: Mutex::new(Vec::new()),
        }));
        metrics_reset_all();
        let mut session = session().metrics_sink(sink);

        session
            .apply_records("Device", &[record(json!({ "id": 1, "type": { "id": 9 } }))], false)
            .expect("batch should apply");

        assert_eq!(sink.batches.load(Ordering::Relaxed), 1);
        assert_eq!(
            *sink.created.lock().expect("sink lock should not be poisoned"),
            ["Device", "DeviceType"]
        );
        let global = metrics_report(None)
            .counters
            .expect("report should carry counters");
        assert_eq!(global.ops.batches, 0);
    }
}
