//! Batch processor: one entity type's record array inside one write context.

use crate::{
    DATA_KEY, ID_FIELD,
    error::{ErrorOrigin, InternalError},
    identity::IdentityResolver,
    model::{EntityModel, MetadataProvider},
    obs::sink::{self, MetricsEvent, SkipReason, Span},
    reconcile::{Reconciler, ShapeMismatchPolicy},
    record::{RawRecord, is_disabled, payload_section, record_array, record_id},
    store::WriteScope,
    value::Value,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{collections::BTreeSet, time::Instant};
use tracing::{debug, info, warn};

///
/// BatchReport
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BatchReport {
    pub entity: String,
    pub upserted: u64,
    pub skipped_disabled: u64,
    pub skipped_missing_id: u64,
    /// External ids removed by deletion-reconciliation, ascending.
    pub deleted: Vec<i64>,
}

impl BatchReport {
    fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            ..Self::default()
        }
    }
}

///
/// BatchProcessor
///
/// Runs records of one type through the reconciler and, when asked,
/// deletes every previously known object the batch no longer mentions.
/// Mutations are staged in the scope; saving is the caller's job.
///

pub struct BatchProcessor<'a> {
    scope: &'a mut dyn WriteScope,
    schema: &'a dyn MetadataProvider,
    resolver: &'a mut dyn IdentityResolver,
    policy: ShapeMismatchPolicy,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(
        scope: &'a mut dyn WriteScope,
        schema: &'a dyn MetadataProvider,
        resolver: &'a mut dyn IdentityResolver,
    ) -> Self {
        Self {
            scope,
            schema,
            resolver,
            policy: ShapeMismatchPolicy::default(),
        }
    }

    #[must_use]
    pub const fn policy(mut self, policy: ShapeMismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub const fn schema(&self) -> &'a dyn MetadataProvider {
        self.schema
    }

    /// Forget every identity cached so far in this pass.
    pub fn reset_resolver(&mut self) {
        self.resolver.reset();
    }

    /// Reconcile `records` as objects of `entity`, in input order.
    ///
    /// Disabled records and records without an integer id are skipped.
    /// With `delete_not_provided`, objects whose id was known before the
    /// batch and is absent from the surviving records are deleted.
    pub fn process_batch<'r>(
        &mut self,
        entity: &str,
        records: impl IntoIterator<Item = &'r RawRecord>,
        delete_not_provided: bool,
    ) -> Result<BatchReport, InternalError> {
        let schema = self.schema;
        let model = schema.try_entity(entity, ErrorOrigin::Reconcile)?;
        let mut span = Span::new(&model.name);
        let started = Instant::now();
        info!(entity, delete_not_provided, "batch started");

        // identities known before any record of this batch is applied
        let known = if delete_not_provided {
            self.resolver.all_identities_of(self.scope, model)?
        } else {
            BTreeSet::new()
        };

        let mut report = BatchReport::new(entity);
        let mut survivors = BTreeSet::new();

        for record in records {
            if is_disabled(record) {
                report.skipped_disabled += 1;
                sink::record(MetricsEvent::RecordSkipped {
                    entity,
                    reason: SkipReason::Disabled,
                });
                continue;
            }
            let Some(id) = record_id(record) else {
                report.skipped_missing_id += 1;
                sink::record(MetricsEvent::RecordSkipped {
                    entity,
                    reason: SkipReason::MissingId,
                });
                continue;
            };

            Reconciler::new(&mut *self.scope, schema, &mut *self.resolver)
                .policy(self.policy)
                .upsert(model, record, id)?;
            survivors.insert(id);
            report.upserted += 1;
        }

        if delete_not_provided {
            let doomed: BTreeSet<i64> = known.difference(&survivors).copied().collect();
            if !doomed.is_empty() {
                self.delete_identities(model, &doomed)?;
            }
            report.deleted = doomed.into_iter().collect();
        }

        span.set_counts(report.upserted, report.deleted.len() as u64);
        info!(
            entity,
            upserted = report.upserted,
            deleted = report.deleted.len(),
            skipped = report.skipped_disabled + report.skipped_missing_id,
            elapsed = ?started.elapsed(),
            "batch finished"
        );

        Ok(report)
    }

    /// Run a `{ "data": [ ... ] }` payload through [`Self::process_batch`].
    ///
    /// A payload of any other shape is logged and ignored (`Ok(None)`).
    pub fn process_data(
        &mut self,
        entity: &str,
        payload: &JsonValue,
        delete_not_provided: bool,
    ) -> Result<Option<BatchReport>, InternalError> {
        let Some(records) = payload_section(payload, DATA_KEY).and_then(record_array) else {
            warn!(entity, "batch payload has no `data` array of records; ignoring");
            return Ok(None);
        };

        self.process_batch(entity, records, delete_not_provided)
            .map(Some)
    }

    fn delete_identities(
        &mut self,
        model: &EntityModel,
        doomed: &BTreeSet<i64>,
    ) -> Result<(), InternalError> {
        for key in self.resolver.all_of(self.scope, model)? {
            let Some(id) = self.scope.attribute(key, ID_FIELD).and_then(Value::as_int) else {
                continue;
            };
            if !doomed.contains(&id) {
                continue;
            }

            debug!(entity = %model.name, id, %key, "deleting object absent from batch");
            self.scope.delete(key)?;
            self.resolver.evict(key);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        identity::IdentityCache,
        model::Schema,
        store::{ContextId, MemoryStore, ObjectStore},
        test_support::{fixture_store, record},
    };
    use proptest::prelude::*;
    use serde_json::json;
    use std::sync::Arc;

    fn open(store: &mut MemoryStore) -> (Arc<Schema>, ContextId) {
        let schema = Arc::clone(store.schema());
        let ctx = store
            .new_scoped_write_context()
            .expect("scoped context should open");
        (schema, ctx)
    }

    fn run(
        store: &mut MemoryStore,
        entity: &str,
        records: &[RawRecord],
        delete_not_provided: bool,
    ) -> BatchReport {
        let (schema, ctx) = open(store);
        let report = {
            let mut scope = store.scope(ctx).expect("scope should open");
            let mut cache = IdentityCache::new();
            BatchProcessor::new(&mut scope, schema.as_ref(), &mut cache)
                .process_batch(entity, records, delete_not_provided)
                .expect("batch should succeed")
        };
        store.save(ctx).expect("save should succeed");

        report
    }

    fn ids(store: &MemoryStore, entity: &str) -> Vec<i64> {
        let view = store.view();
        let mut ids: Vec<_> = view
            .all(entity)
            .expect("fetch should succeed")
            .into_iter()
            .filter_map(|key| view.attribute(key, ID_FIELD).and_then(Value::as_int))
            .collect();
        ids.sort_unstable();
        ids
    }

    fn devices(ids: &[i64]) -> Vec<RawRecord> {
        ids.iter().map(|id| record(json!({ "id": id }))).collect()
    }

    #[test]
    fn absent_identities_are_deleted() {
        let mut store = fixture_store();
        run(&mut store, "Device", &devices(&[1, 2, 3]), false);

        let report = run(&mut store, "Device", &devices(&[1, 3]), true);

        assert_eq!(report.deleted, [2]);
        assert_eq!(ids(&store, "Device"), [1, 3]);
    }

    #[test]
    fn without_deletion_batches_only_upsert() {
        let mut store = fixture_store();
        run(&mut store, "Device", &devices(&[1, 2, 3]), false);

        let report = run(&mut store, "Device", &devices(&[4]), false);

        assert!(report.deleted.is_empty());
        assert_eq!(ids(&store, "Device"), [1, 2, 3, 4]);
    }

    #[test]
    fn disabled_records_are_not_survivors() {
        let mut store = fixture_store();
        run(&mut store, "Device", &devices(&[1, 2]), false);

        let records = vec![
            record(json!({ "id": 1 })),
            record(json!({ "id": 2, "disabled": true, "name": "gone" })),
            record(json!({ "id": 5, "disabled": true })),
        ];
        let report = run(&mut store, "Device", &records, true);

        assert_eq!(report.skipped_disabled, 2);
        assert_eq!(report.deleted, [2]);
        assert_eq!(ids(&store, "Device"), [1]);
    }

    #[test]
    fn records_without_usable_id_are_skipped() {
        let mut store = fixture_store();
        let records = vec![
            record(json!({ "name": "no id" })),
            record(json!({ "id": "7" })),
            record(json!({ "id": 8 })),
        ];

        let report = run(&mut store, "Device", &records, true);

        assert_eq!(report.skipped_missing_id, 2);
        assert_eq!(report.upserted, 1);
        assert_eq!(ids(&store, "Device"), [8]);
    }

    #[test]
    fn empty_authoritative_batch_deletes_everything() {
        let mut store = fixture_store();
        run(&mut store, "Device", &devices(&[1, 2]), false);

        let report = run(&mut store, "Device", &[], true);

        assert_eq!(report.deleted, [1, 2]);
        assert!(ids(&store, "Device").is_empty());
    }

    #[test]
    fn zero_id_objects_survive_deletion() {
        let mut store = fixture_store();
        run(&mut store, "Device", &devices(&[0, 1]), false);

        run(&mut store, "Device", &devices(&[]), true);

        assert_eq!(ids(&store, "Device"), [0]);
    }

    #[test]
    fn objects_created_through_relationships_are_not_deleted_by_the_same_batch() {
        let mut store = fixture_store();
        let records = vec![record(json!({ "id": 1, "children": [{ "id": 2 }] }))];

        let report = run(&mut store, "Device", &records, true);

        assert!(report.deleted.is_empty());
        assert_eq!(ids(&store, "Device"), [1, 2]);
    }

    #[test]
    fn process_data_ignores_malformed_payloads() {
        let mut store = fixture_store();
        let (schema, ctx) = open(&mut store);
        let mut scope = store.scope(ctx).expect("scope should open");
        let mut cache = IdentityCache::new();
        let mut batch = BatchProcessor::new(&mut scope, schema.as_ref(), &mut cache);

        for payload in [json!([{ "id": 1 }]), json!({ "data": { "id": 1 } }), json!({})] {
            assert!(
                batch
                    .process_data("Device", &payload, true)
                    .expect("malformed payload should not be fatal")
                    .is_none()
            );
        }

        let report = batch
            .process_data("Device", &json!({ "data": [{ "id": 1 }] }), true)
            .expect("well-formed payload should apply")
            .expect("well-formed payload should produce a report");
        assert_eq!(report.upserted, 1);
    }

    #[test]
    fn unknown_entity_is_fatal() {
        let mut store = fixture_store();
        let (schema, ctx) = open(&mut store);
        let mut scope = store.scope(ctx).expect("scope should open");
        let mut cache = IdentityCache::new();

        let err = BatchProcessor::new(&mut scope, schema.as_ref(), &mut cache)
            .process_batch("Gadget", &devices(&[1]), true)
            .expect_err("unknown entity should fail");
        assert!(err.message.contains("Gadget"));
    }

    proptest! {
        #[test]
        fn deletion_diff_matches_set_difference(
            before in proptest::collection::btree_set(1i64..40, 0..12),
            after in proptest::collection::btree_set(1i64..40, 0..12),
        ) {
            let mut store = fixture_store();
            let before: Vec<_> = before.into_iter().collect();
            let after: Vec<_> = after.into_iter().collect();
            run(&mut store, "Device", &devices(&before), false);

            let report = run(&mut store, "Device", &devices(&after), true);

            let expected: Vec<_> = before.iter().copied().filter(|id| !after.contains(id)).collect();
            prop_assert_eq!(report.deleted, expected);
            prop_assert_eq!(ids(&store, "Device"), after);
        }
    }
}
