use super::*;
use crate::{
    UUID_FIELD,
    error::ErrorClass,
    identity::IdentityCache,
    model::Schema,
    store::{ContextId, MemoryStore, MemoryView, ObjectStore},
    test_support::{fixture_store, record},
    value::Value,
};
use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::json;
use std::{str::FromStr, sync::Arc};

///
/// Pass
/// One open write context plus the identity cache of one reconciliation pass.
///

struct Pass {
    store: MemoryStore,
    schema: Arc<Schema>,
    ctx: ContextId,
    cache: IdentityCache,
    policy: ShapeMismatchPolicy,
}

impl Pass {
    fn new() -> Self {
        let mut store = fixture_store();
        let schema = Arc::clone(store.schema());
        let ctx = store
            .new_scoped_write_context()
            .expect("scoped context should open");

        Self {
            store,
            schema,
            ctx,
            cache: IdentityCache::new(),
            policy: ShapeMismatchPolicy::Skip,
        }
    }

    fn failing() -> Self {
        Self {
            policy: ShapeMismatchPolicy::Fail,
            ..Self::new()
        }
    }

    fn upsert(&mut self, entity: &str, value: JsonValue) -> Result<ObjectKey, InternalError> {
        let model = self
            .schema
            .entity(entity)
            .expect("fixture should register entity");
        let rec = record(value);
        let id = record_id(&rec).expect("test record should carry an id");
        let mut scope = self.store.scope(self.ctx)?;

        Reconciler::new(&mut scope, self.schema.as_ref(), &mut self.cache)
            .policy(self.policy)
            .upsert(model, &rec, id)
    }

    fn reconcile_scalars_and_to_one(
        &mut self,
        key: ObjectKey,
        value: JsonValue,
    ) -> Result<(), InternalError> {
        let rec = record(value);
        let mut scope = self.store.scope(self.ctx)?;

        Reconciler::new(&mut scope, self.schema.as_ref(), &mut self.cache)
            .policy(self.policy)
            .reconcile(key, &rec, None, false)
    }

    fn view(&self) -> MemoryView<'_> {
        self.store.view_at(self.ctx)
    }
}

#[test]
fn scalars_are_coerced_and_external_names_honoured() {
    let mut pass = Pass::new();
    let key = pass
        .upsert(
            "Contract",
            json!({ "id": 1, "value": 12.5, "startDate": 1_000, "startsOn": 99 }),
        )
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(
        view.attribute(key, "value"),
        Some(&Value::Decimal(
            Decimal::from_str("12.5").expect("decimal literal should parse")
        ))
    );
    assert_eq!(
        view.attribute(key, "startsOn"),
        Some(&Value::Timestamp(
            DateTime::from_timestamp(1, 0).expect("timestamp should be in range")
        ))
    );
}

#[test]
fn missing_keys_leave_fields_untouched_and_mismatches_clear() {
    let mut pass = Pass::new();
    pass.upsert("Device", json!({ "id": 1, "name": "probe", "weight": 2.5 }))
        .expect("reconcile should succeed");
    let key = pass
        .upsert("Device", json!({ "id": 1, "weight": "heavy" }))
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.attribute(key, "name"), Some(&Value::from("probe")));
    assert_eq!(view.attribute(key, "weight"), Some(&Value::Null));
}

#[test]
fn identity_field_is_never_overwritten_by_the_scalar_pass() {
    let mut pass = Pass::new();
    let key = pass
        .upsert("Device", json!({ "id": 3, "uuid": "dev-3" }))
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.attribute(key, ID_FIELD), Some(&Value::Int(3)));
    assert_eq!(view.attribute(key, UUID_FIELD), Some(&Value::from("dev-3")));
}

#[test]
fn non_numeric_date_is_fatal() {
    let mut pass = Pass::new();
    let err = pass
        .upsert("Device", json!({ "id": 1, "created": "yesterday" }))
        .expect_err("string date should abort the pass");

    assert_eq!(err.class, ErrorClass::InvariantViolation);
    assert_eq!(err.origin, ErrorOrigin::Reconcile);
}

#[test]
fn reference_only_records_touch_identity_only() {
    let mut pass = Pass::new();
    let key = pass
        .upsert("DeviceType", json!({ "id": 4, "name": "sensor" }))
        .expect("reconcile should succeed");
    let again = pass
        .upsert(
            "DeviceType",
            json!({ "id": 4, "name": "stub", "referenceOnly": true }),
        )
        .expect("reconcile should succeed");

    assert_eq!(key, again);
    assert_eq!(pass.view().attribute(key, "name"), Some(&Value::from("sensor")));
}

#[test]
fn nested_reference_only_links_without_copying() {
    let mut pass = Pass::new();
    let device_type = pass
        .upsert("DeviceType", json!({ "id": 4, "name": "sensor" }))
        .expect("reconcile should succeed");
    let device = pass
        .upsert(
            "Device",
            json!({ "id": 1, "type": { "id": 4, "name": "stub", "referenceOnly": true } }),
        )
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.to_one(device, "type"), Some(device_type));
    assert_eq!(view.attribute(device_type, "name"), Some(&Value::from("sensor")));
}

#[test]
fn to_many_is_replaced_not_merged() {
    let mut pass = Pass::new();
    pass.upsert(
        "Organization",
        json!({ "id": 1, "contracts": [{ "id": 10 }, { "id": 11 }] }),
    )
    .expect("reconcile should succeed");
    let org = pass
        .upsert(
            "Organization",
            json!({ "id": 1, "contracts": [{ "id": 12 }] }),
        )
        .expect("reconcile should succeed");

    let view = pass.view();
    let ids: Vec<_> = view
        .to_many(org, "contracts")
        .into_iter()
        .filter_map(|c| view.attribute(c, ID_FIELD).and_then(Value::as_int))
        .collect();
    assert_eq!(ids, [12]);
}

#[test]
fn inverse_of_parent_edge_is_not_descended() {
    let mut pass = Pass::new();
    let device = pass
        .upsert(
            "Device",
            json!({
                "id": 1,
                "name": "probe",
                "type": {
                    "id": 2,
                    "name": "sensor",
                    "devices": [{ "id": 1, "name": "overwritten" }]
                }
            }),
        )
        .expect("reconcile should terminate");

    let view = pass.view();
    let device_type = view.to_one(device, "type").expect("type should be linked");
    assert_eq!(view.attribute(device, "name"), Some(&Value::from("probe")));
    assert_eq!(view.attribute(device_type, "name"), Some(&Value::from("sensor")));
    assert_eq!(view.to_many(device_type, "devices"), [device]);
}

#[test]
fn self_referencing_hierarchy_terminates() {
    let mut pass = Pass::new();
    let child = pass
        .upsert(
            "Device",
            json!({
                "id": 2,
                "parent": { "id": 1, "name": "rack", "children": [{ "id": 2 }] }
            }),
        )
        .expect("reconcile should terminate");

    let view = pass.view();
    let parent = view.to_one(child, "parent").expect("parent should be linked");
    assert_eq!(view.to_many(parent, "children"), [child]);
}

#[test]
fn skipping_to_many_applies_to_nested_records_too() {
    let mut pass = Pass::new();
    let device = pass
        .upsert(
            "Device",
            json!({
                "id": 1,
                "children": [{ "id": 3 }],
                "type": { "id": 2, "attributes": [{ "id": 7 }] }
            }),
        )
        .expect("seed should reconcile");

    pass.reconcile_scalars_and_to_one(
        device,
        json!({
            "id": 1,
            "name": "probe",
            "children": [{ "id": 4 }, { "id": 5 }],
            "type": { "id": 2, "name": "sensor", "attributes": [] }
        }),
    )
    .expect("reconcile should succeed");

    let view = pass.view();
    let device_type = view.to_one(device, "type").expect("type should stay linked");
    assert_eq!(view.attribute(device, "name"), Some(&Value::from("probe")));
    assert_eq!(view.attribute(device_type, "name"), Some(&Value::from("sensor")));
    assert_eq!(view.to_many(device, "children").len(), 1);
    assert_eq!(view.to_many(device_type, "attributes").len(), 1);
}

#[test]
fn to_one_missing_or_null_or_without_id_clears() {
    let mut pass = Pass::new();
    let device = pass
        .upsert("Device", json!({ "id": 1, "type": { "id": 2 } }))
        .expect("reconcile should succeed");
    assert!(pass.view().to_one(device, "type").is_some());

    pass.upsert("Device", json!({ "id": 1 }))
        .expect("reconcile should succeed");
    assert!(pass.view().to_one(device, "type").is_none());

    pass.upsert("Device", json!({ "id": 1, "type": { "id": 2 } }))
        .expect("reconcile should succeed");
    pass.upsert("Device", json!({ "id": 1, "type": null }))
        .expect("reconcile should succeed");
    assert!(pass.view().to_one(device, "type").is_none());

    pass.upsert("Device", json!({ "id": 1, "type": { "name": "anonymous" } }))
        .expect("reconcile should succeed");
    assert!(pass.view().to_one(device, "type").is_none());
}

#[test]
fn no_identity_to_one_reuses_current_target() {
    let mut pass = Pass::new();
    let device = pass
        .upsert("Device", json!({ "id": 1, "location": { "latitude": 1.0 } }))
        .expect("reconcile should succeed");
    let first = pass
        .view()
        .to_one(device, "location")
        .expect("location should be created");

    pass.upsert("Device", json!({ "id": 1, "location": { "latitude": 2.0 } }))
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.to_one(device, "location"), Some(first));
    assert_eq!(view.attribute(first, "latitude"), Some(&Value::Float64(2.0)));
    assert!(
        view.attribute(first, UUID_FIELD)
            .and_then(Value::as_text)
            .is_some()
    );
}

#[test]
fn to_many_elements_follow_identity_policy() {
    let mut pass = Pass::new();
    let device = pass
        .upsert(
            "Device",
            json!({
                "id": 1,
                "readings": [{ "value": 1.5 }, { "value": 2.5 }],
                "children": [{ "id": 2 }, { "name": "no id" }]
            }),
        )
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.to_many(device, "readings").len(), 2);
    assert_eq!(view.to_many(device, "children").len(), 1);
}

#[test]
fn ignored_relationships_are_left_alone() {
    let mut pass = Pass::new();
    let user = pass
        .upsert("User", json!({ "id": 7 }))
        .expect("reconcile should succeed");
    let device = pass
        .upsert("Device", json!({ "id": 1 }))
        .expect("reconcile should succeed");
    pass.store
        .scope(pass.ctx)
        .expect("scope should open")
        .set_to_one(device, "owner", Some(user))
        .expect("link should succeed");

    pass.upsert("Device", json!({ "id": 1, "owner": { "id": 8 } }))
        .expect("reconcile should succeed");

    assert_eq!(pass.view().to_one(device, "owner"), Some(user));
}

#[test]
fn abstract_destination_resolves_existing_subtype() {
    let mut pass = Pass::new();
    let attribute = pass
        .upsert("DeviceAttribute", json!({ "id": 5, "unit": "kg" }))
        .expect("reconcile should succeed");
    let link = pass
        .upsert(
            "DeviceTypeAttribute",
            json!({ "id": 1, "attribute": { "id": 5, "name": "mass" } }),
        )
        .expect("reconcile should succeed");

    let view = pass.view();
    assert_eq!(view.to_one(link, "attribute"), Some(attribute));
    // recursion uses the object's concrete type
    assert_eq!(view.attribute(attribute, "name"), Some(&Value::from("mass")));
    assert_eq!(view.attribute(attribute, "unit"), Some(&Value::from("kg")));
}

#[test]
fn shape_mismatch_policy_skips_or_fails() {
    let mut pass = Pass::new();
    let org = pass
        .upsert("Organization", json!({ "id": 1, "contracts": [{ "id": 10 }] }))
        .expect("reconcile should succeed");
    pass.upsert("Organization", json!({ "id": 1, "contracts": { "id": 11 } }))
        .expect("mismatch should be skipped");
    assert_eq!(pass.view().to_many(org, "contracts").len(), 1);

    let mut pass = Pass::failing();
    let err = pass
        .upsert("Organization", json!({ "id": 1, "contracts": { "id": 11 } }))
        .expect_err("mismatch should fail");
    assert_eq!(err.class, ErrorClass::InvariantViolation);

    let err = pass
        .upsert("Device", json!({ "id": 1, "type": [{ "id": 2 }] }))
        .expect_err("mismatch should fail");
    assert!(err.message.contains("Device.type"));
}
