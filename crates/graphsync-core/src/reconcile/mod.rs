//! Entity reconciler: copies one raw record onto one stored object and walks
//! its relationships.

use crate::{
    ID_FIELD,
    error::{ErrorOrigin, InternalError},
    identity::{IdentityResolver, create_object},
    model::{EntityModel, MetadataProvider, RelationModel},
    obs::sink::{self, MetricsEvent},
    record::{RawRecord, is_reference_only, record_array, record_id, record_uuid},
    store::{ObjectKey, WriteScope},
    value::coerce,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

///
/// ShapeMismatchPolicy
///
/// What to do with a relationship payload of the wrong JSON shape
/// (e.g. an object where an array of records is expected).
///
/// Skip → log at `warn`, leave the relationship untouched, keep going.
/// Fail → abort the pass with an invariant violation.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeMismatchPolicy {
    #[default]
    Skip,
    Fail,
}

///
/// MapperOptions
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct MapperOptions {
    pub shape_mismatch: ShapeMismatchPolicy,
}

///
/// Reconciler
///
/// Borrows everything one reconciliation step needs: the write scope it
/// mutates, the metadata it reads, and the pass's identity resolver.
///

pub struct Reconciler<'a> {
    scope: &'a mut dyn WriteScope,
    schema: &'a dyn MetadataProvider,
    resolver: &'a mut dyn IdentityResolver,
    policy: ShapeMismatchPolicy,
}

impl<'a> Reconciler<'a> {
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

    /// Resolve `record` by identity and reconcile it as a top-level record.
    pub fn upsert(
        &mut self,
        entity: &EntityModel,
        record: &RawRecord,
        id: i64,
    ) -> Result<ObjectKey, InternalError> {
        let key = self
            .resolver
            .resolve(self.scope, entity, id, record_uuid(record))?;
        self.reconcile(key, record, None, true)?;

        Ok(key)
    }

    /// Copy `record` onto the object at `key`.
    ///
    /// `parent` is the relationship this object was reached through; its
    /// inverse is never descended again. To-many relationships are only
    /// touched when `process_to_many` is set, at this level and below.
    pub fn reconcile(
        &mut self,
        key: ObjectKey,
        record: &RawRecord,
        parent: Option<&RelationModel>,
        process_to_many: bool,
    ) -> Result<(), InternalError> {
        if is_reference_only(record) {
            return Ok(());
        }

        let schema = self.schema;
        let entity = self
            .scope
            .entity_name(key)
            .ok_or_else(|| InternalError::store_not_found(key.to_string()))?;
        let model = schema.try_entity(entity, ErrorOrigin::Reconcile)?;

        self.copy_attributes(key, model, record)?;

        for rel in &model.relations {
            if rel.ignore || parent.is_some_and(|parent| rel.is_inverse_of(parent)) {
                continue;
            }

            if rel.is_to_many() {
                if process_to_many {
                    self.reconcile_to_many(key, model, rel, record, process_to_many)?;
                }
            } else {
                self.reconcile_to_one(key, model, rel, record, process_to_many)?;
            }
        }

        Ok(())
    }

    fn copy_attributes(
        &mut self,
        key: ObjectKey,
        model: &EntityModel,
        record: &RawRecord,
    ) -> Result<(), InternalError> {
        for attr in &model.attributes {
            if attr.name == ID_FIELD {
                continue;
            }
            let Some(raw) = record.get(attr.record_key()) else {
                continue;
            };

            let value = coerce(attr, raw)?;
            self.scope.set_attribute(key, &attr.name, value)?;
        }

        Ok(())
    }

    fn reconcile_to_one(
        &mut self,
        key: ObjectKey,
        model: &EntityModel,
        rel: &RelationModel,
        record: &RawRecord,
        process_to_many: bool,
    ) -> Result<(), InternalError> {
        let nested = match record.get(rel.record_key()) {
            None | Some(JsonValue::Null) => {
                return self.scope.set_to_one(key, &rel.name, None);
            }
            Some(JsonValue::Object(nested)) => nested,
            Some(other) => return self.shape_mismatch(model, rel, "a record", other),
        };

        let destination = self.schema.try_entity(&rel.destination, ErrorOrigin::Reconcile)?;
        let target = if rel.no_identity {
            match self.scope.to_one(key, &rel.name) {
                Some(current) => current,
                None => create_object(
                    self.scope,
                    destination,
                    record_id(nested),
                    record_uuid(nested),
                )?,
            }
        } else if let Some(id) = record_id(nested) {
            self.resolver
                .resolve(self.scope, destination, id, record_uuid(nested))?
        } else {
            return self.scope.set_to_one(key, &rel.name, None);
        };

        self.scope.set_to_one(key, &rel.name, Some(target))?;
        self.reconcile(target, nested, Some(rel), process_to_many)
    }

    fn reconcile_to_many(
        &mut self,
        key: ObjectKey,
        model: &EntityModel,
        rel: &RelationModel,
        record: &RawRecord,
        process_to_many: bool,
    ) -> Result<(), InternalError> {
        let raw = match record.get(rel.record_key()) {
            None | Some(JsonValue::Null) => return Ok(()),
            Some(raw) => raw,
        };
        let Some(elements) = record_array(raw) else {
            return self.shape_mismatch(model, rel, "an array of records", raw);
        };

        let destination = self.schema.try_entity(&rel.destination, ErrorOrigin::Reconcile)?;
        self.scope.clear_to_many(key, &rel.name)?;

        for nested in elements {
            let target = if rel.no_identity {
                create_object(self.scope, destination, record_id(nested), record_uuid(nested))?
            } else if let Some(id) = record_id(nested) {
                self.resolver
                    .resolve(self.scope, destination, id, record_uuid(nested))?
            } else {
                debug!(
                    entity = %model.name,
                    relation = %rel.name,
                    "skipping to-many element without id"
                );
                continue;
            };

            self.scope.add_to_many(key, &rel.name, target)?;
            self.reconcile(target, nested, Some(rel), process_to_many)?;
        }

        Ok(())
    }

    fn shape_mismatch(
        &self,
        model: &EntityModel,
        rel: &RelationModel,
        expected: &str,
        found: &JsonValue,
    ) -> Result<(), InternalError> {
        sink::record(MetricsEvent::ShapeMismatch {
            entity: &model.name,
            relation: &rel.name,
        });

        match self.policy {
            ShapeMismatchPolicy::Skip => {
                warn!(
                    entity = %model.name,
                    relation = %rel.name,
                    expected,
                    found = json_kind(found),
                    "skipping relationship with unexpected payload shape"
                );
                Ok(())
            }
            ShapeMismatchPolicy::Fail => Err(InternalError::reconcile_invariant(format!(
                "relationship '{}.{}' expects {expected}, got {}",
                model.name,
                rel.name,
                json_kind(found)
            ))),
        }
    }
}

const fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "a record",
    }
}

#[cfg(test)]
mod tests;
