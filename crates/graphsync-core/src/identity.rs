//! Per-pass identity index: entity type → (external id → object).

use crate::{
    ID_FIELD, UUID_FIELD,
    error::InternalError,
    model::EntityModel,
    obs::sink::{self, MetricsEvent},
    store::{FetchPredicate, FetchRequest, ObjectKey, WriteScope},
    value::Value,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

///
/// IdentityResolver
///
/// Get-or-create by stable identity within one reconciliation pass.
/// Implementations are owned by exactly one pass and never shared.
///

pub trait IdentityResolver {
    /// Return the object of `entity` with external id `id`, creating it in
    /// `scope` if none is known. Zero ids are never deduplicated.
    fn resolve(
        &mut self,
        scope: &mut dyn WriteScope,
        entity: &EntityModel,
        id: i64,
        uuid: Option<&str>,
    ) -> Result<ObjectKey, InternalError>;

    /// All cached objects of `entity`, ordered by external id.
    fn all_of(
        &mut self,
        scope: &dyn WriteScope,
        entity: &EntityModel,
    ) -> Result<Vec<ObjectKey>, InternalError>;

    /// External ids cached for `entity`.
    fn all_identities_of(
        &mut self,
        scope: &dyn WriteScope,
        entity: &EntityModel,
    ) -> Result<BTreeSet<i64>, InternalError>;

    /// Forget a deleted object under every type it was cached as.
    fn evict(&mut self, key: ObjectKey);

    /// Drop every cached entry. Storage is untouched.
    fn reset(&mut self);
}

///
/// IdentityCache
///
/// Lazily filled per entity type on first access: every stored object of
/// the type (sub-entities included) with a nonzero id is indexed. Objects
/// created during the pass are added as they are made.
///

#[derive(Debug, Default)]
pub struct IdentityCache {
    objects: HashMap<String, BTreeMap<i64, ObjectKey>>,
}

impl IdentityCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entity types loaded so far.
    #[must_use]
    pub fn loaded_types(&self) -> usize {
        self.objects.len()
    }

    fn loaded(
        &mut self,
        scope: &dyn WriteScope,
        entity: &str,
    ) -> Result<&mut BTreeMap<i64, ObjectKey>, InternalError> {
        if !self.objects.contains_key(entity) {
            let index = load(scope, entity)?;
            self.objects.insert(entity.to_string(), index);
        }

        self.objects.get_mut(entity).ok_or_else(|| {
            InternalError::identity_internal(format!("identity index for '{entity}' vanished"))
        })
    }
}

fn load(scope: &dyn WriteScope, entity: &str) -> Result<BTreeMap<i64, ObjectKey>, InternalError> {
    let request = FetchRequest::new(entity).predicate(FetchPredicate::NonZeroId);
    let keys = scope.fetch(&request)?;

    let mut index = BTreeMap::new();
    for key in keys {
        if let Some(id) = scope.attribute(key, ID_FIELD).and_then(Value::as_int) {
            // duplicates already in storage: the oldest object wins
            index.entry(id).or_insert(key);
        }
    }

    debug!(entity, rows = index.len(), "identity cache loaded");
    sink::record(MetricsEvent::CacheLoad {
        entity,
        rows: index.len() as u64,
    });

    Ok(index)
}

/// Create a fresh object of `entity` with the given identity.
///
/// `uuid` is taken from the record when present, otherwise generated.
/// Entities that declare neither identity attribute are created bare.
pub fn create_object(
    scope: &mut dyn WriteScope,
    entity: &EntityModel,
    id: Option<i64>,
    uuid: Option<&str>,
) -> Result<ObjectKey, InternalError> {
    let key = scope.insert_new(&entity.name)?;

    if entity.has_attribute(UUID_FIELD) {
        let uuid = uuid.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        scope.set_attribute(key, UUID_FIELD, Value::Text(uuid))?;
    }
    if let Some(id) = id
        && entity.has_attribute(ID_FIELD)
    {
        scope.set_attribute(key, ID_FIELD, Value::Int(id))?;
    }

    sink::record(MetricsEvent::EntityCreated {
        entity: &entity.name,
    });

    Ok(key)
}

impl IdentityResolver for IdentityCache {
    fn resolve(
        &mut self,
        scope: &mut dyn WriteScope,
        entity: &EntityModel,
        id: i64,
        uuid: Option<&str>,
    ) -> Result<ObjectKey, InternalError> {
        if id == 0 {
            return create_object(scope, entity, Some(id), uuid);
        }

        if let Some(key) = self.loaded(scope, &entity.name)?.get(&id) {
            return Ok(*key);
        }

        let key = create_object(scope, entity, Some(id), uuid)?;
        self.loaded(scope, &entity.name)?.insert(id, key);

        Ok(key)
    }

    fn all_of(
        &mut self,
        scope: &dyn WriteScope,
        entity: &EntityModel,
    ) -> Result<Vec<ObjectKey>, InternalError> {
        Ok(self.loaded(scope, &entity.name)?.values().copied().collect())
    }

    fn all_identities_of(
        &mut self,
        scope: &dyn WriteScope,
        entity: &EntityModel,
    ) -> Result<BTreeSet<i64>, InternalError> {
        Ok(self.loaded(scope, &entity.name)?.keys().copied().collect())
    }

    fn evict(&mut self, key: ObjectKey) {
        for index in self.objects.values_mut() {
            index.retain(|_, cached| *cached != key);
        }
    }

    fn reset(&mut self) {
        self.objects.clear();

        debug!("identity cache reset");
        sink::record(MetricsEvent::CacheReset);
    }
}
