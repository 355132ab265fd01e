use crate::{
    error::{ErrorOrigin, InternalError},
    model::{MetadataProvider, RelationModel, Schema},
    store::{ContextId, FetchRequest, ObjectKey, ObjectStore, WriteScope},
    value::Value,
};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

const ROOT: ContextId = ContextId(0);
const MAIN: ContextId = ContextId(1);

///
/// ObjectRow
///

#[derive(Clone, Debug, Default)]
struct ObjectRow {
    entity: String,
    attributes: BTreeMap<String, Value>,
    to_one: BTreeMap<String, ObjectKey>,
    to_many: BTreeMap<String, BTreeSet<ObjectKey>>,
}

///
/// Layer
///
/// Staged rows of one write context. `None` is a tombstone hiding the row
/// in every ancestor layer.
///

#[derive(Debug, Default)]
struct Layer {
    parent: Option<ContextId>,
    rows: BTreeMap<ObjectKey, Option<ObjectRow>>,
}

impl Layer {
    const fn child_of(parent: ContextId) -> Self {
        Self {
            parent: Some(parent),
            rows: BTreeMap::new(),
        }
    }
}

///
/// MemoryStore
///
/// Hierarchical in-memory object store.
///
/// ctx0  → root writer, the durable state
/// ctx1  → main context, child of the root
/// ctxN  → scoped write contexts, children of the main context
///
/// Writes are copy-on-write into the context's own layer; reads walk the
/// parent chain and stop at the first layer that knows the key.
///

#[derive(Debug)]
pub struct MemoryStore {
    schema: Arc<Schema>,
    layers: Vec<Option<Layer>>,
    next_key: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            layers: vec![Some(Layer::default()), Some(Layer::child_of(ROOT))],
            next_key: 1,
        }
    }

    #[must_use]
    pub const fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    #[must_use]
    pub const fn main_context() -> ContextId {
        MAIN
    }

    /// Read-only view of everything saved into the main context.
    #[must_use]
    pub const fn view(&self) -> MemoryView<'_> {
        self.view_at(MAIN)
    }

    #[must_use]
    pub const fn view_at(&self, ctx: ContextId) -> MemoryView<'_> {
        MemoryView { store: self, ctx }
    }

    // ------------------------------------------------------------------
    // Layers
    // ------------------------------------------------------------------

    fn layer(&self, ctx: ContextId) -> Result<&Layer, InternalError> {
        self.layers
            .get(ctx.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| InternalError::store_internal(format!("write context {ctx} is not open")))
    }

    fn layer_mut(&mut self, ctx: ContextId) -> Result<&mut Layer, InternalError> {
        self.layers
            .get_mut(ctx.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| InternalError::store_internal(format!("write context {ctx} is not open")))
    }

    // Layers visible from `ctx`, nearest first.
    fn chain(&self, ctx: ContextId) -> Vec<&Layer> {
        let mut chain = Vec::new();
        let mut current = Some(ctx);

        while let Some(id) = current {
            let Ok(layer) = self.layer(id) else {
                break;
            };
            chain.push(layer);
            current = layer.parent;
        }

        chain
    }

    fn lookup(&self, ctx: ContextId, key: ObjectKey) -> Option<&ObjectRow> {
        self.chain(ctx)
            .into_iter()
            .find_map(|layer| layer.rows.get(&key))
            .and_then(Option::as_ref)
    }

    fn is_live(&self, ctx: ContextId, key: ObjectKey) -> bool {
        self.lookup(ctx, key).is_some()
    }

    fn visible_keys(&self, ctx: ContextId) -> BTreeSet<ObjectKey> {
        let mut keys = BTreeSet::new();
        for layer in self.chain(ctx) {
            keys.extend(layer.rows.keys().copied());
        }
        keys.retain(|key| self.is_live(ctx, *key));

        keys
    }

    // Copy the effective row into `ctx` on first write.
    fn row_mut(&mut self, ctx: ContextId, key: ObjectKey) -> Result<&mut ObjectRow, InternalError> {
        let staged = self
            .layer(ctx)?
            .rows
            .get(&key)
            .is_some_and(Option::is_some);
        if !staged {
            let row = self
                .lookup(ctx, key)
                .cloned()
                .ok_or_else(|| InternalError::store_not_found(key.to_string()))?;
            self.layer_mut(ctx)?.rows.insert(key, Some(row));
        }

        self.layer_mut(ctx)?
            .rows
            .get_mut(&key)
            .and_then(Option::as_mut)
            .ok_or_else(|| InternalError::store_not_found(key.to_string()))
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn fetch_in(
        &self,
        ctx: ContextId,
        request: &FetchRequest,
    ) -> Result<Vec<ObjectKey>, InternalError> {
        self.schema.try_entity(&request.entity, ErrorOrigin::Store)?;

        let mut rows: Vec<(ObjectKey, &ObjectRow)> = self
            .visible_keys(ctx)
            .into_iter()
            .filter_map(|key| self.lookup(ctx, key).map(|row| (key, row)))
            .filter(|(_, row)| self.schema.is_kind_of(&row.entity, &request.entity))
            .filter(|(_, row)| {
                request
                    .predicate
                    .matches(&|name: &str| row.attributes.get(name))
            })
            .collect();

        // stable sort keeps key order as the final tiebreak
        rows.sort_by(|(_, a), (_, b)| {
            request.sort.iter().fold(std::cmp::Ordering::Equal, |ord, sort| {
                ord.then_with(|| {
                    sort.compare(a.attributes.get(&sort.field), b.attributes.get(&sort.field))
                })
            })
        });

        let mut keys: Vec<_> = rows.into_iter().map(|(key, _)| key).collect();
        if let Some(limit) = request.limit {
            keys.truncate(limit);
        }

        Ok(keys)
    }

    fn live_to_one(&self, ctx: ContextId, key: ObjectKey, relation: &str) -> Option<ObjectKey> {
        self.lookup(ctx, key)?
            .to_one
            .get(relation)
            .copied()
            .filter(|target| self.is_live(ctx, *target))
    }

    fn live_to_many(&self, ctx: ContextId, key: ObjectKey, relation: &str) -> Vec<ObjectKey> {
        self.lookup(ctx, key)
            .and_then(|row| row.to_many.get(relation))
            .map(|set| {
                set.iter()
                    .copied()
                    .filter(|target| self.is_live(ctx, *target))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn relation(
        &self,
        ctx: ContextId,
        key: ObjectKey,
        relation: &str,
    ) -> Result<RelationModel, InternalError> {
        let row = self
            .lookup(ctx, key)
            .ok_or_else(|| InternalError::store_not_found(key.to_string()))?;
        let model = self.schema.try_entity(&row.entity, ErrorOrigin::Store)?;

        model.relation(relation).cloned().ok_or_else(|| {
            InternalError::store_invariant(format!(
                "entity '{}' has no relationship '{relation}'",
                row.entity
            ))
        })
    }

    fn check_destination(
        &self,
        ctx: ContextId,
        rel: &RelationModel,
        target: ObjectKey,
    ) -> Result<(), InternalError> {
        let row = self
            .lookup(ctx, target)
            .ok_or_else(|| InternalError::store_not_found(target.to_string()))?;

        if self.schema.is_kind_of(&row.entity, &rel.destination) {
            Ok(())
        } else {
            Err(InternalError::store_invariant(format!(
                "relationship '{}' expects '{}', got '{}' {target}",
                rel.name, rel.destination, row.entity
            )))
        }
    }

    // ------------------------------------------------------------------
    // Inverse maintenance
    // ------------------------------------------------------------------

    // Remove `owner` from the inverse side of `owner.rel → target`.
    fn unlink_inverse(
        &mut self,
        ctx: ContextId,
        rel: &RelationModel,
        owner: ObjectKey,
        target: ObjectKey,
    ) -> Result<(), InternalError> {
        let Some(inverse) = rel.inverse.as_deref() else {
            return Ok(());
        };
        if !self.is_live(ctx, target) {
            return Ok(());
        }

        let inverse_rel = self.relation(ctx, target, inverse)?;
        let row = self.row_mut(ctx, target)?;
        if inverse_rel.is_to_many() {
            if let Some(set) = row.to_many.get_mut(inverse) {
                set.remove(&owner);
            }
        } else if row.to_one.get(inverse) == Some(&owner) {
            row.to_one.remove(inverse);
        }

        Ok(())
    }

    // Point the inverse side of `owner.rel → target` back at `owner`.
    fn link_inverse(
        &mut self,
        ctx: ContextId,
        rel: &RelationModel,
        owner: ObjectKey,
        target: ObjectKey,
    ) -> Result<(), InternalError> {
        let Some(inverse) = rel.inverse.clone() else {
            return Ok(());
        };

        let inverse_rel = self.relation(ctx, target, &inverse)?;
        if inverse_rel.is_to_many() {
            self.row_mut(ctx, target)?
                .to_many
                .entry(inverse)
                .or_default()
                .insert(owner);
            return Ok(());
        }

        // a to-one inverse has exactly one owner: displace the previous one
        if let Some(previous) = self.live_to_one(ctx, target, &inverse)
            && previous != owner
        {
            let row = self.row_mut(ctx, previous)?;
            if row.to_one.get(&rel.name) == Some(&target) {
                row.to_one.remove(&rel.name);
            }
            if let Some(set) = row.to_many.get_mut(&rel.name) {
                set.remove(&target);
            }
        }
        self.row_mut(ctx, target)?.to_one.insert(inverse, owner);

        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn insert_in(&mut self, ctx: ContextId, entity: &str) -> Result<ObjectKey, InternalError> {
        let model = self.schema.try_entity(entity, ErrorOrigin::Store)?;
        if model.is_abstract {
            return Err(InternalError::store_unsupported(format!(
                "cannot instantiate abstract entity '{entity}'"
            )));
        }
        let row = ObjectRow {
            entity: model.name.clone(),
            ..ObjectRow::default()
        };

        let key = ObjectKey(self.next_key);
        self.layer_mut(ctx)?.rows.insert(key, Some(row));
        self.next_key += 1;

        Ok(key)
    }

    fn delete_in(&mut self, ctx: ContextId, key: ObjectKey) -> Result<(), InternalError> {
        let row = self
            .lookup(ctx, key)
            .cloned()
            .ok_or_else(|| InternalError::store_not_found(key.to_string()))?;
        let schema = Arc::clone(&self.schema);
        let model = schema.try_entity(&row.entity, ErrorOrigin::Store)?;

        for (name, target) in &row.to_one {
            if let Some(rel) = model.relation(name) {
                self.unlink_inverse(ctx, rel, key, *target)?;
            }
        }
        for (name, targets) in &row.to_many {
            if let Some(rel) = model.relation(name) {
                for target in targets {
                    self.unlink_inverse(ctx, rel, key, *target)?;
                }
            }
        }

        self.layer_mut(ctx)?.rows.insert(key, None);

        Ok(())
    }

    fn set_attribute_in(
        &mut self,
        ctx: ContextId,
        key: ObjectKey,
        name: &str,
        value: Value,
    ) -> Result<(), InternalError> {
        let schema = Arc::clone(&self.schema);
        let row = self.row_mut(ctx, key)?;
        let model = schema.try_entity(&row.entity, ErrorOrigin::Store)?;
        if !model.has_attribute(name) {
            return Err(InternalError::store_invariant(format!(
                "entity '{}' has no attribute '{name}'",
                row.entity
            )));
        }
        row.attributes.insert(name.to_string(), value);

        Ok(())
    }

    fn set_to_one_in(
        &mut self,
        ctx: ContextId,
        key: ObjectKey,
        relation: &str,
        target: Option<ObjectKey>,
    ) -> Result<(), InternalError> {
        let rel = self.relation(ctx, key, relation)?;
        if rel.is_to_many() {
            return Err(InternalError::store_invariant(format!(
                "relationship '{relation}' is to-many"
            )));
        }
        if let Some(target) = target {
            self.check_destination(ctx, &rel, target)?;
        }

        let current = self.live_to_one(ctx, key, relation);
        if current == target {
            return Ok(());
        }
        if let Some(old) = current {
            self.unlink_inverse(ctx, &rel, key, old)?;
        }

        let row = self.row_mut(ctx, key)?;
        match target {
            Some(target) => {
                row.to_one.insert(rel.name.clone(), target);
                self.link_inverse(ctx, &rel, key, target)?;
            }
            None => {
                row.to_one.remove(&rel.name);
            }
        }

        Ok(())
    }

    fn clear_to_many_in(
        &mut self,
        ctx: ContextId,
        key: ObjectKey,
        relation: &str,
    ) -> Result<(), InternalError> {
        let rel = self.relation(ctx, key, relation)?;
        if !rel.is_to_many() {
            return Err(InternalError::store_invariant(format!(
                "relationship '{relation}' is to-one"
            )));
        }

        for member in self.live_to_many(ctx, key, relation) {
            self.unlink_inverse(ctx, &rel, key, member)?;
        }
        self.row_mut(ctx, key)?.to_many.remove(relation);

        Ok(())
    }

    fn add_to_many_in(
        &mut self,
        ctx: ContextId,
        key: ObjectKey,
        relation: &str,
        target: ObjectKey,
    ) -> Result<(), InternalError> {
        let rel = self.relation(ctx, key, relation)?;
        if !rel.is_to_many() {
            return Err(InternalError::store_invariant(format!(
                "relationship '{relation}' is to-one"
            )));
        }
        self.check_destination(ctx, &rel, target)?;

        let inserted = self
            .row_mut(ctx, key)?
            .to_many
            .entry(rel.name.clone())
            .or_default()
            .insert(target);
        if inserted {
            self.link_inverse(ctx, &rel, key, target)?;
        }

        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    type Scope<'s> = MemoryScope<'s>;

    fn new_scoped_write_context(&mut self) -> Result<ContextId, InternalError> {
        self.layer(MAIN)?;
        let layer = Some(Layer::child_of(MAIN));

        // reuse a slot released by `discard` before growing
        if let Some(index) = self
            .layers
            .iter()
            .skip(MAIN.0 + 1)
            .position(Option::is_none)
        {
            let index = index + MAIN.0 + 1;
            self.layers[index] = layer;
            return Ok(ContextId(index));
        }

        self.layers.push(layer);

        Ok(ContextId(self.layers.len() - 1))
    }

    fn scope(&mut self, ctx: ContextId) -> Result<MemoryScope<'_>, InternalError> {
        self.layer(ctx)?;

        Ok(MemoryScope { store: self, ctx })
    }

    fn has_pending_changes(&self, ctx: ContextId) -> bool {
        self.layer(ctx).is_ok_and(|layer| !layer.rows.is_empty())
    }

    fn save(&mut self, ctx: ContextId) -> Result<(), InternalError> {
        let mut current = ctx;

        while let Some(parent) = self.layer(current)?.parent {
            let rows = std::mem::take(&mut self.layer_mut(current)?.rows);
            let target = self.layer_mut(parent)?;
            let is_root = target.parent.is_none();

            for (key, slot) in rows {
                match slot {
                    // nothing below the root can still see a deleted row
                    None if is_root => {
                        target.rows.remove(&key);
                    }
                    slot => {
                        target.rows.insert(key, slot);
                    }
                }
            }
            current = parent;
        }

        Ok(())
    }

    fn discard(&mut self, ctx: ContextId) {
        if ctx == ROOT || ctx == MAIN {
            if let Ok(layer) = self.layer_mut(ctx) {
                layer.rows.clear();
            }
        } else if let Some(slot) = self.layers.get_mut(ctx.0) {
            *slot = None;
        }
    }

    fn reset(&mut self) {
        for layer in self.layers.iter_mut().flatten() {
            layer.rows.clear();
        }
    }
}

///
/// MemoryScope
///

pub struct MemoryScope<'s> {
    store: &'s mut MemoryStore,
    ctx: ContextId,
}

impl MemoryScope<'_> {
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.ctx
    }
}

impl WriteScope for MemoryScope<'_> {
    fn insert_new(&mut self, entity: &str) -> Result<ObjectKey, InternalError> {
        self.store.insert_in(self.ctx, entity)
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<ObjectKey>, InternalError> {
        self.store.fetch_in(self.ctx, request)
    }

    fn delete(&mut self, key: ObjectKey) -> Result<(), InternalError> {
        self.store.delete_in(self.ctx, key)
    }

    fn has_pending_changes(&self) -> bool {
        self.store.has_pending_changes(self.ctx)
    }

    fn entity_name(&self, key: ObjectKey) -> Option<&str> {
        self.store
            .lookup(self.ctx, key)
            .map(|row| row.entity.as_str())
    }

    fn attribute(&self, key: ObjectKey, name: &str) -> Option<&Value> {
        self.store.lookup(self.ctx, key)?.attributes.get(name)
    }

    fn set_attribute(
        &mut self,
        key: ObjectKey,
        name: &str,
        value: Value,
    ) -> Result<(), InternalError> {
        self.store.set_attribute_in(self.ctx, key, name, value)
    }

    fn to_one(&self, key: ObjectKey, relation: &str) -> Option<ObjectKey> {
        self.store.live_to_one(self.ctx, key, relation)
    }

    fn set_to_one(
        &mut self,
        key: ObjectKey,
        relation: &str,
        target: Option<ObjectKey>,
    ) -> Result<(), InternalError> {
        self.store.set_to_one_in(self.ctx, key, relation, target)
    }

    fn to_many(&self, key: ObjectKey, relation: &str) -> Vec<ObjectKey> {
        self.store.live_to_many(self.ctx, key, relation)
    }

    fn clear_to_many(&mut self, key: ObjectKey, relation: &str) -> Result<(), InternalError> {
        self.store.clear_to_many_in(self.ctx, key, relation)
    }

    fn add_to_many(
        &mut self,
        key: ObjectKey,
        relation: &str,
        target: ObjectKey,
    ) -> Result<(), InternalError> {
        self.store.add_to_many_in(self.ctx, key, relation, target)
    }
}

///
/// MemoryView
/// Read-only access to the objects visible from one context.
///

#[derive(Clone, Copy)]
pub struct MemoryView<'s> {
    store: &'s MemoryStore,
    ctx: ContextId,
}

impl<'s> MemoryView<'s> {
    pub fn fetch(&self, request: &FetchRequest) -> Result<Vec<ObjectKey>, InternalError> {
        self.store.fetch_in(self.ctx, request)
    }

    /// Every live object of `entity` (sub-entities included), in key order.
    pub fn all(&self, entity: &str) -> Result<Vec<ObjectKey>, InternalError> {
        self.fetch(&FetchRequest::new(entity))
    }

    #[must_use]
    pub fn entity_name(&self, key: ObjectKey) -> Option<&'s str> {
        self.store
            .lookup(self.ctx, key)
            .map(|row| row.entity.as_str())
    }

    #[must_use]
    pub fn attribute(&self, key: ObjectKey, name: &str) -> Option<&'s Value> {
        self.store.lookup(self.ctx, key)?.attributes.get(name)
    }

    #[must_use]
    pub fn to_one(&self, key: ObjectKey, relation: &str) -> Option<ObjectKey> {
        self.store.live_to_one(self.ctx, key, relation)
    }

    #[must_use]
    pub fn to_many(&self, key: ObjectKey, relation: &str) -> Vec<ObjectKey> {
        self.store.live_to_many(self.ctx, key, relation)
    }

    /// Owned, serializable copy of one live object with dead edges dropped.
    #[must_use]
    pub fn snapshot(&self, key: ObjectKey) -> Option<ObjectSnapshot> {
        let row = self.store.lookup(self.ctx, key)?;

        Some(ObjectSnapshot {
            key,
            entity: row.entity.clone(),
            attributes: row.attributes.clone(),
            to_one: row
                .to_one
                .keys()
                .filter_map(|name| Some((name.clone(), self.to_one(key, name)?)))
                .collect(),
            to_many: row
                .to_many
                .keys()
                .map(|name| (name.clone(), self.to_many(key, name)))
                .collect(),
        })
    }
}

///
/// ObjectSnapshot
///

#[derive(Clone, Debug, Serialize)]
pub struct ObjectSnapshot {
    pub key: ObjectKey,
    pub entity: String,
    pub attributes: BTreeMap<String, Value>,
    pub to_one: BTreeMap<String, ObjectKey>,
    pub to_many: BTreeMap<String, Vec<ObjectKey>>,
}
