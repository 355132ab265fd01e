//! Store collaborator contract.
//!
//! The reconciliation engine never owns persistence. It drives an
//! `ObjectStore` through scoped write contexts and mutates objects only via
//! the `WriteScope` of the context it was handed.

mod memory;


use crate::{ID_FIELD, UUID_FIELD, error::InternalError, value::Value};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// re-exports
pub use memory::{MemoryScope, MemoryStore, MemoryView, ObjectSnapshot};

///
/// ObjectKey
///
/// Opaque handle of one stored object. Stable for the object's lifetime
/// and never reused after deletion.
///

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[display("#{_0}")]
pub struct ObjectKey(pub u64);

///
/// ContextId
/// Handle of one write context in a store's context hierarchy.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[display("ctx{_0}")]
pub struct ContextId(pub usize);

///
/// FetchPredicate
///

#[derive(Clone, Debug, PartialEq)]
pub enum FetchPredicate {
    All,
    /// `id` attribute holds a nonzero integer.
    NonZeroId,
    /// `disabled` attribute is not `true`.
    Enabled,
    IdEquals(i64),
    UuidEquals(String),
    And(Vec<Self>),
}

impl FetchPredicate {
    /// Evaluate against one object's attribute accessor.
    pub fn matches<'a>(&self, attribute: &impl Fn(&str) -> Option<&'a Value>) -> bool {
        match self {
            Self::All => true,
            Self::NonZeroId => attribute(ID_FIELD)
                .and_then(Value::as_int)
                .is_some_and(|id| id != 0),
            Self::Enabled => attribute(crate::DISABLED_FIELD).and_then(Value::as_bool) != Some(true),
            Self::IdEquals(id) => attribute(ID_FIELD).and_then(Value::as_int) == Some(*id),
            Self::UuidEquals(uuid) => {
                attribute(UUID_FIELD).and_then(Value::as_text) == Some(uuid.as_str())
            }
            Self::And(all) => all.iter().all(|p| p.matches(attribute)),
        }
    }
}

///
/// SortDescriptor
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SortDescriptor {
    pub field: String,
    pub ascending: bool,
}

impl SortDescriptor {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }

    /// Compare two optional attribute values under this descriptor.
    #[must_use]
    pub fn compare(&self, a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let ord = match (a, b) {
            (Some(a), Some(b)) => a.cmp_for_sort(b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        if self.ascending { ord } else { ord.reverse() }
    }
}

///
/// FetchRequest
///
/// Query for every live object of `entity` (sub-entities included) matching
/// `predicate`. Results are ordered by object key unless `sort` says
/// otherwise.
///

#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: FetchPredicate,
    pub sort: Vec<SortDescriptor>,
    pub limit: Option<usize>,
}

impl FetchRequest {
    #[must_use]
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: FetchPredicate::All,
            sort: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn predicate(mut self, predicate: FetchPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    #[must_use]
    pub fn sort_by(mut self, sort: SortDescriptor) -> Self {
        self.sort.push(sort);
        self
    }

    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

///
/// WriteScope
///
/// Operations available inside one scoped write context. Every mutation is
/// staged in the context and becomes durable only through
/// [`ObjectStore::save`].
///

pub trait WriteScope {
    /// Create an empty object of a concrete entity type.
    fn insert_new(&mut self, entity: &str) -> Result<ObjectKey, InternalError>;

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<ObjectKey>, InternalError>;

    /// Delete one object, nullifying inverse edges that point at it.
    fn delete(&mut self, key: ObjectKey) -> Result<(), InternalError>;

    fn has_pending_changes(&self) -> bool;

    /// Concrete entity type of a live object.
    fn entity_name(&self, key: ObjectKey) -> Option<&str>;

    fn attribute(&self, key: ObjectKey, name: &str) -> Option<&Value>;

    fn set_attribute(
        &mut self,
        key: ObjectKey,
        name: &str,
        value: Value,
    ) -> Result<(), InternalError>;

    fn to_one(&self, key: ObjectKey, relation: &str) -> Option<ObjectKey>;

    /// Replace (or clear) a to-one relationship, maintaining its inverse.
    fn set_to_one(
        &mut self,
        key: ObjectKey,
        relation: &str,
        target: Option<ObjectKey>,
    ) -> Result<(), InternalError>;

    fn to_many(&self, key: ObjectKey, relation: &str) -> Vec<ObjectKey>;

    fn clear_to_many(&mut self, key: ObjectKey, relation: &str) -> Result<(), InternalError>;

    fn add_to_many(
        &mut self,
        key: ObjectKey,
        relation: &str,
        target: ObjectKey,
    ) -> Result<(), InternalError>;
}

///
/// ObjectStore
///
/// Lifecycle of the persistent store: a root writer, a main context, and
/// scoped write contexts hanging off the main context.
///

pub trait ObjectStore {
    type Scope<'s>: WriteScope
    where
        Self: 's;

    /// Open a fresh child write context.
    fn new_scoped_write_context(&mut self) -> Result<ContextId, InternalError>;

    /// Borrow the write operations of one context.
    fn scope(&mut self, ctx: ContextId) -> Result<Self::Scope<'_>, InternalError>;

    fn has_pending_changes(&self, ctx: ContextId) -> bool;

    /// Commit `ctx` into its parent and propagate up to the root.
    fn save(&mut self, ctx: ContextId) -> Result<(), InternalError>;

    /// Drop every uncommitted change of `ctx` and release it.
    fn discard(&mut self, ctx: ContextId);

    /// Drop all stored content at every level.
    fn reset(&mut self);
}

/// Look up the single object of `entity` (or a sub-entity) with `id`.
pub fn fetch_by_id(
    scope: &dyn WriteScope,
    entity: &str,
    id: i64,
) -> Result<Option<ObjectKey>, InternalError> {
    let request = FetchRequest::new(entity)
        .predicate(FetchPredicate::IdEquals(id))
        .limit(1);

    Ok(scope.fetch(&request)?.into_iter().next())
}

/// Look up the single object of `entity` (or a sub-entity) with `uuid`.
pub fn fetch_by_uuid(
    scope: &dyn WriteScope,
    entity: &str,
    uuid: &str,
) -> Result<Option<ObjectKey>, InternalError> {
    let request = FetchRequest::new(entity)
        .predicate(FetchPredicate::UuidEquals(uuid.to_string()))
        .limit(1);

    Ok(scope.fetch(&request)?.into_iter().next())
}
