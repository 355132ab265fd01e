//! Core runtime for graphsync: entity metadata, scalar values, the store
//! collaborator contract, and the reconciliation engine that folds remote
//! record payloads into a relationally-linked object store.
//!
//! Data flows leaves-first:
//! - `snapshot` splits a combined payload per entity type,
//! - `batch` drives one type's records inside one scoped write context,
//! - `reconcile` copies attributes and walks relationships,
//! - `identity` keeps the per-pass id → object index.
#![warn(unreachable_pub)]

pub mod batch;
pub mod error;
pub mod identity;
pub mod model;
pub mod obs;
pub mod reconcile;
pub mod record;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Attribute and record key holding the authority-assigned numeric identity.
/// Zero means the object has not been synced yet.
pub const ID_FIELD: &str = "id";

/// Attribute and record key holding the locally stable string identity.
pub const UUID_FIELD: &str = "uuid";

/// Record key marking a soft-deleted / filtered record.
pub const DISABLED_FIELD: &str = "disabled";

/// Record key marking a stub pointer whose fields must not be copied.
pub const REFERENCE_ONLY_FIELD: &str = "referenceOnly";

/// Top-level key of a single-type batch payload.
pub const DATA_KEY: &str = "data";

/// Top-level key of a combined snapshot payload.
pub const ENTITIES_KEY: &str = "entities";

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, stores, or processors are re-exported here.
///

pub mod prelude {
    pub use crate::{
        model::{
            AttributeModel, Cardinality, EntityModel, MetadataProvider, RelationModel, ScalarKind,
        },
        record::RawRecord,
        store::ObjectKey,
        value::Value,
    };
}
