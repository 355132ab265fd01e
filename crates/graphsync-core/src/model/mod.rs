//! Runtime entity metadata.
//!
//! This is the metadata provider the reconciler queries: per entity type, the
//! declared attributes (name, external-name override, scalar kind) and
//! relationships (cardinality, destination, inverse, processing flags).
//!
//! In general:
//! - configuration or code declares *what exists* (`EntityDef`)
//! - `Schema` resolves inheritance and validates the graph once at startup
//! - the engine only reads through `MetadataProvider`
mod entity;
mod field;
mod relation;
mod schema;

pub use entity::{EntityDef, EntityModel};
pub use field::{AttributeModel, ScalarKind};
pub use relation::{Cardinality, RelationModel};
pub use schema::{MetadataProvider, Schema, SchemaBuilder, SchemaError};
