use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// Cardinality
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum Cardinality {
    #[default]
    ToOne,
    ToMany,
}

///
/// RelationModel
///
/// Runtime metadata for one relationship of an entity.
///
/// `ignore` marks back-edges that only exist to satisfy the store's inverse
/// requirement and never arrive in payloads. `no_identity` marks targets
/// without a stable external id: they are reused from the field or created
/// fresh instead of being looked up by id.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationModel {
    pub name: String,
    pub cardinality: Cardinality,
    /// Declared destination entity type (may be an abstract parent).
    pub destination: String,
    /// Name of the reciprocal relationship declared on `destination`.
    pub inverse: Option<String>,
    pub ignore: bool,
    pub no_identity: bool,
    pub external_name: Option<String>,
}

impl RelationModel {
    fn new(name: impl Into<String>, cardinality: Cardinality, destination: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality,
            destination: destination.into(),
            inverse: None,
            ignore: false,
            no_identity: false,
            external_name: None,
        }
    }

    #[must_use]
    pub fn to_one(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(name, Cardinality::ToOne, destination)
    }

    #[must_use]
    pub fn to_many(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(name, Cardinality::ToMany, destination)
    }

    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    #[must_use]
    pub const fn ignored(mut self) -> Self {
        self.ignore = true;
        self
    }

    #[must_use]
    pub const fn without_identity(mut self) -> Self {
        self.no_identity = true;
        self
    }

    #[must_use]
    pub fn external_name(mut self, external_name: impl Into<String>) -> Self {
        self.external_name = Some(external_name.into());
        self
    }

    #[must_use]
    pub const fn is_to_many(&self) -> bool {
        matches!(self.cardinality, Cardinality::ToMany)
    }

    /// Record key this relationship is read from.
    #[must_use]
    pub fn record_key(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }

    /// True when `other` is the edge we would walk back along after
    /// descending through `self`.
    #[must_use]
    pub fn is_inverse_of(&self, other: &Self) -> bool {
        other.inverse.as_deref() == Some(self.name.as_str())
    }
}
