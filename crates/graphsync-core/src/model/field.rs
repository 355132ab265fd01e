use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// AttributeModel
/// Runtime metadata for one scalar attribute of an entity.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttributeModel {
    /// Attribute name on the stored object.
    pub name: String,
    /// Declared scalar kind; drives raw value coercion.
    pub kind: ScalarKind,
    /// Record key to read instead of `name`, when the remote payload uses
    /// a different spelling.
    pub external_name: Option<String>,
}

impl AttributeModel {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            external_name: None,
        }
    }

    #[must_use]
    pub fn external_name(mut self, external_name: impl Into<String>) -> Self {
        self.external_name = Some(external_name.into());
        self
    }

    /// Record key this attribute is read from.
    #[must_use]
    pub fn record_key(&self) -> &str {
        self.external_name.as_deref().unwrap_or(&self.name)
    }
}

///
/// ScalarKind
///
/// Declared storage kind of an attribute. Integer width variants all
/// coerce to the same 64-bit runtime value.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[remain::sorted]
pub enum ScalarKind {
    Binary,
    Boolean,
    Date,
    Decimal,
    Double,
    Float,
    Int16,
    Int32,
    Int64,
    String,
    Transformable,
    Undefined,
}

impl ScalarKind {
    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::Int16 | Self::Int32 | Self::Int64)
    }
}
