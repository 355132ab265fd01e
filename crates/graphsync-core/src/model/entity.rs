use crate::model::{AttributeModel, RelationModel};

///
/// EntityDef
///
/// Declared shape of one entity type before inheritance is resolved.
/// Only the fields introduced by this type are listed here.
///

#[derive(Clone, Debug, Default)]
pub struct EntityDef {
    pub name: String,
    pub parent: Option<String>,
    pub is_abstract: bool,
    pub attributes: Vec<AttributeModel>,
    pub relations: Vec<RelationModel>,
}

impl EntityDef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub const fn abstract_entity(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn attribute(mut self, attribute: AttributeModel) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn attributes(mut self, attributes: impl IntoIterator<Item = AttributeModel>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationModel) -> Self {
        self.relations.push(relation);
        self
    }
}

///
/// EntityModel
/// Resolved runtime model for one entity type.
///

#[derive(Clone, Debug)]
pub struct EntityModel {
    /// Stable type name used in payloads and for dispatch.
    pub name: String,
    /// Direct parent type, if this is a sub-entity.
    pub parent: Option<String>,
    /// Abstract types cannot be instantiated, only fetched through.
    pub is_abstract: bool,
    /// Inherited attributes first, then this type's own.
    pub attributes: Vec<AttributeModel>,
    /// Inherited relationships first, then this type's own.
    pub relations: Vec<RelationModel>,
}

impl EntityModel {
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeModel> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&RelationModel> {
        self.relations.iter().find(|rel| rel.name == name)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attribute(name).is_some()
    }
}
