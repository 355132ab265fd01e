use crate::{
    error::{ErrorOrigin, InternalError},
    model::{EntityDef, EntityModel},
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error as ThisError;

///
/// MetadataProvider
///
/// Read-only metadata capability the reconciliation engine depends on.
///

pub trait MetadataProvider {
    /// Look up one entity type by name.
    fn entity(&self, name: &str) -> Option<&EntityModel>;

    /// True when `entity` is `ancestor` or inherits from it.
    fn is_kind_of(&self, entity: &str, ancestor: &str) -> bool;

    /// Look up one entity type, failing with an unrecoverable error.
    fn try_entity(&self, name: &str, origin: ErrorOrigin) -> Result<&EntityModel, InternalError> {
        self.entity(name)
            .ok_or_else(|| InternalError::unknown_entity(origin, name))
    }
}

///
/// SchemaError
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum SchemaError {
    #[error("entity '{0}' declared more than once")]
    DuplicateEntity(String),

    #[error("entity '{entity}' declares field '{field}' more than once (including inherited fields)")]
    DuplicateField { entity: String, field: String },

    #[error("entity '{entity}' inherits from unknown entity '{parent}'")]
    UnknownParent { entity: String, parent: String },

    #[error("entity '{0}' is part of an inheritance cycle")]
    InheritanceCycle(String),

    #[error("relationship '{entity}.{relation}' targets unknown entity '{destination}'")]
    UnknownDestination {
        entity: String,
        relation: String,
        destination: String,
    },

    #[error("relationship '{entity}.{relation}' names inverse '{inverse}' which '{destination}' does not declare")]
    UnknownInverse {
        entity: String,
        relation: String,
        destination: String,
        inverse: String,
    },

    #[error("relationship '{entity}.{relation}' names inverse '{destination}.{inverse}' which does not point back")]
    InverseMismatch {
        entity: String,
        relation: String,
        destination: String,
        inverse: String,
    },
}

///
/// Schema
///
/// Explicit registry of entity types, resolved once at process start.
/// Replaces runtime class-name dispatch: every type name the engine sees
/// must be registered here.
///

#[derive(Clone, Debug, Default)]
pub struct Schema {
    entities: BTreeMap<String, EntityModel>,
}

impl Schema {
    #[must_use]
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Iterate registered entity types in name order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl MetadataProvider for Schema {
    fn entity(&self, name: &str) -> Option<&EntityModel> {
        self.entities.get(name)
    }

    fn is_kind_of(&self, entity: &str, ancestor: &str) -> bool {
        let mut current = Some(entity);

        // build() rejects cycles, so the chain always terminates
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .entities
                .get(name)
                .and_then(|model| model.parent.as_deref());
        }

        false
    }
}

///
/// SchemaBuilder
///

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    defs: Vec<EntityDef>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entity(mut self, def: EntityDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn push(&mut self, def: EntityDef) {
        self.defs.push(def);
    }

    /// Resolve inheritance and validate the relationship graph.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut defs = BTreeMap::new();
        for def in self.defs {
            if defs.contains_key(&def.name) {
                return Err(SchemaError::DuplicateEntity(def.name));
            }
            defs.insert(def.name.clone(), def);
        }

        // Phase 1: parents exist and chains terminate.
        for def in defs.values() {
            ancestry(&defs, def)?;
        }

        // Phase 2: flatten inherited fields, root-most ancestor first.
        let mut entities = BTreeMap::new();
        for def in defs.values() {
            let model = resolve(&defs, def)?;
            entities.insert(model.name.clone(), model);
        }
        let schema = Schema { entities };

        // Phase 3: destinations and inverses, checked on declared fields only.
        for def in defs.values() {
            for rel in &def.relations {
                let Some(destination) = schema.entity(&rel.destination) else {
                    return Err(SchemaError::UnknownDestination {
                        entity: def.name.clone(),
                        relation: rel.name.clone(),
                        destination: rel.destination.clone(),
                    });
                };

                let Some(inverse) = rel.inverse.as_deref() else {
                    continue;
                };
                let Some(inverse_rel) = destination.relation(inverse) else {
                    return Err(SchemaError::UnknownInverse {
                        entity: def.name.clone(),
                        relation: rel.name.clone(),
                        destination: rel.destination.clone(),
                        inverse: inverse.to_string(),
                    });
                };

                let points_back = schema.is_kind_of(&def.name, &inverse_rel.destination)
                    || schema.is_kind_of(&inverse_rel.destination, &def.name);
                if !points_back {
                    return Err(SchemaError::InverseMismatch {
                        entity: def.name.clone(),
                        relation: rel.name.clone(),
                        destination: rel.destination.clone(),
                        inverse: inverse.to_string(),
                    });
                }
            }
        }

        Ok(schema)
    }
}

// Ordered ancestor chain of `def`, root-most first, `def` itself last.
fn ancestry<'a>(
    defs: &'a BTreeMap<String, EntityDef>,
    def: &'a EntityDef,
) -> Result<Vec<&'a EntityDef>, SchemaError> {
    let mut chain = vec![def];
    let mut seen = BTreeSet::from([def.name.as_str()]);
    let mut current = def;

    while let Some(parent) = current.parent.as_deref() {
        let Some(parent_def) = defs.get(parent) else {
            return Err(SchemaError::UnknownParent {
                entity: current.name.clone(),
                parent: parent.to_string(),
            });
        };
        if !seen.insert(parent_def.name.as_str()) {
            return Err(SchemaError::InheritanceCycle(def.name.clone()));
        }
        chain.push(parent_def);
        current = parent_def;
    }

    chain.reverse();
    Ok(chain)
}

fn resolve(
    defs: &BTreeMap<String, EntityDef>,
    def: &EntityDef,
) -> Result<EntityModel, SchemaError> {
    let mut attributes = Vec::new();
    let mut relations = Vec::new();
    let mut names = BTreeSet::new();

    for ancestor in ancestry(defs, def)? {
        let fields = ancestor
            .attributes
            .iter()
            .map(|attr| attr.name.as_str())
            .chain(ancestor.relations.iter().map(|rel| rel.name.as_str()));
        for field in fields {
            if !names.insert(field.to_string()) {
                return Err(SchemaError::DuplicateField {
                    entity: def.name.clone(),
                    field: field.to_string(),
                });
            }
        }

        attributes.extend(ancestor.attributes.iter().cloned());
        relations.extend(ancestor.relations.iter().cloned());
    }

    Ok(EntityModel {
        name: def.name.clone(),
        parent: def.parent.clone(),
        is_abstract: def.is_abstract,
        attributes,
        relations,
    })
}
