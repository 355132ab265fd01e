//! TOML configuration for graphsync: the entity schema table and the
//! mapper options, parsed once at process start.

mod error;


pub use error::ConfigError;

use graphsync_core::{
    model::{AttributeModel, EntityDef, RelationModel, ScalarKind, Schema, SchemaBuilder},
    reconcile::{MapperOptions, ShapeMismatchPolicy},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};
use tracing::debug;

///
/// GraphsyncConfig
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GraphsyncConfig {
    #[serde(default)]
    pub mapper: MapperSection,

    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityConfig>,
}

impl GraphsyncConfig {
    /// Resolve the entity table into a validated schema registry.
    pub fn build_schema(&self) -> Result<Schema, ConfigError> {
        let mut builder = SchemaBuilder::new();
        for entity in &self.entities {
            builder.push(entity.to_def());
        }

        Ok(builder.build()?)
    }

    #[must_use]
    pub fn mapper_options(&self) -> MapperOptions {
        MapperOptions {
            shape_mismatch: self.mapper.shape_mismatch,
        }
    }

    /// Entity types a snapshot should process, in processing order.
    #[must_use]
    pub fn snapshot_order(&self) -> &[String] {
        &self.mapper.snapshot_order
    }

    // snapshot order may only name declared entity types
    fn validate(&self) -> Result<(), ConfigError> {
        for ty in &self.mapper.snapshot_order {
            if !self.entities.iter().any(|entity| &entity.name == ty) {
                return Err(ConfigError::UnknownSnapshotType(ty.clone()));
            }
        }

        Ok(())
    }
}

///
/// MapperSection
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapperSection {
    pub shape_mismatch: ShapeMismatchPolicy,
    pub snapshot_order: Vec<String>,
}

///
/// EntityConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    pub name: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,

    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeConfig>,

    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipConfig>,
}

impl EntityConfig {
    fn to_def(&self) -> EntityDef {
        let mut def = EntityDef::new(&self.name);
        if let Some(parent) = &self.parent {
            def = def.parent(parent);
        }
        if self.is_abstract {
            def = def.abstract_entity();
        }

        let attributes = self
            .attributes
            .iter()
            .map(|(name, attribute)| attribute.to_model(name));
        let def = def.attributes(attributes);

        self.relationships
            .iter()
            .fold(def, |def, (name, relation)| def.relation(relation.to_model(name)))
    }
}

///
/// AttributeConfig
///
/// Either the bare kind (`name = "string"`) or the long form
/// (`created = { kind = "date", external_name = "createdOn" }`).
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeConfig {
    Kind(ScalarKind),
    Detailed {
        kind: ScalarKind,
        #[serde(default)]
        external_name: Option<String>,
    },
}

impl AttributeConfig {
    #[must_use]
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::Kind(kind) | Self::Detailed { kind, .. } => *kind,
        }
    }

    fn to_model(&self, name: &str) -> AttributeModel {
        let model = AttributeModel::new(name, self.kind());

        match self {
            Self::Detailed {
                external_name: Some(external),
                ..
            } => model.external_name(external),
            _ => model,
        }
    }
}

///
/// RelationshipConfig
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelationshipConfig {
    pub destination: String,

    #[serde(default)]
    pub to_many: bool,

    #[serde(default)]
    pub inverse: Option<String>,

    #[serde(default)]
    pub ignore: bool,

    #[serde(default)]
    pub no_identity: bool,

    #[serde(default)]
    pub external_name: Option<String>,
}

impl RelationshipConfig {
    fn to_model(&self, name: &str) -> RelationModel {
        let mut model = if self.to_many {
            RelationModel::to_many(name, &self.destination)
        } else {
            RelationModel::to_one(name, &self.destination)
        };

        if let Some(inverse) = &self.inverse {
            model = model.inverse(inverse);
        }
        if self.ignore {
            model = model.ignored();
        }
        if self.no_identity {
            model = model.without_identity();
        }
        if let Some(external) = &self.external_name {
            model = model.external_name(external);
        }

        model
    }
}

/// Parse configuration text.
pub fn parse_config(text: &str) -> Result<GraphsyncConfig, ConfigError> {
    let config: GraphsyncConfig = toml::from_str(text)?;
    config.validate()?;

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<GraphsyncConfig, ConfigError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&text)?;

    debug!(
        path = %path.display(),
        entities = config.entities.len(),
        "configuration loaded"
    );

    Ok(config)
}
