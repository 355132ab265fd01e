use graphsync_core::model::SchemaError;
use std::{io, path::PathBuf};
use thiserror::Error as ThisError;

///
/// ConfigError
///

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid schema: {0}")]
    Schema(#[from] SchemaError),

    #[error("snapshot order names undeclared entity type '{0}'")]
    UnknownSnapshotType(String),
}
