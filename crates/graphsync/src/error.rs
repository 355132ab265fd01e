use derive_more::Display;
use graphsync_config::ConfigError;
use graphsync_core::error::{ErrorOrigin as CoreErrorOrigin, InternalError};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let kind = match err.origin {
            CoreErrorOrigin::Schema => ErrorKind::Schema,
            CoreErrorOrigin::Store => ErrorKind::Store,
            _ => ErrorKind::Internal,
        };

        Self::new(kind, err.origin.into(), err.message)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Schema(_) => Self::new(ErrorKind::Schema, ErrorOrigin::Schema, err.to_string()),
            ConfigError::Io { .. } | ConfigError::Parse(_) | ConfigError::UnknownSnapshotType(_) => {
                Self::new(ErrorKind::Config, ErrorOrigin::Config, err.to_string())
            }
        }
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Entity metadata is inconsistent or names an unknown type.
    Schema,

    /// Configuration could not be read or parsed.
    Config,

    /// The object store rejected an operation.
    Store,

    /// The caller cannot remediate this.
    Internal,
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Config,
    Identity,
    Reconcile,
    Schema,
    Snapshot,
    Store,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Identity => Self::Identity,
            CoreErrorOrigin::Reconcile => Self::Reconcile,
            CoreErrorOrigin::Schema => Self::Schema,
            CoreErrorOrigin::Snapshot => Self::Snapshot,
            CoreErrorOrigin::Store => Self::Store,
        }
    }
}

///
/// TESTS
///
