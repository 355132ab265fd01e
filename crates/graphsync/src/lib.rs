//! ## Crate layout
//! - `core`: entity metadata, values, the store contract, and the
//!   reconciliation engine (identity cache, batch, snapshot, session).
//! - `config`: TOML schema and mapper configuration.
//! - `error`: the stable public error taxonomy.
//!
//! [`open_memory_session`] wires a parsed configuration to the in-memory
//! reference store; other stores plug into [`core::session::SyncSession`]
//! through the [`core::store::ObjectStore`] trait.

pub use graphsync_config as config;
pub use graphsync_core as core;

pub mod error;

pub use error::{Error, ErrorKind, ErrorOrigin};

use graphsync_config::GraphsyncConfig;
use graphsync_core::{session::SyncSession, store::MemoryStore};
use std::sync::Arc;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session over the in-memory reference store.
pub type MemorySession = SyncSession<MemoryStore>;

/// Build the schema and mapper options of `config` into a fresh session
/// over an empty in-memory store.
pub fn open_memory_session(config: &GraphsyncConfig) -> Result<MemorySession, Error> {
    let schema = Arc::new(config.build_schema()?);
    let store = MemoryStore::new(Arc::clone(&schema));

    Ok(SyncSession::new(store, schema).options(config.mapper_options()))
}

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        Error, MemorySession,
        core::{
            batch::BatchReport,
            model::MetadataProvider as _,
            prelude::*,
            session::SyncSession,
            snapshot::SnapshotReport,
            store::{MemoryStore, ObjectStore as _},
        },
        open_memory_session,
    };
}
