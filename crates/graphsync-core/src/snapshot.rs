//! Static snapshot orchestrator: splits a combined payload per entity type
//! and runs each type as an authoritative batch.

use crate::{
    ENTITIES_KEY,
    batch::{BatchProcessor, BatchReport},
    error::{ErrorOrigin, InternalError},
    record::{payload_section, record_array},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

///
/// SnapshotReport
///

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SnapshotReport {
    /// False when the payload had no `entities` mapping; nothing was applied.
    pub accepted: bool,
    /// One report per processed type, in processing order.
    pub batches: Vec<BatchReport>,
    /// Requested types the payload carried no record array for.
    pub skipped_types: Vec<String>,
}

///
/// SnapshotProcessor
///
/// Types are processed strictly in the caller's order; there is no
/// dependency inference between them.
///

pub struct SnapshotProcessor<'a> {
    batch: BatchProcessor<'a>,
}

impl<'a> SnapshotProcessor<'a> {
    #[must_use]
    pub const fn new(batch: BatchProcessor<'a>) -> Self {
        Self { batch }
    }

    /// Apply `{ "entities": { "<Type>": [ ... ] } }`.
    ///
    /// The identity cache is reset before every type that is present, so
    /// identities loaded under a shared abstract destination while one
    /// type was processed never look exhaustive to a later type.
    pub fn process_snapshot<T: AsRef<str>>(
        &mut self,
        payload: &JsonValue,
        requested_types: &[T],
    ) -> Result<SnapshotReport, InternalError> {
        let schema = self.batch.schema();
        for ty in requested_types {
            schema.try_entity(ty.as_ref(), ErrorOrigin::Snapshot)?;
        }

        let Some(entities) = payload_section(payload, ENTITIES_KEY).and_then(JsonValue::as_object)
        else {
            warn!("snapshot payload has no `entities` mapping; ignoring");
            return Ok(SnapshotReport::default());
        };

        let mut report = SnapshotReport {
            accepted: true,
            ..SnapshotReport::default()
        };

        for ty in requested_types {
            let ty = ty.as_ref();
            let Some(raw) = entities.get(ty) else {
                debug!(entity = ty, "snapshot carries no records for type");
                report.skipped_types.push(ty.to_string());
                continue;
            };
            let Some(records) = record_array(raw) else {
                warn!(entity = ty, "snapshot entry is not an array of records; skipping");
                report.skipped_types.push(ty.to_string());
                continue;
            };

            self.batch.reset_resolver();
            report
                .batches
                .push(self.batch.process_batch(ty, records, true)?);
        }

        info!(
            processed = report.batches.len(),
            skipped = report.skipped_types.len(),
            "snapshot applied"
        );

        Ok(report)
    }
}
