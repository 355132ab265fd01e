//! Metrics sink boundary.
//!
//! Reconciliation logic MUST NOT depend on obs::metrics directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
use crate::obs::metrics::{self, EventReport};
use std::{cell::Cell, time::Instant};

thread_local! {
    static SINK_OVERRIDE: Cell<Option<&'static dyn MetricsSink>> = const { Cell::new(None) };
}

///
/// SkipReason
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SkipReason {
    Disabled,
    MissingId,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum MetricsEvent<'a> {
    BatchStart {
        entity: &'a str,
    },
    BatchFinish {
        entity: &'a str,
        upserted: u64,
        deleted: u64,
        elapsed_micros: u64,
    },
    RecordSkipped {
        entity: &'a str,
        reason: SkipReason,
    },
    EntityCreated {
        entity: &'a str,
    },
    CacheLoad {
        entity: &'a str,
        rows: u64,
    },
    CacheReset,
    ShapeMismatch {
        entity: &'a str,
        relation: &'a str,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink {
    fn record(&self, event: MetricsEvent<'_>);
}

///
/// GlobalMetricsSink
/// Default thread-local sink that writes into global metrics state.
///

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::BatchStart { entity } => metrics::with_state_mut(|m| {
                m.ops.batches = m.ops.batches.saturating_add(1);
                let entry = metrics::entity_mut(m, entity);
                entry.batches = entry.batches.saturating_add(1);
            }),

            MetricsEvent::BatchFinish {
                entity,
                upserted,
                deleted,
                elapsed_micros,
            } => metrics::with_state_mut(|m| {
                m.ops.records_upserted = m.ops.records_upserted.saturating_add(upserted);
                m.ops.entities_deleted = m.ops.entities_deleted.saturating_add(deleted);
                metrics::add_micros(
                    &mut m.perf.batch_micros_total,
                    &mut m.perf.batch_micros_max,
                    elapsed_micros,
                );

                let entry = metrics::entity_mut(m, entity);
                entry.records_upserted = entry.records_upserted.saturating_add(upserted);
                entry.entities_deleted = entry.entities_deleted.saturating_add(deleted);
            }),

            MetricsEvent::RecordSkipped { entity, reason } => metrics::with_state_mut(|m| {
                match reason {
                    SkipReason::Disabled => {
                        m.ops.skipped_disabled = m.ops.skipped_disabled.saturating_add(1);
                    }
                    SkipReason::MissingId => {
                        m.ops.skipped_missing_id = m.ops.skipped_missing_id.saturating_add(1);
                    }
                }

                let entry = metrics::entity_mut(m, entity);
                match reason {
                    SkipReason::Disabled => {
                        entry.skipped_disabled = entry.skipped_disabled.saturating_add(1);
                    }
                    SkipReason::MissingId => {
                        entry.skipped_missing_id = entry.skipped_missing_id.saturating_add(1);
                    }
                }
            }),

            MetricsEvent::EntityCreated { entity } => metrics::with_state_mut(|m| {
                m.ops.entities_created = m.ops.entities_created.saturating_add(1);
                let entry = metrics::entity_mut(m, entity);
                entry.entities_created = entry.entities_created.saturating_add(1);
            }),

            MetricsEvent::CacheLoad { entity, rows } => metrics::with_state_mut(|m| {
                m.ops.cache_loads = m.ops.cache_loads.saturating_add(1);
                m.ops.cache_rows_loaded = m.ops.cache_rows_loaded.saturating_add(rows);
                let entry = metrics::entity_mut(m, entity);
                entry.cache_loads = entry.cache_loads.saturating_add(1);
                entry.cache_rows_loaded = entry.cache_rows_loaded.saturating_add(rows);
            }),

            MetricsEvent::CacheReset => metrics::with_state_mut(|m| {
                m.ops.cache_resets = m.ops.cache_resets.saturating_add(1);
            }),

            MetricsEvent::ShapeMismatch { entity, .. } => metrics::with_state_mut(|m| {
                m.ops.shape_mismatches = m.ops.shape_mismatches.saturating_add(1);
                let entry = metrics::entity_mut(m, entity);
                entry.shape_mismatches = entry.shape_mismatches.saturating_add(1);
            }),
        }
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

/// Record one event on the scoped override, or the global sink.
pub(crate) fn record(event: MetricsEvent<'_>) {
    match SINK_OVERRIDE.with(Cell::get) {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Snapshot the current metrics state.
///
/// `window_start_ms` filters by window start (`EventState::since_ms`),
/// not by per-event timestamps.
#[must_use]
pub fn metrics_report(window_start_ms: Option<u64>) -> EventReport {
    metrics::report(window_start_ms)
}

/// Reset all metrics state (counters + perf).
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override.
pub(crate) fn with_metrics_sink<T>(sink: &'static dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<&'static dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| cell.set(self.0));
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.replace(Some(sink)));
    let _guard = Guard(prev);

    f()
}

///
/// Span
/// RAII guard that emits start/finish events for one batch.
/// Finish accounting happens even when the batch bails out with `?`.
///

pub(crate) struct Span {
    entity: String,
    start: Instant,
    upserted: u64,
    deleted: u64,
}

impl Span {
    #[must_use]
    pub(crate) fn new(entity: &str) -> Self {
        record(MetricsEvent::BatchStart { entity });

        Self {
            entity: entity.to_string(),
            start: Instant::now(),
            upserted: 0,
            deleted: 0,
        }
    }

    pub(crate) const fn set_counts(&mut self, upserted: u64, deleted: u64) {
        self.upserted = upserted;
        self.deleted = deleted;
    }
}

impl Drop for Span {
    fn drop(&mut self) {
        let elapsed_micros = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);

        record(MetricsEvent::BatchFinish {
            entity: &self.entity,
            upserted: self.upserted,
            deleted: self.deleted,
            elapsed_micros,
        });
    }
}
