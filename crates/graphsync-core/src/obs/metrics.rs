use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{cell::RefCell, collections::BTreeMap};

///
/// EventState
/// Ephemeral, in-memory counters for reconciliation passes.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventState {
    pub ops: EventOps,
    pub perf: EventPerf,
    pub entities: BTreeMap<String, EntityCounters>,
    pub since_ms: u64,
}

impl Default for EventState {
    fn default() -> Self {
        Self {
            ops: EventOps::default(),
            perf: EventPerf::default(),
            entities: BTreeMap::new(),
            since_ms: now_millis(),
        }
    }
}

///
/// EventOps
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventOps {
    // Batch entrypoints
    pub batches: u64,

    // Records
    pub records_upserted: u64,
    pub skipped_disabled: u64,
    pub skipped_missing_id: u64,
    pub shape_mismatches: u64,

    // Objects touched
    pub entities_created: u64,
    pub entities_deleted: u64,

    // Identity cache
    pub cache_loads: u64,
    pub cache_rows_loaded: u64,
    pub cache_resets: u64,
}

///
/// EntityCounters
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntityCounters {
    pub batches: u64,
    pub records_upserted: u64,
    pub skipped_disabled: u64,
    pub skipped_missing_id: u64,
    pub shape_mismatches: u64,
    pub entities_created: u64,
    pub entities_deleted: u64,
    pub cache_loads: u64,
    pub cache_rows_loaded: u64,
}

///
/// EventPerf
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventPerf {
    // Wall-clock batch durations in microseconds
    pub batch_micros_total: u128,
    pub batch_micros_max: u64,
}

thread_local! {
    static EVENT_STATE: RefCell<EventState> = RefCell::new(EventState::default());
}

#[expect(clippy::cast_sign_loss)]
fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Borrow metrics immutably.
pub(crate) fn with_state<R>(f: impl FnOnce(&EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&m.borrow()))
}

/// Borrow metrics mutably.
pub(crate) fn with_state_mut<R>(f: impl FnOnce(&mut EventState) -> R) -> R {
    EVENT_STATE.with(|m| f(&mut m.borrow_mut()))
}

/// Borrow one entity's counters mutably, creating them on first use.
pub(crate) fn entity_mut<'a>(m: &'a mut EventState, entity: &str) -> &'a mut EntityCounters {
    m.entities.entry(entity.to_string()).or_default()
}

/// Reset all counters and restart the window.
pub(crate) fn reset_all() {
    with_state_mut(|m| *m = EventState::default());
}

/// Accumulate a duration sample and track a max.
pub(crate) fn add_micros(total: &mut u128, max: &mut u64, delta: u64) {
    *total = total.saturating_add(u128::from(delta));
    if delta > *max {
        *max = delta;
    }
}

///
/// EventReport
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventReport {
    /// Ephemeral runtime counters since `since_ms`.
    pub counters: Option<EventState>,
    /// Per-entity counters, busiest first.
    pub entity_counters: Vec<EntitySummary>,
}

///
/// EntitySummary
///

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EntitySummary {
    pub entity: String,
    pub batches: u64,
    pub records_upserted: u64,
    pub entities_created: u64,
    pub entities_deleted: u64,
    pub skipped: u64,
    pub avg_records_per_batch: f64,
}

/// Build a report from the in-memory counters.
///
/// When `window_start_ms` is later than the current window start the
/// counters are considered stale and an empty report is returned.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub(crate) fn report(window_start_ms: Option<u64>) -> EventReport {
    let snap = with_state(Clone::clone);
    if window_start_ms.is_some_and(|start| start > snap.since_ms) {
        return EventReport::default();
    }

    let mut entity_counters: Vec<EntitySummary> = snap
        .entities
        .iter()
        .map(|(entity, c)| EntitySummary {
            entity: entity.clone(),
            batches: c.batches,
            records_upserted: c.records_upserted,
            entities_created: c.entities_created,
            entities_deleted: c.entities_deleted,
            skipped: c.skipped_disabled.saturating_add(c.skipped_missing_id),
            avg_records_per_batch: if c.batches > 0 {
                c.records_upserted as f64 / c.batches as f64
            } else {
                0.0
            },
        })
        .collect();

    entity_counters.sort_by(|a, b| {
        b.records_upserted
            .cmp(&a.records_upserted)
            .then_with(|| a.entity.cmp(&b.entity))
    });

    EventReport {
        counters: Some(snap),
        entity_counters,
    }
}

///
/// TESTS
///

#[cfg(test)]
#[expect(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn reset_all_clears_state() {
        with_state_mut(|m| {
            m.ops.batches = 3;
            m.perf.batch_micros_max = 9;
            entity_mut(m, "Device").records_upserted = 1;
        });

        reset_all();

        with_state(|m| {
            assert_eq!(m.ops.batches, 0);
            assert_eq!(m.perf.batch_micros_max, 0);
            assert!(m.entities.is_empty());
        });
    }

    #[test]
    fn report_orders_entities_by_upserts() {
        reset_all();
        with_state_mut(|m| {
            let device = entity_mut(m, "Device");
            device.batches = 2;
            device.records_upserted = 6;
            let contract = entity_mut(m, "Contract");
            contract.batches = 1;
            contract.records_upserted = 6;
            entity_mut(m, "User").records_upserted = 1;
        });

        let report = report(None);
        let names: Vec<_> = report
            .entity_counters
            .iter()
            .map(|e| e.entity.as_str())
            .collect();

        assert_eq!(names, ["Contract", "Device", "User"]);
        assert_eq!(report.entity_counters[0].avg_records_per_batch, 6.0);
        assert_eq!(report.entity_counters[1].avg_records_per_batch, 3.0);
    }

    #[test]
    fn report_after_window_start_is_empty() {
        reset_all();
        let start = with_state(|m| m.since_ms);

        assert!(report(Some(start)).counters.is_some());
        assert!(report(Some(start.saturating_add(1))).counters.is_none());
    }

    #[test]
    fn add_micros_tracks_max() {
        let (mut total, mut max) = (0u128, 0u64);
        add_micros(&mut total, &mut max, 5);
        add_micros(&mut total, &mut max, 3);

        assert_eq!(total, 8);
        assert_eq!(max, 5);
    }
}
