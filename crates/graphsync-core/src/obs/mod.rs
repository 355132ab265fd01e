//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! Reconciliation code never touches `metrics` directly; every counter
//! update flows through a `MetricsEvent` recorded on the active sink.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EntitySummary, EventReport, EventState};
pub use sink::{MetricsEvent, MetricsSink, SkipReason, metrics_report, metrics_reset_all};
