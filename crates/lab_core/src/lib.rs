//! `lab_core`: deterministic simulation tick.
//!
//! No IO beyond the metrics CSV helpers, no network. All randomness via the
//! passed-in Rng.

mod config;
mod engine;
pub mod failure;
pub mod forcing;
pub mod metrics;
pub mod physics;
pub mod scoring;
pub mod thermal;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod test_fixtures;

pub use config::{initial_state, rod_left_k, rod_node_count, RunConfig};
pub use engine::{apply_command, refresh_readings, tick, CommandOutcome};
pub use metrics::{
    compute_metrics, entity_gauges, EntityGauge, MetricsFileWriter, MetricsSnapshot,
};
pub use types::*;

pub(crate) fn emit(
    counters: &mut Counters,
    tick: u64,
    notification: Notification,
) -> NotificationEnvelope {
    let id = NotificationId(format!("ntf_{:06}", counters.next_notification_id));
    counters.next_notification_id += 1;
    NotificationEnvelope {
        id,
        tick,
        notification,
    }
}

#[cfg(test)]
mod tests;
