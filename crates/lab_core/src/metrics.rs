//! Snapshot metrics computed from `SimulationState`.
//!
//! `compute_metrics(&SimulationState) -> MetricsSnapshot` samples the current
//! state for time-series analysis, and `entity_gauges` produces the display
//! values (kN, kPa, risk band) a panel shows. No state mutation. The CSV
//! writers at the bottom are the only IO in the crate and are used by
//! headless runners.

use crate::physics::{risk_band, to_kilo};
use crate::{EntityId, RiskBand, SimulationState};
use serde::Serialize;
use std::io::Write;

/// Current schema version. Bump when fields are added, removed or reordered.
const METRICS_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tick: u64,
    pub metrics_version: u32,
    pub clock_time_s: f64,
    pub score: i64,

    // Entities
    pub entities_total: u32,
    pub entities_failed: u32,
    pub max_utilization: f64,
    pub mean_utilization: f64,
    pub mean_level: f64,

    // Forcing
    pub active_events: u32,

    // Run statistics
    pub emergency_actions_used: u32,
    pub near_failure_time_s: f64,
}

#[allow(clippy::cast_possible_truncation)]
pub fn compute_metrics(state: &SimulationState) -> MetricsSnapshot {
    let live: Vec<_> = state.entities.iter().filter(|e| !e.failed).collect();
    let live_count = live.len();

    let (utilization_sum, level_sum, max_utilization) = live.iter().fold(
        (0.0_f64, 0.0_f64, 0.0_f64),
        |(u_sum, l_sum, u_max), entity| {
            let u = entity.readings.utilization;
            (u_sum + u, l_sum + entity.derived_level, u_max.max(u))
        },
    );
    let mean = |sum: f64| {
        if live_count == 0 {
            0.0
        } else {
            sum / live_count as f64
        }
    };

    let entity_events = state
        .entities
        .iter()
        .filter(|e| e.active_event.is_some())
        .count();
    let active_events = entity_events + usize::from(state.global_event.is_some());

    MetricsSnapshot {
        tick: state.meta.tick,
        metrics_version: METRICS_VERSION,
        clock_time_s: state.clock_time_s,
        score: state.score,
        entities_total: state.entities.len() as u32,
        entities_failed: (state.entities.len() - live_count) as u32,
        max_utilization,
        mean_utilization: mean(utilization_sum),
        mean_level: mean(level_sum),
        active_events: active_events as u32,
        emergency_actions_used: state.stats.emergency_actions_used,
        near_failure_time_s: state.stats.near_failure_time_s,
    }
}

/// Display readings for one entity, in the units a panel shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityGauge {
    pub entity_id: EntityId,
    pub level: f64,
    pub pressure_kpa: f64,
    pub force_kn: f64,
    pub limit_kn: f64,
    pub utilization: f64,
    pub risk: RiskBand,
}

pub fn entity_gauges(state: &SimulationState) -> Vec<EntityGauge> {
    state
        .entities
        .iter()
        .map(|entity| {
            let readings = &entity.readings;
            EntityGauge {
                entity_id: entity.id.clone(),
                level: entity.derived_level,
                pressure_kpa: to_kilo(readings.pressure_pa),
                force_kn: to_kilo(readings.force_n),
                limit_kn: to_kilo(readings.effective_limit_n),
                utilization: readings.utilization,
                risk: risk_band(readings.utilization, readings.effective_limit_n),
            }
        })
        .collect()
}

/// Write the CSV header row for metrics.
pub fn write_metrics_header(writer: &mut impl std::io::Write) -> std::io::Result<()> {
    writeln!(
        writer,
        "tick,metrics_version,clock_time_s,score,\
         entities_total,entities_failed,max_utilization,mean_utilization,mean_level,\
         active_events,emergency_actions_used,near_failure_time_s"
    )
}

/// Append a single metrics snapshot as a CSV row.
pub fn append_metrics_row(
    writer: &mut impl std::io::Write,
    snapshot: &MetricsSnapshot,
) -> std::io::Result<()> {
    writeln!(
        writer,
        "{},{},{},{},{},{},{},{},{},{},{},{}",
        snapshot.tick,
        snapshot.metrics_version,
        snapshot.clock_time_s,
        snapshot.score,
        snapshot.entities_total,
        snapshot.entities_failed,
        snapshot.max_utilization,
        snapshot.mean_utilization,
        snapshot.mean_level,
        snapshot.active_events,
        snapshot.emergency_actions_used,
        snapshot.near_failure_time_s,
    )
}

/// Maximum data rows per CSV file before rotating to a new file.
const MAX_ROWS_PER_FILE: usize = 50_000;

/// Rotating metrics CSV writer. Splits into numbered files
/// (`metrics_000.csv`, `metrics_001.csv`, ...) after [`MAX_ROWS_PER_FILE`] rows each.
pub struct MetricsFileWriter {
    run_dir: std::path::PathBuf,
    file_index: u32,
    rows_in_current_file: usize,
    writer: std::io::BufWriter<std::fs::File>,
}

impl MetricsFileWriter {
    pub fn new(run_dir: std::path::PathBuf) -> std::io::Result<Self> {
        let writer = open_csv_file(&run_dir, 0)?;
        Ok(Self {
            run_dir,
            file_index: 0,
            rows_in_current_file: 0,
            writer,
        })
    }

    pub fn write_row(&mut self, snapshot: &MetricsSnapshot) -> std::io::Result<()> {
        if self.rows_in_current_file >= MAX_ROWS_PER_FILE {
            self.writer.flush()?;
            self.file_index += 1;
            self.writer = open_csv_file(&self.run_dir, self.file_index)?;
            self.rows_in_current_file = 0;
        }
        append_metrics_row(&mut self.writer, snapshot)?;
        self.rows_in_current_file += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

fn open_csv_file(
    run_dir: &std::path::Path,
    index: u32,
) -> std::io::Result<std::io::BufWriter<std::fs::File>> {
    let path = run_dir.join(format!("metrics_{index:03}.csv"));
    let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_metrics_header(&mut writer)?;
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{base_state, bare_entity};
    use crate::{ActiveEvent, FailureReason};

    fn event(kind: &str) -> ActiveEvent {
        ActiveEvent {
            kind: kind.to_string(),
            label: kind.to_string(),
            flow_multiplier: 1.0,
            limit_multiplier: 1.0,
            blocks_outflow: false,
            remaining_s: 5.0,
        }
    }

    #[test]
    fn empty_state_is_all_zeros() {
        let mut state = base_state();
        state.entities.clear();
        let snapshot = compute_metrics(&state);
        assert_eq!(snapshot.entities_total, 0);
        assert_eq!(snapshot.entities_failed, 0);
        assert!(snapshot.mean_level.abs() < f64::EPSILON);
        assert!(snapshot.max_utilization.abs() < f64::EPSILON);
        assert_eq!(snapshot.metrics_version, METRICS_VERSION);
    }

    #[test]
    fn failed_entities_are_counted_but_not_averaged() {
        let mut state = base_state();
        let mut a = bare_entity("a");
        a.derived_level = 2.0;
        a.readings.utilization = 0.5;
        let mut b = bare_entity("b");
        b.derived_level = 4.0;
        b.readings.utilization = 0.9;
        let mut c = bare_entity("c");
        c.derived_level = 100.0;
        c.readings.utilization = 3.0;
        c.failed = true;
        c.failure_reason = Some(FailureReason::Overpressure);
        state.entities = vec![a, b, c];

        let snapshot = compute_metrics(&state);
        assert_eq!(snapshot.entities_total, 3);
        assert_eq!(snapshot.entities_failed, 1);
        assert!((snapshot.mean_level - 3.0).abs() < 1e-12);
        assert!((snapshot.mean_utilization - 0.7).abs() < 1e-12);
        assert!((snapshot.max_utilization - 0.9).abs() < 1e-12);
    }

    #[test]
    fn global_and_entity_events_are_both_counted() {
        let mut state = base_state();
        let mut a = bare_entity("a");
        a.active_event = Some(event("inflow_spike"));
        state.entities = vec![a, bare_entity("b")];
        state.global_event = Some(event("extreme_rain"));
        assert_eq!(compute_metrics(&state).active_events, 2);
    }

    #[test]
    fn gauges_convert_to_kilo_units() {
        let mut state = base_state();
        let mut a = bare_entity("a");
        a.readings.force_n = 88_290.0;
        a.readings.pressure_pa = 29_430.0;
        a.readings.effective_limit_n = 60_000.0;
        a.readings.utilization = 88_290.0 / 60_000.0;
        state.entities = vec![a];

        let gauge = &entity_gauges(&state)[0];
        assert!((gauge.force_kn - 88.29).abs() < 1e-9);
        assert!((gauge.pressure_kpa - 29.43).abs() < 1e-9);
        assert!((gauge.limit_kn - 60.0).abs() < 1e-9);
        assert_eq!(gauge.risk, RiskBand::OverLimit);
    }

    #[test]
    fn csv_header_and_row_have_matching_columns() {
        let snapshot = compute_metrics(&base_state());
        let mut buffer = Vec::new();
        write_metrics_header(&mut buffer).unwrap();
        append_metrics_row(&mut buffer, &snapshot).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split(',').count(), lines[1].split(',').count());
        assert!(lines[0].starts_with("tick,metrics_version"));
    }

    #[test]
    fn file_writer_appends_rows_under_one_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MetricsFileWriter::new(dir.path().to_path_buf()).unwrap();
        let snapshot = compute_metrics(&base_state());
        writer.write_row(&snapshot).unwrap();
        writer.write_row(&snapshot).unwrap();
        writer.flush().unwrap();

        let text = std::fs::read_to_string(dir.path().join("metrics_000.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("tick,"));
        assert_eq!(lines[1], lines[2]);
    }
}
