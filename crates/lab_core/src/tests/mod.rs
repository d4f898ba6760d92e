use super::*;
use crate::test_fixtures::{make_rng, quiet, run_config, HEAT_LAB, MULTI_TANK, RESERVOIR};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

mod reservoir;

// --- Shared test helpers ------------------------------------------------

fn started(mut state: SimulationState) -> SimulationState {
    state.running = true;
    state.has_started = true;
    state
}

/// Runs `ticks` ticks and collects every notification.
fn run_ticks(
    state: SimulationState,
    config: &RunConfig,
    rng: &mut ChaCha8Rng,
    ticks: u64,
) -> (SimulationState, Vec<NotificationEnvelope>) {
    let mut state = state;
    let mut log = Vec::new();
    for _ in 0..ticks {
        let (next, notifications) = tick(&state, config, rng);
        state = next;
        log.extend(notifications);
    }
    (state, log)
}

/// Ticks until the run is over, at most `max_ticks` times.
fn run_to_end(
    state: SimulationState,
    config: &RunConfig,
    rng: &mut ChaCha8Rng,
    max_ticks: u64,
) -> (SimulationState, Vec<NotificationEnvelope>) {
    let mut state = state;
    let mut log = Vec::new();
    for _ in 0..max_ticks {
        if state.game_over {
            break;
        }
        let (next, notifications) = tick(&state, config, rng);
        state = next;
        log.extend(notifications);
    }
    (state, log)
}

/// Quiet multi-tank config reduced to one tank with a constant inflow.
fn single_tank(base_inflow: f64, initial_volume_m3: f64, control_pct: f64) -> RunConfig {
    let mut config = quiet(run_config(MULTI_TANK, 1));
    config.scenario.entities.truncate(1);
    let entity = &mut config.scenario.entities[0];
    entity.initial_control_pct = control_pct;
    if let StockModel::Hydraulic(def) = &mut entity.model {
        def.initial_volume_m3 = initial_volume_m3;
        def.inflow = InflowDef::Noisy {
            base_m3_s: base_inflow,
            noise_band: 0.0,
        };
    }
    config
}

fn command(state: &SimulationState, config: &RunConfig, command: Command) -> SimulationState {
    apply_command(state, &command, config).0
}

fn set_gate(
    state: &SimulationState,
    config: &RunConfig,
    field: GateField,
    raw: &str,
) -> SimulationState {
    command(
        state,
        config,
        Command::SetGateField {
            field,
            raw: raw.to_string(),
        },
    )
}

fn failures(log: &[NotificationEnvelope]) -> Vec<(EntityId, FailureReason)> {
    log.iter()
        .filter_map(|n| match &n.notification {
            Notification::EntityFailed { entity_id, reason } => Some((entity_id.clone(), *reason)),
            _ => None,
        })
        .collect()
}

fn finished(log: &[NotificationEnvelope]) -> Vec<(RunResult, i64)> {
    log.iter()
        .filter_map(|n| match &n.notification {
            Notification::RunFinished {
                result,
                score_delta,
            } => Some((*result, *score_delta)),
            _ => None,
        })
        .collect()
}

fn entity_id(id: &str) -> EntityId {
    EntityId(id.to_string())
}
