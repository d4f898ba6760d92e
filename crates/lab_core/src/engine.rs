use rand::Rng;

use crate::config::{rod_left_k, RunConfig};
use crate::failure::{evaluate_entity, TickResult};
use crate::forcing::{
    decay_event, due_firings, maybe_trigger_event, noisy_inflow, perturb_valve,
    stress_multiplier,
};
use crate::physics::{
    effective_height, finite_or_zero, hydrostatic_force, hydrostatic_pressure, integrate_stock,
    level_from_stock, orifice_outflow, parse_or_zero, utilization, GRAVITY_M_S2,
    WATER_DENSITY_KG_M3,
};
use crate::scoring::{band_reward, emergency_penalty, finalize};
use crate::thermal::{
    centre_temperature, conduction_step, convection_heat_rate, diffusivity, radiation_heat_rate,
};
use crate::{
    ActiveEvent, ClockPhase, Command, EntityDef, EntityId, EventScope, GateConfig, GateField,
    HeatExchange, HydraulicDef, InflowDef, Notification, NotificationEnvelope, RodDef, RunResult,
    SimulatedEntity, SimulationState, StockModel, ThermalNodeDef,
};

/// Slack when comparing the accumulated clock against the target time.
const CLOCK_EPSILON: f64 = 1e-9;

/// What a command did to the state.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Applied(Vec<NotificationEnvelope>),
    /// The command was not valid right now; the state is unchanged.
    Ignored,
}

/// Advance the simulation by one tick.
///
/// Order of operations:
/// 1. Stochastic forcing: valve drift, event decay and new event rolls.
/// 2. Physics: sample inflow, integrate every live entity, refresh readings.
/// 3. Failure evaluation: debounce timers, save detection, run statistics.
/// 4. Per-tick band rewards.
/// 5. Clock advance and outcome check (failure, or target time reached).
/// 6. Increment tick counter.
///
/// Returns the next state and the notifications produced this tick. A state
/// that is not running, or is already over, comes back unchanged.
pub fn tick(
    state: &SimulationState,
    config: &RunConfig,
    rng: &mut impl Rng,
) -> (SimulationState, Vec<NotificationEnvelope>) {
    let mut next = state.clone();
    let mut notifications = Vec::new();
    if !next.running || next.game_over {
        return (next, notifications);
    }

    let dt = config.dt();
    advance_forcing(&mut next, config, dt, rng, &mut notifications);
    integrate_entities(&mut next, config, dt, rng);
    let tick_result = evaluate_failures(&mut next, config, dt);
    award_band_rewards(&mut next, config);
    next.clock_time_s += dt;
    conclude(&mut next, config, &tick_result, &mut notifications);

    next.meta.tick += 1;
    (next, notifications)
}

// ---------------------------------------------------------------------------
// Forcing
// ---------------------------------------------------------------------------

fn advance_forcing(
    state: &mut SimulationState,
    config: &RunConfig,
    dt: f64,
    rng: &mut impl Rng,
    notifications: &mut Vec<NotificationEnvelope>,
) {
    let current_tick = state.meta.tick;

    for (def, entity) in config.scenario.entities.iter().zip(state.entities.iter_mut()) {
        if entity.failed {
            continue;
        }
        drift_valves(def, entity, dt, rng);
    }

    let policy = &config.scenario.events;
    let checks = due_firings(
        &mut state.forcing.event_check_elapsed_s,
        dt,
        policy.check_interval_s,
    );
    let probability = config.level.event_trigger_probability;

    match policy.scope {
        EventScope::Global => {
            let had_event = state.global_event.is_some();
            if let Some(ended) = decay_slot(&mut state.global_event, dt) {
                notifications.push(crate::emit(
                    &mut state.counters,
                    current_tick,
                    ended_notification(None, ended),
                ));
            }
            if !had_event && checks > 0 {
                if let Some(event) = maybe_trigger_event(&policy.catalog, probability, rng)
                    .map(|event| config.tune_event(event))
                {
                    notifications.push(crate::emit(
                        &mut state.counters,
                        current_tick,
                        started_notification(None, &event),
                    ));
                    state.global_event = Some(event);
                }
            }
        }
        EventScope::PerEntity => {
            for entity in state.entities.iter_mut().filter(|e| !e.failed) {
                let had_event = entity.active_event.is_some();
                if let Some(ended) = decay_slot(&mut entity.active_event, dt) {
                    notifications.push(crate::emit(
                        &mut state.counters,
                        current_tick,
                        ended_notification(Some(entity.id.clone()), ended),
                    ));
                }
                if had_event || checks == 0 {
                    continue;
                }
                if let Some(event) = maybe_trigger_event(&policy.catalog, probability, rng)
                    .map(|event| config.tune_event(event))
                {
                    notifications.push(crate::emit(
                        &mut state.counters,
                        current_tick,
                        started_notification(Some(entity.id.clone()), &event),
                    ));
                    entity.active_event = Some(event);
                }
            }
        }
    }
}

fn drift_valves(def: &EntityDef, entity: &mut SimulatedEntity, dt: f64, rng: &mut impl Rng) {
    let StockModel::Hydraulic(HydraulicDef {
        inflow:
            InflowDef::ValveBank {
                drift_interval_s,
                drift_band_pct,
                jump_probability,
                ..
            },
        ..
    }) = &def.model
    else {
        return;
    };
    let Some(bank) = entity.valve_bank.as_mut() else {
        return;
    };
    let firings = due_firings(&mut bank.drift_elapsed_s, dt, *drift_interval_s);
    for _ in 0..firings {
        for valve in &mut bank.valves {
            valve.opening_pct =
                perturb_valve(valve.opening_pct, *drift_band_pct, *jump_probability, rng);
        }
    }
}

/// Decays the event in `slot`; returns it once, on the tick it ends.
fn decay_slot(slot: &mut Option<ActiveEvent>, dt: f64) -> Option<ActiveEvent> {
    let event = slot.take()?;
    let ending = event.clone();
    *slot = decay_event(event, dt);
    slot.is_none().then_some(ending)
}

fn started_notification(entity_id: Option<EntityId>, event: &ActiveEvent) -> Notification {
    Notification::EventStarted {
        entity_id,
        kind: event.kind.clone(),
        label: event.label.clone(),
    }
}

fn ended_notification(entity_id: Option<EntityId>, event: ActiveEvent) -> Notification {
    Notification::EventEnded {
        entity_id,
        kind: event.kind,
        label: event.label,
    }
}

// ---------------------------------------------------------------------------
// Physics
// ---------------------------------------------------------------------------

fn integrate_entities(
    state: &mut SimulationState,
    config: &RunConfig,
    dt: f64,
    rng: &mut impl Rng,
) {
    let stress = stress_multiplier(
        state.clock_time_s,
        config.level.target_time_s,
        config.scenario.stress_ramp,
    );
    let gate = &state.gate;
    let global_event = state.global_event.as_ref();

    for (def, entity) in config.scenario.entities.iter().zip(state.entities.iter_mut()) {
        if entity.failed {
            continue;
        }
        let event = entity.active_event.clone();
        let event = event.as_ref().or(global_event);
        match &def.model {
            StockModel::Hydraulic(hydraulic) => {
                step_hydraulic(entity, hydraulic, config, gate, event, stress, dt, rng);
            }
            StockModel::ThermalNode(node) => step_thermal_node(entity, node, event, dt),
            StockModel::Rod(rod) => step_rod(entity, rod, config, dt),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn step_hydraulic(
    entity: &mut SimulatedEntity,
    def: &HydraulicDef,
    config: &RunConfig,
    gate: &GateConfig,
    event: Option<&ActiveEvent>,
    stress: f64,
    dt: f64,
    rng: &mut impl Rng,
) {
    let base_inflow = match &def.inflow {
        InflowDef::ValveBank { .. } => entity.valve_bank.as_ref().map_or(0.0, |bank| {
            bank.valves
                .iter()
                .map(|valve| valve.max_flow_m3_s * valve.opening_pct / 100.0)
                .sum()
        }),
        InflowDef::Noisy {
            base_m3_s,
            noise_band,
        } => noisy_inflow(*base_m3_s, *noise_band, rng),
    };
    let flow_multiplier = event.map_or(1.0, |e| e.flow_multiplier);
    let inflow = (base_inflow
        * finite_or_zero(config.level.flow_scale).max(0.0)
        * stress
        * flow_multiplier)
        .max(0.0);

    let blocked = event.is_some_and(|e| e.blocks_outflow);
    let outflow = match &def.outflow {
        Some(orifice) if !blocked => orifice_outflow(
            entity.control_input / 100.0,
            orifice.gate_area_fraction * gate.width_m * gate.height_m,
            entity.derived_level,
            config.constants.discharge_coefficient,
            GRAVITY_M_S2,
        ),
        _ => 0.0,
    };

    entity.stock = integrate_stock(entity.stock, inflow, outflow, dt);
    entity.readings.inflow = inflow;
    entity.readings.outflow = outflow;
    update_hydraulic_readings(entity, def, config, gate, event);
}

/// Level, pressure, force and utilization from the current stock.
fn update_hydraulic_readings(
    entity: &mut SimulatedEntity,
    def: &HydraulicDef,
    config: &RunConfig,
    gate: &GateConfig,
    event: Option<&ActiveEvent>,
) {
    let geometry = config.geometry(def);
    let level = level_from_stock(
        entity.stock,
        geometry.area_m2,
        geometry.max_level_m,
        geometry.overflow_factor,
    );
    let force = hydrostatic_force(
        effective_height(level, gate.height_m),
        gate.width_m,
        WATER_DENSITY_KG_M3,
        GRAVITY_M_S2,
    );
    let limit_multiplier = event.map_or(1.0, |e| e.limit_multiplier);
    let limit = finite_or_zero(gate.limit_force_kn).max(0.0) * 1000.0 * limit_multiplier;

    entity.derived_level = level;
    entity.readings.pressure_pa = hydrostatic_pressure(level, WATER_DENSITY_KG_M3, GRAVITY_M_S2);
    entity.readings.force_n = force;
    entity.readings.effective_limit_n = limit;
    entity.readings.utilization = utilization(force, limit);
}

fn step_thermal_node(
    entity: &mut SimulatedEntity,
    node: &ThermalNodeDef,
    event: Option<&ActiveEvent>,
    dt: f64,
) {
    let flow_multiplier = event.map_or(1.0, |e| e.flow_multiplier);
    let heat_in = finite_or_zero(node.heat_input_w).max(0.0) * entity.control_input / 100.0
        * flow_multiplier;
    let heat_out = match node.exchange {
        HeatExchange::Convection {
            coefficient_w_m2k,
            area_m2,
            ambient_k,
        } => convection_heat_rate(coefficient_w_m2k, area_m2, entity.stock, ambient_k),
        HeatExchange::Radiation {
            emissivity,
            area_m2,
            surroundings_k,
        } => radiation_heat_rate(emissivity, area_m2, entity.stock, surroundings_k),
    };
    let capacity = finite_or_zero(node.heat_capacity_j_k);
    if capacity > 0.0 {
        entity.stock = integrate_stock(entity.stock, heat_in / capacity, heat_out / capacity, dt);
    }
    entity.derived_level = entity.stock;
    entity.readings.inflow = heat_in;
    entity.readings.outflow = heat_out;
}

fn step_rod(entity: &mut SimulatedEntity, rod: &RodDef, config: &RunConfig, dt: f64) {
    let alpha = config.thermal_material(&rod.material_id).map_or(0.0, |m| {
        diffusivity(m.conductivity_w_mk, m.density_kg_m3, m.specific_heat_j_kgk)
    });
    let left_k = rod_left_k(rod, entity.control_input);
    conduction_step(&mut entity.profile, alpha, rod.length_m, dt, left_k, rod.right_k);
    let centre = finite_or_zero(centre_temperature(&entity.profile)).max(0.0);
    entity.stock = centre;
    entity.derived_level = centre;
}

/// Recomputes derived level and readings from the current stocks without
/// integrating. Failed entities keep the readings they failed with.
pub fn refresh_readings(state: &mut SimulationState, config: &RunConfig) {
    let gate = &state.gate;
    let global_event = state.global_event.as_ref();
    for (def, entity) in config.scenario.entities.iter().zip(state.entities.iter_mut()) {
        if entity.failed {
            continue;
        }
        match &def.model {
            StockModel::Hydraulic(hydraulic) => {
                let event = entity.active_event.clone();
                let event = event.as_ref().or(global_event);
                update_hydraulic_readings(entity, hydraulic, config, gate, event);
            }
            StockModel::ThermalNode(_) => entity.derived_level = entity.stock,
            StockModel::Rod(_) => {
                entity.stock = centre_temperature(&entity.profile);
                entity.derived_level = entity.stock;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Failure, scoring, outcome
// ---------------------------------------------------------------------------

fn evaluate_failures(state: &mut SimulationState, config: &RunConfig, dt: f64) -> TickResult {
    let constants = &config.constants;
    let mut result = TickResult::default();
    let mut near_failure = false;

    for entity in state.entities.iter_mut().filter(|e| !e.failed) {
        let current = entity.readings.utilization;
        if let Some(reason) = evaluate_entity(entity, &config.scenario.conditions, dt) {
            result.record_failure(&entity.id, reason);
        } else if entity.previous_utilization >= constants.save_from_utilization
            && current <= constants.save_to_utilization
        {
            result.record_save(&entity.id);
        }
        entity.previous_utilization = current;
        state.stats.max_utilization = state.stats.max_utilization.max(current);
        near_failure |= current > constants.near_failure_utilization;
    }

    if near_failure {
        state.stats.near_failure_time_s += dt;
    }
    result
}

fn award_band_rewards(state: &mut SimulationState, config: &RunConfig) {
    let reward: i64 = config
        .scenario
        .entities
        .iter()
        .zip(&state.entities)
        .filter(|(_, entity)| !entity.failed)
        .filter_map(|(def, entity)| {
            def.target_band
                .as_ref()
                .map(|band| band_reward(band, entity.derived_level))
        })
        .sum();
    state.score += reward;
}

fn conclude(
    state: &mut SimulationState,
    config: &RunConfig,
    tick_result: &TickResult,
    notifications: &mut Vec<NotificationEnvelope>,
) {
    let current_tick = state.meta.tick;

    if let Some((entity_id, reason)) = &tick_result.first_failure {
        notifications.push(crate::emit(
            &mut state.counters,
            current_tick,
            Notification::EntityFailed {
                entity_id: entity_id.clone(),
                reason: *reason,
            },
        ));
    } else if let Some(entity_id) = &tick_result.first_save {
        notifications.push(crate::emit(
            &mut state.counters,
            current_tick,
            Notification::EntitySaved {
                entity_id: entity_id.clone(),
            },
        ));
    }

    let result = if tick_result.first_failure.is_some() {
        RunResult::Fail
    } else if state.clock_time_s + CLOCK_EPSILON >= config.level.target_time_s {
        RunResult::Success
    } else {
        return;
    };

    state.game_over = true;
    state.running = false;
    state.result = Some(result);
    let score_delta = finalize(
        &mut state.score,
        &mut state.stats,
        result,
        &config.scenario.scoring,
        config.level.target_time_s,
        config.level.score_scale,
    )
    .unwrap_or(0);
    notifications.push(crate::emit(
        &mut state.counters,
        current_tick,
        Notification::RunFinished {
            result,
            score_delta,
        },
    ));
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Applies one control command between ticks.
///
/// Commands never fail: anything invalid for the current state comes back
/// as [`CommandOutcome::Ignored`] with an unchanged copy of the state.
pub fn apply_command(
    state: &SimulationState,
    command: &Command,
    config: &RunConfig,
) -> (SimulationState, CommandOutcome) {
    let mut next = state.clone();
    let outcome = match command {
        Command::SetControl {
            entity_id,
            percent,
        } => set_control(&mut next, entity_id, *percent),
        Command::EmergencyRelief { entity_id } => emergency_relief(&mut next, entity_id, config),
        Command::SetGateField { field, raw } => set_gate_field(&mut next, *field, raw),
        Command::SetGateMaterial { material_id } => {
            set_gate_material(&mut next, material_id, config)
        }
    };
    match outcome {
        CommandOutcome::Applied(_) => {
            refresh_readings(&mut next, config);
            (next, outcome)
        }
        CommandOutcome::Ignored => (state.clone(), outcome),
    }
}

fn live_entity_mut<'a>(
    state: &'a mut SimulationState,
    entity_id: &EntityId,
) -> Option<&'a mut SimulatedEntity> {
    if state.game_over {
        return None;
    }
    state
        .entities
        .iter_mut()
        .find(|e| &e.id == entity_id && !e.failed)
}

fn set_control(state: &mut SimulationState, entity_id: &EntityId, percent: f64) -> CommandOutcome {
    let Some(entity) = live_entity_mut(state, entity_id) else {
        return CommandOutcome::Ignored;
    };
    entity.control_input = finite_or_zero(percent).clamp(0.0, 100.0);
    CommandOutcome::Applied(Vec::new())
}

fn emergency_relief(
    state: &mut SimulationState,
    entity_id: &EntityId,
    config: &RunConfig,
) -> CommandOutcome {
    let Some(index) = state
        .entities
        .iter()
        .position(|e| &e.id == entity_id && !e.failed)
    else {
        return CommandOutcome::Ignored;
    };
    let Some(StockModel::Hydraulic(def)) = config.scenario.entities.get(index).map(|d| &d.model)
    else {
        return CommandOutcome::Ignored;
    };
    if state.game_over
        || !def.relief
        || state.entities[index].derived_level <= config.constants.relief_min_level_m
    {
        return CommandOutcome::Ignored;
    }

    let geometry = config.geometry(def);
    let requested = config.constants.relief_volume_fraction * geometry.area_m2 * geometry.max_level_m;
    let entity = &mut state.entities[index];
    let before = entity.stock;
    entity.stock = (before - finite_or_zero(requested).max(0.0)).max(0.0);
    let volume_m3 = before - entity.stock;

    let penalty = emergency_penalty(&config.scenario.scoring, config.level.score_scale);
    state.score -= penalty;
    state.stats.emergency_actions_used += 1;

    let current_tick = state.meta.tick;
    CommandOutcome::Applied(vec![crate::emit(
        &mut state.counters,
        current_tick,
        Notification::EmergencyRelief {
            entity_id: entity_id.clone(),
            volume_m3,
            penalty,
        },
    )])
}

fn set_gate_field(state: &mut SimulationState, field: GateField, raw: &str) -> CommandOutcome {
    if state.has_started {
        return CommandOutcome::Ignored;
    }
    let value = parse_or_zero(raw).max(0.0);
    match field {
        GateField::Height => state.gate.height_m = value,
        GateField::Width => state.gate.width_m = value,
        GateField::Thickness => state.gate.thickness_m = value,
        GateField::LimitForce => state.gate.limit_force_kn = value,
    }
    CommandOutcome::Applied(Vec::new())
}

fn set_gate_material(
    state: &mut SimulationState,
    material_id: &str,
    config: &RunConfig,
) -> CommandOutcome {
    if state.has_started {
        return CommandOutcome::Ignored;
    }
    let Some(material) = config.gate_material(material_id) else {
        return CommandOutcome::Ignored;
    };
    state.gate.material_id = material.id.clone();
    if state.gate.limit_force_kn <= 0.0 {
        state.gate.limit_force_kn = material.suggested_limit_kn;
    }
    CommandOutcome::Applied(Vec::new())
}

impl SimulationState {
    /// Clock phase derived from the run flags.
    pub fn phase(&self) -> ClockPhase {
        match (self.game_over, self.result, self.running, self.has_started) {
            (true, Some(RunResult::Success), _, _) => ClockPhase::Succeeded,
            (true, _, _, _) => ClockPhase::Failed,
            (false, _, true, _) => ClockPhase::Running,
            (false, _, false, true) => ClockPhase::Paused,
            (false, _, false, false) => ClockPhase::Idle,
        }
    }
}
