//! Type definitions for `lab_core`.
//!
//! Content types describe a run and never change once it starts. State types
//! are the per-tick value published to the presentation layer. Commands and
//! notifications are the only traffic between the two.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// ID newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(EntityId);
string_id!(ConditionId);
string_id!(ScenarioId);
string_id!(NotificationId);

// ---------------------------------------------------------------------------
// Core enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    Overpressure,
    Dry,
    Overflow,
    Overheat,
    Freeze,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunResult {
    Success,
    Fail,
}

/// Lifecycle of the simulation clock, derived from `SimulationState` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockPhase {
    Idle,
    Running,
    Paused,
    Succeeded,
    Failed,
}

/// Qualitative reading of a force utilization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBand {
    /// No positive force limit configured.
    Unset,
    Safe,
    Comfortable,
    NearLimit,
    OverLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateField {
    Height,
    Width,
    Thickness,
    LimitForce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventScope {
    /// Each entity carries at most one event of its own.
    PerEntity,
    /// One event at a time, shared by every entity.
    Global,
}

// ---------------------------------------------------------------------------
// State types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationState {
    pub meta: MetaState,
    pub clock_time_s: f64,
    pub running: bool,
    pub has_started: bool,
    pub game_over: bool,
    /// Set exactly once, on the tick the run ends.
    pub result: Option<RunResult>,
    pub score: i64,
    pub gate: GateConfig,
    /// Only used when the scenario's event scope is `Global`.
    pub global_event: Option<ActiveEvent>,
    pub forcing: ForcingClock,
    pub stats: RunStats,
    pub entities: Vec<SimulatedEntity>,
    pub counters: Counters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaState {
    pub tick: u64,
    pub seed: u64,
    pub scenario_id: ScenarioId,
    pub level_id: u32,
    pub content_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counters {
    pub next_notification_id: u64,
}

/// Gate geometry and strength, shared by every hydraulic entity.
///
/// Edited as text before the run starts; locked once `has_started` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    pub material_id: String,
    pub height_m: f64,
    pub width_m: f64,
    pub thickness_m: f64,
    pub limit_force_kn: f64,
}

/// Accumulators for stochastic processes that fire on their own cadence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForcingClock {
    pub event_check_elapsed_s: f64,
}

/// Run-wide figures consumed by terminal scoring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub max_utilization: f64,
    pub near_failure_time_s: f64,
    pub emergency_actions_used: u32,
    /// Guards terminal score adjustments against a second application.
    pub result_finalized: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedEntity {
    pub id: EntityId,
    pub name: String,
    /// Water volume (m³) for hydraulic entities, temperature (K) for thermal ones.
    pub stock: f64,
    /// Water level (m) or temperature (K).
    pub derived_level: f64,
    /// Actuator position in percent, `[0, 100]`.
    pub control_input: f64,
    pub active_event: Option<ActiveEvent>,
    pub failed: bool,
    pub failure_reason: Option<FailureReason>,
    pub debounce: SmallVec<[DebounceTimer; 2]>,
    pub valve_bank: Option<ValveBankState>,
    /// Rod node temperatures (K). Empty for every other model.
    pub profile: Vec<f64>,
    pub readings: Readings,
    pub previous_utilization: f64,
}

/// Instantaneous physical outputs of the last integration step. SI units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Readings {
    /// m³/s for hydraulic entities, W for thermal ones.
    pub inflow: f64,
    pub outflow: f64,
    pub pressure_pa: f64,
    pub force_n: f64,
    pub effective_limit_n: f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceTimer {
    pub condition: ConditionId,
    pub phase: BreachPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BreachPhase {
    Safe,
    Breaching { elapsed_s: f64 },
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValveBankState {
    pub valves: Vec<ValveState>,
    pub drift_elapsed_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValveState {
    pub name: String,
    pub max_flow_m3_s: f64,
    pub opening_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveEvent {
    pub kind: String,
    pub label: String,
    pub flow_multiplier: f64,
    pub limit_multiplier: f64,
    pub blocks_outflow: bool,
    pub remaining_s: f64,
}

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Mutations the presentation layer may request between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    SetControl { entity_id: EntityId, percent: f64 },
    EmergencyRelief { entity_id: EntityId },
    SetGateField { field: GateField, raw: String },
    SetGateMaterial { material_id: String },
}

// ---------------------------------------------------------------------------
// Notification types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub id: NotificationId,
    pub tick: u64,
    pub notification: Notification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Notification {
    /// `entity_id` is `None` for a global event.
    EventStarted {
        entity_id: Option<EntityId>,
        kind: String,
        label: String,
    },
    EventEnded {
        entity_id: Option<EntityId>,
        kind: String,
        label: String,
    },
    EntityFailed {
        entity_id: EntityId,
        reason: FailureReason,
    },
    /// Utilization fell from the near-limit band back to a comfortable one.
    EntitySaved {
        entity_id: EntityId,
    },
    EmergencyRelief {
        entity_id: EntityId,
        volume_m3: f64,
        penalty: i64,
    },
    RunFinished {
        result: RunResult,
        score_delta: i64,
    },
}

// ---------------------------------------------------------------------------
// Content types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameContent {
    pub content_version: String,
    pub constants: Constants,
    pub gate_materials: Vec<GateMaterialDef>,
    pub thermal_materials: Vec<ThermalMaterialDef>,
    pub scenarios: Vec<ScenarioDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constants {
    /// Orifice discharge coefficient (Cd).
    pub discharge_coefficient: f64,
    /// Utilization above which a tick counts as near-failure dwell.
    pub near_failure_utilization: f64,
    /// A save is reported when utilization drops from at least this value...
    pub save_from_utilization: f64,
    /// ...to at most this one within a single tick.
    pub save_to_utilization: f64,
    /// Share of the design volume removed by one emergency relief.
    pub relief_volume_fraction: f64,
    /// Relief is refused at or below this level (m).
    pub relief_min_level_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateMaterialDef {
    pub id: String,
    pub name: String,
    pub description: String,
    pub suggested_limit_kn: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalMaterialDef {
    pub id: String,
    pub name: String,
    pub conductivity_w_mk: f64,
    pub density_kg_m3: f64,
    pub specific_heat_j_kgk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDef {
    pub id: ScenarioId,
    pub name: String,
    pub description: String,
    /// Simulated seconds per tick.
    pub dt_s: f64,
    /// Inflow grows by up to this fraction as the run approaches its target time.
    pub stress_ramp: f64,
    pub gate: GateConfig,
    pub entities: Vec<EntityDef>,
    pub conditions: Vec<ConditionDef>,
    pub events: EventPolicy,
    pub scoring: ScoringPolicy,
    pub levels: Vec<LevelDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelDef {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub target_time_s: f64,
    /// Multiplies every scaled score rule.
    pub score_scale: i64,
    /// Multiplies every hydraulic inflow.
    pub flow_scale: f64,
    /// Chance of a new event per event check.
    pub event_trigger_probability: f64,
    /// Replaces the geometry of every hydraulic entity when set.
    #[serde(default)]
    pub geometry: Option<TankGeometry>,
    /// Per-valve maximum flows in bank order. Valves past the end keep their own.
    #[serde(default)]
    pub valve_max_flows_m3_s: Vec<f64>,
    /// Flow multiplier by event kind, replacing the catalog value.
    #[serde(default)]
    pub event_flow_multipliers: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDef {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub initial_control_pct: f64,
    #[serde(default)]
    pub target_band: Option<TargetBand>,
    pub model: StockModel,
}

/// Fixed reward for every tick an entity's level stays inside `[low, high]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetBand {
    pub low: f64,
    pub high: f64,
    pub points_per_tick: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StockModel {
    Hydraulic(HydraulicDef),
    ThermalNode(ThermalNodeDef),
    Rod(RodDef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HydraulicDef {
    pub geometry: TankGeometry,
    #[serde(default)]
    pub initial_volume_m3: f64,
    pub inflow: InflowDef,
    /// Gate orifice driven by `control_input`. `None` keeps the gate shut.
    #[serde(default)]
    pub outflow: Option<OrificeDef>,
    /// Whether the emergency spillway may be used on this entity.
    #[serde(default)]
    pub relief: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankGeometry {
    pub area_m2: f64,
    pub max_level_m: f64,
    /// Displayed level may overshoot `max_level_m` by this factor, no further.
    pub overflow_factor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InflowDef {
    /// Valves whose openings drift randomly; the player cannot touch them.
    ValveBank {
        valves: Vec<ValveDef>,
        drift_interval_s: f64,
        drift_band_pct: f64,
        jump_probability: f64,
    },
    /// Constant base flow with multiplicative uniform noise.
    Noisy { base_m3_s: f64, noise_band: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValveDef {
    pub name: String,
    pub max_flow_m3_s: f64,
    pub initial_opening_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrificeDef {
    /// Effective orifice area as a fraction of the gate face.
    pub gate_area_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThermalNodeDef {
    pub heat_capacity_j_k: f64,
    pub initial_temp_k: f64,
    /// Heat input at 100 % control.
    pub heat_input_w: f64,
    pub exchange: HeatExchange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HeatExchange {
    Convection {
        coefficient_w_m2k: f64,
        area_m2: f64,
        ambient_k: f64,
    },
    Radiation {
        emissivity: f64,
        area_m2: f64,
        surroundings_k: f64,
    },
}

/// 1D conduction rod with fixed-temperature ends. Control sets the hot end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RodDef {
    pub material_id: String,
    pub length_m: f64,
    pub nodes: usize,
    pub initial_temp_k: f64,
    pub left_min_k: f64,
    pub left_max_k: f64,
    pub right_k: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDef {
    pub id: ConditionId,
    pub kind: ConditionKind,
    /// Breach must be sustained for longer than this before the entity fails.
    pub grace_period_s: f64,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ConditionKind {
    UtilizationAbove { threshold: f64 },
    LevelBelow { threshold: f64 },
    LevelAbove { threshold: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPolicy {
    pub scope: EventScope,
    /// Seconds between trigger rolls.
    pub check_interval_s: f64,
    pub catalog: Vec<EventTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTemplate {
    pub kind: String,
    pub label: String,
    pub description: String,
    #[serde(default = "one")]
    pub flow_multiplier: f64,
    #[serde(default = "one")]
    pub limit_multiplier: f64,
    #[serde(default)]
    pub blocks_outflow: bool,
    pub duration_range_s: (f64, f64),
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringPolicy {
    /// Charged per emergency relief, scaled by level.
    pub emergency_penalty: i64,
    #[serde(default)]
    pub terminal: Option<TerminalScoringDef>,
}

/// Points awarded once when a run ends. Every value is scaled by level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalScoringDef {
    pub success_base: i64,
    pub failure_penalty: i64,
    /// Peak utilization in `(low, high]` earns `sweet_spot_bonus`.
    pub sweet_spot: (f64, f64),
    pub sweet_spot_bonus: i64,
    pub under_utilized_below: f64,
    pub under_utilized_penalty: i64,
    /// Charged when peak utilization is above `sweet_spot.1`.
    pub over_utilized_penalty: i64,
    pub no_emergency_bonus: i64,
    pub emergency_use_penalty: i64,
    /// Near-failure dwell above this fraction of the target time is penalized.
    pub near_failure_fraction: f64,
    pub near_failure_penalty: i64,
}
