//! Run configuration resolved from content, and the state a run starts from.

use crate::failure::initial_timers;
use crate::physics::{finite_or_zero, level_from_stock};
use crate::thermal::{centre_temperature, ROD_MAX_NODES, ROD_MIN_NODES};
use crate::{
    ActiveEvent, Constants, Counters, EntityDef, ForcingClock, GameContent, GateMaterialDef,
    HydraulicDef, InflowDef, LevelDef, MetaState, Readings, RodDef, RunStats, ScenarioDef,
    ScenarioId, SimulatedEntity, SimulationState, StockModel, TankGeometry, ThermalMaterialDef,
    ValveBankState, ValveDef, ValveState,
};

/// Everything one tick needs besides the state itself: a scenario with one
/// of its levels picked, plus the shared constants and material catalogs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub content_version: String,
    pub constants: Constants,
    pub scenario: ScenarioDef,
    pub level: LevelDef,
    pub gate_materials: Vec<GateMaterialDef>,
    pub thermal_materials: Vec<ThermalMaterialDef>,
}

impl RunConfig {
    /// `None` when the scenario or the level does not exist.
    pub fn resolve(content: &GameContent, scenario_id: &ScenarioId, level_id: u32) -> Option<Self> {
        let scenario = content.scenarios.iter().find(|s| &s.id == scenario_id)?;
        let level = scenario.levels.iter().find(|l| l.id == level_id)?;
        Some(Self {
            content_version: content.content_version.clone(),
            constants: content.constants.clone(),
            scenario: scenario.clone(),
            level: level.clone(),
            gate_materials: content.gate_materials.clone(),
            thermal_materials: content.thermal_materials.clone(),
        })
    }

    /// Same scenario, another of its levels.
    pub fn with_level(&self, level_id: u32) -> Option<Self> {
        let level = self.scenario.levels.iter().find(|l| l.id == level_id)?;
        Some(Self {
            level: level.clone(),
            ..self.clone()
        })
    }

    /// Simulated seconds per tick, never negative.
    pub fn dt(&self) -> f64 {
        finite_or_zero(self.scenario.dt_s).max(0.0)
    }

    /// Level geometry overrides the entity's own when the level defines one.
    pub fn geometry<'a>(&'a self, def: &'a HydraulicDef) -> &'a TankGeometry {
        self.level.geometry.as_ref().unwrap_or(&def.geometry)
    }

    /// Maximum flow of the valve at `index`, after the level's override.
    pub fn valve_max_flow(&self, index: usize, valve: &ValveDef) -> f64 {
        let max = self
            .level
            .valve_max_flows_m3_s
            .get(index)
            .copied()
            .unwrap_or(valve.max_flow_m3_s);
        finite_or_zero(max).max(0.0)
    }

    /// Applies the level's flow multiplier for the event's kind, if any.
    pub fn tune_event(&self, mut event: ActiveEvent) -> ActiveEvent {
        if let Some(&multiplier) = self.level.event_flow_multipliers.get(&event.kind) {
            event.flow_multiplier = finite_or_zero(multiplier).max(0.0);
        }
        event
    }

    pub fn gate_material(&self, material_id: &str) -> Option<&GateMaterialDef> {
        self.gate_materials.iter().find(|m| m.id == material_id)
    }

    pub fn thermal_material(&self, material_id: &str) -> Option<&ThermalMaterialDef> {
        self.thermal_materials.iter().find(|m| m.id == material_id)
    }
}

/// Rod node count after clamping.
pub fn rod_node_count(def: &RodDef) -> usize {
    def.nodes.clamp(ROD_MIN_NODES, ROD_MAX_NODES)
}

/// Hot-end temperature for a control position, linear between the rod's bounds.
pub fn rod_left_k(def: &RodDef, control_pct: f64) -> f64 {
    let fraction = finite_or_zero(control_pct).clamp(0.0, 100.0) / 100.0;
    def.left_min_k + (def.left_max_k - def.left_min_k) * fraction
}

/// Builds the state every run of `config` starts from: tick 0, idle, no score.
pub fn initial_state(config: &RunConfig, seed: u64) -> SimulationState {
    let entities = config
        .scenario
        .entities
        .iter()
        .map(|def| initial_entity(config, def))
        .collect();

    let mut state = SimulationState {
        meta: MetaState {
            tick: 0,
            seed,
            scenario_id: config.scenario.id.clone(),
            level_id: config.level.id,
            content_version: config.content_version.clone(),
        },
        clock_time_s: 0.0,
        running: false,
        has_started: false,
        game_over: false,
        result: None,
        score: 0,
        gate: config.scenario.gate.clone(),
        global_event: None,
        forcing: ForcingClock::default(),
        stats: RunStats::default(),
        entities,
        counters: Counters {
            next_notification_id: 0,
        },
    };
    crate::engine::refresh_readings(&mut state, config);
    state
}

fn initial_entity(config: &RunConfig, def: &EntityDef) -> SimulatedEntity {
    let control_input = finite_or_zero(def.initial_control_pct).clamp(0.0, 100.0);
    let mut valve_bank = None;
    let mut profile = Vec::new();

    let (stock, derived_level) = match &def.model {
        StockModel::Hydraulic(hydraulic) => {
            let geometry = config.geometry(hydraulic);
            let stock = finite_or_zero(hydraulic.initial_volume_m3).max(0.0);
            if let InflowDef::ValveBank { valves, .. } = &hydraulic.inflow {
                valve_bank = Some(ValveBankState {
                    valves: valves
                        .iter()
                        .enumerate()
                        .map(|(index, valve)| ValveState {
                            name: valve.name.clone(),
                            max_flow_m3_s: config.valve_max_flow(index, valve),
                            opening_pct: finite_or_zero(valve.initial_opening_pct)
                                .clamp(0.0, 100.0),
                        })
                        .collect(),
                    drift_elapsed_s: 0.0,
                });
            }
            let level = level_from_stock(
                stock,
                geometry.area_m2,
                geometry.max_level_m,
                geometry.overflow_factor,
            );
            (stock, level)
        }
        StockModel::ThermalNode(node) => {
            let temperature = finite_or_zero(node.initial_temp_k).max(0.0);
            (temperature, temperature)
        }
        StockModel::Rod(rod) => {
            let initial = finite_or_zero(rod.initial_temp_k).max(0.0);
            profile = vec![initial; rod_node_count(rod)];
            if let Some(first) = profile.first_mut() {
                *first = rod_left_k(rod, control_input);
            }
            if let Some(last) = profile.last_mut() {
                *last = rod.right_k;
            }
            let centre = centre_temperature(&profile);
            (centre, centre)
        }
    };

    SimulatedEntity {
        id: def.id.clone(),
        name: def.name.clone(),
        stock,
        derived_level,
        control_input,
        active_event: None,
        failed: false,
        failure_reason: None,
        debounce: initial_timers(&config.scenario.conditions),
        valve_bank,
        profile,
        readings: Readings::default(),
        previous_utilization: 0.0,
    }
}
