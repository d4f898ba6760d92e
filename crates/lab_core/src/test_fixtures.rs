//! Shared test fixtures for lab_core and downstream crates.
//!
//! `base_content()` mirrors the shipped content catalog (reservoir gate,
//! multi-tank, heat lab). `minimal_content()` is one tank with no events,
//! for validation and loader tests. `quiet()` strips every random source
//! from a config so physics can be checked against hand-computed numbers.

use crate::config::{initial_state, RunConfig};
use crate::thermal::celsius_to_kelvin;
use crate::{
    ConditionDef, ConditionId, ConditionKind, Constants, EntityDef, EntityId, EventPolicy,
    EventScope, EventTemplate, FailureReason, GameContent, GateConfig, GateMaterialDef,
    HeatExchange, HydraulicDef, InflowDef, LevelDef, OrificeDef, Readings, RodDef, ScenarioDef,
    ScenarioId, ScoringPolicy, SimulatedEntity, SimulationState, StockModel, TankGeometry,
    TargetBand, TerminalScoringDef, ThermalMaterialDef, ThermalNodeDef, ValveDef,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use smallvec::SmallVec;
use std::collections::BTreeMap;

pub const RESERVOIR: &str = "reservoir_gate";
pub const MULTI_TANK: &str = "multi_tank";
pub const HEAT_LAB: &str = "heat_lab";

pub fn base_constants() -> Constants {
    Constants {
        discharge_coefficient: 0.62,
        near_failure_utilization: 0.9,
        save_from_utilization: 0.9,
        save_to_utilization: 0.7,
        relief_volume_fraction: 0.25,
        relief_min_level_m: 0.2,
    }
}

pub fn base_content() -> GameContent {
    GameContent {
        content_version: "test".to_string(),
        constants: base_constants(),
        gate_materials: vec![
            gate_material("steel", "Steel", 400.0),
            gate_material("concrete", "Reinforced concrete", 280.0),
            gate_material("wood", "Timber", 120.0),
        ],
        thermal_materials: vec![
            thermal_material("copper", 401.0, 8960.0, 385.0),
            thermal_material("aluminium", 205.0, 2700.0, 897.0),
            thermal_material("steel", 50.0, 7850.0, 470.0),
            thermal_material("wood", 0.12, 500.0, 1600.0),
            thermal_material("insulation", 0.03, 30.0, 1400.0),
        ],
        scenarios: vec![reservoir_scenario(), multi_tank_scenario(), heat_lab_scenario()],
    }
}

/// One tank, no events, no terminal scoring.
pub fn minimal_content() -> GameContent {
    let mut scenario = multi_tank_scenario();
    scenario.id = ScenarioId("minimal".to_string());
    scenario.entities.truncate(1);
    scenario.events.catalog.clear();
    scenario.scoring.terminal = None;
    scenario.levels.truncate(1);
    GameContent {
        content_version: "minimal".to_string(),
        constants: base_constants(),
        gate_materials: vec![gate_material("steel", "Steel", 400.0)],
        thermal_materials: vec![],
        scenarios: vec![scenario],
    }
}

fn gate_material(id: &str, name: &str, suggested_limit_kn: f64) -> GateMaterialDef {
    GateMaterialDef {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        suggested_limit_kn,
    }
}

fn thermal_material(id: &str, k: f64, rho: f64, cp: f64) -> ThermalMaterialDef {
    ThermalMaterialDef {
        id: id.to_string(),
        name: id.to_string(),
        conductivity_w_mk: k,
        density_kg_m3: rho,
        specific_heat_j_kgk: cp,
    }
}

fn condition(id: &str, kind: ConditionKind, grace: f64, reason: FailureReason) -> ConditionDef {
    ConditionDef {
        id: ConditionId(id.to_string()),
        kind,
        grace_period_s: grace,
        reason,
    }
}

fn level(
    id: u32,
    target_time_s: f64,
    score_scale: i64,
    flow_scale: f64,
    event_trigger_probability: f64,
    geometry: Option<TankGeometry>,
) -> LevelDef {
    LevelDef {
        id,
        name: format!("Level {id}"),
        description: String::new(),
        target_time_s,
        score_scale,
        flow_scale,
        event_trigger_probability,
        geometry,
        valve_max_flows_m3_s: Vec::new(),
        event_flow_multipliers: BTreeMap::new(),
    }
}

/// Reservoir level: its own valve maxima and a stronger extreme rain.
fn reservoir_level(
    id: u32,
    target_time_s: f64,
    event_trigger_probability: f64,
    geometry: TankGeometry,
    valve_max_flows_m3_s: [f64; 3],
    extreme_rain: f64,
) -> LevelDef {
    let score_scale = i64::from(id);
    LevelDef {
        valve_max_flows_m3_s: valve_max_flows_m3_s.to_vec(),
        event_flow_multipliers: BTreeMap::from([("extreme_rain".to_string(), extreme_rain)]),
        ..level(
            id,
            target_time_s,
            score_scale,
            1.0,
            event_trigger_probability,
            Some(geometry),
        )
    }
}

fn event(kind: &str, flow: f64, limit: f64, blocks: bool, range: (f64, f64)) -> EventTemplate {
    EventTemplate {
        kind: kind.to_string(),
        label: kind.replace('_', " "),
        description: String::new(),
        flow_multiplier: flow,
        limit_multiplier: limit,
        blocks_outflow: blocks,
        duration_range_s: range,
    }
}

pub fn reservoir_scoring() -> ScoringPolicy {
    ScoringPolicy {
        emergency_penalty: 10,
        terminal: Some(TerminalScoringDef {
            success_base: 100,
            failure_penalty: 50,
            sweet_spot: (0.6, 0.95),
            sweet_spot_bonus: 30,
            under_utilized_below: 0.3,
            under_utilized_penalty: 20,
            over_utilized_penalty: 10,
            no_emergency_bonus: 10,
            emergency_use_penalty: 5,
            near_failure_fraction: 0.3,
            near_failure_penalty: 15,
        }),
    }
}

fn geometry(area_m2: f64, max_level_m: f64, overflow_factor: f64) -> TankGeometry {
    TankGeometry {
        area_m2,
        max_level_m,
        overflow_factor,
    }
}

pub fn reservoir_scenario() -> ScenarioDef {
    let valve = |name: &str, max_flow_m3_s: f64, initial_opening_pct: f64| ValveDef {
        name: name.to_string(),
        max_flow_m3_s,
        initial_opening_pct,
    };
    ScenarioDef {
        id: ScenarioId(RESERVOIR.to_string()),
        name: "Reservoir gate".to_string(),
        description: String::new(),
        dt_s: 0.2,
        stress_ramp: 0.5,
        gate: GateConfig {
            material_id: "steel".to_string(),
            height_m: 3.0,
            width_m: 3.0,
            thickness_m: 0.2,
            limit_force_kn: 300.0,
        },
        entities: vec![EntityDef {
            id: EntityId("reservoir".to_string()),
            name: "Reservoir".to_string(),
            initial_control_pct: 0.0,
            target_band: None,
            model: StockModel::Hydraulic(HydraulicDef {
                geometry: geometry(25.0, 4.0, 1.2),
                initial_volume_m3: 25.0,
                inflow: InflowDef::ValveBank {
                    valves: vec![
                        valve("Valve A", 3.0, 40.0),
                        valve("Valve B", 2.0, 20.0),
                        valve("Valve C", 1.0, 10.0),
                    ],
                    drift_interval_s: 0.8,
                    drift_band_pct: 20.0,
                    jump_probability: 0.2,
                },
                outflow: None,
                relief: true,
            }),
        }],
        conditions: vec![condition(
            "overpressure",
            ConditionKind::UtilizationAbove { threshold: 1.0 },
            0.0,
            FailureReason::Overpressure,
        )],
        events: EventPolicy {
            scope: EventScope::Global,
            check_interval_s: 1.0,
            catalog: vec![
                event("extreme_rain", 1.6, 1.0, false, (8.0, 12.0)),
                event("microcracks", 1.0, 0.7, false, (8.0, 12.0)),
                event("upstream_control", 0.7, 1.0, false, (8.0, 12.0)),
            ],
        },
        scoring: reservoir_scoring(),
        levels: vec![
            reservoir_level(1, 40.0, 0.15, geometry(25.0, 4.0, 1.2), [3.0, 2.0, 1.0], 1.6),
            reservoir_level(2, 60.0, 0.20, geometry(40.0, 5.0, 1.2), [4.0, 3.0, 2.0], 1.7),
            reservoir_level(3, 80.0, 0.25, geometry(60.0, 7.0, 1.2), [5.0, 4.0, 3.0], 1.8),
        ],
    }
}

pub fn multi_tank_scenario() -> ScenarioDef {
    let entities = (0..10_u32)
        .map(|i| EntityDef {
            id: EntityId(format!("tank_{:02}", i + 1)),
            name: format!("Tank {}", i + 1),
            initial_control_pct: 30.0,
            target_band: None,
            model: StockModel::Hydraulic(HydraulicDef {
                geometry: geometry(15.0, 5.0, 1.3),
                initial_volume_m3: 30.0,
                inflow: InflowDef::Noisy {
                    base_m3_s: 0.9 + 0.05 * f64::from(i),
                    noise_band: 0.3,
                },
                outflow: Some(OrificeDef {
                    gate_area_fraction: 0.25,
                }),
                relief: false,
            }),
        })
        .collect();

    ScenarioDef {
        id: ScenarioId(MULTI_TANK.to_string()),
        name: "Pressure tanks".to_string(),
        description: String::new(),
        dt_s: 0.25,
        stress_ramp: 0.5,
        gate: GateConfig {
            material_id: "steel".to_string(),
            height_m: 3.0,
            width_m: 2.0,
            thickness_m: 0.25,
            limit_force_kn: 60.0,
        },
        entities,
        conditions: vec![
            condition(
                "overpressure",
                ConditionKind::UtilizationAbove { threshold: 1.0 },
                5.0,
                FailureReason::Overpressure,
            ),
            condition(
                "dry",
                ConditionKind::LevelBelow { threshold: 0.05 },
                5.0,
                FailureReason::Dry,
            ),
        ],
        events: EventPolicy {
            scope: EventScope::PerEntity,
            check_interval_s: 0.25,
            catalog: vec![
                event("inflow_spike", 2.3, 1.0, false, (6.0, 12.0)),
                event("relief_failure", 1.0, 1.0, true, (6.0, 12.0)),
                event("turbulent_inflow", 1.6, 1.0, false, (6.0, 12.0)),
            ],
        },
        scoring: ScoringPolicy {
            emergency_penalty: 10,
            terminal: Some(TerminalScoringDef {
                success_base: 100,
                failure_penalty: 50,
                sweet_spot: (0.6, 0.95),
                sweet_spot_bonus: 30,
                under_utilized_below: 0.3,
                under_utilized_penalty: 20,
                over_utilized_penalty: 10,
                no_emergency_bonus: 10,
                emergency_use_penalty: 5,
                near_failure_fraction: 0.3,
                near_failure_penalty: 15,
            }),
        },
        levels: vec![
            level(1, 90.0, 1, 1.0, 0.03, None),
            level(2, 120.0, 2, 1.2, 0.05, None),
        ],
    }
}

pub fn heat_lab_scenario() -> ScenarioDef {
    let band = |low_c: f64, high_c: f64, points_per_tick: i64| {
        Some(TargetBand {
            low: celsius_to_kelvin(low_c),
            high: celsius_to_kelvin(high_c),
            points_per_tick,
        })
    };
    ScenarioDef {
        id: ScenarioId(HEAT_LAB.to_string()),
        name: "Heat lab".to_string(),
        description: String::new(),
        dt_s: 0.5,
        stress_ramp: 0.0,
        gate: GateConfig {
            material_id: String::new(),
            height_m: 0.0,
            width_m: 0.0,
            thickness_m: 0.0,
            limit_force_kn: 0.0,
        },
        entities: vec![
            EntityDef {
                id: EntityId("plate".to_string()),
                name: "Cooling plate".to_string(),
                initial_control_pct: 0.0,
                target_band: band(20.0, 40.0, 2),
                model: StockModel::ThermalNode(ThermalNodeDef {
                    heat_capacity_j_k: 2.0 * 900.0,
                    initial_temp_k: celsius_to_kelvin(80.0),
                    heat_input_w: 400.0,
                    exchange: HeatExchange::Convection {
                        coefficient_w_m2k: 15.0,
                        area_m2: 0.6,
                        ambient_k: celsius_to_kelvin(25.0),
                    },
                }),
            },
            EntityDef {
                id: EntityId("body".to_string()),
                name: "Orbiting body".to_string(),
                initial_control_pct: 50.0,
                target_band: band(15.0, 25.0, 3),
                model: StockModel::ThermalNode(ThermalNodeDef {
                    heat_capacity_j_k: 5.0 * 900.0,
                    initial_temp_k: celsius_to_kelvin(20.0),
                    heat_input_w: 1000.0,
                    exchange: HeatExchange::Radiation {
                        emissivity: 0.85,
                        area_m2: 0.8,
                        surroundings_k: celsius_to_kelvin(-270.0),
                    },
                }),
            },
            EntityDef {
                id: EntityId("rod".to_string()),
                name: "Aluminium rod".to_string(),
                initial_control_pct: 87.5,
                target_band: band(44.5, 45.5, 1),
                model: StockModel::Rod(RodDef {
                    material_id: "aluminium".to_string(),
                    length_m: 0.5,
                    nodes: 80,
                    initial_temp_k: celsius_to_kelvin(20.0),
                    left_min_k: celsius_to_kelvin(20.0),
                    left_max_k: celsius_to_kelvin(100.0),
                    right_k: celsius_to_kelvin(20.0),
                }),
            },
        ],
        conditions: vec![
            condition(
                "overheat",
                ConditionKind::LevelAbove {
                    threshold: celsius_to_kelvin(100.0),
                },
                2.0,
                FailureReason::Overheat,
            ),
            condition(
                "freeze",
                ConditionKind::LevelBelow {
                    threshold: celsius_to_kelvin(0.0),
                },
                2.0,
                FailureReason::Freeze,
            ),
        ],
        events: EventPolicy {
            scope: EventScope::Global,
            check_interval_s: 1.0,
            catalog: vec![],
        },
        scoring: ScoringPolicy {
            emergency_penalty: 0,
            terminal: Some(TerminalScoringDef {
                success_base: 50,
                failure_penalty: 25,
                sweet_spot: (0.0, 0.0),
                sweet_spot_bonus: 0,
                under_utilized_below: 0.0,
                under_utilized_penalty: 0,
                over_utilized_penalty: 0,
                no_emergency_bonus: 0,
                emergency_use_penalty: 0,
                near_failure_fraction: 1.0,
                near_failure_penalty: 0,
            }),
        },
        levels: vec![level(1, 300.0, 1, 1.0, 0.0, None)],
    }
}

/// Resolved config for a scenario in `base_content()`.
pub fn run_config(scenario: &str, level_id: u32) -> RunConfig {
    RunConfig::resolve(&base_content(), &ScenarioId(scenario.to_string()), level_id)
        .unwrap_or_else(|| panic!("fixture scenario {scenario} level {level_id}"))
}

/// Removes every random source: no events, no noise, no valve drift, no ramp.
pub fn quiet(mut config: RunConfig) -> RunConfig {
    config.scenario.stress_ramp = 0.0;
    config.level.event_trigger_probability = 0.0;
    config.scenario.events.catalog.clear();
    for entity in &mut config.scenario.entities {
        if let StockModel::Hydraulic(def) = &mut entity.model {
            match &mut def.inflow {
                InflowDef::ValveBank {
                    drift_band_pct,
                    jump_probability,
                    ..
                } => {
                    *drift_band_pct = 0.0;
                    *jump_probability = 0.0;
                }
                InflowDef::Noisy { noise_band, .. } => *noise_band = 0.0,
            }
        }
    }
    config
}

/// Idle reservoir run, level 1, seed 42.
pub fn base_state() -> SimulationState {
    initial_state(&run_config(RESERVOIR, 1), 42)
}

/// A live entity with zeroed physics and no debounce timers.
pub fn bare_entity(id: &str) -> SimulatedEntity {
    SimulatedEntity {
        id: EntityId(id.to_string()),
        name: id.to_string(),
        stock: 0.0,
        derived_level: 0.0,
        control_input: 0.0,
        active_event: None,
        failed: false,
        failure_reason: None,
        debounce: SmallVec::new(),
        valve_bank: None,
        profile: Vec::new(),
        readings: Readings::default(),
        previous_utilization: 0.0,
    }
}

pub fn make_rng() -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(42)
}
