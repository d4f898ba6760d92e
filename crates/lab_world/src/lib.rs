//! Content loading and run setup shared between lab_cli and lab_daemon.

use anyhow::{ensure, Context, Result};
use lab_core::{
    initial_state, GameContent, GateMaterialDef, HydraulicDef, InflowDef, RunConfig, ScenarioDef,
    ScenarioId, SimulationState, StockModel, ThermalMaterialDef,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Deserialize)]
struct ScenariosFile {
    content_version: String,
    scenarios: Vec<ScenarioDef>,
}

#[derive(Deserialize)]
struct GateMaterialsFile {
    materials: Vec<GateMaterialDef>,
}

#[derive(Deserialize)]
struct ThermalMaterialsFile {
    materials: Vec<ThermalMaterialDef>,
}

/// Returns an error naming the first id that appears twice.
fn ensure_unique<'a>(kind: &str, ids: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        ensure!(seen.insert(id), "duplicate {kind} id '{id}'");
    }
    Ok(())
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Validates cross-references and physical sanity of loaded content.
///
/// Catches authoring mistakes like a rod made of an unknown material, a
/// scenario without levels, or a zero time step. Runtime inputs (gate
/// fields typed by a player) are coerced by the core instead and never
/// reach this check.
pub fn validate_content(content: &GameContent) -> Result<()> {
    let c = &content.constants;
    ensure!(
        positive(c.discharge_coefficient),
        "constants: discharge_coefficient must be positive"
    );
    ensure!(
        (0.0..=1.0).contains(&c.relief_volume_fraction),
        "constants: relief_volume_fraction must be within [0, 1]"
    );
    ensure!(
        c.save_to_utilization <= c.save_from_utilization,
        "constants: save_to_utilization must not exceed save_from_utilization"
    );

    ensure_unique(
        "gate material",
        content.gate_materials.iter().map(|m| m.id.as_str()),
    )?;
    ensure_unique(
        "thermal material",
        content.thermal_materials.iter().map(|m| m.id.as_str()),
    )?;
    ensure_unique("scenario", content.scenarios.iter().map(|s| s.id.0.as_str()))?;
    ensure!(!content.scenarios.is_empty(), "content has no scenarios");

    for scenario in &content.scenarios {
        validate_scenario(content, scenario)
            .with_context(|| format!("scenario '{}'", scenario.id))?;
    }
    Ok(())
}

fn validate_scenario(content: &GameContent, scenario: &ScenarioDef) -> Result<()> {
    ensure!(positive(scenario.dt_s), "dt_s must be positive");
    ensure!(!scenario.entities.is_empty(), "no entities");
    ensure!(!scenario.levels.is_empty(), "no levels");

    let gate_material = &scenario.gate.material_id;
    ensure!(
        gate_material.is_empty() || content.gate_materials.iter().any(|m| &m.id == gate_material),
        "gate material '{gate_material}' is not a known gate material"
    );

    ensure_unique("entity", scenario.entities.iter().map(|e| e.id.0.as_str()))?;
    ensure_unique(
        "condition",
        scenario.conditions.iter().map(|c| c.id.0.as_str()),
    )?;
    for condition in &scenario.conditions {
        ensure!(
            condition.grace_period_s >= 0.0,
            "condition '{}' has a negative grace period",
            condition.id
        );
    }

    for entity in &scenario.entities {
        match &entity.model {
            StockModel::Hydraulic(hydraulic) => validate_hydraulic(hydraulic)
                .with_context(|| format!("entity '{}'", entity.id))?,
            StockModel::ThermalNode(node) => ensure!(
                positive(node.heat_capacity_j_k),
                "entity '{}' needs a positive heat capacity",
                entity.id
            ),
            StockModel::Rod(rod) => {
                ensure!(
                    content
                        .thermal_materials
                        .iter()
                        .any(|m| m.id == rod.material_id),
                    "entity '{}' rod material '{}' is not a known thermal material",
                    entity.id,
                    rod.material_id
                );
                ensure!(
                    positive(rod.length_m),
                    "entity '{}' rod length must be positive",
                    entity.id
                );
            }
        }
        if let Some(band) = &entity.target_band {
            ensure!(
                band.low <= band.high,
                "entity '{}' target band is inverted",
                entity.id
            );
        }
    }

    let events = &scenario.events;
    ensure!(
        events.catalog.is_empty() || positive(events.check_interval_s),
        "event check interval must be positive"
    );
    for template in &events.catalog {
        let (min, max) = template.duration_range_s;
        ensure!(
            min >= 0.0 && min <= max,
            "event '{}' has an invalid duration range",
            template.kind
        );
    }

    let mut level_ids = HashSet::new();
    for level in &scenario.levels {
        ensure!(level_ids.insert(level.id), "duplicate level id {}", level.id);
        ensure!(
            positive(level.target_time_s),
            "level {} target time must be positive",
            level.id
        );
        ensure!(
            (0.0..=1.0).contains(&level.event_trigger_probability),
            "level {} event probability must be within [0, 1]",
            level.id
        );
        if let Some(geometry) = &level.geometry {
            ensure!(
                positive(geometry.area_m2) && positive(geometry.max_level_m),
                "level {} geometry must have positive area and height",
                level.id
            );
        }
        ensure!(
            level.valve_max_flows_m3_s.iter().all(|flow| *flow >= 0.0),
            "level {} valve flows must not be negative",
            level.id
        );
        for (kind, multiplier) in &level.event_flow_multipliers {
            ensure!(
                events.catalog.iter().any(|t| &t.kind == kind),
                "level {} tunes unknown event '{kind}'",
                level.id
            );
            ensure!(
                *multiplier >= 0.0,
                "level {} event '{kind}' multiplier must not be negative",
                level.id
            );
        }
    }
    Ok(())
}

fn validate_hydraulic(def: &HydraulicDef) -> Result<()> {
    ensure!(
        positive(def.geometry.area_m2) && positive(def.geometry.max_level_m),
        "geometry must have positive area and height"
    );
    ensure!(
        def.geometry.overflow_factor >= 1.0,
        "overflow factor must be at least 1"
    );
    if let InflowDef::ValveBank {
        valves,
        drift_interval_s,
        ..
    } = &def.inflow
    {
        ensure!(!valves.is_empty(), "valve bank has no valves");
        ensure!(
            positive(*drift_interval_s),
            "valve drift interval must be positive"
        );
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(dir: &Path, file_name: &str) -> Result<T> {
    let text = std::fs::read_to_string(dir.join(file_name))
        .with_context(|| format!("reading {file_name}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {file_name}"))
}

pub fn load_content(content_dir: &str) -> Result<GameContent> {
    let dir = Path::new(content_dir);
    let constants = read_json(dir, "constants.json")?;
    let gate_materials: GateMaterialsFile = read_json(dir, "gate_materials.json")?;
    let thermal_materials: ThermalMaterialsFile = read_json(dir, "thermal_materials.json")?;
    let scenarios: ScenariosFile = read_json(dir, "scenarios.json")?;
    let content = GameContent {
        content_version: scenarios.content_version,
        constants,
        gate_materials: gate_materials.materials,
        thermal_materials: thermal_materials.materials,
        scenarios: scenarios.scenarios,
    };
    validate_content(&content).with_context(|| format!("validating content in {content_dir}"))?;
    Ok(content)
}

/// Picks a scenario and level, listing what exists when either is unknown.
pub fn resolve_run(content: &GameContent, scenario_id: &str, level_id: u32) -> Result<RunConfig> {
    let id = ScenarioId(scenario_id.to_string());
    RunConfig::resolve(content, &id, level_id).with_context(|| {
        let known: Vec<String> = content
            .scenarios
            .iter()
            .map(|s| {
                let levels: Vec<String> = s.levels.iter().map(|l| l.id.to_string()).collect();
                format!("{} (levels {})", s.id, levels.join(", "))
            })
            .collect();
        format!(
            "unknown scenario '{scenario_id}' or level {level_id}; available: {}",
            known.join("; ")
        )
    })
}

/// Resolves the run and builds its starting state.
pub fn build_run(
    content: &GameContent,
    scenario_id: &str,
    level_id: u32,
    seed: u64,
) -> Result<(RunConfig, SimulationState)> {
    let config = resolve_run(content, scenario_id, level_id)?;
    let state = initial_state(&config, seed);
    Ok((config, state))
}

/// Uses the given seed, or draws a fresh one.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(rand::random)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::test_fixtures::{base_content, minimal_content, HEAT_LAB, RESERVOIR};
    use lab_core::EntityId;
    use serde_json::json;

    fn write_content(dir: &Path, content: &GameContent) {
        let write = |name: &str, value: serde_json::Value| {
            std::fs::write(dir.join(name), serde_json::to_string_pretty(&value).unwrap()).unwrap();
        };
        write("constants.json", json!(content.constants));
        write(
            "gate_materials.json",
            json!({ "materials": content.gate_materials }),
        );
        write(
            "thermal_materials.json",
            json!({ "materials": content.thermal_materials }),
        );
        write(
            "scenarios.json",
            json!({
                "content_version": content.content_version,
                "scenarios": content.scenarios,
            }),
        );
    }

    #[test]
    fn test_fixture_content_passes_validation() {
        validate_content(&base_content()).unwrap();
        validate_content(&minimal_content()).unwrap();
    }

    #[test]
    fn test_load_round_trips_written_content() {
        let dir = tempfile::tempdir().unwrap();
        write_content(dir.path(), &minimal_content());

        let loaded = load_content(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded.content_version, "minimal");
        assert_eq!(loaded.scenarios.len(), 1);
        assert_eq!(loaded.scenarios[0].entities.len(), 1);
        assert_eq!(loaded.gate_materials[0].id, "steel");
    }

    #[test]
    fn test_missing_file_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("constants.json"));
    }

    #[test]
    fn test_malformed_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write_content(dir.path(), &minimal_content());
        std::fs::write(dir.path().join("scenarios.json"), "{ not json").unwrap();
        let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing scenarios.json"));
    }

    #[test]
    fn test_invalid_content_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = minimal_content();
        content.scenarios[0].dt_s = 0.0;
        write_content(dir.path(), &content);
        let err = load_content(dir.path().to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("dt_s must be positive"));
    }

    #[test]
    fn test_unknown_rod_material_is_rejected() {
        let mut content = base_content();
        let heat = content
            .scenarios
            .iter_mut()
            .find(|s| s.id.0 == HEAT_LAB)
            .unwrap();
        for entity in &mut heat.entities {
            if let StockModel::Rod(rod) = &mut entity.model {
                rod.material_id = "unobtainium".to_string();
            }
        }
        let err = validate_content(&content).unwrap_err();
        assert!(format!("{err:#}").contains("unobtainium"));
    }

    #[test]
    fn test_duplicate_entity_ids_are_rejected() {
        let mut content = minimal_content();
        let scenario = &mut content.scenarios[0];
        let mut twin = scenario.entities[0].clone();
        twin.name = "Twin".to_string();
        scenario.entities.push(twin);
        let err = validate_content(&content).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate entity id"));
    }

    #[test]
    fn test_scenario_without_levels_is_rejected() {
        let mut content = minimal_content();
        content.scenarios[0].levels.clear();
        let err = validate_content(&content).unwrap_err();
        assert!(format!("{err:#}").contains("no levels"));
    }

    #[test]
    fn test_unknown_gate_material_is_rejected() {
        let mut content = minimal_content();
        content.scenarios[0].gate.material_id = "glass".to_string();
        assert!(validate_content(&content).is_err());
    }

    #[test]
    fn test_level_tuning_unknown_event_is_rejected() {
        let mut content = base_content();
        let scenario = content
            .scenarios
            .iter_mut()
            .find(|s| s.id.0 == RESERVOIR)
            .unwrap();
        scenario.levels[0]
            .event_flow_multipliers
            .insert("hailstorm".to_string(), 2.0);
        let err = validate_content(&content).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("reservoir_gate"));
        assert!(message.contains("unknown event 'hailstorm'"));
    }

    #[test]
    fn test_resolve_run_lists_available_scenarios() {
        let err = resolve_run(&base_content(), "nope", 1).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("reservoir_gate (levels 1, 2, 3)"));
        assert!(message.contains("heat_lab (levels 1)"));
    }

    #[test]
    fn test_build_run_starts_idle() {
        let (config, state) = build_run(&base_content(), RESERVOIR, 2, 9).unwrap();
        assert_eq!(config.level.id, 2);
        assert_eq!(state.meta.seed, 9);
        assert_eq!(state.meta.level_id, 2);
        assert!(!state.running);
        assert_eq!(state.entities[0].id, EntityId("reservoir".to_string()));
    }

    #[test]
    fn test_resolve_seed_keeps_explicit_seed() {
        assert_eq!(resolve_seed(Some(7)), 7);
    }
}
