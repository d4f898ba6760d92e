use lab_core::{Command, RunConfig, SimulationState, StockModel};

mod cadence;
mod driver;

pub use cadence::FixedStepAccumulator;
pub use driver::Simulation;

/// Anything that issues control commands between ticks: a scripted
/// operator, a test harness, or the HTTP bridge.
pub trait OperatorPolicy {
    fn decide(&mut self, state: &SimulationState, config: &RunConfig) -> Vec<Command>;
}

/// Rule-based operator for headless runs:
/// 1. Relieve a relief-capable reservoir whose utilization is critical.
/// 2. Open a gate orifice fully once utilization passes `open_above`.
/// 3. Shut it again when the level drops below `close_below_level_m`.
/// 4. Hold thermal entities inside their target band (bang-bang).
pub struct ReliefOperator {
    pub relief_above: f64,
    pub open_above: f64,
    pub close_below_level_m: f64,
}

impl Default for ReliefOperator {
    fn default() -> Self {
        Self {
            relief_above: 0.95,
            open_above: 0.6,
            close_below_level_m: 0.5,
        }
    }
}

/// Emits a `SetControl` only when it changes something.
fn control_command(entity: &lab_core::SimulatedEntity, percent: f64) -> Option<Command> {
    if (entity.control_input - percent).abs() < f64::EPSILON {
        return None;
    }
    Some(Command::SetControl {
        entity_id: entity.id.clone(),
        percent,
    })
}

impl OperatorPolicy for ReliefOperator {
    fn decide(&mut self, state: &SimulationState, config: &RunConfig) -> Vec<Command> {
        if state.game_over {
            return Vec::new();
        }
        let mut commands = Vec::new();

        for (def, entity) in config.scenario.entities.iter().zip(&state.entities) {
            if entity.failed {
                continue;
            }
            let utilization = entity.readings.utilization;
            match &def.model {
                StockModel::Hydraulic(hydraulic) => {
                    // Priority 1: spill before the gate gives way.
                    if hydraulic.relief
                        && utilization > self.relief_above
                        && entity.derived_level > config.constants.relief_min_level_m
                    {
                        commands.push(Command::EmergencyRelief {
                            entity_id: entity.id.clone(),
                        });
                        continue;
                    }
                    if hydraulic.outflow.is_none() {
                        continue;
                    }
                    // Priority 2 and 3: hysteresis between full open and shut.
                    let target = if utilization > self.open_above {
                        Some(100.0)
                    } else if entity.derived_level < self.close_below_level_m {
                        Some(0.0)
                    } else {
                        None
                    };
                    commands.extend(target.and_then(|pct| control_command(entity, pct)));
                }
                StockModel::ThermalNode(_) | StockModel::Rod(_) => {
                    let Some(band) = &def.target_band else {
                        continue;
                    };
                    let target = if entity.derived_level > band.high {
                        Some(0.0)
                    } else if entity.derived_level < band.low {
                        Some(100.0)
                    } else {
                        None
                    };
                    commands.extend(target.and_then(|pct| control_command(entity, pct)));
                }
            }
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lab_core::test_fixtures::{quiet, run_config, HEAT_LAB, MULTI_TANK, RESERVOIR};
    use lab_core::{initial_state, EntityId};

    fn controls(commands: &[Command]) -> Vec<(String, f64)> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::SetControl { entity_id, percent } => {
                    Some((entity_id.0.clone(), *percent))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_operator_opens_gate_under_load() {
        let config = quiet(run_config(MULTI_TANK, 1));
        let mut state = initial_state(&config, 1);
        state.entities[4].readings.utilization = 0.8;
        let mut operator = ReliefOperator {
            open_above: 0.7,
            ..ReliefOperator::default()
        };

        let commands = operator.decide(&state, &config);

        assert_eq!(controls(&commands), vec![("tank_05".to_string(), 100.0)]);
    }

    #[test]
    fn test_operator_shuts_gate_when_low() {
        let config = quiet(run_config(MULTI_TANK, 1));
        let mut state = initial_state(&config, 1);
        state.entities[0].derived_level = 0.3;
        let mut operator = ReliefOperator {
            open_above: 0.7,
            ..ReliefOperator::default()
        };

        let commands = operator.decide(&state, &config);

        assert_eq!(controls(&commands), vec![("tank_01".to_string(), 0.0)]);
    }

    #[test]
    fn test_operator_requests_relief_for_reservoir() {
        let config = quiet(run_config(RESERVOIR, 1));
        let mut state = initial_state(&config, 1);
        state.entities[0].readings.utilization = 0.97;

        let commands = ReliefOperator::default().decide(&state, &config);

        let reservoir = EntityId("reservoir".to_string());
        assert!(matches!(
            commands.as_slice(),
            [Command::EmergencyRelief { entity_id }] if *entity_id == reservoir
        ));
    }

    #[test]
    fn test_operator_holds_thermal_band() {
        let config = quiet(run_config(HEAT_LAB, 1));
        let state = initial_state(&config, 1);

        // Plate at 80 °C is above its band (heater already off); rod centre at
        // 20 °C is below its band.
        let commands = ReliefOperator::default().decide(&state, &config);

        assert_eq!(controls(&commands), vec![("rod".to_string(), 100.0)]);
    }

    #[test]
    fn test_operator_is_silent_after_game_over() {
        let config = quiet(run_config(MULTI_TANK, 1));
        let mut state = initial_state(&config, 1);
        state.entities[0].readings.utilization = 0.9;
        state.game_over = true;

        assert!(ReliefOperator::default().decide(&state, &config).is_empty());
    }
}
