use std::sync::Arc;

use lab_core::{
    apply_command, initial_state, tick, ClockPhase, Command, CommandOutcome, EntityId, GateField,
    Notification, NotificationEnvelope, RunConfig, SimulationState,
};
use rand::{Rng, SeedableRng};

use crate::OperatorPolicy;

/// Owns the only mutable handle on a run.
///
/// Every operation replaces the published state with a new value derived
/// from the previous one, so a snapshot taken with [`Simulation::snapshot`]
/// is never aliased by later ticks.
pub struct Simulation<R> {
    config: RunConfig,
    state: Arc<SimulationState>,
    rng: R,
    seed: u64,
}

impl<R: Rng + SeedableRng> Simulation<R> {
    pub fn new(config: RunConfig, seed: u64) -> Self {
        let state = Arc::new(initial_state(&config, seed));
        Self {
            config,
            state,
            rng: R::seed_from_u64(seed),
            seed,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Cheap immutable handle on the current state.
    pub fn snapshot(&self) -> Arc<SimulationState> {
        Arc::clone(&self.state)
    }

    pub fn phase(&self) -> ClockPhase {
        self.state.phase()
    }

    /// No-op once the run has reached a terminal outcome.
    pub fn start(&mut self) {
        if self.state.game_over || self.state.running {
            return;
        }
        let mut next = (*self.state).clone();
        next.running = true;
        next.has_started = true;
        tracing::info!(
            scenario = %next.meta.scenario_id.0,
            level = next.meta.level_id,
            tick = next.meta.tick,
            "run started"
        );
        self.state = Arc::new(next);
    }

    pub fn pause(&mut self) {
        if !self.state.running {
            return;
        }
        let mut next = (*self.state).clone();
        next.running = false;
        tracing::info!(tick = next.meta.tick, "run paused");
        self.state = Arc::new(next);
    }

    /// Rebuilds the run from configuration and reseeds the generator, so a
    /// reset run replays exactly like a fresh one.
    pub fn reset(&mut self) {
        self.state = Arc::new(initial_state(&self.config, self.seed));
        self.rng = R::seed_from_u64(self.seed);
        tracing::info!(
            scenario = %self.config.scenario.id.0,
            level = self.config.level.id,
            "run reset"
        );
    }

    /// Switches to another level of the same scenario and resets.
    /// Returns `false` (and changes nothing) for an unknown level.
    pub fn select_level(&mut self, level_id: u32) -> bool {
        let Some(config) = self.config.with_level(level_id) else {
            tracing::debug!(level_id, "unknown level ignored");
            return false;
        };
        self.config = config;
        self.reset();
        true
    }

    pub fn set_control(&mut self, entity_id: &EntityId, percent: f64) -> CommandOutcome {
        self.apply(&Command::SetControl {
            entity_id: entity_id.clone(),
            percent,
        })
    }

    pub fn set_gate_field(&mut self, field: GateField, raw: &str) -> CommandOutcome {
        self.apply(&Command::SetGateField {
            field,
            raw: raw.to_string(),
        })
    }

    pub fn set_gate_material(&mut self, material_id: &str) -> CommandOutcome {
        self.apply(&Command::SetGateMaterial {
            material_id: material_id.to_string(),
        })
    }

    pub fn emergency_relief(&mut self, entity_id: &EntityId) -> CommandOutcome {
        self.apply(&Command::EmergencyRelief {
            entity_id: entity_id.clone(),
        })
    }

    pub fn apply(&mut self, command: &Command) -> CommandOutcome {
        let (next, outcome) = apply_command(&self.state, command, &self.config);
        match &outcome {
            CommandOutcome::Applied(_) => self.state = Arc::new(next),
            CommandOutcome::Ignored => tracing::debug!(?command, "command ignored"),
        }
        outcome
    }

    /// One fixed step. Does nothing unless the run is running.
    pub fn step(&mut self) -> Vec<NotificationEnvelope> {
        let (next, notifications) = tick(&self.state, &self.config, &mut self.rng);
        for envelope in &notifications {
            match &envelope.notification {
                Notification::EntityFailed { entity_id, reason } => {
                    tracing::info!(
                        entity = %entity_id.0,
                        ?reason,
                        tick = envelope.tick,
                        "entity failed"
                    );
                }
                Notification::RunFinished {
                    result,
                    score_delta,
                } => {
                    tracing::info!(
                        ?result,
                        score_delta,
                        score = next.score,
                        tick = envelope.tick,
                        "run finished"
                    );
                }
                _ => {}
            }
        }
        self.state = Arc::new(next);
        notifications
    }

    /// Lets `policy` issue its commands against the current state, then steps.
    pub fn drive(&mut self, policy: &mut impl OperatorPolicy) -> Vec<NotificationEnvelope> {
        let commands = policy.decide(&self.state, &self.config);
        let mut notifications = Vec::new();
        for command in &commands {
            if let CommandOutcome::Applied(mut emitted) = self.apply(command) {
                notifications.append(&mut emitted);
            }
        }
        notifications.extend(self.step());
        notifications
    }
}
