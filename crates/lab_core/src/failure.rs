//! Debounced failure conditions.
//!
//! Each condition runs `Safe → Breaching(elapsed) → Failed` per entity. A
//! breach accumulates `dt` on every tick it holds, including the first, and
//! fails once the accumulated time exceeds the grace period. Clearing for a
//! single tick resets the timer.

use smallvec::SmallVec;

use crate::{
    BreachPhase, ConditionDef, ConditionId, ConditionKind, DebounceTimer, EntityId,
    FailureReason, SimulatedEntity,
};

/// Tick-local aggregate: at most one failure and one save per tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickResult {
    pub first_failure: Option<(EntityId, FailureReason)>,
    pub first_save: Option<EntityId>,
}

impl TickResult {
    /// Entities are visited in index order, so the first writer is the lowest index.
    pub fn record_failure(&mut self, entity_id: &EntityId, reason: FailureReason) {
        if self.first_failure.is_none() {
            self.first_failure = Some((entity_id.clone(), reason));
        }
    }

    pub fn record_save(&mut self, entity_id: &EntityId) {
        if self.first_save.is_none() {
            self.first_save = Some(entity_id.clone());
        }
    }
}

/// Advances one condition's state machine by one tick.
pub fn advance(phase: BreachPhase, breaching: bool, dt: f64, grace_period_s: f64) -> BreachPhase {
    match phase {
        BreachPhase::Failed => BreachPhase::Failed,
        _ if !breaching => BreachPhase::Safe,
        BreachPhase::Safe => escalate(dt, grace_period_s),
        BreachPhase::Breaching { elapsed_s } => escalate(elapsed_s + dt, grace_period_s),
    }
}

fn escalate(elapsed_s: f64, grace_period_s: f64) -> BreachPhase {
    if elapsed_s > grace_period_s {
        BreachPhase::Failed
    } else {
        BreachPhase::Breaching { elapsed_s }
    }
}

/// Instantaneous check of one condition against an entity's latest level and utilization.
pub fn is_breached(kind: &ConditionKind, level: f64, utilization: f64) -> bool {
    match *kind {
        ConditionKind::UtilizationAbove { threshold } => utilization > threshold,
        ConditionKind::LevelBelow { threshold } => level < threshold,
        ConditionKind::LevelAbove { threshold } => level > threshold,
    }
}

/// Fresh `Safe` timers, one per configured condition.
pub fn initial_timers(conditions: &[ConditionDef]) -> SmallVec<[DebounceTimer; 2]> {
    conditions
        .iter()
        .map(|condition| DebounceTimer {
            condition: condition.id.clone(),
            phase: BreachPhase::Safe,
        })
        .collect()
}

/// Accumulated breach time for a condition, 0 when safe or unknown.
pub fn elapsed_for(entity: &SimulatedEntity, condition: &ConditionId) -> f64 {
    entity
        .debounce
        .iter()
        .find(|timer| &timer.condition == condition)
        .map_or(0.0, |timer| match timer.phase {
            BreachPhase::Breaching { elapsed_s } => elapsed_s,
            BreachPhase::Safe | BreachPhase::Failed => 0.0,
        })
}

/// Updates every timer on a live entity and marks it failed if one expires.
///
/// All timers advance before any verdict; when several expire on the same tick
/// the earliest condition in configuration order names the failure. Returns
/// the reason only on the tick the entity fails.
pub fn evaluate_entity(
    entity: &mut SimulatedEntity,
    conditions: &[ConditionDef],
    dt: f64,
) -> Option<FailureReason> {
    if entity.failed {
        return None;
    }
    if entity.debounce.len() != conditions.len() {
        entity.debounce = initial_timers(conditions);
    }

    let mut first_expired = None;
    for (condition, timer) in conditions.iter().zip(entity.debounce.iter_mut()) {
        let breaching = is_breached(
            &condition.kind,
            entity.derived_level,
            entity.readings.utilization,
        );
        timer.phase = advance(timer.phase, breaching, dt, condition.grace_period_s);
        if timer.phase == BreachPhase::Failed && first_expired.is_none() {
            first_expired = Some(condition.reason);
        }
    }

    let reason = first_expired?;
    entity.failed = true;
    entity.failure_reason = Some(reason);
    Some(reason)
}
