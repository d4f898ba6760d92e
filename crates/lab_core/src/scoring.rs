//! Score policy.
//!
//! Per-tick rewards, the emergency penalty, and a fixed table of terminal rules
//! applied once when a run ends. Rules are additive and evaluated in table order.

use crate::{RunResult, RunStats, ScoringPolicy, TargetBand, TerminalScoringDef};

/// Everything a terminal rule may look at.
pub struct TerminalContext<'a> {
    pub result: RunResult,
    pub policy: &'a TerminalScoringDef,
    pub stats: &'a RunStats,
    pub target_time_s: f64,
}

type RuleFn = fn(&TerminalContext<'_>) -> i64;

struct TerminalRule {
    id: &'static str,
    /// Unscaled points; the level multiplier is applied afterwards.
    points: RuleFn,
}

const TERMINAL_RULES: &[TerminalRule] = &[
    TerminalRule {
        id: "OUTCOME_BASE",
        points: |ctx| match ctx.result {
            RunResult::Success => ctx.policy.success_base,
            RunResult::Fail => -ctx.policy.failure_penalty,
        },
    },
    TerminalRule {
        id: "UTILIZATION_EFFICIENCY",
        points: |ctx| {
            if ctx.result != RunResult::Success {
                return 0;
            }
            let peak = ctx.stats.max_utilization;
            let (low, high) = ctx.policy.sweet_spot;
            if peak > low && peak <= high {
                ctx.policy.sweet_spot_bonus
            } else if peak < ctx.policy.under_utilized_below {
                -ctx.policy.under_utilized_penalty
            } else if peak > high {
                -ctx.policy.over_utilized_penalty
            } else {
                0
            }
        },
    },
    TerminalRule {
        id: "EMERGENCY_USE",
        points: |ctx| {
            if ctx.result != RunResult::Success {
                return 0;
            }
            match ctx.stats.emergency_actions_used {
                0 => ctx.policy.no_emergency_bonus,
                uses => -ctx.policy.emergency_use_penalty * i64::from(uses),
            }
        },
    },
    TerminalRule {
        id: "NEAR_FAILURE_DWELL",
        points: |ctx| {
            let allowed = ctx.target_time_s * ctx.policy.near_failure_fraction;
            if ctx.result == RunResult::Success && ctx.stats.near_failure_time_s > allowed {
                -ctx.policy.near_failure_penalty
            } else {
                0
            }
        },
    },
];

/// Scaled points per terminal rule, in evaluation order.
pub fn terminal_breakdown(ctx: &TerminalContext<'_>, scale: i64) -> Vec<(&'static str, i64)> {
    TERMINAL_RULES
        .iter()
        .map(|rule| (rule.id, (rule.points)(ctx) * scale))
        .collect()
}

pub fn terminal_delta(ctx: &TerminalContext<'_>, scale: i64) -> i64 {
    terminal_breakdown(ctx, scale).iter().map(|(_, points)| points).sum()
}

/// Reward for one tick spent inside a target band.
pub fn band_reward(band: &TargetBand, level: f64) -> i64 {
    if level >= band.low && level <= band.high {
        band.points_per_tick
    } else {
        0
    }
}

/// Charged once per emergency relief.
pub fn emergency_penalty(policy: &ScoringPolicy, scale: i64) -> i64 {
    policy.emergency_penalty * scale
}

/// Applies the terminal adjustment exactly once per run.
///
/// Returns the delta added to `score`, or `None` when the run was already
/// finalized or the scenario has no terminal scoring.
pub fn finalize(
    score: &mut i64,
    stats: &mut RunStats,
    result: RunResult,
    policy: &ScoringPolicy,
    target_time_s: f64,
    scale: i64,
) -> Option<i64> {
    if stats.result_finalized {
        return None;
    }
    stats.result_finalized = true;
    let terminal = policy.terminal.as_ref()?;
    let ctx = TerminalContext {
        result,
        policy: terminal,
        stats,
        target_time_s,
    };
    let delta = terminal_delta(&ctx, scale);
    *score += delta;
    Some(delta)
}
