//! Stochastic forcing: valve drift, inflow noise and transient events.
//!
//! Every draw goes through the caller's `Rng`, so a seeded generator makes
//! a whole run reproducible.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::physics::finite_or_zero;
use crate::{ActiveEvent, EventTemplate};

/// Float slack for cadence accumulators so 5 × 0.2 s still counts as 1 s.
const CADENCE_EPSILON: f64 = 1e-9;

/// Random walk of a valve opening (percent).
///
/// Usually a uniform step within `±band`; with probability `jump_probability`
/// the opening is instead redrawn over the whole range. Always in `[0, 100]`.
pub fn perturb_valve(
    current_opening: f64,
    band: f64,
    jump_probability: f64,
    rng: &mut impl Rng,
) -> f64 {
    let band = finite_or_zero(band).abs();
    let delta = if band > 0.0 {
        rng.gen_range(-band..=band)
    } else {
        0.0
    };
    let mut next = finite_or_zero(current_opening) + delta;
    if rng.gen_bool(finite_or_zero(jump_probability).clamp(0.0, 1.0)) {
        next = rng.gen_range(0.0..=100.0);
    }
    next.clamp(0.0, 100.0)
}

/// `base · (1 + u)` with `u` uniform in `[-band, band]`, floored at 0.
pub fn noisy_inflow(base_inflow: f64, noise_band: f64, rng: &mut impl Rng) -> f64 {
    let band = finite_or_zero(noise_band).abs();
    let noise = if band > 0.0 {
        rng.gen_range(-band..=band)
    } else {
        0.0
    };
    (finite_or_zero(base_inflow) * (1.0 + noise)).max(0.0)
}

/// Rolls for a new event. Callers only roll when their scope has no active event.
pub fn maybe_trigger_event(
    catalog: &[EventTemplate],
    trigger_probability: f64,
    rng: &mut impl Rng,
) -> Option<ActiveEvent> {
    if catalog.is_empty() {
        return None;
    }
    if !rng.gen_bool(finite_or_zero(trigger_probability).clamp(0.0, 1.0)) {
        return None;
    }
    let template = catalog.choose(rng)?;
    Some(instantiate(template, rng))
}

fn instantiate(template: &EventTemplate, rng: &mut impl Rng) -> ActiveEvent {
    let (low, high) = template.duration_range_s;
    let low = finite_or_zero(low).max(0.0);
    let high = finite_or_zero(high).max(low);
    let remaining_s = if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    };
    ActiveEvent {
        kind: template.kind.clone(),
        label: template.label.clone(),
        flow_multiplier: finite_or_zero(template.flow_multiplier).max(0.0),
        limit_multiplier: finite_or_zero(template.limit_multiplier).max(0.0),
        blocks_outflow: template.blocks_outflow,
        remaining_s,
    }
}

/// Counts the event down. `None` means it just ended; the caller reports that once.
pub fn decay_event(event: ActiveEvent, dt: f64) -> Option<ActiveEvent> {
    let remaining_s = event.remaining_s - finite_or_zero(dt);
    if remaining_s <= 0.0 {
        None
    } else {
        Some(ActiveEvent {
            remaining_s,
            ..event
        })
    }
}

/// Adds `dt` to a cadence accumulator and returns how many intervals elapsed.
pub fn due_firings(accumulator: &mut f64, dt: f64, interval: f64) -> u32 {
    *accumulator += finite_or_zero(dt).max(0.0);
    if interval <= 0.0 {
        *accumulator = 0.0;
        return 1;
    }
    let mut fired = 0;
    while *accumulator + CADENCE_EPSILON >= interval {
        *accumulator -= interval;
        fired += 1;
    }
    *accumulator = accumulator.max(0.0);
    fired
}

/// Inflow multiplier that ramps from 1 to `1 + ramp` over the target time.
pub fn stress_multiplier(elapsed_s: f64, target_s: f64, ramp: f64) -> f64 {
    if target_s <= 0.0 {
        return 1.0;
    }
    let ratio = (finite_or_zero(elapsed_s) / target_s).clamp(0.0, 1.0);
    1.0 + finite_or_zero(ramp) * ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn template(kind: &str, duration: (f64, f64)) -> EventTemplate {
        EventTemplate {
            kind: kind.to_string(),
            label: kind.to_string(),
            description: String::new(),
            flow_multiplier: 2.0,
            limit_multiplier: 1.0,
            blocks_outflow: false,
            duration_range_s: duration,
        }
    }

    #[test]
    fn valve_stays_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut opening = 50.0;
        for _ in 0..1_000 {
            opening = perturb_valve(opening, 20.0, 0.2, &mut rng);
            assert!((0.0..=100.0).contains(&opening));
        }
    }

    #[test]
    fn valve_without_noise_or_jumps_is_still() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        assert!((perturb_valve(42.0, 0.0, 0.0, &mut rng) - 42.0).abs() < f64::EPSILON);
        assert!((perturb_valve(140.0, 0.0, 0.0, &mut rng) - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn valve_step_respects_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..500 {
            let next = perturb_valve(50.0, 20.0, 0.0, &mut rng);
            assert!((30.0..=70.0).contains(&next));
        }
    }

    #[test]
    fn noisy_inflow_stays_within_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..500 {
            let q = noisy_inflow(1.0, 0.3, &mut rng);
            assert!((0.7..=1.3).contains(&q));
        }
        assert!(noisy_inflow(-2.0, 0.0, &mut rng).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_probability_never_triggers() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let catalog = vec![template("spike", (6.0, 12.0))];
        for _ in 0..500 {
            assert!(maybe_trigger_event(&catalog, 0.0, &mut rng).is_none());
        }
    }

    #[test]
    fn certain_trigger_draws_duration_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let catalog = vec![template("spike", (6.0, 12.0)), template("calm", (8.0, 8.0))];
        for _ in 0..200 {
            let event = maybe_trigger_event(&catalog, 1.0, &mut rng).unwrap();
            match event.kind.as_str() {
                "spike" => assert!((6.0..=12.0).contains(&event.remaining_s)),
                "calm" => assert!((event.remaining_s - 8.0).abs() < f64::EPSILON),
                other => panic!("unexpected kind {other}"),
            }
        }
    }

    #[test]
    fn empty_catalog_never_triggers() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(maybe_trigger_event(&[], 1.0, &mut rng).is_none());
    }

    #[test]
    fn event_decays_then_clears() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let event = maybe_trigger_event(&[template("calm", (1.0, 1.0))], 1.0, &mut rng).unwrap();
        let event = decay_event(event, 0.25).unwrap();
        assert!((event.remaining_s - 0.75).abs() < 1e-12);
        let event = decay_event(event, 0.5).unwrap();
        assert!(decay_event(event, 0.25).is_none());
    }

    #[test]
    fn cadence_fires_once_per_interval() {
        let mut acc = 0.0;
        let fired: u32 = (0..10).map(|_| due_firings(&mut acc, 0.2, 1.0)).sum();
        assert_eq!(fired, 2);
        let mut acc = 0.0;
        assert_eq!(due_firings(&mut acc, 0.25, 0.25), 1);
        assert_eq!(due_firings(&mut acc, 1.0, 0.25), 4);
    }

    #[test]
    fn stress_ramps_to_cap() {
        assert!((stress_multiplier(0.0, 90.0, 0.5) - 1.0).abs() < f64::EPSILON);
        assert!((stress_multiplier(45.0, 90.0, 0.5) - 1.25).abs() < 1e-12);
        assert!((stress_multiplier(500.0, 90.0, 0.5) - 1.5).abs() < 1e-12);
        assert!((stress_multiplier(10.0, 0.0, 0.5) - 1.0).abs() < f64::EPSILON);
    }
}
