use super::*;

fn quiet_reservoir(level: u32) -> RunConfig {
    quiet(run_config(RESERVOIR, level))
}

#[test]
fn test_valve_bank_sets_inflow() {
    let config = quiet_reservoir(1);
    let state = started(initial_state(&config, 1));
    let mut rng = make_rng();

    let (state, _) = run_ticks(state, &config, &mut rng, 1);
    // 3·0.4 + 2·0.2 + 1·0.1
    let reservoir = &state.entities[0];
    assert!((reservoir.readings.inflow - 1.7).abs() < 1e-12);
    assert!(reservoir.readings.outflow.abs() < f64::EPSILON);
    assert!((reservoir.stock - (25.0 + 1.7 * 0.2)).abs() < 1e-9);
}

#[test]
fn test_inflow_ramps_up_toward_target_time() {
    let shipped = run_config(RESERVOIR, 1);
    assert!((shipped.scenario.stress_ramp - 0.5).abs() < f64::EPSILON);
    let mut config = quiet(shipped.clone());
    config.scenario.stress_ramp = shipped.scenario.stress_ramp;
    let state = initial_state(&config, 1);
    let state = started(set_gate(&state, &config, GateField::LimitForce, "10000"));
    let mut rng = make_rng();

    let (state, _) = run_ticks(state, &config, &mut rng, 1);
    assert!((state.entities[0].readings.inflow - 1.7).abs() < 1e-12);

    // Tick 199 starts at t = 39.6 s: 1 + 0.5 · 39.6 / 40.
    let (state, _) = run_ticks(state, &config, &mut rng, 198);
    assert!(!state.game_over);
    assert!((state.entities[0].readings.inflow - 1.7 * 1.495).abs() < 1e-9);
}

#[test]
fn test_levels_set_their_own_valve_maxima() {
    for (level, expected) in [(1, [3.0, 2.0, 1.0]), (2, [4.0, 3.0, 2.0]), (3, [5.0, 4.0, 3.0])] {
        let state = initial_state(&run_config(RESERVOIR, level), 1);
        let maxima: Vec<f64> = state.entities[0]
            .valve_bank
            .as_ref()
            .unwrap()
            .valves
            .iter()
            .map(|v| v.max_flow_m3_s)
            .collect();
        assert_eq!(maxima, expected, "level {level}");
    }

    // Level 2 at the initial openings: 4·0.4 + 3·0.2 + 2·0.1
    let config = quiet_reservoir(2);
    let state = started(initial_state(&config, 1));
    let (state, _) = run_ticks(state, &config, &mut make_rng(), 1);
    assert!((state.entities[0].readings.inflow - 2.4).abs() < 1e-12);
}

#[test]
fn test_extreme_rain_strengthens_with_level() {
    for (level, expected) in [(1, 1.6), (2, 1.7), (3, 1.8)] {
        let mut config = run_config(RESERVOIR, level);
        config.level.event_trigger_probability = 1.0;
        config
            .scenario
            .events
            .catalog
            .retain(|t| t.kind == "extreme_rain");
        let state = started(initial_state(&config, 1));
        let mut rng = make_rng();

        // First roll is due after one second.
        let (state, _) = run_ticks(state, &config, &mut rng, 5);
        let rain = state.global_event.as_ref().unwrap();
        assert!((rain.flow_multiplier - expected).abs() < 1e-12, "level {level}");
    }
}

#[test]
fn test_level_one_survives_and_scores_terminal_bonus() {
    let config = quiet_reservoir(1);
    let state = started(initial_state(&config, 1));
    let mut rng = make_rng();

    let (state, log) = run_to_end(state, &config, &mut rng, 1_000);

    assert_eq!(state.result, Some(RunResult::Success));
    assert_eq!(state.meta.tick, 200);
    assert!(!state.running);
    // Peak utilization ≈ 0.44: no efficiency points. 100 base + 10 clean run.
    assert!((state.stats.max_utilization - 132_435.0 / 300_000.0).abs() < 1e-9);
    assert_eq!(finished(&log), vec![(RunResult::Success, 110)]);
    assert_eq!(state.score, 110);
}

#[test]
fn test_sweet_spot_gate_earns_bonus() {
    let config = quiet_reservoir(1);
    let state = initial_state(&config, 1);
    let state = started(set_gate(&state, &config, GateField::LimitForce, "150"));
    let mut rng = make_rng();

    let (state, _) = run_to_end(state, &config, &mut rng, 1_000);

    assert_eq!(state.result, Some(RunResult::Success));
    assert_eq!(state.score, 140);
}

#[test]
fn test_weak_gate_fails_instantly_without_grace() {
    let config = quiet_reservoir(1);
    let state = initial_state(&config, 1);
    let state = started(set_gate(&state, &config, GateField::LimitForce, "100"));
    let mut rng = make_rng();

    let (state, log) = run_to_end(state, &config, &mut rng, 1_000);

    assert_eq!(
        failures(&log),
        vec![(entity_id("reservoir"), FailureReason::Overpressure)]
    );
    // The first tick over the limit is the failing tick.
    assert!(state.entities[0].readings.utilization > 1.0);
    assert!(state.entities[0].previous_utilization > 1.0);
    assert_eq!(state.result, Some(RunResult::Fail));
    assert_eq!(state.score, -50);
    assert!(state.clock_time_s < config.level.target_time_s);
}

#[test]
fn test_level_three_scales_penalty_and_geometry() {
    let config = quiet_reservoir(3);
    let state = initial_state(&config, 1);
    // 25 m³ over 60 m²
    assert!((state.entities[0].derived_level - 25.0 / 60.0).abs() < 1e-12);

    let state = started(set_gate(&state, &config, GateField::LimitForce, "50"));
    let mut rng = make_rng();
    let (state, _) = run_to_end(state, &config, &mut rng, 2_000);
    assert_eq!(state.result, Some(RunResult::Fail));
    assert_eq!(state.score, -150);
}

#[test]
fn test_global_event_is_rolled_once_per_second() {
    let mut config = run_config(RESERVOIR, 1);
    config.level.event_trigger_probability = 1.0;
    let state = started(initial_state(&config, 1));
    let mut rng = make_rng();

    let (state, log) = run_ticks(state, &config, &mut rng, 4);
    assert!(log.is_empty());
    assert!(state.global_event.is_none());

    let (state, log) = run_ticks(state, &config, &mut rng, 1);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].tick, 4);
    assert!(matches!(
        log[0].notification,
        Notification::EventStarted {
            entity_id: None,
            ..
        }
    ));
    assert!(state.global_event.is_some());
    assert!(state.entities.iter().all(|e| e.active_event.is_none()));
}

#[test]
fn test_at_most_one_global_event_at_a_time() {
    let mut config = run_config(RESERVOIR, 1);
    config.level.event_trigger_probability = 1.0;
    config.scenario.gate.limit_force_kn = 10_000.0;
    let mut state = started(initial_state(&config, 9));
    let mut rng = ChaCha8Rng::seed_from_u64(9);

    let mut open = 0_i32;
    for _ in 0..200 {
        let (next, notifications) = tick(&state, &config, &mut rng);
        state = next;
        for n in &notifications {
            match n.notification {
                Notification::EventStarted { .. } => open += 1,
                Notification::EventEnded { .. } => open -= 1,
                _ => {}
            }
            assert!((0..=1).contains(&open));
        }
        assert_eq!(open == 1, state.global_event.is_some());
    }
}

#[test]
fn test_microcracks_lower_effective_limit() {
    let config = quiet_reservoir(1);
    let mut state = started(initial_state(&config, 1));
    state.global_event = Some(ActiveEvent {
        kind: "microcracks".to_string(),
        label: "microcracks".to_string(),
        flow_multiplier: 1.0,
        limit_multiplier: 0.7,
        blocks_outflow: false,
        remaining_s: 10.0,
    });
    let mut rng = make_rng();

    let (state, _) = run_ticks(state, &config, &mut rng, 1);
    let readings = &state.entities[0].readings;
    assert!((readings.effective_limit_n - 210_000.0).abs() < 1e-6);
    assert!((readings.utilization - readings.force_n / 210_000.0).abs() < 1e-12);
}

#[test]
fn test_valves_drift_within_range() {
    let config = run_config(RESERVOIR, 2);
    let state = started(initial_state(&config, 3));
    let before: Vec<f64> = state.entities[0]
        .valve_bank
        .as_ref()
        .unwrap()
        .valves
        .iter()
        .map(|v| v.opening_pct)
        .collect();
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    // Four ticks is 0.8 s: exactly one drift step.
    let (state, _) = run_ticks(state, &config, &mut rng, 4);
    let after: Vec<f64> = state.entities[0]
        .valve_bank
        .as_ref()
        .unwrap()
        .valves
        .iter()
        .map(|v| v.opening_pct)
        .collect();
    assert_ne!(before, after);
    assert!(after.iter().all(|o| (0.0..=100.0).contains(o)));
}
