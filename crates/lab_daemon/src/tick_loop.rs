use crate::state::AppState;
use lab_control::FixedStepAccumulator;
use lab_core::ClockPhase;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Wall-clock period between frames; whole simulation steps are released
/// from accumulated time on each frame.
const FRAME_PERIOD: Duration = Duration::from_millis(50);
/// Catch-up cap after a stall.
const MAX_STEPS_PER_FRAME: u32 = 8;

/// Drives the simulation at `time_scale` simulated seconds per real second.
///
/// While the run is not running the loop parks on `wake` instead of
/// polling, so nothing touches the state between `pause`/`reset` and the
/// next `start`.
pub async fn run_tick_loop(app: AppState, max_ticks: Option<u64>) {
    let step_s = app.sim.lock().config().dt();
    let mut accumulator = FixedStepAccumulator::new(step_s, MAX_STEPS_PER_FRAME);
    let mut interval = tokio::time::interval(FRAME_PERIOD);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = Instant::now();
    tracing::info!(step_s, time_scale = app.time_scale, "tick loop started");

    loop {
        let running = app.sim.lock().phase() == ClockPhase::Running;
        if !running {
            accumulator.reset();
            app.wake.notified().await;
            interval.reset();
            last = Instant::now();
            continue;
        }

        interval.tick().await;
        let now = Instant::now();
        let elapsed_s = now.duration_since(last).as_secs_f64() * app.time_scale;
        last = now;
        run_frame(&app, &mut accumulator, elapsed_s);

        let tick = app.sim.lock().snapshot().meta.tick;
        if max_ticks.is_some_and(|max| tick >= max) {
            tracing::info!(tick, "tick budget reached");
            break;
        }
    }
    tracing::info!("tick loop stopped");
}

/// Runs the steps that `elapsed_s` of simulated time makes due and publishes
/// one frame for them. Returns how many ticks actually ran.
pub fn run_frame(
    app: &AppState,
    accumulator: &mut FixedStepAccumulator,
    elapsed_s: f64,
) -> u32 {
    let due = accumulator.advance(elapsed_s);
    if due == 0 {
        return 0;
    }
    let mut sim = app.sim.lock();
    let mut notifications = Vec::new();
    let mut ran = 0;
    for _ in 0..due {
        if sim.phase() != ClockPhase::Running {
            break;
        }
        notifications.extend(sim.step());
        ran += 1;
    }
    if ran > 0 {
        app.publish(&sim, notifications);
    }
    ran
}
