/// Slack when comparing pending time against one step.
const CADENCE_EPSILON: f64 = 1e-9;

/// Converts elapsed wall-clock time into whole simulation steps.
///
/// Leftover time carries over to the next call. When the caller falls far
/// behind, at most `max_steps` are released per call and the backlog is
/// dropped, so one slow frame never turns into a burst of catch-up ticks.
#[derive(Debug, Clone)]
pub struct FixedStepAccumulator {
    step_s: f64,
    pending_s: f64,
    max_steps: u32,
}

impl FixedStepAccumulator {
    pub fn new(step_s: f64, max_steps: u32) -> Self {
        Self {
            step_s,
            pending_s: 0.0,
            max_steps: max_steps.max(1),
        }
    }

    pub fn step_s(&self) -> f64 {
        self.step_s
    }

    /// Adds `elapsed_s` and returns how many steps are now due.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn advance(&mut self, elapsed_s: f64) -> u32 {
        if !(self.step_s.is_finite() && self.step_s > 0.0) {
            return 0;
        }
        if elapsed_s.is_finite() && elapsed_s > 0.0 {
            self.pending_s += elapsed_s;
        }
        let due = ((self.pending_s + CADENCE_EPSILON) / self.step_s).floor();
        if due >= f64::from(self.max_steps) {
            self.pending_s = 0.0;
            return self.max_steps;
        }
        let due = due as u32;
        self.pending_s = (self.pending_s - f64::from(due) * self.step_s).max(0.0);
        due
    }

    /// Drops any pending time, e.g. after a pause.
    pub fn reset(&mut self) {
        self.pending_s = 0.0;
    }
}
