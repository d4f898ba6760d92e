use lab_control::Simulation;
use lab_core::{entity_gauges, EntityGauge, NotificationEnvelope, SimulationState};
use parking_lot::Mutex;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

pub type SharedSim = Arc<Mutex<Simulation<ChaCha8Rng>>>;
pub type FrameTx = broadcast::Sender<Arc<Frame>>;

/// One published view of the run: the full state plus display gauges and
/// whatever notifications were produced since the previous frame.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub state: SimulationState,
    pub gauges: Vec<EntityGauge>,
    pub notifications: Vec<NotificationEnvelope>,
}

impl Frame {
    pub fn capture(
        sim: &Simulation<ChaCha8Rng>,
        notifications: Vec<NotificationEnvelope>,
    ) -> Self {
        let state = sim.snapshot();
        Self {
            gauges: entity_gauges(&state),
            state: (*state).clone(),
            notifications,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub sim: SharedSim,
    pub frame_tx: FrameTx,
    /// Simulated seconds per wall-clock second.
    pub time_scale: f64,
    /// Wakes the tick loop after `start`.
    pub wake: Arc<Notify>,
}

impl AppState {
    pub fn new(sim: Simulation<ChaCha8Rng>, time_scale: f64) -> Self {
        let (frame_tx, _) = broadcast::channel(256);
        Self {
            sim: Arc::new(Mutex::new(sim)),
            frame_tx,
            time_scale,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Sends a frame built from the locked simulation. Having no subscribers
    /// is not an error.
    pub fn publish(&self, sim: &Simulation<ChaCha8Rng>, notifications: Vec<NotificationEnvelope>) {
        let _ = self.frame_tx.send(Arc::new(Frame::capture(sim, notifications)));
    }
}
