use crate::state::{AppState, Frame};
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{
        sse::{Event, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use lab_control::Simulation;
use lab_core::{entity_gauges, CommandOutcome, EntityId, GateField, NotificationEnvelope};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[cfg(test)]
pub fn make_router(state: AppState) -> Router {
    make_router_with_cors(state, HeaderValue::from_static("http://localhost:5173"))
}

pub fn make_router_with_cors(state: AppState, cors_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/meta", get(meta_handler))
        .route("/api/v1/snapshot", get(snapshot_handler))
        .route("/api/v1/stream", get(stream_handler))
        .route("/api/v1/start", post(start_handler))
        .route("/api/v1/pause", post(pause_handler))
        .route("/api/v1/reset", post(reset_handler))
        .route("/api/v1/level", post(level_handler))
        .route("/api/v1/control", post(control_handler))
        .route("/api/v1/gate", post(gate_handler))
        .route("/api/v1/material", post(material_handler))
        .route("/api/v1/relief", post(relief_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

pub async fn meta_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let sim = app_state.sim.lock();
    let config = sim.config();
    let state = sim.snapshot();
    let levels: Vec<serde_json::Value> = config
        .scenario
        .levels
        .iter()
        .map(|level| {
            serde_json::json!({
                "id": level.id,
                "name": level.name,
                "target_time_s": level.target_time_s,
            })
        })
        .collect();
    let entities: Vec<serde_json::Value> = config
        .scenario
        .entities
        .iter()
        .map(|entity| serde_json::json!({"id": entity.id, "name": entity.name}))
        .collect();
    Json(serde_json::json!({
        "scenario": config.scenario.id,
        "scenario_name": config.scenario.name,
        "level": config.level.id,
        "levels": levels,
        "entities": entities,
        "gate_materials": config.gate_materials,
        "target_time_s": config.level.target_time_s,
        "dt_s": config.dt(),
        "seed": sim.seed(),
        "content_version": config.content_version,
        "tick": state.meta.tick,
        "phase": state.phase(),
        "time_scale": app_state.time_scale,
    }))
}

pub async fn snapshot_handler(
    State(app_state): State<AppState>,
) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let state = app_state.sim.lock().snapshot();
    let body = serde_json::json!({
        "gauges": entity_gauges(&state),
        "state": &*state,
    });
    match serde_json::to_string(&body) {
        Ok(json) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        ),
        Err(err) => {
            tracing::error!("snapshot serialization failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                r#"{"error":"serialization failed"}"#.to_string(),
            )
        }
    }
}

pub async fn stream_handler(
    State(app_state): State<AppState>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = app_state.frame_tx.subscribe();
    let sim = app_state.sim.clone();

    let stream = async_stream::stream! {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
        heartbeat.tick().await; // discard the immediate first tick
        let mut flush = tokio::time::interval(Duration::from_millis(50));
        flush.tick().await; // discard the immediate first tick
        let mut latest: Option<Arc<Frame>> = None;
        let mut pending: Vec<NotificationEnvelope> = Vec::new();
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(frame) => {
                            pending.extend(frame.notifications.iter().cloned());
                            latest = Some(frame);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "stream subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = flush.tick() => {
                    if let Some(frame) = latest.take() {
                        let data = serde_json::json!({
                            "state": frame.state,
                            "gauges": frame.gauges,
                            "notifications": pending,
                        });
                        pending.clear();
                        yield Ok(Event::default().event("frame").data(data.to_string()));
                    }
                }
                _ = heartbeat.tick() => {
                    let (tick, phase) = {
                        let sim = sim.lock();
                        (sim.snapshot().meta.tick, sim.phase())
                    };
                    let hb = serde_json::json!({"heartbeat": true, "tick": tick, "phase": phase});
                    yield Ok(Event::default().event("heartbeat").data(hb.to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("ping"),
    )
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

fn lifecycle_response(sim: &Simulation<ChaCha8Rng>) -> Json<serde_json::Value> {
    let state = sim.snapshot();
    Json(serde_json::json!({
        "phase": state.phase(),
        "tick": state.meta.tick,
        "level": state.meta.level_id,
    }))
}

/// Publishes a frame for an applied command so subscribers see the change
/// before the next tick.
fn command_response(
    app_state: &AppState,
    sim: &Simulation<ChaCha8Rng>,
    outcome: CommandOutcome,
) -> Json<serde_json::Value> {
    match outcome {
        CommandOutcome::Applied(notifications) => {
            let body = serde_json::json!({
                "applied": true,
                "phase": sim.phase(),
                "notifications": notifications,
            });
            app_state.publish(sim, notifications);
            Json(body)
        }
        CommandOutcome::Ignored => Json(serde_json::json!({
            "applied": false,
            "phase": sim.phase(),
        })),
    }
}

pub async fn start_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    sim.start();
    app_state.wake.notify_one();
    app_state.publish(&sim, Vec::new());
    lifecycle_response(&sim)
}

pub async fn pause_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    sim.pause();
    app_state.publish(&sim, Vec::new());
    lifecycle_response(&sim)
}

pub async fn reset_handler(State(app_state): State<AppState>) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    sim.reset();
    app_state.publish(&sim, Vec::new());
    lifecycle_response(&sim)
}

#[derive(Deserialize)]
pub struct LevelRequest {
    pub level_id: u32,
}

pub async fn level_handler(
    State(app_state): State<AppState>,
    Json(request): Json<LevelRequest>,
) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    let applied = sim.select_level(request.level_id);
    if applied {
        app_state.publish(&sim, Vec::new());
    }
    let Json(mut body) = lifecycle_response(&sim);
    body["applied"] = serde_json::Value::Bool(applied);
    Json(body)
}

#[derive(Deserialize)]
pub struct ControlRequest {
    pub entity_id: String,
    pub percent: f64,
}

pub async fn control_handler(
    State(app_state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    let outcome = sim.set_control(&EntityId(request.entity_id), request.percent);
    command_response(&app_state, &sim, outcome)
}

#[derive(Deserialize)]
pub struct GateRequest {
    pub field: GateField,
    /// Raw text as typed; coerced by the core.
    pub value: String,
}

pub async fn gate_handler(
    State(app_state): State<AppState>,
    Json(request): Json<GateRequest>,
) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    let outcome = sim.set_gate_field(request.field, &request.value);
    command_response(&app_state, &sim, outcome)
}

#[derive(Deserialize)]
pub struct MaterialRequest {
    pub material_id: String,
}

pub async fn material_handler(
    State(app_state): State<AppState>,
    Json(request): Json<MaterialRequest>,
) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    let outcome = sim.set_gate_material(&request.material_id);
    command_response(&app_state, &sim, outcome)
}

#[derive(Deserialize)]
pub struct ReliefRequest {
    pub entity_id: String,
}

pub async fn relief_handler(
    State(app_state): State<AppState>,
    Json(request): Json<ReliefRequest>,
) -> Json<serde_json::Value> {
    let mut sim = app_state.sim.lock();
    let outcome = sim.emergency_relief(&EntityId(request.entity_id));
    command_response(&app_state, &sim, outcome)
}
