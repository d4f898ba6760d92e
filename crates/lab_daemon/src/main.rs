mod routes;
mod state;
mod tick_loop;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use lab_control::Simulation;
use lab_world::{load_content, resolve_run, resolve_seed};
use rand_chacha::ChaCha8Rng;
use state::AppState;

#[derive(Parser)]
#[command(name = "lab_daemon", about = "Serves a live fluid and heat lab run over HTTP")]
struct Cli {
    #[arg(long, default_value = "./content")]
    content_dir: String,
    #[arg(long, default_value = "multi_tank")]
    scenario: String,
    #[arg(long, default_value_t = 1)]
    level: u32,
    /// RNG seed. A random one is drawn when omitted.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 3001)]
    port: u16,
    /// Simulated seconds per wall-clock second.
    #[arg(long, default_value_t = 1.0)]
    time_scale: f64,
    /// Stop the tick loop after this many ticks.
    #[arg(long)]
    max_ticks: Option<u64>,
    /// Start the run immediately instead of waiting for POST /api/v1/start.
    #[arg(long)]
    autostart: bool,
    #[arg(long, default_value = "http://localhost:5173")]
    cors_origin: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(
        cli.time_scale.is_finite() && cli.time_scale > 0.0,
        "--time-scale must be a positive number"
    );
    let cors_origin: HeaderValue = cli
        .cors_origin
        .parse()
        .with_context(|| format!("invalid --cors-origin '{}'", cli.cors_origin))?;

    let content = load_content(&cli.content_dir)?;
    let config = resolve_run(&content, &cli.scenario, cli.level)?;
    let seed = resolve_seed(cli.seed);
    let mut sim = Simulation::<ChaCha8Rng>::new(config, seed);
    if cli.autostart {
        sim.start();
    }
    tracing::info!(
        scenario = %cli.scenario,
        level = cli.level,
        seed,
        content_version = %content.content_version,
        "run loaded"
    );

    let app_state = AppState::new(sim, cli.time_scale);
    tokio::spawn(tick_loop::run_tick_loop(app_state.clone(), cli.max_ticks));

    let router = routes::make_router_with_cors(app_state, cors_origin);
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("listening on http://{addr}");
    axum::serve(listener, router).await.context("serving HTTP")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::routes::make_router;
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, Router};
    use http_body_util::BodyExt;
    use lab_core::test_fixtures::{quiet, run_config, MULTI_TANK, RESERVOIR};
    use tower::ServiceExt;

    fn make_test_state() -> AppState {
        AppState::new(Simulation::new(quiet(run_config(MULTI_TANK, 1)), 0), 1.0)
    }

    async fn get_json(app: Router, uri: &str) -> serde_json::Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> serde_json::Value {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn post_empty(app: Router, uri: &str) -> serde_json::Value {
        post_json(app, uri, serde_json::json!({})).await
    }

    #[tokio::test]
    async fn test_meta_describes_the_run() {
        let json = get_json(make_router(make_test_state()), "/api/v1/meta").await;
        assert_eq!(json["scenario"], "multi_tank");
        assert_eq!(json["level"], 1);
        assert_eq!(json["tick"], 0);
        assert_eq!(json["phase"], "Idle");
        assert_eq!(json["entities"].as_array().unwrap().len(), 10);
        assert_eq!(json["levels"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_carries_state_and_gauges() {
        let json = get_json(make_router(make_test_state()), "/api/v1/snapshot").await;
        assert_eq!(json["state"]["meta"]["tick"], 0);
        assert_eq!(json["gauges"].as_array().unwrap().len(), 10);
        assert_eq!(json["gauges"][0]["entity_id"], "tank_01");
    }

    #[tokio::test]
    async fn test_start_pause_reset_cycle() {
        let state = make_test_state();

        let json = post_empty(make_router(state.clone()), "/api/v1/start").await;
        assert_eq!(json["phase"], "Running");

        state.sim.lock().step();
        let json = post_empty(make_router(state.clone()), "/api/v1/pause").await;
        assert_eq!(json["phase"], "Paused");
        assert_eq!(json["tick"], 1);

        let json = post_empty(make_router(state), "/api/v1/reset").await;
        assert_eq!(json["phase"], "Idle");
        assert_eq!(json["tick"], 0);
    }

    #[tokio::test]
    async fn test_control_applies_and_publishes() {
        let state = make_test_state();
        let mut rx = state.frame_tx.subscribe();

        let json = post_json(
            make_router(state.clone()),
            "/api/v1/control",
            serde_json::json!({"entity_id": "tank_03", "percent": 250.0}),
        )
        .await;

        assert_eq!(json["applied"], true);
        let frame = rx.try_recv().unwrap();
        assert!((frame.state.entities[2].control_input - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_control_on_unknown_entity_is_ignored() {
        let json = post_json(
            make_router(make_test_state()),
            "/api/v1/control",
            serde_json::json!({"entity_id": "tank_99", "percent": 50.0}),
        )
        .await;
        assert_eq!(json["applied"], false);
    }

    #[tokio::test]
    async fn test_gate_is_locked_after_start() {
        let state = make_test_state();
        let json = post_json(
            make_router(state.clone()),
            "/api/v1/gate",
            serde_json::json!({"field": "LimitForce", "value": "75"}),
        )
        .await;
        assert_eq!(json["applied"], true);

        state.sim.lock().start();
        let json = post_json(
            make_router(state.clone()),
            "/api/v1/gate",
            serde_json::json!({"field": "LimitForce", "value": "10"}),
        )
        .await;
        assert_eq!(json["applied"], false);
        let limit = state.sim.lock().snapshot().gate.limit_force_kn;
        assert!((limit - 75.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_material_fills_empty_limit() {
        let state = make_test_state();
        post_json(
            make_router(state.clone()),
            "/api/v1/gate",
            serde_json::json!({"field": "LimitForce", "value": "0"}),
        )
        .await;
        let json = post_json(
            make_router(state.clone()),
            "/api/v1/material",
            serde_json::json!({"material_id": "wood"}),
        )
        .await;
        assert_eq!(json["applied"], true);
        let limit = state.sim.lock().snapshot().gate.limit_force_kn;
        assert!((limit - 120.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_relief_reports_notification() {
        let state = AppState::new(Simulation::new(quiet(run_config(RESERVOIR, 2)), 0), 1.0);
        let json = post_json(
            make_router(state),
            "/api/v1/relief",
            serde_json::json!({"entity_id": "reservoir"}),
        )
        .await;
        assert_eq!(json["applied"], true);
        let notification = &json["notifications"][0]["notification"]["EmergencyRelief"];
        assert_eq!(notification["penalty"], 20);
    }

    #[tokio::test]
    async fn test_level_selection() {
        let state = make_test_state();
        let json = post_json(
            make_router(state.clone()),
            "/api/v1/level",
            serde_json::json!({"level_id": 7}),
        )
        .await;
        assert_eq!(json["applied"], false);
        assert_eq!(json["level"], 1);

        let json = post_json(
            make_router(state.clone()),
            "/api/v1/level",
            serde_json::json!({"level_id": 2}),
        )
        .await;
        assert_eq!(json["applied"], true);
        assert_eq!(json["level"], 2);
        let meta = get_json(make_router(state), "/api/v1/meta").await;
        assert!((meta["target_time_s"].as_f64().unwrap() - 120.0).abs() < f64::EPSILON);
    }
}
