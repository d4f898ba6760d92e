use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lab_control::{ReliefOperator, Simulation};
use lab_core::{
    compute_metrics, Notification, NotificationEnvelope, RunConfig, SimulationState,
};
use lab_world::{load_content, resolve_run, resolve_seed};
use rand_chacha::ChaCha8Rng;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "lab_cli", about = "Headless runner for the fluid and heat lab")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scenario level until it ends or the tick budget runs out.
    Run {
        #[arg(long, default_value = "multi_tank")]
        scenario: String,
        #[arg(long, default_value_t = 1)]
        level: u32,
        /// Tick budget. Defaults to just past the level's target time.
        #[arg(long)]
        ticks: Option<u64>,
        /// RNG seed. A random one is drawn when omitted.
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value = "./content")]
        content_dir: String,
        #[arg(long, default_value_t = 20)]
        print_every: u64,
        /// Let the scenario run with no operator input at all.
        #[arg(long)]
        no_operator: bool,
        /// Sample metrics every N ticks.
        #[arg(long, default_value_t = 4)]
        metrics_every: u64,
        /// Disable automatic metrics collection to runs/ directory.
        #[arg(long)]
        no_metrics: bool,
    },
    /// List the scenarios and levels in a content directory.
    List {
        #[arg(long, default_value = "./content")]
        content_dir: String,
    },
}

struct RunArgs {
    scenario: String,
    level: u32,
    ticks: Option<u64>,
    seed: Option<u64>,
    content_dir: String,
    print_every: u64,
    no_operator: bool,
    metrics_every: u64,
    no_metrics: bool,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn generate_run_id(scenario: &str, level: u32, seed: u64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let days = secs / 86400;
    let time_of_day = secs % 86400;
    let hours = time_of_day / 3600;
    let minutes = (time_of_day % 3600) / 60;
    let seconds = time_of_day % 60;

    let (year, month, day) = epoch_days_to_date(days);

    format!(
        "{year:04}{month:02}{day:02}_{hours:02}{minutes:02}{seconds:02}_{scenario}_l{level}_seed{seed}"
    )
}

fn epoch_days_to_date(mut days: u64) -> (u64, u64, u64) {
    // Algorithm from http://howardhinnant.github.io/date_algorithms.html
    days += 719_468;
    let era = days / 146_097;
    let day_of_era = days % 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36524 - day_of_era / 146_096) / 365;
    let year = year_of_era + era * 400;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let mp = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { year + 1 } else { year };
    (year, month, day)
}

fn create_run_dir(run_id: &str) -> Result<std::path::PathBuf> {
    let dir = std::path::PathBuf::from("runs").join(run_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating run directory: {}", dir.display()))?;
    Ok(dir)
}

fn write_run_info(
    dir: &std::path::Path,
    run_id: &str,
    seed: u64,
    ticks: u64,
    config: &RunConfig,
    args: &RunArgs,
) -> Result<()> {
    let info = serde_json::json!({
        "run_id": run_id,
        "seed": seed,
        "start_time": run_id.split('_').take(2).collect::<Vec<_>>().join("_"),
        "content_version": config.content_version,
        "scenario": config.scenario.id,
        "level": config.level.id,
        "target_time_s": config.level.target_time_s,
        "metrics_every": args.metrics_every,
        "runner": "lab_cli",
        "args": {
            "ticks": ticks,
            "print_every": args.print_every,
            "operator": !args.no_operator,
        }
    });
    let path = dir.join("run_info.json");
    let file =
        std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &info)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Enough ticks to reach the target time, plus one.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn default_ticks(config: &RunConfig) -> u64 {
    let dt = config.dt();
    if dt <= 0.0 {
        return 0;
    }
    (config.level.target_time_s / dt).ceil() as u64 + 1
}

fn run(args: &RunArgs) -> Result<()> {
    let content = load_content(&args.content_dir)?;
    let config = resolve_run(&content, &args.scenario, args.level)?;
    let seed = resolve_seed(args.seed);
    let ticks = args.ticks.unwrap_or_else(|| default_ticks(&config));

    let mut metrics_writer: Option<lab_core::MetricsFileWriter> = None;
    if !args.no_metrics {
        let run_id = generate_run_id(&args.scenario, args.level, seed);
        let run_dir = create_run_dir(&run_id)?;
        write_run_info(&run_dir, &run_id, seed, ticks, &config, args)?;
        let writer = lab_core::MetricsFileWriter::new(run_dir.clone())
            .with_context(|| format!("opening metrics CSV in {}", run_dir.display()))?;
        metrics_writer = Some(writer);
        println!("Run directory: {}", run_dir.display());
    }

    println!(
        "Starting run: scenario={} level={} target={}s ticks={ticks} seed={seed} content_version={}",
        config.scenario.id, config.level.id, config.level.target_time_s, config.content_version,
    );
    println!("{}", "-".repeat(80));

    let print_every = args.print_every.max(1);
    let metrics_every = args.metrics_every.max(1);
    let mut operator = ReliefOperator::default();
    let mut sim = Simulation::<ChaCha8Rng>::new(config, seed);
    sim.start();

    for _ in 0..ticks {
        let notifications = if args.no_operator {
            sim.step()
        } else {
            sim.drive(&mut operator)
        };
        let state = sim.snapshot();

        for envelope in &notifications {
            print_notification(envelope);
        }

        if state.meta.tick % print_every == 0 {
            print_status(&state);
        }

        if let Some(ref mut writer) = metrics_writer {
            if state.meta.tick % metrics_every == 0 || state.game_over {
                writer
                    .write_row(&compute_metrics(&state))
                    .context("writing metrics row")?;
            }
        }

        if state.game_over {
            break;
        }
    }

    let state = sim.snapshot();
    println!("{}", "-".repeat(80));
    println!("Done. Final state at tick {}:", state.meta.tick);
    print_status(&state);
    match state.result {
        Some(result) => println!("Result: {result:?}  score={}", state.score),
        None => println!("Result: unfinished  score={}", state.score),
    }

    if let Some(ref mut writer) = metrics_writer {
        writer.flush().context("final metrics flush")?;
        println!("Metrics written to runs/ directory.");
    }

    Ok(())
}

fn print_notification(envelope: &NotificationEnvelope) {
    let tick = envelope.tick;
    match &envelope.notification {
        Notification::EventStarted {
            entity_id, label, ..
        } => {
            let target = entity_id.as_ref().map_or("all", |id| id.0.as_str());
            println!("  [tick={tick:04}] event started: {label} ({target})");
        }
        Notification::EventEnded { .. } => {}
        Notification::EntityFailed { entity_id, reason } => {
            println!("*** {entity_id} FAILED ({reason:?}) at tick={tick:04} ***");
        }
        Notification::EntitySaved { entity_id } => {
            println!("  [tick={tick:04}] {entity_id} pulled back from the limit");
        }
        Notification::EmergencyRelief {
            entity_id,
            volume_m3,
            penalty,
        } => {
            println!(
                "  [tick={tick:04}] emergency relief on {entity_id}: {volume_m3:.1} m3 released, -{penalty} pts"
            );
        }
        Notification::RunFinished {
            result,
            score_delta,
        } => {
            println!("*** RUN FINISHED: {result:?} ({score_delta:+} pts) at tick={tick:04} ***");
        }
    }
}

fn print_status(state: &SimulationState) {
    let metrics = compute_metrics(state);
    println!(
        "[tick={tick:04}  t={time:6.2}s]  score={score:5}  failed={failed}/{total}  \
         max_util={max_util:.2}  mean_level={mean_level:.2}  events={events}  relief={relief}",
        tick = metrics.tick,
        time = metrics.clock_time_s,
        score = metrics.score,
        failed = metrics.entities_failed,
        total = metrics.entities_total,
        max_util = metrics.max_utilization,
        mean_level = metrics.mean_level,
        events = metrics.active_events,
        relief = metrics.emergency_actions_used,
    );
}

fn list(content_dir: &str) -> Result<()> {
    let content = load_content(content_dir)?;
    println!("content_version={}", content.content_version);
    for scenario in &content.scenarios {
        println!(
            "{}  {}  ({} entities, dt={}s)",
            scenario.id,
            scenario.name,
            scenario.entities.len(),
            scenario.dt_s
        );
        for level in &scenario.levels {
            println!(
                "    level {}: {}  target={}s  score x{}",
                level.id, level.name, level.target_time_s, level.score_scale
            );
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            level,
            ticks,
            seed,
            content_dir,
            print_every,
            no_operator,
            metrics_every,
            no_metrics,
        } => run(&RunArgs {
            scenario,
            level,
            ticks,
            seed,
            content_dir,
            print_every,
            no_operator,
            metrics_every,
            no_metrics,
        })?,
        Commands::List { content_dir } => list(&content_dir)?,
    }
    Ok(())
}
