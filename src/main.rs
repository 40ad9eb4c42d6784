//! FtmsRide - ERG-mode interval workouts for FTMS smart trainers
//!
//! Main entry point for the command-line runner.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ftmsride::recording::{chart_series_json, export_csv_to_file, generate_csv_filename};
use ftmsride::session::{
    Characteristic, SessionCommand, SessionEvent, SessionOrchestrator, Transport,
};
use ftmsride::storage::config::{get_data_dir, load_config, load_config_from, AppConfig};
use ftmsride::{BleTrainer, Recording, WorkoutPlan};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "ftmsride", version, about = "Run ERG workouts on an FTMS smart trainer")]
struct Cli {
    /// Path to config.toml (defaults to the platform data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a trainer and run a workout plan
    Run {
        /// Workout plan: JSON array of {"interval": secs, "target": watts}
        #[arg(long)]
        plan: PathBuf,

        /// CSV output path (defaults to the recording directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Also write the chart series as JSON next to the CSV
        #[arg(long)]
        chart: bool,
    },
    /// Validate a workout plan without connecting
    Check {
        /// Workout plan file
        #[arg(long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FtmsRide v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    match cli.command {
        Commands::Check { plan } => {
            let plan = read_plan(&plan)?;
            println!(
                "Plan OK: {} segments, {}s",
                plan.segments().len(),
                plan.total_duration_seconds()
            );
        }
        Commands::Run {
            plan,
            output,
            chart,
        } => {
            let plan = read_plan(&plan)?;
            let recording = run_workout(&config, plan).await?;

            match recording {
                Some(recording) => export(&config, &recording, output, chart)?,
                None => tracing::warn!("No workout recorded"),
            }
        }
    }

    Ok(())
}

fn read_plan(path: &Path) -> anyhow::Result<WorkoutPlan> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading workout plan {}", path.display()))?;
    Ok(WorkoutPlan::from_json(&json)?)
}

async fn run_workout(config: &AppConfig, plan: WorkoutPlan) -> anyhow::Result<Option<Recording>> {
    let trainer = Arc::new(BleTrainer::initialize(config.sensors.clone()).await?);
    let handle = trainer.connect().await?;
    println!("Connected to {}", handle.name);

    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let disconnect_tx = command_tx.clone();
    trainer.on_disconnected(Box::new(move || {
        let _ = disconnect_tx.send(SessionCommand::Disconnected);
    }));

    let telemetry = trainer.subscribe(Characteristic::IndoorBikeData).await?;

    let mut session = SessionOrchestrator::new(trainer.clone(), config.session.clone());
    session.on_connect().await?;

    let events = session.event_receiver();
    let shutdown_tx = command_tx.clone();
    std::thread::spawn(move || report_progress(events, shutdown_tx));

    command_tx.send(SessionCommand::Start(plan))?;
    let recording = session.run(telemetry, command_rx).await;

    if let Err(e) = trainer.disconnect().await {
        tracing::warn!("Disconnect failed: {}", e);
    }

    Ok(recording)
}

/// Print progress and shut the session down once the workout completes.
fn report_progress(
    events: crossbeam::channel::Receiver<SessionEvent>,
    shutdown_tx: mpsc::UnboundedSender<SessionCommand>,
) {
    while let Ok(event) = events.recv() {
        match event {
            SessionEvent::WorkoutStarted { total_seconds } => {
                println!("Workout started ({}s)", total_seconds);
            }
            SessionEvent::SlotUpdated {
                second_index,
                target_power_watts,
                measured_power_watts,
            } => {
                println!(
                    "{:>5}s  target {:>4}W  power {:>4}W",
                    second_index, target_power_watts, measured_power_watts
                );
            }
            SessionEvent::WorkoutComplete => {
                println!("Workout complete");
                let _ = shutdown_tx.send(SessionCommand::Shutdown);
            }
            SessionEvent::Disconnected => {
                println!("Trainer disconnected");
                break;
            }
            _ => {}
        }
    }
}

fn export(
    config: &AppConfig,
    recording: &Recording,
    output: Option<PathBuf>,
    chart: bool,
) -> anyhow::Result<()> {
    println!(
        "Recorded {}s, average power {}",
        recording.recorded_seconds(),
        recording
            .avg_power()
            .map_or("-".to_string(), |p| format!("{}W", p))
    );

    if !config.recording.export_csv && output.is_none() {
        return Ok(());
    }

    let path = match output {
        Some(path) => path,
        None => {
            let dir = config
                .recording
                .output_dir
                .clone()
                .unwrap_or_else(get_data_dir);
            std::fs::create_dir_all(&dir)?;
            dir.join(generate_csv_filename(recording))
        }
    };

    export_csv_to_file(recording, &path)?;
    println!("Saved {}", path.display());

    if chart {
        let chart_path = path.with_extension("json");
        std::fs::write(&chart_path, chart_series_json(recording)?)?;
        println!("Saved {}", chart_path.display());
    }

    Ok(())
}
