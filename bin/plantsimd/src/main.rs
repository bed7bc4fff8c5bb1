//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the plant simulator daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use plantsim_common::config::AppConfig;
use plantsim_common::logging::init_tracing;
use plantsim_common::time::duration_to_millis;
use plantsim_core::{EventStream, EventSubscription, PlantFleet, Signal, SubscriptionId};
use plantsim_metrics::{new_registry, spawn_http_server, PlantMetrics};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] =
    ["configs/plantsim.toml", "configs/plantsim.example.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    disable_version_flag = true,
    version = concat!("plantsimd ", env!("CARGO_PKG_VERSION")),
    about = "Ramp-type power plant simulator daemon",
    long_about = None
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Path to configuration file"
    )]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Start every configured plant and run until interrupted")]
    Run,
    #[command(about = "Validate the configuration and list the plants it declares")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", extended_version());
        return Ok(());
    }

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.extend(DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from));

    let loaded = AppConfig::load_with_source(&candidates)?;
    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("configuration {} is valid", loaded.source.display());
            for plant in &loaded.config.plants {
                println!(
                    "  plant {:>6}  {:<24} {:>10} .. {:<10} rate {} every {} ms ({})",
                    plant.id,
                    plant.name,
                    plant.min_power,
                    plant.max_power,
                    plant.ramp_power_rate,
                    duration_to_millis(plant.ramp_tick_interval),
                    plant.plant_type,
                );
            }
        }
        Commands::Run => {
            init_tracing("plantsimd", &loaded.config.logging)?;
            info!(
                config_path = %loaded.source.display(),
                plants = loaded.config.plants.len(),
                "configuration loaded"
            );
            run_daemon(loaded.config).await?;
        }
    }

    Ok(())
}

fn extended_version() -> String {
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    format!(
        "plantsimd {} ({profile}, {}-{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let metrics_settings = config.metrics.clone();
    let (metrics, metrics_server) = if metrics_settings.enabled {
        let registry = new_registry();
        let metrics = PlantMetrics::new(registry.clone())?;
        let server = spawn_http_server(registry, metrics_settings.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        (Some(metrics), Some(server))
    } else {
        info!("metrics exporter disabled by configuration");
        (None, None)
    };

    let stream = EventStream::new();
    let event_log = if config.events.log_events {
        Some(spawn_event_log(stream.subscribe()))
    } else {
        None
    };

    let fleet = PlantFleet::from_config(&config, stream.clone(), metrics)
        .context("failed to start plant fleet")?;

    info!(plants = ?fleet.plant_ids(), "daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    fleet.shutdown().await;

    if let Some((subscription_id, task)) = event_log {
        stream.unsubscribe(subscription_id);
        if let Err(err) = task.await {
            warn!(error = %err, "event log task join error");
        }
    }

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    Ok(())
}

/// Mirror every forwarded signal into the log until the subscription is removed.
fn spawn_event_log(
    mut subscription: EventSubscription,
) -> (SubscriptionId, JoinHandle<()>) {
    let id = subscription.id();
    let task = tokio::spawn(async move {
        while let Some(signal) = subscription.recv().await {
            log_signal(&signal);
        }
        debug!("event log subscription closed");
    });
    (id, task)
}

fn log_signal(signal: &Signal) {
    let payload = serde_json::to_string(signal).unwrap_or_default();
    match signal {
        Signal::Genesis { new_state, .. } => {
            info!(plant_id = signal.plant_id(), state = %new_state, %payload, "plant genesis")
        }
        Signal::Transition {
            old_state,
            new_state,
            ..
        } => {
            info!(plant_id = signal.plant_id(), from = %old_state, to = %new_state, %payload, "plant transition")
        }
        Signal::DispatchAlert { message, .. } => {
            warn!(plant_id = signal.plant_id(), %message, %payload, "dispatch alert")
        }
    }
}
