use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use lava_lamp::shell::Shell;
use lava_lamp::*;
use tokio::io::{self, BufReader};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Control a smart lava lamp", long_about = None)]
struct Cli {
    /// Settings file layered over config/default.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive shell (default)
    Shell,
    /// Turn the lamp on
    On,
    /// Turn the lamp off
    Off,
    /// Set a #RRGGBB color
    Hex {
        /// Color, e.g. "#FF8800"
        color: String,
        /// Brightness level (0-100)
        #[arg(short, long, default_value_t = 100)]
        brightness: u8,
    },
    /// Run an effect in the foreground (Ctrl-C stops it)
    Effect {
        /// Effect name, see `effects`
        name: String,
        /// Duration in seconds; runs until Ctrl-C when omitted
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Activate firmware music/stream sync mode
    Sync {
        /// Hold for this many seconds, then return to colour mode
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Print the lamp's data points
    Status,
    /// List the available effects
    Effects,
    /// Run a short tour through a few effects
    Demo {
        /// Duration of each demo step in seconds
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize color-eyre for pretty error reporting
    color_eyre::install()?;

    let cli = Cli::parse();
    let settings = Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new(format!("lava_lamp={}", settings.logger.level))),
        )
        .compact()
        .init();
    debug!("Parsed command line arguments");

    let driver = driver::open(&settings.device);
    let lamp = Arc::new(LampController::from_settings(driver, &settings.device));

    match cli.command.unwrap_or(Commands::Shell) {
        Commands::Shell => {
            let scheduler = Arc::new(Scheduler::new(
                lamp.clone(),
                Arc::new(SystemClock),
                settings.scheduler.poll_interval(),
                settings.scheduler.history_limit,
            ));
            let mut shell = Shell::new(lamp, scheduler, BufReader::new(io::stdin()), io::stdout());
            shell.run().await?;
        }
        Commands::On => {
            lamp.power_on().await?;
        }
        Commands::Off => {
            lamp.power_off().await?;
        }
        Commands::Hex { color, brightness } => {
            // The color is only visible once the lamp is on
            lamp.power_on().await?;
            lamp.set_color_hex(&color, brightness).await?;
        }
        Commands::Effect { name, duration } => {
            let duration = duration.map_or(EffectDuration::Forever, EffectDuration::seconds);
            run_until_interrupted(&lamp, &name, duration).await?;
        }
        Commands::Sync { duration: None } => {
            lamp.set_sync(true).await?;
            info!("Sync mode active; it stays on until the lamp is switched");
        }
        Commands::Sync { duration: Some(seconds) } => {
            run_until_interrupted(&lamp, effects::SYNC_EFFECT, EffectDuration::seconds(seconds))
                .await?;
        }
        Commands::Status => {
            for (dp, value) in lamp.status().await? {
                println!("{dp:>3}: {value}");
            }
        }
        Commands::Effects => {
            for effect in lamp.registry().iter() {
                println!("{:<15} {}", effect.name(), effect.description());
            }
        }
        Commands::Demo { duration } => {
            run_demo(&lamp, duration).await?;
        }
    }

    Ok(())
}

/// Runs an effect until it ends or Ctrl-C is pressed; returns false when
/// interrupted
#[instrument(skip(lamp))]
async fn run_until_interrupted(
    lamp: &Arc<LampController>,
    name: &str,
    duration: EffectDuration,
) -> Result<bool> {
    tokio::select! {
        result = lamp.run_effect(name, duration) => {
            result?;
            Ok(true)
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping {}", name);
            lamp.stop_effect().await;
            Ok(false)
        }
    }
}

/// Run a demonstration of a few effects
#[instrument(skip(lamp))]
async fn run_demo(lamp: &Arc<LampController>, duration: u64) -> Result<()> {
    info!("Running lamp demo with {}s per effect", duration);

    for name in ["basic_colors", "rainbow", "random_rainbow"] {
        info!("Demo: {}", name);
        if !run_until_interrupted(lamp, name, EffectDuration::seconds(duration)).await? {
            return Ok(());
        }
    }

    // End demo by turning off the lamp
    tokio::time::sleep(Duration::from_secs(1)).await;
    lamp.power_off().await?;

    info!("Demo completed!");
    Ok(())
}
