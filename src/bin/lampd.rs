use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use lava_lamp::web::{router, AppState};
use lava_lamp::*;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// HTTP daemon for the lamp, with the scheduler running in the background
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file layered over config/default.toml
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Listen address, overrides server.host
    #[arg(long)]
    host: Option<String>,
    /// Listen port, overrides server.port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let mut settings = Settings::new(args.config.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("RUST_LOG")
                .unwrap_or_else(|_| EnvFilter::new(format!("lava_lamp={}", settings.logger.level))),
        )
        .compact()
        .init();

    let driver = driver::open(&settings.device);
    let lamp = Arc::new(LampController::from_settings(driver, &settings.device));
    let scheduler = Arc::new(Scheduler::new(
        lamp.clone(),
        Arc::new(SystemClock),
        settings.scheduler.poll_interval(),
        settings.scheduler.history_limit,
    ));
    let handle = scheduler.start();

    let app = router(
        AppState {
            controller: lamp.clone(),
            scheduler,
        },
        &settings.server.static_dir,
    );

    let address = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .wrap_err_with(|| format!("Failed to bind {address}"))?;
    info!("Serving lamp API on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutting down");
        })
        .await
        .wrap_err("Server error")?;

    if let Some(handle) = handle {
        handle.stop().await;
    }
    lamp.stop_effect().await;
    Ok(())
}
