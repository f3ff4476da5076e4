use anyhow::{Context, Result};
use clap::Parser;
use dd_recorder::{
    create_router, platform, AppState, Config, ConfigOverrides, FfmpegSupervisor,
    FleetCoordinator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Watch live rooms and record every broadcast with its chat
#[derive(Debug, Parser)]
#[command(name = "dd-recorder", version)]
struct Cli {
    /// Configuration file (yaml, toml or json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output root directory
    #[arg(short, long)]
    out_path: Option<String>,

    /// Room URL to monitor, repeatable
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,

    /// Poll interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Log directory
    #[arg(long = "log")]
    log_path: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            debug: self.debug,
            interval: self.interval,
            log_path: self.log_path.clone(),
            out_path: self.out_path.clone(),
            rooms: self.urls.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref(), &cli.overrides())?;

    dd_recorder::logging::init_logging(cfg.debug, cfg.log_path.as_deref().map(Path::new))?;
    info!("dd-recorder v{}", env!("CARGO_PKG_VERSION"));

    let supervisor = FfmpegSupervisor::new(cfg.ffmpeg_config());
    if let Err(e) = supervisor.ensure_available().await {
        error!("Capture tool unavailable: {}", e);
        std::process::exit(1);
    }

    let client = platform::http_client().context("Failed to build HTTP client")?;
    let fleet = FleetCoordinator::new(
        Arc::new(supervisor),
        cfg.session_config(),
        cfg.poll_interval(),
    );

    let started = fleet.spawn_urls(&cfg.rooms, &client);
    if started == 0 {
        warn!("No valid rooms configured");
    }
    info!("Monitoring {} rooms, output to {}", started, cfg.out_path);

    let server = match &cfg.http {
        Some(http) => {
            let addr = format!("{}:{}", http.bind, http.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind status API on {}", addr))?;
            info!("Status API listening on {}", addr);

            let app = create_router(AppState::new(fleet.board()));
            let cancel = fleet.cancel_token();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { cancel.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    wait_for_shutdown(fleet.cancel_token()).await?;
    info!("Shutdown requested, draining sessions");
    fleet.shutdown().await;

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!("Status API failed: {}", e),
            Err(e) => error!("Status API task panicked: {}", e),
            Ok(Ok(())) => {}
        }
    }

    info!("Bye");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
        _ = hangup.recv() => info!("Received SIGHUP"),
        _ = cancel.cancelled() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(cancel: CancellationToken) -> Result<()> {
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = cancel.cancelled() => {}
    }
    Ok(())
}
