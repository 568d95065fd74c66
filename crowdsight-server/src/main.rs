// Crowdsight server
// Live crowd counting over WebSocket plus batch video annotation

use anyhow::Context;
use clap::Parser;
use crowdsight_core::CrowdsightConfig;
use crowdsight_eye::{FfmpegTool, HttpDetector};
use crowdsight_server::{create_router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "crowdsight-server", version, about = "Crowd detection dispatch server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "CROWDSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("🚀 Starting Crowdsight...");

    let config = load_config(&args)?;
    info!(
        "⚙️  Dispatch: {} concurrent, {} queued max; alert threshold {} (cooldown {}s)",
        config.dispatch.concurrency_limit,
        config.dispatch.capacity_limit,
        config.alert.threshold,
        config.alert.cooldown_secs
    );

    tokio::fs::create_dir_all(&config.video.work_dir)
        .await
        .with_context(|| format!("cannot create {}", config.video.work_dir.display()))?;
    tokio::fs::create_dir_all(&config.video.output_dir)
        .await
        .with_context(|| format!("cannot create {}", config.video.output_dir.display()))?;

    let detector = Arc::new(HttpDetector::new(&config.inference)?);
    info!("🔍 Detection service: {}", config.inference.endpoint);
    let media = Arc::new(FfmpegTool::new(config.video.ffmpeg_path.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.server.bind_address, config.server.port))?;

    let state = AppState::new(config, detector, media);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("✅ Listening on http://{} (live feed at ws://{}/ws)", addr, addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .context("server error")?;

    info!("👋 Crowdsight stopped. Goodbye!");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// defaults, then file, then CROWDSIGHT_* environment, then flags
fn load_config(args: &Args) -> anyhow::Result<CrowdsightConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("📄 Loading configuration from {}", path.display());
            CrowdsightConfig::from_file(path)?
        }
        None => CrowdsightConfig::default(),
    };
    config.apply_env()?;

    if let Some(host) = &args.host {
        config.server.bind_address = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    config.validate()?;
    Ok(config)
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("🛑 Shutdown signal received");
}
