use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use litmos_user_manager::api::error::expose_internal_errors;
use litmos_user_manager::config::AppConfig;
use litmos_user_manager::infrastructure::{debug_log::DebugLog, http::HttpClient};
use litmos_user_manager::services::litmos::LitmosClient;
use litmos_user_manager::services::worker::JobReaper;
use litmos_user_manager::{AppState, create_app};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the API server to
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Port for the API server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "litmos_user_manager=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Litmos User Manager...");

    // 2. Configuration
    let config = AppConfig::from_env();
    config.validate()?;
    expose_internal_errors(config.expose_error_details);

    info!(
        "🛡️  Limits: rows={}..={}, workers={}, inflight={}, retries={}",
        config.min_records,
        config.max_records,
        config.max_workers,
        config.max_inflight,
        config.max_retries
    );
    if config.litmos_api_token.is_none() {
        warn!("⚠️  LITMOS_API_TOKEN is not set, CSV uploads will be refused");
    }

    // 3. Outbound client
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log directory {}", config.log_dir.display()))?;
    let debug_log = Arc::new(DebugLog::new(&config.log_dir));
    let http = HttpClient::new(&config, debug_log).context("Failed to build HTTP client")?;
    let directory = Arc::new(LitmosClient::new(&config, http));

    let state = AppState::new(config.clone(), directory);

    // 4. Background job reaper
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = JobReaper::new(
        state.jobs.clone(),
        config.job_retention,
        config.reaper_interval,
        shutdown_rx,
    );
    tokio::spawn(reaper.run());

    // 5. HTTP server
    let app = create_app(state);

    let addr = SocketAddr::new(args.host, args.port.unwrap_or(config.port));
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
