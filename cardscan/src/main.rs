use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cardscan::api::{create_router, AppState};
use cardscan::config::Config;
use cardscan::ocr::build_recognizer;
use cardscan::upload::WorkspaceSweeper;

#[derive(Parser)]
#[command(name = "cardscan")]
#[command(about = "Upload images, get their text back")]
struct Args {
    /// Bind address (overrides CARDSCAN_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides CARDSCAN_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Check that the OCR backend is usable, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardscan=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::from_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!("Initializing OCR backend: {}...", config.ocr.backend);
    let recognizer = build_recognizer(&config.ocr, &config.upload.default_language);

    if args.check {
        if recognizer.is_available() {
            tracing::info!("OCR backend '{}' is available", recognizer.name());
            return Ok(());
        }
        return Err(anyhow::anyhow!(
            "OCR backend '{}' is unavailable",
            recognizer.name()
        ));
    }

    if !recognizer.is_available() {
        tracing::warn!("OCR unavailable - uploads will be rejected with 503");
    }

    let cancel_token = CancellationToken::new();

    let sweeper = WorkspaceSweeper::new(
        config.upload.temp_root.clone(),
        config.upload.stale_after_secs,
        config.upload.sweep_interval_secs,
    );
    tracing::info!(
        "Starting workspace sweeper... (root={}, interval={}s)",
        config.upload.temp_root.display(),
        sweeper.interval_secs()
    );
    let token = cancel_token.child_token();
    tokio::spawn(async move {
        if let Err(e) = sweeper.run_once().await {
            tracing::error!("Workspace sweeper error: {}", e);
        }
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("Workspace sweeper shutting down...");
                    break;
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_secs(sweeper.interval_secs())) => {
                    if let Err(e) = sweeper.run_once().await {
                        tracing::error!("Workspace sweeper error: {}", e);
                    }
                }
            }
        }
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let app = create_router(AppState::new(config, recognizer));

    tracing::info!("Cardscan starting on http://{}", addr);
    tracing::info!("  OCR endpoint: http://{}/api/ocr", addr);
    tracing::info!("  Health check: http://{}/api/health", addr);
    tracing::info!("  API docs:     http://{}/api/docs", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, stopping background tasks...");
    cancel_token.cancel();
}
