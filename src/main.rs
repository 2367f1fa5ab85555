use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quota_gate::cli::Cli;
use quota_gate::config::{LogFormat, LoggingConfig, QuotaGateConfig};
use quota_gate::http::HttpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = QuotaGateConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting quota-gate rate limiting service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        http_addr = %config.server.http_addr,
        algorithm = %config.rate_limiting.algorithm,
        limit = config.rate_limiting.limit,
        period_ms = config.rate_limiting.period.as_millis() as u64,
        header = %config.rate_limiting.header_name,
        "Configuration loaded"
    );

    let server = HttpServer::from_config(&config)?;

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("quota-gate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
