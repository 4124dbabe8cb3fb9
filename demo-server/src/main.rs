use anyhow::Result;
use clap::Parser;
use cluster_client::{ClusterSession, RedisConnector};
use demo_server::{AppState, ENABLE_REFRESH_ENV, LoggingConfig, ServerConfig, create_router};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "demo-server", version, about = "Cluster topology refresh demo")]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    // Read once, before the session exists
    let flag = std::env::var(ENABLE_REFRESH_ENV).ok();
    let enable_refresh = config.apply_refresh_flag(flag.as_deref());

    init_tracing(&config.logging);

    info!("Starting demo-server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "{}={} (periodic topology refresh {})",
        ENABLE_REFRESH_ENV,
        flag.as_deref().unwrap_or("<unset>"),
        if enable_refresh { "enabled" } else { "disabled" }
    );

    let session = Arc::new(ClusterSession::new(
        config.to_cluster_config()?,
        Arc::new(RedisConnector),
    ));
    if let Err(err) = session.open().await {
        session.close().await;
        return Err(err.into());
    }

    let app = create_router(AppState {
        session: Arc::clone(&session),
    });

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    session.close().await;
    served?;

    info!("demo-server stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    if logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
