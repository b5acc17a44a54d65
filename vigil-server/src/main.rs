use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vigil_config::ConfigLoader;
use vigil_core::{Database, Monitor};
use vigil_server::infra::app_state::AppState;
use vigil_server::routes;

#[derive(Debug, Parser)]
#[command(name = "vigil-server", about = "Multi-server media-activity monitor")]
struct Args {
    /// Bind host; overrides VIGIL_HOST.
    #[arg(long)]
    host: Option<String>,

    /// Bind port; overrides VIGIL_PORT.
    #[arg(long)]
    port: Option<u16>,

    /// Postgres connection string; overrides DATABASE_URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A .env next to the binary behaves like the environment.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let args = Args::parse();
    let (mut config, warnings) =
        ConfigLoader::new().load().context("loading configuration")?;
    for warning in &warnings {
        warn!("config: {}", warning.message);
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.database_url.is_some() {
        config.database.url = args.database_url;
    }

    let database_url = config
        .database
        .url
        .clone()
        .context("DATABASE_URL is required")?;
    let database = Database::connect(
        &database_url,
        config.database.max_connections.unwrap_or(10),
    )
    .await
    .context("connecting to postgres")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let monitor = Monitor::start(database, config)
        .await
        .context("starting monitor runtime")?;

    let router = routes::create_router(AppState::new(monitor.clone()));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    info!("listening on {bind_addr}");

    let shutdown_monitor = monitor.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("failed to install ctrl-c handler: {e}");
            }
            shutdown_monitor.shutdown().await;
        })
        .await
        .context("serving http")?;

    Ok(())
}
