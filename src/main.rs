//! CLI entry point for the Sydney Trains vehicle-position service.
//!
//! `server` exposes the live feed as GeoJSON over plain HTTP, server-sent
//! events and WebSockets; `get-train-pos` fetches the feed once and prints it.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sydneytrainsnearme::{
    cache::SnapshotCache,
    config::Configuration,
    fetch::{BasicClient, FeedSource, VehiclePositionFeed, auth::ApiKey},
    geojson::to_feature_collection,
    parser::decode_positions,
    server::{self, AppState},
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "sydneytrainsnearme")]
#[command(about = "Live Sydney Trains positions as GeoJSON", long_about = None)]
struct Cli {
    /// JSON config file; skipped when it does not exist
    #[arg(long, default_value = ".sydneytrainsnearme.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve positions over HTTP, SSE and WebSocket
    Server {
        /// Service port to listen on
        #[arg(short, long, default_value_t = 8030)]
        port: u16,

        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Refuse WebSocket upgrades whose Origin does not match Host
        #[arg(long, default_value_t = false)]
        ws_strict_origin: bool,
    },
    /// Fetch the feed once and print the GeoJSON FeatureCollection
    GetTrainPos,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/sydneytrainsnearme.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("sydneytrainsnearme.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let cfg = Configuration::resolve(&cli.config)?;
    // Fail on a missing key or bad URL before anything touches the network.
    let feed = vehicle_position_feed(&cfg)?;

    match cli.command {
        Commands::Server {
            port,
            bind,
            ws_strict_origin,
        } => {
            let cache = SnapshotCache::new(Arc::new(feed));
            let state = AppState::new(cache).with_allow_any_origin(!ws_strict_origin);

            let listener = TcpListener::bind((bind.as_str(), port)).await?;
            server::serve(listener, state, shutdown_signal()).await?;
        }
        Commands::GetTrainPos => {
            let bytes = feed.fetch().await?;
            let positions = decode_positions(&bytes)?;
            let collection = to_feature_collection(&positions);
            info!(
                entities = positions.len(),
                features = collection.features.len(),
                "Feed fetched"
            );
            println!("{}", serde_json::to_string(&collection)?);
        }
    }

    Ok(())
}

/// Builds the authenticated upstream client from configuration.
fn vehicle_position_feed(cfg: &Configuration) -> Result<VehiclePositionFeed<ApiKey<BasicClient>>> {
    let key = cfg.api_key()?;
    let url = cfg.feed_url()?;
    let client = ApiKey::apikey(BasicClient::new(cfg.upstream_timeout())?, key)?;
    info!(url = %url, timeout = ?cfg.upstream_timeout(), "Upstream feed configured");
    Ok(VehiclePositionFeed::new(client, url))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
