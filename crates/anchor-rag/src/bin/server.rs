//! QA backend server binary
//!
//! Run with: cargo run -p anchor-rag --bin anchor-rag-server [config.toml]

use anchor_rag::{AppConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchor_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("ANCHOR_RAG_CONFIG").ok());
    let config = match config_path {
        Some(path) => {
            tracing::info!("loading config from {}", path);
            AppConfig::load(&path)?
        }
        None => {
            tracing::warn!("no config file given; using built-in defaults");
            AppConfig::default()
        }
    };

    tracing::info!("alias: {}", config.embeddings.alias.name);
    tracing::info!("active profile: {}", config.embeddings.active_profile);
    tracing::info!(
        "retrieval: top_k={} distance={} thresholds=[{}, {}]",
        config.retrieval.top_k,
        config.retrieval.distance.as_str(),
        config.retrieval.threshold_low,
        config.retrieval.threshold_high
    );

    let server = Server::new(config)?;
    tracing::info!("starting on http://{}", server.address());
    server.start().await?;
    Ok(())
}
