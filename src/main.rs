use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pompey_news::clock::SystemClock;
use pompey_news::config::{Config, Secrets};
use pompey_news::feeds::HttpFeedTransport;
use pompey_news::routes::{router, AppState};
use pompey_news::service::start_background_refresh;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pompey_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("POMPEY_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    let secrets = Secrets::from_env();
    if secrets.football_data_api_key.is_none() {
        info!("FOOTBALL_DATA_API_KEY not set, fixtures and table disabled");
    }
    if secrets.anthropic_api_key.is_none() {
        info!("ANTHROPIC_API_KEY not set, headline summary disabled");
    }

    let transport = Arc::new(HttpFeedTransport::new(
        Duration::from_secs(config.fetch_timeout),
        &config.user_agent,
    )?);
    let state = Arc::new(AppState::from_config(
        &config,
        secrets,
        transport,
        Arc::new(SystemClock),
    )?);

    // Start background refresh task
    let news = state.news.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(news, refresh_interval).await;
    });

    let app = router(state);

    // Start server
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
