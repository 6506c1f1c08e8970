mod config;
mod errors;
mod llm_client;
mod routes;
mod screening;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::screening::ledger::{InMemoryCreditLedger, UNLIMITED};
use crate::screening::scorer::LlmScorer;
use crate::screening::sessions::InMemorySessionRepository;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing or invalid env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Screener API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client. Each attempt gets its own timeout so a hung attempt
    // is retried; score_work_item bounds the whole call by LLM_TIMEOUT_SECS.
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.llm_api_url.clone(),
        Duration::from_secs(config.llm_attempt_timeout_secs),
    )?
    .with_backoff(Duration::from_millis(config.llm_retry_backoff_ms));
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let scorer = Arc::new(LlmScorer::new(llm));

    let sessions = Arc::new(InMemorySessionRepository::new(
        Duration::from_secs(config.session_ttl_secs),
        config.session_capacity,
    ));
    info!(
        "Session store: ttl {}s, capacity {}",
        config.session_ttl_secs, config.session_capacity
    );

    let ledger = Arc::new(InMemoryCreditLedger::new(config.free_credits));
    for account in &config.unlimited_accounts {
        ledger.set_balance(account, UNLIMITED).await;
    }
    if !config.unlimited_accounts.is_empty() {
        info!("{} accounts on the unlimited plan", config.unlimited_accounts.len());
    }

    info!(
        "Screening concurrency: default {}, max {}",
        config.screening_concurrency, config.max_concurrency
    );

    // Build app state
    let state = AppState {
        config: config.clone(),
        scorer,
        sessions,
        ledger,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the frontend domain is fixed

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
