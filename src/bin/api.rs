use barista_agent_orchestrator::{
    agent::Orchestrator,
    api::start_server,
    auth::DevTokenVerifier,
    config::AgentConfig,
    gemini::GeminiClient,
    media::InMemoryMediaStore,
    session::build_session_store,
    submission::build_submitted_order_store,
    tools::{recommendation::HttpRecommendationProvider, OrderToolSet},
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::from_env()?;

    if !config.has_model_credentials() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 Chat requests will fail until a key is configured");
    }

    info!("🚀 Barista Agent - API Server");
    info!("📍 Port: {}", config.port);
    info!("🤖 Model: {}", config.gemini_model);

    // Create components
    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let submissions =
        build_submitted_order_store(config.database_url.as_deref(), config.order_expiry);
    let recommendations = Arc::new(HttpRecommendationProvider::new(
        config.recommendation_service_url.clone(),
    ));
    let sessions = build_session_store(config.database_url.as_deref(), config.session_ttl);
    let media = Arc::new(InMemoryMediaStore::new());

    let tools = OrderToolSet::new(submissions, recommendations);
    let sweep_interval = config.session_sweep_interval;
    let port = config.port;

    // Create orchestrator
    let orchestrator = Arc::new(Orchestrator::new(model, tools, sessions, media, config));

    info!("✅ Orchestrator initialized");

    // Expire idle sessions in the background
    let sweeper = orchestrator.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.purge_expired_sessions().await {
                warn!("Session sweep failed: {}", e);
            }
        }
    });

    info!("📡 Starting API server...");

    // Start API server
    start_server(orchestrator, Arc::new(DevTokenVerifier), port).await?;

    Ok(())
}
