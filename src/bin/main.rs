use barista_agent_orchestrator::{
    agent::Orchestrator,
    config::AgentConfig,
    gemini::GeminiClient,
    media::InMemoryMediaStore,
    models::{summarize_order, Caller, ChatMessage, ChatResponse},
    session::InMemorySessionStore,
    submission::InMemorySubmittedOrderStore,
    tools::{recommendation::HttpRecommendationProvider, OrderToolSet},
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const HELP: &str = "Commands: /approve, /reject, /order, /clear, /quit";

fn print_response(response: &ChatResponse) {
    println!("\nbarista> {}", response.text);

    if !response.order.is_empty() {
        println!("  order: {}", summarize_order(&response.order));
    }
    if let Some(image) = &response.featured_item_image {
        println!("  featured: {}", image);
    }
    if response.ready_for_submission {
        println!("  (confirm with /approve or /reject)");
    }
    if response.order_submitted {
        println!("  (order submitted)");
    }
    if !response.suggested_responses.is_empty() {
        println!("  suggestions: {}", response.suggested_responses.join(" | "));
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = AgentConfig::from_env()?;
    if !config.has_model_credentials() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        return Ok(());
    }

    let model = Arc::new(GeminiClient::new(
        config.gemini_api_key.clone(),
        config.gemini_model.clone(),
    )?);
    let tools = OrderToolSet::new(
        Arc::new(InMemorySubmittedOrderStore::new(config.order_expiry)),
        Arc::new(HttpRecommendationProvider::new(
            config.recommendation_service_url.clone(),
        )),
    );
    let sessions = Arc::new(InMemorySessionStore::new(config.session_ttl));
    let orchestrator = Orchestrator::new(
        model,
        tools,
        sessions,
        Arc::new(InMemoryMediaStore::new()),
        config,
    );

    let caller = Caller::authenticated(
        std::env::var("BARISTA_USER").unwrap_or_else(|_| "local-customer".to_string()),
    );
    info!(uid = %caller.session_id, "Barista terminal chat starting");

    println!("☕ The Virtual Coffee Shop");
    println!("{}\n", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let result = match input {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("{}", HELP);
                continue;
            }
            "/order" => {
                let order = orchestrator.in_progress_order(&caller).await?;
                println!("  order: {}\n", summarize_order(&order));
                continue;
            }
            "/clear" => {
                orchestrator.clear_session(&caller).await?;
                println!("Session invalidated.\n");
                continue;
            }
            "/approve" => orchestrator.approve_order(&caller, true).await,
            "/reject" => orchestrator.approve_order(&caller, false).await,
            text => orchestrator.chat(&caller, ChatMessage::text(text)).await,
        };

        match result {
            Ok(response) => print_response(&response),
            Err(e) => eprintln!("error ({}): {}\n", e.status_code(), e.public_message()),
        }
    }

    Ok(())
}
