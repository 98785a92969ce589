use banking_agent_orchestrator::{
    api::{start_server, ApiState},
    llm::GeminiChatModel,
    services::Services,
    session::ThreadStore,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banking_agent_orchestrator=info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("GEMINI_API_KEY not set; chat requests will fail until it is configured");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let default_token =
        std::env::var("DEMO_TOKEN").unwrap_or_else(|_| "mock_token_001".to_string());

    info!("Banking Agent Orchestrator - API server");
    info!("Port: {}", api_port);

    let state = ApiState::new(
        Arc::new(GeminiChatModel::new(gemini_api_key)),
        Services::mock(),
        Arc::new(ThreadStore::from_env()),
        default_token,
    );

    start_server(state, api_port).await?;

    Ok(())
}
