use banking_agent_orchestrator::{
    engine::TransferEngine,
    llm::{ChatModel, GeminiChatModel, ScriptedChatModel},
    orchestrator::{AgentEvent, ConversationAgent},
    services::Services,
    session::{Session, ThreadStore},
    tools::create_default_registry,
};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Scripted model turns for running the demo without an API key: the
/// shortfall-remediation conversation from start to finish.
fn demo_script() -> Arc<ScriptedChatModel> {
    Arc::new(ScriptedChatModel::new(vec![
        ScriptedChatModel::tool_call(
            "initiate_transfer",
            json!({ "destination": "sarah", "amount": 600.0 }),
        ),
        ScriptedChatModel::text(
            "Your Daily Expense Account holds $500.00 AUD, so this payment is $100.00 AUD \
             short. I can move $100.00 AUD from your Savings Account first, then send the \
             $600.00 AUD to Sarah Johnson. Each step needs its own confirmation — shall I \
             start with the top-up?",
        ),
        ScriptedChatModel::tool_call("confirm_pending", json!({ "confirmed": true })),
        ScriptedChatModel::text(
            "The $100.00 AUD top-up is done. Now, shall I send the $600.00 AUD to Sarah \
             Johnson? This needs a separate yes.",
        ),
        ScriptedChatModel::tool_call("confirm_pending", json!({ "confirmed": true })),
        ScriptedChatModel::text(
            "All done — $600.00 AUD sent to Sarah Johnson. Daily Expense Account: $0.00 AUD, \
             Savings Account: $14900.00 AUD.",
        ),
    ]))
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::Token { content } => {
            print!("{}", content);
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolStart { tool_name } => {
            println!("  [Tool] Calling {}...", tool_name);
        }
        AgentEvent::ToolEnd { tool_name } => {
            println!("  [Done] {} completed.", tool_name);
        }
        AgentEvent::Final { .. } => {
            println!();
        }
        AgentEvent::Error { content } => {
            println!("\nError: {}", content);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "banking_agent_orchestrator=info".into()),
        )
        .init();

    dotenv::dotenv().ok();

    info!("Banking Agent Orchestrator starting");

    let services = Services::mock();
    let engine = Arc::new(TransferEngine::new(services.clone()));
    let tools = Arc::new(create_default_registry(services.clone(), engine));

    let model: Arc<dyn ChatModel> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.is_empty() => Arc::new(GeminiChatModel::new(key)),
        _ => {
            info!("GEMINI_API_KEY not set; running the scripted demo conversation");
            demo_script()
        }
    };

    let session = Session::new(services, Arc::new(ThreadStore::from_env()));
    let agent = ConversationAgent::new(model, tools, session);
    let user = agent.initialize_context("mock_token_001").await?;

    println!("=== Banking Agent Demo ===");
    println!("Signed in as {} <{}>\n", user.name, user.email);

    let turns = [
        "transfer $600 to Sarah",
        "yes",
        "yes",
    ];

    for message in turns {
        println!("> {}", message);
        let (tx, mut rx) = mpsc::channel(64);
        let turn = agent.process_message(message, tx);
        let renderer = async {
            while let Some(event) = rx.recv().await {
                render_event(&event);
            }
        };
        tokio::join!(turn, renderer);
        println!();
    }

    Ok(())
}
