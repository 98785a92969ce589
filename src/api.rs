//! REST API server for the banking agent
//!
//! Exposes chat turns over HTTP. Each caller-supplied thread id maps to
//! one agent session; non-UUID thread strings are hashed into stable ids.

use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::engine::TransferEngine;
use crate::llm::ChatModel;
use crate::orchestrator::ConversationAgent;
use crate::services::Services;
use crate::session::{Session, SessionStore};
use crate::tools::create_default_registry;
use crate::tools::ToolRegistry;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub message: String,
    pub thread_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequestBody {
    pub thread_id: String,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    model: Arc<dyn ChatModel>,
    services: Services,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    agents: Arc<RwLock<HashMap<Uuid, Arc<ConversationAgent>>>>,
    default_token: String,
}

impl ApiState {
    pub fn new(
        model: Arc<dyn ChatModel>,
        services: Services,
        store: Arc<dyn SessionStore>,
        default_token: String,
    ) -> Self {
        let engine = Arc::new(TransferEngine::new(services.clone()));
        let tools = Arc::new(create_default_registry(services.clone(), engine));
        Self {
            model,
            services,
            tools,
            store,
            agents: Arc::new(RwLock::new(HashMap::new())),
            default_token,
        }
    }

    async fn agent_for_thread(
        &self,
        thread_id: Uuid,
        token: Option<&str>,
    ) -> crate::Result<Arc<ConversationAgent>> {
        {
            let agents = self.agents.read().await;
            if let Some(agent) = agents.get(&thread_id) {
                return Ok(agent.clone());
            }
        }

        let session =
            Session::with_thread(self.services.clone(), self.store.clone(), thread_id);
        let agent = Arc::new(ConversationAgent::new(
            self.model.clone(),
            self.tools.clone(),
            session,
        ));
        agent
            .initialize_context(token.unwrap_or(&self.default_token))
            .await?;

        let mut agents = self.agents.write().await;
        Ok(agents.entry(thread_id).or_insert(agent).clone())
    }
}

/// =============================
/// Helpers: stable thread ids
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

fn parse_or_stable_uuid(value: Option<&str>) -> Uuid {
    match value {
        Some(v) if !v.trim().is_empty() => {
            Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v))
        }
        _ => Uuid::new_v4(),
    }
}

/// =============================
/// Handlers
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn chat_handler(
    State(state): State<ApiState>,
    Json(req): Json<ChatRequestBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let thread_id = parse_or_stable_uuid(req.thread_id.as_deref());
    info!(%thread_id, "chat request received");

    let agent = match state
        .agent_for_thread(thread_id, req.token.as_deref())
        .await
    {
        Ok(agent) => agent,
        Err(e) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error(e.to_string())),
            )
        }
    };

    match agent.process_message_sync(&req.message).await {
        Ok(answer) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "answer": answer,
                "thread_id": thread_id.to_string(),
            }))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

async fn reset_handler(
    State(state): State<ApiState>,
    Json(req): Json<ResetRequestBody>,
) -> (StatusCode, Json<ApiResponse>) {
    let thread_id = parse_or_stable_uuid(Some(&req.thread_id));

    let agents = state.agents.read().await;
    let Some(agent) = agents.get(&thread_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error("Unknown thread".into())),
        );
    };

    let new_thread_id = agent.session().reset().await;
    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "thread_id": new_thread_id.to_string(),
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat_handler))
        .route("/api/chat/reset", post(reset_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
