//! Reasoning-capability boundary
//!
//! The conversation loop talks to an opaque chat model through this
//! contract: it hands over system instructions, the message history, and
//! the available tool signatures, and gets back either plain text or a
//! batch of tool-call requests. Everything the orchestrator and the
//! decision engine do is testable against the scripted implementation.

use crate::models::ThreadMessage;
use crate::tools::ToolSignature;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::{mpsc, Mutex};

pub mod gemini;

pub use gemini::GeminiChatModel;

/// One request to the reasoning capability.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub messages: Vec<ThreadMessage>,
    pub tools: Vec<ToolSignature>,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The model's decision for one step of the loop.
#[derive(Debug, Clone)]
pub enum ModelTurn {
    Text(String),
    ToolCalls(Vec<ToolCallRequest>),
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn>;

    /// Streaming variant: incremental text fragments are pushed into
    /// `tokens` as they arrive, and the assembled turn is returned at the
    /// end. The default forwards the full text as a single fragment.
    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ModelTurn> {
        let turn = self.complete(request).await?;
        if let ModelTurn::Text(text) = &turn {
            let _ = tokens.send(text.clone()).await;
        }
        Ok(turn)
    }
}

/// Deterministic model for tests and the demo binary: replays a fixed
/// queue of turns.
pub struct ScriptedChatModel {
    turns: Mutex<VecDeque<ModelTurn>>,
}

impl ScriptedChatModel {
    pub fn new(turns: Vec<ModelTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    pub fn text(content: impl Into<String>) -> ModelTurn {
        ModelTurn::Text(content.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> ModelTurn {
        ModelTurn::ToolCalls(vec![ToolCallRequest {
            name: name.into(),
            arguments,
        }])
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, _request: &ChatRequest) -> Result<ModelTurn> {
        self.turns.lock().await.pop_front().ok_or_else(|| {
            crate::error::AgentError::LlmError("scripted model has no more turns".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedChatModel::new(vec![
            ScriptedChatModel::tool_call("get_accounts", serde_json::json!({})),
            ScriptedChatModel::text("All done."),
        ]);
        let request = ChatRequest {
            system: String::new(),
            messages: vec![],
            tools: vec![],
        };

        match model.complete(&request).await.unwrap() {
            ModelTurn::ToolCalls(calls) => assert_eq!(calls[0].name, "get_accounts"),
            other => panic!("expected tool calls, got {:?}", other),
        }
        match model.complete(&request).await.unwrap() {
            ModelTurn::Text(text) => assert_eq!(text, "All done."),
            other => panic!("expected text, got {:?}", other),
        }
        assert!(model.complete(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_default_streaming_forwards_text() {
        let model = ScriptedChatModel::new(vec![ScriptedChatModel::text("hello")]);
        let request = ChatRequest {
            system: String::new(),
            messages: vec![],
            tools: vec![],
        };
        let (tx, mut rx) = mpsc::channel(4);
        let turn = model.complete_streaming(&request, tx).await.unwrap();
        assert!(matches!(turn, ModelTurn::Text(ref t) if t == "hello"));
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }
}
