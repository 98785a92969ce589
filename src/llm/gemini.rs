//! Gemini chat model with function calling
//!
//! Uses a long-lived reqwest::Client for connection pooling. The
//! streaming variant consumes the SSE endpoint and forwards text
//! fragments as they arrive.

use super::{ChatModel, ChatRequest, ModelTurn, ToolCallRequest};
use crate::error::AgentError;
use crate::models::{MessageRole, ThreadMessage};
use crate::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const GEMINI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiChatModel {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiChatModel {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn build_request(&self, request: &ChatRequest) -> GeminiRequest {
        let contents = request.messages.iter().map(content_for_message).collect();

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(vec![GeminiTools {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|sig| FunctionDeclaration {
                        name: sig.name.clone(),
                        description: sig.description.clone(),
                        parameters: sig.parameters.clone(),
                    })
                    .collect(),
            }])
        };

        GeminiRequest {
            contents,
            tools,
            system_instruction: SystemInstruction {
                parts: vec![Part::text(&request.system)],
            },
            generation_config: GenerationConfig {
                temperature: 0.0,
                top_p: 0.9,
                max_output_tokens: 1024,
            },
        }
    }

    fn ensure_key(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(AgentError::LlmError(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelTurn> {
        self.ensure_key()?;
        let url = format!("{}:generateContent?key={}", self.base_url, self.api_key);
        let body = self.build_request(request);

        info!(message_count = request.messages.len(), "calling Gemini");

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            error!("Gemini request failed: {}", e);
            AgentError::LlmError(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini error response: {}", error_text);
            return Err(AgentError::LlmError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            AgentError::LlmError(format!("Gemini parse error: {}", e))
        })?;

        turn_from_response(&parsed)
    }

    async fn complete_streaming(
        &self,
        request: &ChatRequest,
        tokens: mpsc::Sender<String>,
    ) -> Result<ModelTurn> {
        self.ensure_key()?;
        let url = format!(
            "{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, self.api_key
        );
        let body = self.build_request(request);

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            AgentError::LlmError(format!("Gemini API error: {}", e))
        })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AgentError::LlmError(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let mut text = String::new();
        let mut calls: Vec<ToolCallRequest> = Vec::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                AgentError::LlmError(format!("Gemini stream error: {}", e))
            })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-separated `data: {...}` lines.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(payload) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if payload.is_empty() || payload == "[DONE]" {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<GeminiResponse>(payload) else {
                    debug!("skipping unparseable stream frame");
                    continue;
                };
                for part in parsed
                    .candidates
                    .iter()
                    .flat_map(|c| c.content.parts.iter())
                {
                    if let Some(fragment) = &part.text {
                        text.push_str(fragment);
                        if tokens.send(fragment.clone()).await.is_err() {
                            // Receiver gone: the caller cancelled the turn.
                            return Err(AgentError::OrchestrationError(
                                "event stream closed by caller".into(),
                            ));
                        }
                    }
                    if let Some(call) = &part.function_call {
                        calls.push(ToolCallRequest {
                            name: call.name.clone(),
                            arguments: call.args.clone().unwrap_or(Value::Null),
                        });
                    }
                }
            }
        }

        if !calls.is_empty() {
            Ok(ModelTurn::ToolCalls(calls))
        } else {
            Ok(ModelTurn::Text(text))
        }
    }
}

/// Map a thread message onto a Gemini content entry. Assistant tool-call
/// markers become functionCall parts so the model sees a well-formed
/// call/response exchange.
fn content_for_message(message: &ThreadMessage) -> Content {
    match message.role {
        MessageRole::User | MessageRole::System => Content {
            role: "user".to_string(),
            parts: vec![Part::text(&message.content)],
        },
        MessageRole::Assistant => match &message.tool_name {
            Some(tool_name) => {
                let args =
                    serde_json::from_str::<Value>(&message.content).unwrap_or(Value::Null);
                Content {
                    role: "model".to_string(),
                    parts: vec![Part {
                        text: None,
                        function_call: Some(FunctionCall {
                            name: tool_name.clone(),
                            args: Some(args),
                        }),
                        function_response: None,
                    }],
                }
            }
            None => Content {
                role: "model".to_string(),
                parts: vec![Part::text(&message.content)],
            },
        },
        MessageRole::Tool => {
            let response =
                serde_json::from_str::<Value>(&message.content).unwrap_or(Value::Null);
            let response = if response.is_object() {
                response
            } else {
                json!({ "result": response })
            };
            Content {
                role: "user".to_string(),
                parts: vec![Part {
                    text: None,
                    function_call: None,
                    function_response: Some(FunctionResponse {
                        name: message.tool_name.clone().unwrap_or_default(),
                        response,
                    }),
                }],
            }
        }
    }
}

fn turn_from_response(response: &GeminiResponse) -> Result<ModelTurn> {
    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| AgentError::LlmError("No response from Gemini API".to_string()))?;

    let calls: Vec<ToolCallRequest> = candidate
        .content
        .parts
        .iter()
        .filter_map(|part| part.function_call.as_ref())
        .map(|call| ToolCallRequest {
            name: call.name.clone(),
            arguments: call.args.clone().unwrap_or(Value::Null),
        })
        .collect();

    if !calls.is_empty() {
        return Ok(ModelTurn::ToolCalls(calls));
    }

    let text: String = candidate
        .content
        .parts
        .iter()
        .filter_map(|part| part.text.as_deref())
        .collect();
    Ok(ModelTurn::Text(text))
}

//
// ================= Wire types =================
//

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    #[serde(rename = "systemInstruction")]
    system_instruction: SystemInstruction,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiTools {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
}

impl Part {
    fn text(content: &str) -> Self {
        Self {
            text: Some(content.to_string()),
            function_call: None,
            function_response: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: i32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}
