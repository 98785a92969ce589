//! Tool trait, parameter schemas, and registry
//!
//! Tools are the only surface the reasoning capability can act through.
//! Arguments are validated against a declared schema before execution,
//! and every failure leaves the registry as a structured outcome: a tool
//! never throws across this boundary, and raw internal error text never
//! reaches the model.

use crate::error::AgentError;
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

pub mod banking;

pub use banking::create_default_registry;

/// Authenticated call context. Identity comes from the session, never from
/// model-supplied arguments.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub thread_id: Uuid,
}

/// Declared parameter types. Matches what the reasoning capability can
/// express in a function-call argument.
#[derive(Debug, Clone, Copy)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Enum(&'static [&'static str]),
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            description,
        }
    }
}

/// Object schema for a tool's arguments.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// Validate an argument object. Returns a human-readable description
    /// of the first violation.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), String> {
        let empty = Map::new();
        let object = match args {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err("arguments must be a JSON object".to_string()),
        };

        for spec in &self.params {
            let value = object.get(spec.name);
            match value {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(format!("missing required parameter '{}'", spec.name));
                    }
                }
                Some(value) => {
                    let ok = match spec.kind {
                        ParamKind::String => value.is_string(),
                        ParamKind::Number => value.is_number(),
                        ParamKind::Boolean => value.is_boolean(),
                        ParamKind::Enum(options) => value
                            .as_str()
                            .is_some_and(|s| options.contains(&s)),
                    };
                    if !ok {
                        return Err(format!(
                            "parameter '{}' must be {}",
                            spec.name,
                            match spec.kind {
                                ParamKind::String => "a string".to_string(),
                                ParamKind::Number => "a number".to_string(),
                                ParamKind::Boolean => "a boolean".to_string(),
                                ParamKind::Enum(options) =>
                                    format!("one of: {}", options.join(", ")),
                            }
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// JSON-schema object handed to the reasoning capability.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.params {
            let mut prop = Map::new();
            match spec.kind {
                ParamKind::String => {
                    prop.insert("type".into(), json!("string"));
                }
                ParamKind::Number => {
                    prop.insert("type".into(), json!("number"));
                }
                ParamKind::Boolean => {
                    prop.insert("type".into(), json!("boolean"));
                }
                ParamKind::Enum(options) => {
                    prop.insert("type".into(), json!("string"));
                    prop.insert("enum".into(), json!(options));
                }
            }
            prop.insert("description".into(), json!(spec.description));
            properties.insert(spec.name.to_string(), Value::Object(prop));
            if spec.required {
                required.push(spec.name);
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Signature advertised to the reasoning capability for tool selection.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait for a single tool.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Signatures in a stable order, for deterministic prompts.
    pub fn signatures(&self) -> Vec<ToolSignature> {
        let mut signatures: Vec<ToolSignature> = self
            .tools
            .values()
            .map(|tool| ToolSignature {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.schema().to_json(),
            })
            .collect();
        signatures.sort_by(|a, b| a.name.cmp(&b.name));
        signatures
    }

    /// Execute a named tool. Every failure mode is folded into a
    /// structured `ToolOutput`; this function never returns `Err`.
    pub async fn dispatch(&self, ctx: &ToolContext, name: &str, arguments: Value) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            warn!(tool_name = name, "tool not registered");
            return ToolOutput::err("TOOL_NOT_FOUND", format!("Unknown tool '{}'.", name));
        };

        if let Err(violation) = tool.schema().validate(&arguments) {
            return ToolOutput::err("INVALID_ARGUMENTS", violation);
        }

        let input = ToolInput {
            tool_name: name.to_string(),
            parameters: arguments,
        };

        match tool.execute(ctx, &input).await {
            Ok(output) => output,
            Err(AgentError::WorkflowError(message)) => {
                // Workflow-state misuse carries a user-safe explanation.
                ToolOutput::err("WORKFLOW_STATE", message)
            }
            Err(error) => {
                warn!(tool_name = name, error = %error, "tool execution failed");
                ToolOutput::err(
                    "TOOL_ERROR",
                    "The operation could not be completed. Please try again.",
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo a message back"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new(vec![
                ParamSpec::required("message", ParamKind::String, "Message to echo"),
                ParamSpec::optional("times", ParamKind::Number, "Repeat count"),
            ])
        }

        async fn execute(&self, _ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(json!({
                "echo": input.parameters.get("message").cloned().unwrap_or(Value::Null),
            })))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn description(&self) -> &'static str {
            "Always fails with an internal error"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::default()
        }

        async fn execute(&self, _ctx: &ToolContext, _input: &ToolInput) -> Result<ToolOutput> {
            Err(AgentError::ToolError(
                "connection refused at 10.0.0.3:5432".into(),
            ))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            user_id: "user_001".into(),
            thread_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_happy_path() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let output = registry
            .dispatch(&ctx(), "echo", json!({ "message": "hi" }))
            .await;
        assert!(output.success);
        assert_eq!(output.data["echo"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_structured_error() {
        let registry = ToolRegistry::new();
        let output = registry.dispatch(&ctx(), "nope", json!({})).await;
        assert!(!output.success);
        assert_eq!(output.error.unwrap().code, "TOOL_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let output = registry.dispatch(&ctx(), "echo", json!({})).await;
        assert!(!output.success);
        let error = output.error.unwrap();
        assert_eq!(error.code, "INVALID_ARGUMENTS");
        assert!(error.message.contains("message"));
    }

    #[tokio::test]
    async fn test_wrong_argument_type() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let output = registry
            .dispatch(&ctx(), "echo", json!({ "message": 42 }))
            .await;
        assert!(!output.success);
        assert_eq!(output.error.unwrap().code, "INVALID_ARGUMENTS");
    }

    #[tokio::test]
    async fn test_internal_error_is_sanitized() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FailingTool));

        let output = registry.dispatch(&ctx(), "failing", json!({})).await;
        assert!(!output.success);
        let error = output.error.unwrap();
        assert_eq!(error.code, "TOOL_ERROR");
        // The raw connection string must not leak to the model.
        assert!(!error.message.contains("10.0.0.3"));
    }

    #[test]
    fn test_schema_enum_validation() {
        let schema = ToolSchema::new(vec![ParamSpec::required(
            "category",
            ParamKind::Enum(&["utilities", "telecom"]),
            "Biller category",
        )]);
        assert!(schema.validate(&json!({ "category": "utilities" })).is_ok());
        assert!(schema.validate(&json!({ "category": "gaming" })).is_err());
    }

    #[test]
    fn test_schema_json_shape() {
        let schema = ToolSchema::new(vec![
            ParamSpec::required("destination", ParamKind::String, "Who to pay"),
            ParamSpec::optional("amount", ParamKind::Number, "Amount in dollars"),
        ]);
        let rendered = schema.to_json();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["properties"]["destination"]["type"], "string");
        assert_eq!(rendered["required"], json!(["destination"]));
    }
}
