//! Banking Agent Orchestrator
//!
//! A conversational banking agent that:
//! - Alternates between a reasoning capability and typed banking tools
//! - Enforces transfer business rules in a structural state machine
//!   (destination resolution, account-type checks, balance validation,
//!   two-phase shortfall remediation)
//! - Gates every money movement behind a single-use confirmation
//! - Streams turn progress to the caller and keeps per-thread history
//!
//! TURN LOOP:
//! USER MESSAGE → REASON → TOOL CALLS? → EXECUTE → APPEND → REASON → FINAL

pub mod api;
pub mod engine;
pub mod error;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod session;
pub mod tools;

pub use error::Result;

// Re-export common types
pub use engine::{EngineReply, TransferEngine, WorkflowStatus};
pub use models::*;
pub use orchestrator::{AgentEvent, ConversationAgent};
