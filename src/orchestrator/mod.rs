//! Conversation orchestrator
//!
//! The turn loop: feed history plus tool signatures to the reasoning
//! capability, execute whatever tools it asks for in the order it asked,
//! append the results, and repeat until it produces a final answer. The
//! loop is strictly sequential and bounded; a misbehaving model ends the
//! turn with an error event, never the session.

use crate::llm::{ChatModel, ChatRequest, ModelTurn};
use crate::models::{MessageRole, ThreadMessage};
use crate::session::Session;
use crate::tools::{ToolContext, ToolRegistry};
use crate::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Safety bound on reasoning/tool rounds within a single user turn.
const MAX_TOOL_ROUNDS: u32 = 8;

const SYSTEM_PROMPT: &str = r#"You are a banking assistant for an Australian banking application. You help the user move money between their accounts, pay saved contacts, and pay bills via BPAY.

How to work:
- Use the tools to act. For anything that moves money, call initiate_transfer or initiate_bill_payment and relay the engine's reply to the user in your own words, keeping amounts, names, and numbered options exactly as given.
- When the user answers a numbered list, call select_option. When they supply a missing amount, call provide_amount.
- Only call confirm_pending after the user has explicitly answered a confirmation prompt with yes or no. Never assume a confirmation, and never reuse one: a remediation plan needs a separate yes for each phase.
- Account balances change after every transfer; rely on the engine and get_accounts rather than remembered numbers.

Style:
- Be concise and professional, with Australian English spelling.
- Format currency as $X.XX AUD.
- Show only the last 4 digits of account numbers.
- If something fails, explain it in plain terms and suggest a next step; never show technical codes or internals."#;

/// Events streamed to the caller during a turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Token { content: String },
    ToolStart { tool_name: String },
    ToolEnd { tool_name: String },
    Final { content: String },
    Error { content: String },
}

/// The conversation agent: one session, one turn loop.
pub struct ConversationAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    session: Session,
}

impl ConversationAgent {
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>, session: Session) -> Self {
        Self {
            model,
            tools,
            session,
        }
    }

    /// Resolve the opaque credential and prime the session cache.
    pub async fn initialize_context(&self, token: &str) -> Result<crate::models::User> {
        self.session.initialize_context(token).await
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run one user turn, streaming events into `events`. Every failure
    /// path ends with a single `Error` event; the session itself survives.
    /// Dropping the receiver cancels the loop between steps.
    pub async fn process_message(&self, user_message: &str, events: mpsc::Sender<AgentEvent>) {
        if let Err(error) = self.run_turn(user_message, &events).await {
            error!(error = %error, "turn failed");
            let _ = events
                .send(AgentEvent::Error {
                    content: "Something went wrong handling that request. Please try again."
                        .to_string(),
                })
                .await;
        }
    }

    /// Convenience wrapper: run a turn and return only the final text.
    /// The event stream is drained concurrently so token bursts never
    /// back-pressure the turn itself.
    pub async fn process_message_sync(&self, user_message: &str) -> Result<String> {
        let (tx, mut rx) = mpsc::channel(64);
        let turn = self.process_message(user_message, tx);
        let drain = async {
            let mut final_text = None;
            let mut error = None;
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::Final { content } => final_text = Some(content),
                    AgentEvent::Error { content } => error = Some(content),
                    _ => {}
                }
            }
            (final_text, error)
        };
        let ((), (final_text, error)) = tokio::join!(turn, drain);

        if let Some(content) = error {
            return Err(crate::error::AgentError::OrchestrationError(content));
        }
        final_text.ok_or_else(|| {
            crate::error::AgentError::OrchestrationError("turn produced no final answer".into())
        })
    }

    async fn run_turn(
        &self,
        user_message: &str,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<()> {
        let thread_id = self.session.thread_id().await;
        let user_id = self.session.user_id().await?;

        info!(%thread_id, "turn started");

        self.session
            .append(ThreadMessage::new(MessageRole::User, user_message))
            .await?;

        // Context is assembled once per turn; the account snapshot inside
        // it is fetched fresh because prior turns may have moved money.
        let context = self.session.context_block().await?;
        let system = format!("{}\n\n{}", SYSTEM_PROMPT, context);
        let signatures = self.tools.signatures();
        let ctx = ToolContext {
            user_id,
            thread_id,
        };

        for round in 0..MAX_TOOL_ROUNDS {
            if events.is_closed() {
                warn!(%thread_id, "caller cancelled the turn");
                return Ok(());
            }

            let request = ChatRequest {
                system: system.clone(),
                messages: self.session.history().await?,
                tools: signatures.clone(),
            };

            // Forward streamed fragments while the model works.
            let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
            let forward_events = events.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(fragment) = token_rx.recv().await {
                    if forward_events
                        .send(AgentEvent::Token { content: fragment })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });

            let turn = self.model.complete_streaming(&request, token_tx).await;
            let _ = forwarder.await;
            let turn = turn?;

            match turn {
                ModelTurn::ToolCalls(calls) => {
                    debug!(%thread_id, round, call_count = calls.len(), "executing tool calls");

                    // Requested order is execution order: later calls may
                    // depend on data produced by earlier ones.
                    for call in calls {
                        if events.is_closed() {
                            warn!(%thread_id, "caller cancelled mid-round");
                            return Ok(());
                        }

                        let _ = events
                            .send(AgentEvent::ToolStart {
                                tool_name: call.name.clone(),
                            })
                            .await;

                        let mut marker = ThreadMessage::new(
                            MessageRole::Assistant,
                            call.arguments.to_string(),
                        );
                        marker.tool_name = Some(call.name.clone());
                        self.session.append(marker).await?;

                        let output = self
                            .tools
                            .dispatch(&ctx, &call.name, call.arguments)
                            .await;
                        self.session
                            .append(ThreadMessage::tool_result(
                                &call.name,
                                serde_json::to_string(&output)?,
                            ))
                            .await?;

                        let _ = events
                            .send(AgentEvent::ToolEnd {
                                tool_name: call.name,
                            })
                            .await;
                    }
                }
                ModelTurn::Text(text) => {
                    self.session
                        .append(ThreadMessage::new(MessageRole::Assistant, text.clone()))
                        .await?;
                    let _ = events.send(AgentEvent::Final { content: text }).await;
                    info!(%thread_id, round, "turn complete");
                    return Ok(());
                }
            }
        }

        Err(crate::error::AgentError::MaxToolRoundsExceeded(format!(
            "turn exceeded {} tool rounds",
            MAX_TOOL_ROUNDS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TransferEngine;
    use crate::llm::ScriptedChatModel;
    use crate::services::{InMemoryLedger, Services};
    use crate::session::ThreadStore;
    use crate::tools::create_default_registry;
    use serde_json::json;

    async fn agent_with_script(
        turns: Vec<ModelTurn>,
    ) -> (ConversationAgent, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::with_seed_data());
        let services = Services::from_ledger(ledger.clone());
        let engine = Arc::new(TransferEngine::new(services.clone()));
        let tools = Arc::new(create_default_registry(services.clone(), engine));
        let session = Session::new(services, Arc::new(ThreadStore::in_memory()));
        session.initialize_context("mock_token_001").await.unwrap();

        let model = Arc::new(ScriptedChatModel::new(turns));
        (ConversationAgent::new(model, tools, session), ledger)
    }

    async fn collect_events(
        agent: &ConversationAgent,
        message: &str,
    ) -> Vec<AgentEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let turn = agent.process_message(message, tx);
        let drain = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let ((), events) = tokio::join!(turn, drain);
        events
    }

    #[tokio::test]
    async fn test_plain_answer_turn() {
        let (agent, _) = agent_with_script(vec![ScriptedChatModel::text(
            "G'day! How can I help with your banking today?",
        )])
        .await;

        let events = collect_events(&agent, "hello").await;
        assert!(matches!(
            events.last(),
            Some(AgentEvent::Final { content }) if content.contains("G'day")
        ));

        let history = agent.session().history().await.unwrap();
        assert_eq!(history.len(), 2); // user + assistant
    }

    #[tokio::test]
    async fn test_tool_round_then_final() {
        let (agent, _) = agent_with_script(vec![
            ScriptedChatModel::tool_call("get_accounts", json!({})),
            ScriptedChatModel::text("You have $500.00 AUD in your Daily Expense Account."),
        ])
        .await;

        let events = collect_events(&agent, "what's my balance?").await;

        let tool_starts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AgentEvent::ToolStart { .. }))
            .collect();
        assert_eq!(tool_starts.len(), 1);
        assert!(matches!(events.last(), Some(AgentEvent::Final { .. })));

        // user, tool-call marker, tool result, assistant answer
        let history = agent.session().history().await.unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, MessageRole::Tool);
        assert!(history[2].content.contains("Daily Expense Account"));
    }

    #[tokio::test]
    async fn test_transfer_conversation_end_to_end() {
        let (agent, ledger) = agent_with_script(vec![
            // Turn 1: user asks to move money; model starts the workflow.
            ScriptedChatModel::tool_call(
                "initiate_transfer",
                json!({ "destination": "savings", "amount": 100.0 }),
            ),
            ScriptedChatModel::text(
                "Please confirm: transfer $100.00 AUD from Daily Expense Account to Savings Account?",
            ),
            // Turn 2: user says yes; model relays the confirmation.
            ScriptedChatModel::tool_call("confirm_pending", json!({ "confirmed": true })),
            ScriptedChatModel::text("Done! $100.00 AUD moved to your Savings Account."),
        ])
        .await;

        let answer = agent
            .process_message_sync("move $100 to my savings")
            .await
            .unwrap();
        assert!(answer.contains("confirm"));
        // Nothing moved yet: the confirmation gate is still closed.
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(50_000));

        let answer = agent.process_message_sync("yes").await.unwrap();
        assert!(answer.contains("Done"));
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(40_000));
        assert_eq!(
            ledger.balance_of("user_001", "acc2").await,
            Some(1_510_000)
        );
    }

    #[tokio::test]
    async fn test_runaway_model_hits_round_bound() {
        // A model that never stops calling tools.
        let turns: Vec<ModelTurn> = (0..20)
            .map(|_| ScriptedChatModel::tool_call("get_accounts", json!({})))
            .collect();
        let (agent, _) = agent_with_script(turns).await;

        let events = collect_events(&agent, "loop forever").await;
        assert!(matches!(events.last(), Some(AgentEvent::Error { .. })));
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_generic_error() {
        // Empty script: the first completion call fails.
        let (agent, _) = agent_with_script(vec![]).await;

        let events = collect_events(&agent, "hello").await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Error { content } => {
                assert!(!content.contains("scripted"));
            }
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unauthenticated_session_errors() {
        let ledger = Arc::new(InMemoryLedger::with_seed_data());
        let services = Services::from_ledger(ledger);
        let engine = Arc::new(TransferEngine::new(services.clone()));
        let tools = Arc::new(create_default_registry(services.clone(), engine));
        let session = Session::new(services, Arc::new(ThreadStore::in_memory()));
        let agent = ConversationAgent::new(
            Arc::new(ScriptedChatModel::new(vec![])),
            tools,
            session,
        );

        assert!(agent.process_message_sync("hi").await.is_err());
    }
}
