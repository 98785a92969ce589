//! Transfer decision engine
//!
//! The business-rule state machine around money movement. Destination
//! resolution, source-account eligibility, balance validation, and the
//! two-phase shortfall remediation all live here, enforced structurally:
//! the reasoning capability can only drive the workflow through typed
//! operations, and no execution happens without a single-use confirmation
//! recorded for that exact operation.
//!
//! RESOLVING_DESTINATION → {AWAITING_CLARIFICATION | AWAITING_SELECTION |
//! SOURCE_CHECK} → {REJECTED | AWAITING_AMOUNT | BALANCE_CHECK} →
//! {REJECTED | AWAITING_CONFIRMATION | REMEDIATION_PLAN} →
//! AWAITING_CONFIRMATION → EXECUTING → {SETTLED | FAILED}

use crate::error::AgentError;
use crate::models::{
    format_cents, Account, AccountType, Cents, ExternalTransferKind, PaymentInstrument,
    PaymentInstrumentDetails, SavedBiller,
};
use crate::services::{ServiceError, Services};
use crate::Result;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod matcher;

pub use matcher::{name_matches, resolve_destination, DestinationCandidate};

/// Workflow status reported back to the caller after every engine
/// operation. Mirrors the state machine's node names.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    AwaitingClarification,
    AwaitingSelection,
    AwaitingAmount,
    AwaitingConfirmation,
    RemediationProposed,
    AwaitingPhaseTwo,
    Rejected,
    Settled,
    Failed,
    Cancelled,
}

/// Structured outcome of an engine operation. `message` is what the
/// assistant should relay; `data` carries machine-readable details.
#[derive(Debug, Clone, Serialize)]
pub struct EngineReply {
    pub status: WorkflowStatus,
    pub message: String,
    pub data: serde_json::Value,
}

impl EngineReply {
    fn new(status: WorkflowStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }

    fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A fully-specified money movement awaiting its confirmation.
#[derive(Debug, Clone)]
struct PendingOperation {
    kind: OperationKind,
    amount: Cents,
    source_account_id: String,
    source_name: String,
    destination_label: String,
}

#[derive(Debug, Clone)]
enum OperationKind {
    Internal { to_account_id: String },
    External { instrument_id: String },
    Bpay { instrument_id: String },
    BillPayment {
        biller_code: String,
        account_number: String,
        customer_ref: String,
    },
}

impl PendingOperation {
    fn confirmation_prompt(&self) -> String {
        format!(
            "Please confirm: {} {} from {} to {}? Reply 'yes' to confirm or 'no' to cancel.",
            match self.kind {
                OperationKind::Internal { .. } => "transfer",
                OperationKind::External { .. } => "send",
                OperationKind::Bpay { .. } | OperationKind::BillPayment { .. } => "pay",
            },
            format_cents(self.amount),
            self.source_name,
            self.destination_label
        )
    }

    fn summary_json(&self) -> serde_json::Value {
        json!({
            "amount": format_cents(self.amount),
            "source": self.source_name,
            "destination": self.destination_label,
        })
    }
}

/// Destination after resolution, carried across a suspended workflow.
#[derive(Debug, Clone)]
enum ResolvedDestination {
    OwnAccount { account_id: String, name: String },
    ContactInstrument {
        contact_name: String,
        instrument: PaymentInstrument,
    },
    Biller(SavedBiller),
}

impl ResolvedDestination {
    fn label(&self) -> String {
        match self {
            ResolvedDestination::OwnAccount { name, .. } => name.clone(),
            ResolvedDestination::ContactInstrument {
                contact_name,
                instrument,
            } => match &instrument.details {
                PaymentInstrumentDetails::BankAccount { name, .. } => {
                    format!("{} ({})", contact_name, name)
                }
                PaymentInstrumentDetails::BpayBiller { biller_name, .. } => {
                    format!("{} ({})", contact_name, biller_name)
                }
            },
            ResolvedDestination::Biller(biller) => {
                format!("{} ({})", biller.biller_name, biller.masked_account())
            }
        }
    }
}

#[derive(Debug, Clone)]
enum SelectionPool {
    Destinations(Vec<DestinationCandidate>),
    Billers(Vec<SavedBiller>),
}

impl SelectionPool {
    fn labels(&self) -> Vec<String> {
        match self {
            SelectionPool::Destinations(candidates) => {
                candidates.iter().map(DestinationCandidate::label).collect()
            }
            SelectionPool::Billers(billers) => billers
                .iter()
                .map(|b| {
                    let nickname = b
                        .nickname
                        .as_deref()
                        .map(|n| format!(" \"{}\"", n))
                        .unwrap_or_default();
                    format!(
                        "{}{} - Account: {}",
                        b.biller_name,
                        nickname,
                        b.masked_account()
                    )
                })
                .collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            SelectionPool::Destinations(c) => c.len(),
            SelectionPool::Billers(b) => b.len(),
        }
    }
}

#[derive(Debug, Clone)]
enum WorkflowState {
    AwaitingSelection {
        pool: SelectionPool,
        amount: Option<Cents>,
        source_hint: Option<String>,
    },
    AwaitingAmount {
        destination: ResolvedDestination,
        source_hint: Option<String>,
    },
    AwaitingConfirmation {
        pending: PendingOperation,
    },
    /// Two-phase plan presented; phase 1 (the top-up) not yet confirmed.
    RemediationProposed {
        topup: PendingOperation,
        target: PendingOperation,
    },
    /// Phase 1 settled; phase 2 requires its own fresh confirmation.
    AwaitingPhaseTwo {
        target: PendingOperation,
    },
}

struct Workflow {
    user_id: String,
    state: WorkflowState,
}

/// The decision engine. Holds at most one in-flight workflow per thread.
pub struct TransferEngine {
    services: Services,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
}

impl TransferEngine {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Begin resolving a transfer intent. Any workflow already pending on
    /// this thread is discarded: a new utterance starts a fresh resolution.
    pub async fn initiate_transfer(
        &self,
        user_id: &str,
        thread_id: Uuid,
        destination_query: &str,
        amount: Option<Cents>,
        source_hint: Option<&str>,
    ) -> Result<EngineReply> {
        self.workflows.write().await.remove(&thread_id);

        let accounts = self.fresh_accounts(user_id).await?;
        let contacts = self
            .services
            .contacts
            .get_contacts(user_id)
            .await
            .map_err(service_failure)?;

        let candidates = resolve_destination(destination_query, &accounts, &contacts);
        debug!(
            user_id,
            %thread_id,
            query = destination_query,
            candidate_count = candidates.len(),
            "destination resolution"
        );

        match candidates.len() {
            0 => Ok(EngineReply::new(
                WorkflowStatus::AwaitingClarification,
                format!(
                    "I couldn't find an account or contact matching '{}'. \
                     Could you try a different name?",
                    destination_query
                ),
            )),
            1 => {
                let destination = destination_from_candidate(candidates.into_iter().next().unwrap());
                self.plan(
                    user_id,
                    thread_id,
                    destination,
                    amount,
                    source_hint.map(str::to_string),
                    &accounts,
                )
                .await
            }
            _ => {
                let pool = SelectionPool::Destinations(candidates);
                let reply = selection_prompt(&pool);
                self.store(
                    thread_id,
                    user_id,
                    WorkflowState::AwaitingSelection {
                        pool,
                        amount,
                        source_hint: source_hint.map(str::to_string),
                    },
                )
                .await;
                Ok(reply)
            }
        }
    }

    /// Begin resolving a bill payment against the user's saved billers.
    pub async fn initiate_bill_payment(
        &self,
        user_id: &str,
        thread_id: Uuid,
        biller_query: &str,
        amount: Option<Cents>,
    ) -> Result<EngineReply> {
        self.workflows.write().await.remove(&thread_id);

        let billers = self
            .services
            .billers
            .get_saved_billers(user_id, Some(biller_query), None)
            .await
            .map_err(service_failure)?;
        debug!(
            user_id,
            %thread_id,
            query = biller_query,
            match_count = billers.len(),
            "saved biller search"
        );

        match billers.len() {
            0 => Ok(EngineReply::new(
                WorkflowStatus::AwaitingClarification,
                format!(
                    "I couldn't find a saved biller matching '{}'. Would you like to: \
                     1. Try a different search term 2. Add a new biller 3. Cancel",
                    biller_query
                ),
            )),
            1 => {
                let biller = billers.into_iter().next().unwrap();
                self.plan_biller(user_id, thread_id, biller, amount).await
            }
            _ => {
                let pool = SelectionPool::Billers(billers);
                let reply = selection_prompt(&pool);
                self.store(
                    thread_id,
                    user_id,
                    WorkflowState::AwaitingSelection {
                        pool,
                        amount,
                        source_hint: None,
                    },
                )
                .await;
                Ok(reply)
            }
        }
    }

    /// Resume a paused disambiguation with a 1-based pick.
    pub async fn select_option(&self, thread_id: Uuid, index: usize) -> Result<EngineReply> {
        let workflow = self.take(thread_id).await?;
        let user_id = workflow.user_id;

        match workflow.state {
            WorkflowState::AwaitingSelection {
                pool,
                amount,
                source_hint,
            } => {
                if index == 0 || index > pool.len() {
                    let reply = EngineReply::new(
                        WorkflowStatus::AwaitingSelection,
                        format!("Please select a number between 1 and {}.", pool.len()),
                    )
                    .with_data(json!({ "options": pool.labels() }));
                    self.store(
                        thread_id,
                        &user_id,
                        WorkflowState::AwaitingSelection {
                            pool,
                            amount,
                            source_hint,
                        },
                    )
                    .await;
                    return Ok(reply);
                }

                match pool {
                    SelectionPool::Destinations(mut candidates) => {
                        let destination =
                            destination_from_candidate(candidates.swap_remove(index - 1));
                        let accounts = self.fresh_accounts(&user_id).await?;
                        self.plan(&user_id, thread_id, destination, amount, source_hint, &accounts)
                            .await
                    }
                    SelectionPool::Billers(mut billers) => {
                        let biller = billers.swap_remove(index - 1);
                        self.plan_biller(&user_id, thread_id, biller, amount).await
                    }
                }
            }
            other => {
                self.store(thread_id, &user_id, other).await;
                Err(AgentError::WorkflowError(
                    "There is no selection pending on this conversation.".into(),
                ))
            }
        }
    }

    /// Resume a workflow suspended on a missing amount.
    pub async fn provide_amount(&self, thread_id: Uuid, amount: Cents) -> Result<EngineReply> {
        let workflow = self.take(thread_id).await?;
        let user_id = workflow.user_id;

        match workflow.state {
            WorkflowState::AwaitingAmount {
                destination,
                source_hint,
            } => match destination {
                ResolvedDestination::Biller(biller) => {
                    self.plan_biller(&user_id, thread_id, biller, Some(amount))
                        .await
                }
                other => {
                    let accounts = self.fresh_accounts(&user_id).await?;
                    self.plan(&user_id, thread_id, other, Some(amount), source_hint, &accounts)
                        .await
                }
            },
            other => {
                self.store(thread_id, &user_id, other).await;
                Err(AgentError::WorkflowError(
                    "No pending operation is waiting for an amount.".into(),
                ))
            }
        }
    }

    /// Confirm or decline the single pending operation. A confirmation is
    /// consumed by exactly one execution; a decline cancels only the
    /// pending operation, never an already-settled phase.
    pub async fn confirm(&self, thread_id: Uuid, confirmed: bool) -> Result<EngineReply> {
        let workflow = self.take(thread_id).await?;
        let user_id = workflow.user_id;

        match workflow.state {
            WorkflowState::AwaitingConfirmation { pending } => {
                if !confirmed {
                    info!(%thread_id, "pending operation declined");
                    return Ok(EngineReply::new(
                        WorkflowStatus::Cancelled,
                        "Cancelled. No money has been moved.",
                    ));
                }
                self.execute(&user_id, pending).await
            }
            WorkflowState::RemediationProposed { topup, target } => {
                if !confirmed {
                    info!(%thread_id, "remediation plan declined before phase 1");
                    return Ok(EngineReply::new(
                        WorkflowStatus::Cancelled,
                        "Cancelled. No money has been moved.",
                    ));
                }
                // Phase 1: only the internal top-up executes here. The
                // original transfer stays parked behind its own gate.
                let reply = self.execute(&user_id, topup).await?;
                if reply.status != WorkflowStatus::Settled {
                    return Ok(reply);
                }
                let prompt = format!(
                    "{} Now for the original payment: {} Note this is a separate confirmation.",
                    reply.message,
                    target.confirmation_prompt()
                );
                let data = json!({ "pending": target.summary_json() });
                self.store(
                    thread_id,
                    &user_id,
                    WorkflowState::AwaitingPhaseTwo { target },
                )
                .await;
                Ok(EngineReply::new(WorkflowStatus::AwaitingPhaseTwo, prompt).with_data(data))
            }
            WorkflowState::AwaitingPhaseTwo { target } => {
                if !confirmed {
                    info!(%thread_id, "remediation halted after phase 1");
                    let balances = self.balances_summary(&user_id).await?;
                    return Ok(EngineReply::new(
                        WorkflowStatus::Cancelled,
                        format!(
                            "Understood — the payment has been cancelled. The top-up from \
                             savings has already been completed, so your balances are now: {}",
                            balances
                        ),
                    ));
                }
                self.execute(&user_id, target).await
            }
            other => {
                self.workflows.write().await.insert(
                    thread_id,
                    Workflow {
                        user_id,
                        state: other,
                    },
                );
                Err(AgentError::WorkflowError(
                    "Nothing is awaiting confirmation on this conversation.".into(),
                ))
            }
        }
    }

    // =============================
    // Planning (steps 2-5)
    // =============================

    async fn plan(
        &self,
        user_id: &str,
        thread_id: Uuid,
        destination: ResolvedDestination,
        amount: Option<Cents>,
        source_hint: Option<String>,
        accounts: &[Account],
    ) -> Result<EngineReply> {
        match destination {
            ResolvedDestination::OwnAccount { account_id, name } => {
                self.plan_internal(
                    user_id,
                    thread_id,
                    account_id,
                    name,
                    amount,
                    source_hint,
                    accounts,
                )
                .await
            }
            ResolvedDestination::ContactInstrument {
                contact_name,
                instrument,
            } => {
                let destination = ResolvedDestination::ContactInstrument {
                    contact_name,
                    instrument,
                };
                self.plan_external(user_id, thread_id, destination, amount, source_hint, accounts)
                    .await
            }
            ResolvedDestination::Biller(biller) => {
                self.plan_biller(user_id, thread_id, biller, amount).await
            }
        }
    }

    async fn plan_internal(
        &self,
        user_id: &str,
        thread_id: Uuid,
        to_account_id: String,
        to_name: String,
        amount: Option<Cents>,
        source_hint: Option<String>,
        accounts: &[Account],
    ) -> Result<EngineReply> {
        // Either account type may be the source or the destination.
        let source = match &source_hint {
            Some(hint) => {
                match accounts
                    .iter()
                    .find(|a| a.id != to_account_id && name_matches(hint, &a.name))
                {
                    Some(account) => account.clone(),
                    None => {
                        return Ok(EngineReply::new(
                            WorkflowStatus::AwaitingClarification,
                            format!("I couldn't find a source account matching '{}'.", hint),
                        ))
                    }
                }
            }
            None => {
                let fallback = accounts
                    .iter()
                    .find(|a| {
                        a.id != to_account_id && a.account_type == AccountType::Transactional
                    })
                    .or_else(|| accounts.iter().find(|a| a.id != to_account_id));
                match fallback {
                    Some(account) => account.clone(),
                    None => {
                        return Ok(EngineReply::new(
                            WorkflowStatus::Rejected,
                            "There is no other account to transfer from.",
                        ))
                    }
                }
            }
        };

        let destination = ResolvedDestination::OwnAccount {
            account_id: to_account_id.clone(),
            name: to_name.clone(),
        };
        let Some(amount) = amount else {
            return self
                .suspend_for_amount(user_id, thread_id, destination, source_hint)
                .await;
        };

        if source.balance_cents < amount {
            return Ok(EngineReply::new(
                WorkflowStatus::Rejected,
                format!(
                    "{} has insufficient funds for this transfer. Available balance: {}.",
                    source.name,
                    format_cents(source.balance_cents)
                ),
            ));
        }

        let pending = PendingOperation {
            kind: OperationKind::Internal { to_account_id },
            amount,
            source_account_id: source.id,
            source_name: source.name,
            destination_label: to_name,
        };
        self.await_confirmation(thread_id, user_id, pending).await
    }

    async fn plan_external(
        &self,
        user_id: &str,
        thread_id: Uuid,
        destination: ResolvedDestination,
        amount: Option<Cents>,
        source_hint: Option<String>,
        accounts: &[Account],
    ) -> Result<EngineReply> {
        // Source eligibility comes before any balance inspection: a named
        // savings source is rejected outright.
        if let Some(hint) = &source_hint {
            if let Some(named) = accounts.iter().find(|a| name_matches(hint, &a.name)) {
                if named.account_type == AccountType::Savings {
                    return Ok(EngineReply::new(
                        WorkflowStatus::Rejected,
                        "External and BPAY payments must come from your transactional \
                         account. A savings account can't be used directly for this payment.",
                    ));
                }
            }
        }

        let Some(transactional) = accounts
            .iter()
            .find(|a| a.account_type == AccountType::Transactional)
            .cloned()
        else {
            return Ok(EngineReply::new(
                WorkflowStatus::Rejected,
                "You need a transactional account to make this payment.",
            ));
        };

        let Some(amount) = amount else {
            return self
                .suspend_for_amount(user_id, thread_id, destination, source_hint)
                .await;
        };

        let (kind, destination_label) = match &destination {
            ResolvedDestination::ContactInstrument { instrument, .. } => {
                let kind = match &instrument.details {
                    PaymentInstrumentDetails::BankAccount { .. } => OperationKind::External {
                        instrument_id: instrument.id.clone(),
                    },
                    PaymentInstrumentDetails::BpayBiller { .. } => OperationKind::Bpay {
                        instrument_id: instrument.id.clone(),
                    },
                };
                (kind, destination.label())
            }
            ResolvedDestination::Biller(biller) => (
                OperationKind::BillPayment {
                    biller_code: biller.biller_code.clone(),
                    account_number: biller.account_number.clone(),
                    customer_ref: biller.customer_ref.clone(),
                },
                destination.label(),
            ),
            ResolvedDestination::OwnAccount { .. } => {
                return Err(AgentError::WorkflowError(
                    "internal destination routed to external planner".into(),
                ))
            }
        };

        let pending = PendingOperation {
            kind,
            amount,
            source_account_id: transactional.id.clone(),
            source_name: transactional.name.clone(),
            destination_label,
        };

        if transactional.balance_cents >= amount {
            return self.await_confirmation(thread_id, user_id, pending).await;
        }

        // Shortfall remediation: only worth proposing when savings can
        // actually cover the gap.
        let best_savings = accounts
            .iter()
            .filter(|a| a.account_type == AccountType::Savings)
            .max_by_key(|a| a.balance_cents)
            .cloned();
        let savings_balance = best_savings.as_ref().map(|s| s.balance_cents).unwrap_or(0);
        let shortfall = amount - transactional.balance_cents;

        let Some(savings) = best_savings.filter(|s| s.balance_cents >= shortfall) else {
            let combined = transactional.balance_cents + savings_balance;
            return Ok(EngineReply::new(
                WorkflowStatus::Rejected,
                format!(
                    "You don't have enough funds across your accounts for this payment. \
                     Combined available: {}.",
                    format_cents(combined)
                ),
            ));
        };

        let topup = PendingOperation {
            kind: OperationKind::Internal {
                to_account_id: transactional.id.clone(),
            },
            amount: shortfall,
            source_account_id: savings.id.clone(),
            source_name: savings.name.clone(),
            destination_label: transactional.name.clone(),
        };

        let message = format!(
            "{} has {} but this payment needs {} — a shortfall of {}. I can move {} \
             from {} to {} first, then make the payment of {} to {}. Each step needs \
             its own confirmation. Shall I start with the top-up? Reply 'yes' to \
             confirm or 'no' to cancel.",
            transactional.name,
            format_cents(transactional.balance_cents),
            format_cents(amount),
            format_cents(shortfall),
            format_cents(shortfall),
            savings.name,
            transactional.name,
            format_cents(amount),
            pending.destination_label,
        );
        let data = json!({
            "shortfall": format_cents(shortfall),
            "topup": topup.summary_json(),
            "target": pending.summary_json(),
        });

        info!(
            user_id,
            %thread_id,
            shortfall,
            "remediation plan proposed"
        );
        self.store(
            thread_id,
            user_id,
            WorkflowState::RemediationProposed {
                topup,
                target: pending,
            },
        )
        .await;
        Ok(EngineReply::new(WorkflowStatus::RemediationProposed, message).with_data(data))
    }

    async fn plan_biller(
        &self,
        user_id: &str,
        thread_id: Uuid,
        biller: SavedBiller,
        amount: Option<Cents>,
    ) -> Result<EngineReply> {
        // Validate the biller before anything is queued for confirmation.
        let validation = self
            .services
            .billers
            .validate_biller(&biller.biller_code, &biller.account_number, &biller.customer_ref)
            .await
            .map_err(service_failure)?;
        if !validation.is_valid {
            let detail = validation
                .error_message
                .unwrap_or_else(|| "Unable to validate the biller details.".into());
            return Ok(EngineReply::new(
                WorkflowStatus::Rejected,
                format!("{} Please check the biller details and try again.", detail),
            ));
        }

        let Some(amount) = amount else {
            let name = biller.biller_name.clone();
            return self
                .suspend_for_amount(
                    user_id,
                    thread_id,
                    ResolvedDestination::Biller(biller),
                    None,
                )
                .await
                .map(|mut reply| {
                    reply.message = format!("How much would you like to pay to {}?", name);
                    reply
                });
        };

        let accounts = self.fresh_accounts(user_id).await?;
        self.plan_external(
            user_id,
            thread_id,
            ResolvedDestination::Biller(biller),
            Some(amount),
            None,
            &accounts,
        )
        .await
    }

    async fn suspend_for_amount(
        &self,
        user_id: &str,
        thread_id: Uuid,
        destination: ResolvedDestination,
        source_hint: Option<String>,
    ) -> Result<EngineReply> {
        let label = destination.label();
        self.store(
            thread_id,
            user_id,
            WorkflowState::AwaitingAmount {
                destination,
                source_hint,
            },
        )
        .await;
        Ok(EngineReply::new(
            WorkflowStatus::AwaitingAmount,
            format!("How much would you like to send to {}?", label),
        ))
    }

    async fn await_confirmation(
        &self,
        thread_id: Uuid,
        user_id: &str,
        pending: PendingOperation,
    ) -> Result<EngineReply> {
        let prompt = pending.confirmation_prompt();
        let data = json!({ "pending": pending.summary_json() });
        self.store(
            thread_id,
            user_id,
            WorkflowState::AwaitingConfirmation { pending },
        )
        .await;
        Ok(EngineReply::new(WorkflowStatus::AwaitingConfirmation, prompt).with_data(data))
    }

    // =============================
    // Execution (step 6)
    // =============================

    async fn execute(&self, user_id: &str, pending: PendingOperation) -> Result<EngineReply> {
        let outcome = match &pending.kind {
            OperationKind::Internal { to_account_id } => {
                self.services
                    .transfers
                    .transfer_between_own_accounts(
                        user_id,
                        &pending.source_account_id,
                        to_account_id,
                        pending.amount,
                    )
                    .await
                    .map(|o| o.reference)
            }
            OperationKind::External { instrument_id } => {
                self.services
                    .transfers
                    .transfer_to_external(
                        user_id,
                        &pending.source_account_id,
                        instrument_id,
                        pending.amount,
                        ExternalTransferKind::External,
                    )
                    .await
                    .map(|o| o.reference)
            }
            OperationKind::Bpay { instrument_id } => {
                self.services
                    .transfers
                    .transfer_to_external(
                        user_id,
                        &pending.source_account_id,
                        instrument_id,
                        pending.amount,
                        ExternalTransferKind::Bpay,
                    )
                    .await
                    .map(|o| o.reference)
            }
            OperationKind::BillPayment {
                biller_code,
                account_number,
                customer_ref,
            } => self
                .services
                .payments
                .pay_bill(
                    user_id,
                    biller_code,
                    account_number,
                    customer_ref,
                    pending.amount,
                )
                .await
                .map(|o| o.reference),
        };

        match outcome {
            Ok(reference) => {
                let balances = self.balances_summary(user_id).await?;
                info!(
                    user_id,
                    amount = pending.amount,
                    reference = %reference,
                    "operation settled"
                );
                Ok(EngineReply::new(
                    WorkflowStatus::Settled,
                    format!(
                        "Done — {} sent from {} to {}. Reference: {}. Your balances: {}",
                        format_cents(pending.amount),
                        pending.source_name,
                        pending.destination_label,
                        reference,
                        balances
                    ),
                )
                .with_data(json!({ "reference": reference })))
            }
            Err(error) => {
                warn!(
                    user_id,
                    code = error.code.as_str(),
                    "operation failed; balances unchanged"
                );
                Ok(EngineReply::new(WorkflowStatus::Failed, error.message)
                    .with_data(json!({ "code": error.code.as_str() })))
            }
        }
    }

    // =============================
    // Internals
    // =============================

    async fn fresh_accounts(&self, user_id: &str) -> Result<Vec<Account>> {
        self.services
            .accounts
            .get_accounts(user_id)
            .await
            .map_err(service_failure)
    }

    async fn balances_summary(&self, user_id: &str) -> Result<String> {
        let accounts = self.fresh_accounts(user_id).await?;
        Ok(accounts
            .iter()
            .map(|a| format!("{}: {}", a.name, a.balance_display()))
            .collect::<Vec<_>>()
            .join(", "))
    }

    async fn store(&self, thread_id: Uuid, user_id: &str, state: WorkflowState) {
        self.workflows.write().await.insert(
            thread_id,
            Workflow {
                user_id: user_id.to_string(),
                state,
            },
        );
    }

    async fn take(&self, thread_id: Uuid) -> Result<Workflow> {
        self.workflows
            .write()
            .await
            .remove(&thread_id)
            .ok_or_else(|| {
                AgentError::WorkflowError(
                    "There is no transfer or payment in progress on this conversation.".into(),
                )
            })
    }
}

fn destination_from_candidate(candidate: DestinationCandidate) -> ResolvedDestination {
    match candidate {
        DestinationCandidate::OwnAccount(account) => ResolvedDestination::OwnAccount {
            account_id: account.id,
            name: account.name,
        },
        DestinationCandidate::ContactInstrument {
            contact_name,
            instrument,
        } => ResolvedDestination::ContactInstrument {
            contact_name,
            instrument,
        },
    }
}

fn selection_prompt(pool: &SelectionPool) -> EngineReply {
    let labels = pool.labels();
    let mut message = String::from("I found more than one match:\n");
    for (i, label) in labels.iter().enumerate() {
        message.push_str(&format!("{}. {}\n", i + 1, label));
    }
    message.push_str("Please select one by number.");
    EngineReply::new(WorkflowStatus::AwaitingSelection, message)
        .with_data(json!({ "options": labels }))
}

fn service_failure(error: ServiceError) -> AgentError {
    AgentError::WorkflowError(error.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryLedger;
    use std::sync::Arc;

    fn engine_with_seed() -> (TransferEngine, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::with_seed_data());
        let services = Services::from_ledger(ledger.clone());
        (TransferEngine::new(services), ledger)
    }

    async fn balances(ledger: &InMemoryLedger) -> (Cents, Cents) {
        (
            ledger.balance_of("user_001", "acc1").await.unwrap(),
            ledger.balance_of("user_001", "acc2").await.unwrap(),
        )
    }

    #[tokio::test]
    async fn test_internal_transfer_happy_path() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_transfer("user_001", thread, "savings", Some(10_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
        assert!(reply.message.contains("$100.00 AUD"));
        assert!(reply.message.contains("Daily Expense Account"));
        assert!(reply.message.contains("Savings Account"));

        // Nothing executed before the confirmation.
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));

        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Settled);
        assert_eq!(balances(&ledger).await, (40_000, 1_510_000));
    }

    #[tokio::test]
    async fn test_internal_shortfall_rejects_without_execution() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        // $600 from the $500 transactional account into savings.
        let reply = engine
            .initiate_transfer("user_001", thread, "savings", Some(60_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::Rejected);
        assert!(reply.message.contains("Daily Expense Account"));
        assert!(reply.message.contains("$500.00 AUD"));
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_unknown_destination_asks_for_clarification() {
        let (engine, _ledger) = engine_with_seed();
        let reply = engine
            .initiate_transfer("user_001", Uuid::new_v4(), "landlord", Some(5_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingClarification);
        assert!(reply.message.contains("landlord"));
    }

    #[tokio::test]
    async fn test_ambiguous_destination_pauses_for_selection() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        // "supplier" matches both of Coffee Supplier's instruments plus
        // Sarah's instrument display name.
        let reply = engine
            .initiate_transfer("user_001", thread, "supplier", Some(5_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingSelection);
        let options = reply.data["options"].as_array().unwrap();
        assert!(options.len() > 1);

        // Out-of-range selection re-prompts without losing the workflow.
        let reply = engine.select_option(thread, 99).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingSelection);

        let reply = engine.select_option(thread, 1).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_savings_source_rejected_before_balance_check() {
        let (engine, ledger) = engine_with_seed();

        // Amount far beyond any balance: if the balance check ran first the
        // message would be about funds, not the account type.
        let reply = engine
            .initiate_transfer(
                "user_001",
                Uuid::new_v4(),
                "sarah",
                Some(100_000_000),
                Some("savings"),
            )
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::Rejected);
        assert!(reply.message.contains("transactional account"));
        assert!(!reply.message.to_lowercase().contains("insufficient"));
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_missing_amount_suspends_until_provided() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_transfer("user_001", thread, "sarah", None, None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingAmount);
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));

        let reply = engine.provide_amount(thread, 5_000).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
        assert!(reply.message.contains("$50.00 AUD"));
    }

    #[tokio::test]
    async fn test_external_sufficient_funds_single_confirmation() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_transfer("user_001", thread, "sarah", Some(20_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);

        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Settled);
        assert_eq!(balances(&ledger).await, (30_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_two_phase_remediation_full_flow() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        // $600 to an external contact with $500 transactional and
        // $15,000 savings: a $100 top-up is proposed.
        let reply = engine
            .initiate_transfer("user_001", thread, "sarah", Some(60_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::RemediationProposed);
        assert!(reply.message.contains("$100.00 AUD"));
        assert_eq!(reply.data["shortfall"], "$100.00 AUD");

        // Nothing moves until phase 1 is confirmed.
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));

        // Phase 1: top-up only. The external transfer must not run yet.
        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingPhaseTwo);
        assert_eq!(balances(&ledger).await, (60_000, 1_490_000));

        // Phase 2 with its own confirmation.
        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Settled);
        assert_eq!(balances(&ledger).await, (0, 1_490_000));
    }

    #[tokio::test]
    async fn test_remediation_decline_at_phase_one() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        engine
            .initiate_transfer("user_001", thread, "sarah", Some(60_000), None)
            .await
            .unwrap();
        let reply = engine.confirm(thread, false).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Cancelled);
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));

        // The workflow is gone; another confirm has nothing to act on.
        assert!(engine.confirm(thread, true).await.is_err());
    }

    #[tokio::test]
    async fn test_remediation_decline_at_phase_two_reports_truthfully() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        engine
            .initiate_transfer("user_001", thread, "sarah", Some(60_000), None)
            .await
            .unwrap();
        engine.confirm(thread, true).await.unwrap();

        // Decline phase 2: the settled top-up stays settled, the external
        // transfer never runs, and the reply owns up to the partial state.
        let reply = engine.confirm(thread, false).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Cancelled);
        assert!(reply.message.contains("top-up"));
        assert!(reply.message.contains("$600.00 AUD"));
        assert_eq!(balances(&ledger).await, (60_000, 1_490_000));
    }

    #[tokio::test]
    async fn test_combined_insufficient_rejects_without_execution() {
        let (engine, ledger) = engine_with_seed();

        let reply = engine
            .initiate_transfer("user_001", Uuid::new_v4(), "sarah", Some(2_000_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::Rejected);
        assert!(reply.message.contains("$15500.00 AUD"));
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_decline_leaves_balances_unchanged() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        engine
            .initiate_transfer("user_001", thread, "savings", Some(10_000), None)
            .await
            .unwrap();
        let reply = engine.confirm(thread, false).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Cancelled);
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_confirmation_is_single_use() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        engine
            .initiate_transfer("user_001", thread, "savings", Some(10_000), None)
            .await
            .unwrap();
        engine.confirm(thread, true).await.unwrap();
        assert_eq!(balances(&ledger).await, (40_000, 1_510_000));

        // A second confirmation finds nothing pending; nothing moves again.
        assert!(engine.confirm(thread, true).await.is_err());
        assert_eq!(balances(&ledger).await, (40_000, 1_510_000));
    }

    #[tokio::test]
    async fn test_bill_payment_single_match_goes_to_confirmation() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_bill_payment("user_001", thread, "water", Some(12_000))
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
        assert!(reply.message.contains("Sydney Water"));

        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Settled);
        assert_eq!(balances(&ledger).await, (38_000, 1_500_000));
    }

    #[tokio::test]
    async fn test_bill_payment_without_amount_asks_for_it() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_bill_payment("user_001", thread, "water", None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingAmount);
        assert!(reply.message.contains("Sydney Water"));
        assert_eq!(balances(&ledger).await, (50_000, 1_500_000));

        let reply = engine.provide_amount(thread, 9_900).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn test_bill_payment_multiple_matches_pause_for_selection() {
        let (engine, _ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        // "energy" matches AGL Energy and Origin Energy.
        let reply = engine
            .initiate_bill_payment("user_001", thread, "energy", Some(10_000))
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingSelection);
        assert_eq!(reply.data["options"].as_array().unwrap().len(), 2);

        let reply = engine.select_option(thread, 2).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn test_bill_payment_no_match_offers_next_steps() {
        let (engine, _ledger) = engine_with_seed();
        let reply = engine
            .initiate_bill_payment("user_001", Uuid::new_v4(), "gym", Some(4_000))
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingClarification);
        assert!(reply.message.contains("different search term"));
    }

    #[tokio::test]
    async fn test_bill_payment_remediation_uses_bpay_rules() {
        let (engine, ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        let reply = engine
            .initiate_bill_payment("user_001", thread, "water", Some(60_000))
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::RemediationProposed);

        engine.confirm(thread, true).await.unwrap();
        let reply = engine.confirm(thread, true).await.unwrap();
        assert_eq!(reply.status, WorkflowStatus::Settled);
        assert_eq!(balances(&ledger).await, (0, 1_490_000));
    }

    #[tokio::test]
    async fn test_new_utterance_discards_stale_workflow() {
        let (engine, _ledger) = engine_with_seed();
        let thread = Uuid::new_v4();

        engine
            .initiate_transfer("user_001", thread, "savings", Some(10_000), None)
            .await
            .unwrap();
        // A fresh intent replaces the pending confirmation entirely.
        let reply = engine
            .initiate_transfer("user_001", thread, "sarah", Some(5_000), None)
            .await
            .unwrap();
        assert_eq!(reply.status, WorkflowStatus::AwaitingConfirmation);
        assert!(reply.message.contains("Sarah Johnson"));
    }
}
