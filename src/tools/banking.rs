//! Banking tools
//!
//! Lookup tools wrap the domain services directly. Money movement is only
//! reachable through the decision-engine tools, so the confirmation gates
//! and the remediation phase ordering cannot be bypassed by the model.

use super::{ParamKind, ParamSpec, Tool, ToolContext, ToolRegistry, ToolSchema};
use crate::engine::TransferEngine;
use crate::models::{
    dollars_to_cents, BillerCategory, Cents, CreateBillerInput, ToolInput, ToolOutput,
};
use crate::services::{ServiceError, Services};
use crate::Result;
use serde_json::{json, Value};
use std::sync::Arc;

const CATEGORY_OPTIONS: &[&str] = &[
    "utilities",
    "telecom",
    "insurance",
    "council",
    "government",
    "other",
];

fn service_error_output(error: ServiceError) -> ToolOutput {
    ToolOutput::err(error.code.as_str(), error.message)
}

fn arg_str<'a>(input: &'a ToolInput, name: &str) -> Option<&'a str> {
    input.parameters.get(name).and_then(Value::as_str)
}

fn arg_amount(input: &ToolInput, name: &str) -> std::result::Result<Option<Cents>, ToolOutput> {
    match input.parameters.get(name).and_then(Value::as_f64) {
        None => Ok(None),
        Some(dollars) if dollars > 0.0 => Ok(Some(dollars_to_cents(dollars))),
        Some(_) => Err(ToolOutput::err(
            "INVALID_ARGUMENTS",
            format!("parameter '{}' must be greater than zero", name),
        )),
    }
}

//
// ================= Lookup tools =================
//

pub struct GetAccountsTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for GetAccountsTool {
    fn name(&self) -> &'static str {
        "get_accounts"
    }

    fn description(&self) -> &'static str {
        "Fetch the user's bank accounts with current balances. Balances change after every transfer, so call this again rather than relying on earlier results."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }

    async fn execute(&self, ctx: &ToolContext, _input: &ToolInput) -> Result<ToolOutput> {
        match self.services.accounts.get_accounts(&ctx.user_id).await {
            Ok(accounts) => {
                let rendered: Vec<Value> = accounts
                    .iter()
                    .map(|a| {
                        json!({
                            "id": a.id,
                            "name": a.name,
                            "type": a.account_type.to_string(),
                            "balance": a.balance_display(),
                        })
                    })
                    .collect();
                Ok(ToolOutput::ok(json!({ "accounts": rendered })))
            }
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

pub struct GetContactsTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for GetContactsTool {
    fn name(&self) -> &'static str {
        "get_contacts"
    }

    fn description(&self) -> &'static str {
        "Fetch the user's saved contacts and their payment instruments (bank accounts and BPAY billers)."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::default()
    }

    async fn execute(&self, ctx: &ToolContext, _input: &ToolInput) -> Result<ToolOutput> {
        match self.services.contacts.get_contacts(&ctx.user_id).await {
            Ok(contacts) => Ok(ToolOutput::ok(json!({ "contacts": contacts }))),
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

pub struct GetSavedBillersTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for GetSavedBillersTool {
    fn name(&self) -> &'static str {
        "get_saved_biller_accounts"
    }

    fn description(&self) -> &'static str {
        "List the user's saved billers, optionally filtered by name, nickname, or category. For example, 'water' matches 'Sydney Water'."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::optional(
                "name_filter",
                ParamKind::String,
                "Case-insensitive partial match over biller name, nickname, and category",
            ),
            ParamSpec::optional(
                "category",
                ParamKind::Enum(CATEGORY_OPTIONS),
                "Restrict results to one category",
            ),
        ])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let category = arg_str(input, "category").and_then(BillerCategory::parse);
        match self
            .services
            .billers
            .get_saved_billers(&ctx.user_id, arg_str(input, "name_filter"), category)
            .await
        {
            Ok(billers) => {
                let rendered: Vec<Value> = billers
                    .iter()
                    .map(|b| {
                        json!({
                            "id": b.id,
                            "biller_name": b.biller_name,
                            "biller_code": b.biller_code,
                            "nickname": b.nickname,
                            "category": b.category.as_str(),
                            "account": b.masked_account(),
                        })
                    })
                    .collect();
                Ok(ToolOutput::ok(json!({ "billers": rendered })))
            }
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

pub struct ValidateBillerTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for ValidateBillerTool {
    fn name(&self) -> &'static str {
        "validate_biller_account"
    }

    fn description(&self) -> &'static str {
        "Check that a biller code, account number, and customer reference number (CRN) identify a payable biller."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required("biller_code", ParamKind::String, "The BPAY biller code"),
            ParamSpec::required(
                "account_number",
                ParamKind::String,
                "The customer's account number with the biller",
            ),
            ParamSpec::required(
                "customer_ref",
                ParamKind::String,
                "The customer reference number (CRN)",
            ),
        ])
    }

    async fn execute(&self, _ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let result = self
            .services
            .billers
            .validate_biller(
                arg_str(input, "biller_code").unwrap_or_default(),
                arg_str(input, "account_number").unwrap_or_default(),
                arg_str(input, "customer_ref").unwrap_or_default(),
            )
            .await;
        match result {
            Ok(validation) => Ok(ToolOutput::ok(serde_json::to_value(validation)?)),
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

pub struct CreateBillerTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for CreateBillerTool {
    fn name(&self) -> &'static str {
        "create_biller_account"
    }

    fn description(&self) -> &'static str {
        "Save a new biller for the user so future bills can be paid by name."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required("biller_code", ParamKind::String, "The BPAY biller code"),
            ParamSpec::required("biller_name", ParamKind::String, "The biller's display name"),
            ParamSpec::required(
                "account_number",
                ParamKind::String,
                "The customer's account number with the biller",
            ),
            ParamSpec::required(
                "customer_ref",
                ParamKind::String,
                "The customer reference number (CRN)",
            ),
            ParamSpec::optional("nickname", ParamKind::String, "Optional user nickname"),
            ParamSpec::required(
                "category",
                ParamKind::Enum(CATEGORY_OPTIONS),
                "Biller category",
            ),
        ])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let category = arg_str(input, "category")
            .and_then(BillerCategory::parse)
            .unwrap_or(BillerCategory::Other);
        let create = CreateBillerInput {
            biller_code: arg_str(input, "biller_code").unwrap_or_default().to_string(),
            biller_name: arg_str(input, "biller_name").unwrap_or_default().to_string(),
            account_number: arg_str(input, "account_number")
                .unwrap_or_default()
                .to_string(),
            customer_ref: arg_str(input, "customer_ref")
                .unwrap_or_default()
                .to_string(),
            nickname: arg_str(input, "nickname").map(str::to_string),
            category,
        };
        match self.services.billers.create_biller(&ctx.user_id, create).await {
            Ok(biller) => Ok(ToolOutput::ok(json!({
                "id": biller.id,
                "biller_name": biller.biller_name,
                "account": biller.masked_account(),
            }))),
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

pub struct GetPaymentStatusTool {
    services: Services,
}

#[async_trait::async_trait]
impl Tool for GetPaymentStatusTool {
    fn name(&self) -> &'static str {
        "get_payment_status"
    }

    fn description(&self) -> &'static str {
        "Look up the status of a previously initiated payment or transfer by its id."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSpec::required(
            "payment_id",
            ParamKind::String,
            "The payment id returned when the payment was made",
        )])
    }

    async fn execute(&self, _ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let payment_id = arg_str(input, "payment_id").unwrap_or_default();
        match self.services.payments.get_payment_status(payment_id).await {
            Ok(record) => Ok(ToolOutput::ok(json!({
                "id": record.id,
                "status": record.status,
                "reference": record.reference,
                "amount": crate::models::format_cents(record.amount_cents),
            }))),
            Err(error) => Ok(service_error_output(error)),
        }
    }
}

//
// ================= Decision-engine tools =================
//

pub struct InitiateTransferTool {
    engine: Arc<TransferEngine>,
}

#[async_trait::async_trait]
impl Tool for InitiateTransferTool {
    fn name(&self) -> &'static str {
        "initiate_transfer"
    }

    fn description(&self) -> &'static str {
        "Start a money transfer to one of the user's own accounts or to a saved contact. The engine resolves the destination, checks account rules and balances, and replies with the next step (clarification, selection, amount, or a confirmation prompt). Nothing is executed by this tool."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required(
                "destination",
                ParamKind::String,
                "The account, contact, or payee name the user mentioned",
            ),
            ParamSpec::optional(
                "amount",
                ParamKind::Number,
                "Amount in dollars, only if the user stated it",
            ),
            ParamSpec::optional(
                "source_account",
                ParamKind::String,
                "Source account name, only if the user named one",
            ),
        ])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let amount = match arg_amount(input, "amount") {
            Ok(amount) => amount,
            Err(output) => return Ok(output),
        };
        let reply = self
            .engine
            .initiate_transfer(
                &ctx.user_id,
                ctx.thread_id,
                arg_str(input, "destination").unwrap_or_default(),
                amount,
                arg_str(input, "source_account"),
            )
            .await?;
        Ok(ToolOutput::ok(serde_json::to_value(reply)?))
    }
}

pub struct InitiateBillPaymentTool {
    engine: Arc<TransferEngine>,
}

#[async_trait::async_trait]
impl Tool for InitiateBillPaymentTool {
    fn name(&self) -> &'static str {
        "initiate_bill_payment"
    }

    fn description(&self) -> &'static str {
        "Start paying a bill against the user's saved billers, e.g. 'water' for a water bill. Replies with the next step; nothing is executed by this tool."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![
            ParamSpec::required(
                "biller",
                ParamKind::String,
                "Search term for the biller (name, nickname, or category)",
            ),
            ParamSpec::optional(
                "amount",
                ParamKind::Number,
                "Amount in dollars, only if the user stated it",
            ),
        ])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let amount = match arg_amount(input, "amount") {
            Ok(amount) => amount,
            Err(output) => return Ok(output),
        };
        let reply = self
            .engine
            .initiate_bill_payment(
                &ctx.user_id,
                ctx.thread_id,
                arg_str(input, "biller").unwrap_or_default(),
                amount,
            )
            .await?;
        Ok(ToolOutput::ok(serde_json::to_value(reply)?))
    }
}

pub struct SelectOptionTool {
    engine: Arc<TransferEngine>,
}

#[async_trait::async_trait]
impl Tool for SelectOptionTool {
    fn name(&self) -> &'static str {
        "select_option"
    }

    fn description(&self) -> &'static str {
        "Resume a paused disambiguation by picking one entry from the numbered list the user was shown."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSpec::required(
            "selection",
            ParamKind::Number,
            "The 1-based number the user chose",
        )])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let selection = input
            .parameters
            .get("selection")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;
        let reply = self.engine.select_option(ctx.thread_id, selection).await?;
        Ok(ToolOutput::ok(serde_json::to_value(reply)?))
    }
}

pub struct ProvideAmountTool {
    engine: Arc<TransferEngine>,
}

#[async_trait::async_trait]
impl Tool for ProvideAmountTool {
    fn name(&self) -> &'static str {
        "provide_amount"
    }

    fn description(&self) -> &'static str {
        "Supply the amount for a transfer or bill payment that is waiting on it."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSpec::required(
            "amount",
            ParamKind::Number,
            "Amount in dollars",
        )])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let amount = match arg_amount(input, "amount") {
            Ok(Some(amount)) => amount,
            Ok(None) => {
                return Ok(ToolOutput::err(
                    "INVALID_ARGUMENTS",
                    "missing required parameter 'amount'",
                ))
            }
            Err(output) => return Ok(output),
        };
        let reply = self.engine.provide_amount(ctx.thread_id, amount).await?;
        Ok(ToolOutput::ok(serde_json::to_value(reply)?))
    }
}

pub struct ConfirmPendingTool {
    engine: Arc<TransferEngine>,
}

#[async_trait::async_trait]
impl Tool for ConfirmPendingTool {
    fn name(&self) -> &'static str {
        "confirm_pending"
    }

    fn description(&self) -> &'static str {
        "Relay the user's explicit yes/no to the single pending operation. A 'yes' authorizes exactly one execution; each remediation phase needs its own confirmation. Only call this after the user has answered the confirmation prompt."
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new(vec![ParamSpec::required(
            "confirmed",
            ParamKind::Boolean,
            "true if the user said yes, false if they declined",
        )])
    }

    async fn execute(&self, ctx: &ToolContext, input: &ToolInput) -> Result<ToolOutput> {
        let confirmed = input
            .parameters
            .get("confirmed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let reply = self.engine.confirm(ctx.thread_id, confirmed).await?;
        Ok(ToolOutput::ok(serde_json::to_value(reply)?))
    }
}

/// Create the default registry: lookups plus the engine-gated workflow
/// tools.
pub fn create_default_registry(services: Services, engine: Arc<TransferEngine>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(GetAccountsTool {
        services: services.clone(),
    }));
    registry.register(Arc::new(GetContactsTool {
        services: services.clone(),
    }));
    registry.register(Arc::new(GetSavedBillersTool {
        services: services.clone(),
    }));
    registry.register(Arc::new(ValidateBillerTool {
        services: services.clone(),
    }));
    registry.register(Arc::new(CreateBillerTool {
        services: services.clone(),
    }));
    registry.register(Arc::new(GetPaymentStatusTool { services }));

    registry.register(Arc::new(InitiateTransferTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(InitiateBillPaymentTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(SelectOptionTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(ProvideAmountTool {
        engine: engine.clone(),
    }));
    registry.register(Arc::new(ConfirmPendingTool { engine }));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryLedger;
    use uuid::Uuid;

    fn setup() -> (ToolRegistry, ToolContext, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::with_seed_data());
        let services = Services::from_ledger(ledger.clone());
        let engine = Arc::new(TransferEngine::new(services.clone()));
        let registry = create_default_registry(services, engine);
        let ctx = ToolContext {
            user_id: "user_001".into(),
            thread_id: Uuid::new_v4(),
        };
        (registry, ctx, ledger)
    }

    #[tokio::test]
    async fn test_registry_has_no_raw_money_tools() {
        let (registry, _, _) = setup();
        let names = registry.list();
        assert!(!names.contains(&"transfer_internal"));
        assert!(!names.contains(&"transfer_external"));
        assert!(!names.contains(&"pay_bill"));
        assert!(names.contains(&"initiate_transfer"));
        assert!(names.contains(&"confirm_pending"));
    }

    #[tokio::test]
    async fn test_get_accounts_renders_balances() {
        let (registry, ctx, _) = setup();
        let output = registry.dispatch(&ctx, "get_accounts", json!({})).await;
        assert!(output.success);
        let accounts = output.data["accounts"].as_array().unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0]["balance"], "$500.00 AUD");
    }

    #[tokio::test]
    async fn test_full_transfer_through_tools() {
        let (registry, ctx, ledger) = setup();

        let output = registry
            .dispatch(
                &ctx,
                "initiate_transfer",
                json!({ "destination": "savings", "amount": 100.0 }),
            )
            .await;
        assert!(output.success);
        assert_eq!(output.data["status"], "awaiting_confirmation");

        let output = registry
            .dispatch(&ctx, "confirm_pending", json!({ "confirmed": true }))
            .await;
        assert!(output.success);
        assert_eq!(output.data["status"], "settled");
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(40_000));
    }

    #[tokio::test]
    async fn test_confirm_without_pending_is_workflow_error() {
        let (registry, ctx, _) = setup();
        let output = registry
            .dispatch(&ctx, "confirm_pending", json!({ "confirmed": true }))
            .await;
        assert!(!output.success);
        assert_eq!(output.error.unwrap().code, "WORKFLOW_STATE");
    }

    #[tokio::test]
    async fn test_negative_amount_rejected_before_engine() {
        let (registry, ctx, ledger) = setup();
        let output = registry
            .dispatch(
                &ctx,
                "initiate_transfer",
                json!({ "destination": "savings", "amount": -5.0 }),
            )
            .await;
        assert!(!output.success);
        assert_eq!(output.error.unwrap().code, "INVALID_ARGUMENTS");
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(50_000));
    }

    #[tokio::test]
    async fn test_saved_biller_lookup_tool() {
        let (registry, ctx, _) = setup();
        let output = registry
            .dispatch(
                &ctx,
                "get_saved_biller_accounts",
                json!({ "name_filter": "water" }),
            )
            .await;
        assert!(output.success);
        let billers = output.data["billers"].as_array().unwrap();
        assert_eq!(billers.len(), 1);
        assert_eq!(billers[0]["biller_name"], "Sydney Water");
        assert_eq!(billers[0]["account"], "***6789");
    }

    #[tokio::test]
    async fn test_validate_biller_tool() {
        let (registry, ctx, _) = setup();
        let output = registry
            .dispatch(
                &ctx,
                "validate_biller_account",
                json!({
                    "biller_code": "23796",
                    "account_number": "123456789",
                    "customer_ref": "987654321",
                }),
            )
            .await;
        assert!(output.success);
        assert_eq!(output.data["is_valid"], true);
    }

    #[tokio::test]
    async fn test_create_biller_tool_surfaces_service_code() {
        let (registry, ctx, _) = setup();
        let output = registry
            .dispatch(
                &ctx,
                "create_biller_account",
                json!({
                    "biller_code": "00000",
                    "biller_name": "Nowhere Gas",
                    "account_number": "123456",
                    "customer_ref": "9999",
                    "category": "utilities",
                }),
            )
            .await;
        assert!(!output.success);
        assert_eq!(output.error.unwrap().code, "INVALID_BILLER_CODE");
    }
}
