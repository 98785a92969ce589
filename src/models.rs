//! Core data models for the banking agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Money =================
//

/// Amounts are carried in minor units (cents, AUD).
pub type Cents = i64;

/// Render a minor-unit amount as `$X.XX AUD`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}${}.{:02} AUD", sign, abs / 100, abs % 100)
}

/// Convert a dollar amount from a tool argument into cents.
pub fn dollars_to_cents(dollars: f64) -> Cents {
    (dollars * 100.0).round() as Cents
}

//
// ================= User =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

//
// ================= Accounts =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Transactional,
    Savings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    pub balance_cents: Cents,
}

impl Account {
    pub fn balance_display(&self) -> String {
        format_cents(self.balance_cents)
    }
}

//
// ================= Contacts =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContactKind {
    Person,
    Business,
}

/// Payment instrument payload. Exhaustive matching replaces the upstream
/// string-tag dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentInstrumentDetails {
    BankAccount {
        bsb: String,
        account_number: String,
        name: String,
    },
    BpayBiller {
        biller_name: String,
        biller_code: String,
        crn: String,
    },
}

impl PaymentInstrumentDetails {
    /// Display name used when matching a destination query.
    pub fn display_name(&self) -> &str {
        match self {
            PaymentInstrumentDetails::BankAccount { name, .. } => name,
            PaymentInstrumentDetails::BpayBiller { biller_name, .. } => biller_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentInstrument {
    pub id: String,
    pub details: PaymentInstrumentDetails,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub kind: ContactKind,
    /// Ordered; destination resolution walks instruments in this order.
    pub payment_instruments: Vec<PaymentInstrument>,
}

//
// ================= Saved billers =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BillerCategory {
    Utilities,
    Telecom,
    Insurance,
    Council,
    Government,
    Other,
}

impl BillerCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillerCategory::Utilities => "utilities",
            BillerCategory::Telecom => "telecom",
            BillerCategory::Insurance => "insurance",
            BillerCategory::Council => "council",
            BillerCategory::Government => "government",
            BillerCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "utilities" => Some(BillerCategory::Utilities),
            "telecom" => Some(BillerCategory::Telecom),
            "insurance" => Some(BillerCategory::Insurance),
            "council" => Some(BillerCategory::Council),
            "government" => Some(BillerCategory::Government),
            "other" => Some(BillerCategory::Other),
            _ => None,
        }
    }
}

/// A biller account the user has saved for repeat payments.
/// Soft-deactivated via `is_active`, never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedBiller {
    pub id: String,
    pub user_id: String,
    pub biller_code: String,
    pub biller_name: String,
    pub account_number: String,
    pub customer_ref: String,
    pub nickname: Option<String>,
    pub category: BillerCategory,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_paid_at: Option<DateTime<Utc>>,
}

impl SavedBiller {
    /// Last four digits of the account number, for display.
    pub fn masked_account(&self) -> String {
        let digits = &self.account_number;
        let tail = if digits.len() > 4 {
            &digits[digits.len() - 4..]
        } else {
            digits.as_str()
        };
        format!("***{}", tail)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBillerInput {
    pub biller_code: String,
    pub biller_name: String,
    pub account_number: String,
    pub customer_ref: String,
    pub nickname: Option<String>,
    pub category: BillerCategory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillerValidation {
    pub is_valid: bool,
    pub biller_name: Option<String>,
    pub error_message: Option<String>,
}

//
// ================= Transfers & payments =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExternalTransferKind {
    External,
    Bpay,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Record of a money movement. Created at execution start and finalized
/// exactly once; immutable after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: String,
    pub user_id: String,
    pub amount_cents: Cents,
    pub currency: String,
    pub status: PaymentStatus,
    pub reference: String,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer_id: String,
    pub reference: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub payment_id: String,
    pub reference: String,
    pub status: PaymentStatus,
    pub message: String,
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolOutput {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: serde_json::Value::Null,
            error: Some(ToolError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

//
// ================= Conversation threads =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    System,
}

/// A single message in a conversation thread. Threads are append-only;
/// a reset starts a new thread id rather than mutating the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub message_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub tool_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ThreadMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_name: None,
            created_at: Utc::now(),
        }
    }

    pub fn tool_result(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            role: MessageRole::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
            created_at: Utc::now(),
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountType::Transactional => "transactional",
            AccountType::Savings => "savings",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(50_000), "$500.00 AUD");
        assert_eq!(format_cents(5), "$0.05 AUD");
        assert_eq!(format_cents(1_490_000), "$14900.00 AUD");
        assert_eq!(format_cents(-250), "-$2.50 AUD");
    }

    #[test]
    fn test_dollars_to_cents_rounds() {
        assert_eq!(dollars_to_cents(600.0), 60_000);
        assert_eq!(dollars_to_cents(150.505), 15_051);
        assert_eq!(dollars_to_cents(0.1), 10);
    }

    #[test]
    fn test_masked_account() {
        let biller = SavedBiller {
            id: "biller_001".into(),
            user_id: "user_001".into(),
            biller_code: "23796".into(),
            biller_name: "Sydney Water".into(),
            account_number: "123456789".into(),
            customer_ref: "987654321".into(),
            nickname: None,
            category: BillerCategory::Utilities,
            is_active: true,
            created_at: Utc::now(),
            last_paid_at: None,
        };
        assert_eq!(biller.masked_account(), "***6789");
    }

    #[test]
    fn test_instrument_display_name() {
        let bank = PaymentInstrumentDetails::BankAccount {
            bsb: "123456".into(),
            account_number: "987654321".into(),
            name: "Bean Supplier".into(),
        };
        assert_eq!(bank.display_name(), "Bean Supplier");

        let bpay = PaymentInstrumentDetails::BpayBiller {
            biller_name: "Milk Supplier".into(),
            biller_code: "654321".into(),
            crn: "1234567890".into(),
        };
        assert_eq!(bpay.display_name(), "Milk Supplier");
    }
}
