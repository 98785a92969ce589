//! Domain service contracts
//!
//! Every operation returns a discriminated success/error value; nothing in
//! this layer panics across the boundary. Callers inspect the result.

use crate::models::{
    Account, BillerCategory, BillerValidation, Cents, Contact, CreateBillerInput,
    ExternalTransferKind, PaymentOutcome, SavedBiller, TransferOutcome, TransferRecord, User,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub mod mock;

pub use mock::InMemoryLedger;

/// Result type for domain service calls.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Machine-readable failure codes. Each maps to a plain-language message
/// that is safe to show the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceErrorCode {
    InvalidToken,
    UserNotFound,
    AccountNotFound,
    InvalidAccountType,
    InvalidAmount,
    InsufficientFunds,
    BillerNotFound,
    InvalidBillerCode,
    PaymentFailed,
    PaymentNotFound,
    ServiceUnavailable,
    Unknown,
}

impl ServiceErrorCode {
    pub fn user_message(&self) -> &'static str {
        match self {
            ServiceErrorCode::InvalidToken => "Your session has expired. Please log in again.",
            ServiceErrorCode::UserNotFound => {
                "Unable to find your account. Please contact support."
            }
            ServiceErrorCode::AccountNotFound => "Source account not found.",
            ServiceErrorCode::InvalidAccountType => {
                "External transfers and BPAY payments can only be made from a transactional account."
            }
            ServiceErrorCode::InvalidAmount => "The amount must be greater than zero.",
            ServiceErrorCode::InsufficientFunds => "Insufficient funds for this payment.",
            ServiceErrorCode::BillerNotFound => "The requested biller could not be found.",
            ServiceErrorCode::InvalidBillerCode => {
                "The biller code is invalid. Please check and try again."
            }
            ServiceErrorCode::PaymentFailed => {
                "The payment could not be processed. Please try again."
            }
            ServiceErrorCode::PaymentNotFound => "Payment not found.",
            ServiceErrorCode::ServiceUnavailable => {
                "The payment service is temporarily unavailable."
            }
            ServiceErrorCode::Unknown => "An unexpected error occurred. Please try again.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorCode::InvalidToken => "INVALID_TOKEN",
            ServiceErrorCode::UserNotFound => "USER_NOT_FOUND",
            ServiceErrorCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ServiceErrorCode::InvalidAccountType => "INVALID_ACCOUNT_TYPE",
            ServiceErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ServiceErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ServiceErrorCode::BillerNotFound => "BILLER_NOT_FOUND",
            ServiceErrorCode::InvalidBillerCode => "INVALID_BILLER_CODE",
            ServiceErrorCode::PaymentFailed => "PAYMENT_FAILED",
            ServiceErrorCode::PaymentNotFound => "PAYMENT_NOT_FOUND",
            ServiceErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ServiceErrorCode::Unknown => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceError {
    pub code: ServiceErrorCode,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: ServiceErrorCode) -> Self {
        Self {
            code,
            message: code.user_message().to_string(),
        }
    }

    pub fn with_message(code: ServiceErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ServiceError {}

//
// ================= Service traits =================
//

#[async_trait]
pub trait UserService: Send + Sync {
    /// Resolve an opaque credential to a user. The credential's format and
    /// validation are owned entirely by the upstream identity provider.
    async fn get_user(&self, token: &str) -> ServiceResult<User>;
}

#[async_trait]
pub trait AccountService: Send + Sync {
    async fn get_accounts(&self, user_id: &str) -> ServiceResult<Vec<Account>>;
}

#[async_trait]
pub trait ContactService: Send + Sync {
    async fn get_contacts(&self, user_id: &str) -> ServiceResult<Vec<Contact>>;
}

#[async_trait]
pub trait TransferService: Send + Sync {
    /// Move funds between two accounts owned by the same user.
    /// Debit and credit commit in one atomic step.
    async fn transfer_between_own_accounts(
        &self,
        user_id: &str,
        from_account_id: &str,
        to_account_id: &str,
        amount: Cents,
    ) -> ServiceResult<TransferOutcome>;

    /// Send funds to a contact's payment instrument (bank account or BPAY).
    async fn transfer_to_external(
        &self,
        user_id: &str,
        from_account_id: &str,
        payment_instrument_id: &str,
        amount: Cents,
        kind: ExternalTransferKind,
    ) -> ServiceResult<TransferOutcome>;
}

#[async_trait]
pub trait BillerService: Send + Sync {
    /// List the user's active saved billers, optionally filtered by a
    /// case-insensitive partial match over name, nickname, and category.
    async fn get_saved_billers(
        &self,
        user_id: &str,
        name_filter: Option<&str>,
        category: Option<BillerCategory>,
    ) -> ServiceResult<Vec<SavedBiller>>;

    async fn validate_biller(
        &self,
        biller_code: &str,
        account_number: &str,
        customer_ref: &str,
    ) -> ServiceResult<BillerValidation>;

    async fn create_biller(
        &self,
        user_id: &str,
        input: CreateBillerInput,
    ) -> ServiceResult<SavedBiller>;
}

#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Process a BPAY bill payment, debiting the user's transactional
    /// account.
    async fn pay_bill(
        &self,
        user_id: &str,
        biller_code: &str,
        account_number: &str,
        customer_ref: &str,
        amount: Cents,
    ) -> ServiceResult<PaymentOutcome>;

    async fn get_payment_status(&self, payment_id: &str) -> ServiceResult<TransferRecord>;
}

/// Bundle of domain services injected into the agent.
#[derive(Clone)]
pub struct Services {
    pub users: Arc<dyn UserService>,
    pub accounts: Arc<dyn AccountService>,
    pub contacts: Arc<dyn ContactService>,
    pub transfers: Arc<dyn TransferService>,
    pub billers: Arc<dyn BillerService>,
    pub payments: Arc<dyn PaymentService>,
}

impl Services {
    /// Wire all services to a shared in-memory ledger.
    pub fn from_ledger(ledger: Arc<InMemoryLedger>) -> Self {
        Self {
            users: ledger.clone(),
            accounts: ledger.clone(),
            contacts: ledger.clone(),
            transfers: ledger.clone(),
            billers: ledger.clone(),
            payments: ledger,
        }
    }

    /// In-memory ledger pre-seeded with the demo fixture.
    pub fn mock() -> Self {
        Self::from_ledger(Arc::new(InMemoryLedger::with_seed_data()))
    }
}
