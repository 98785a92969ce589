//! In-memory ledger backing the domain services
//!
//! A single mutex guards the whole ledger so every balance
//! read-check-then-write is one critical section; concurrent transfers
//! against the same account serialize instead of racing a stale
//! sufficiency check.

use super::{
    AccountService, BillerService, ContactService, PaymentService, ServiceError,
    ServiceErrorCode, ServiceResult, TransferService, UserService,
};
use crate::models::{
    format_cents, Account, AccountType, BillerCategory, BillerValidation, Cents, Contact,
    ContactKind, CreateBillerInput, ExternalTransferKind, PaymentInstrument,
    PaymentInstrumentDetails, PaymentOutcome, PaymentStatus, SavedBiller, TransferOutcome,
    TransferRecord, User,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

struct LedgerState {
    users: HashMap<String, User>,
    tokens: HashMap<String, String>, // opaque credential -> user id
    accounts: HashMap<String, Vec<Account>>, // user id -> owned accounts
    contacts: HashMap<String, Vec<Contact>>,
    billers: HashMap<String, SavedBiller>,
    valid_biller_codes: HashSet<String>,
    biller_code_names: HashMap<String, String>,
    records: HashMap<String, TransferRecord>,
    sequence: u64,
}

impl LedgerState {
    fn empty() -> Self {
        Self {
            users: HashMap::new(),
            tokens: HashMap::new(),
            accounts: HashMap::new(),
            contacts: HashMap::new(),
            billers: HashMap::new(),
            valid_biller_codes: HashSet::new(),
            biller_code_names: HashMap::new(),
            records: HashMap::new(),
            sequence: 0,
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}_{:06}", prefix, self.sequence)
    }

    fn next_reference(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{}{:08}", prefix, self.sequence)
    }

    fn account_mut(&mut self, user_id: &str, account_id: &str) -> Option<&mut Account> {
        self.accounts
            .get_mut(user_id)
            .and_then(|accounts| accounts.iter_mut().find(|a| a.id == account_id))
    }

    fn account(&self, user_id: &str, account_id: &str) -> Option<&Account> {
        self.accounts
            .get(user_id)
            .and_then(|accounts| accounts.iter().find(|a| a.id == account_id))
    }

    fn instrument(&self, user_id: &str, instrument_id: &str) -> Option<&PaymentInstrument> {
        self.contacts.get(user_id).and_then(|contacts| {
            contacts
                .iter()
                .flat_map(|c| c.payment_instruments.iter())
                .find(|pi| pi.id == instrument_id)
        })
    }

    fn record_completed(
        &mut self,
        user_id: &str,
        amount: Cents,
        id_prefix: &str,
        ref_prefix: &str,
    ) -> TransferRecord {
        let id = self.next_id(id_prefix);
        let reference = self.next_reference(ref_prefix);
        let now = Utc::now();
        let record = TransferRecord {
            id: id.clone(),
            user_id: user_id.to_string(),
            amount_cents: amount,
            currency: "AUD".to_string(),
            status: PaymentStatus::Completed,
            reference,
            initiated_at: now,
            completed_at: Some(now),
            failure_reason: None,
        };
        self.records.insert(id, record.clone());
        record
    }
}

/// Shared in-memory ledger. All domain services are implemented against it.
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn empty() -> Self {
        Self {
            state: Mutex::new(LedgerState::empty()),
        }
    }

    /// Demo fixture: one user with a transactional and a savings account,
    /// two contacts, and a handful of saved billers.
    pub fn with_seed_data() -> Self {
        let ledger = Self::empty();
        let mut state = ledger
            .state
            .try_lock()
            .expect("fresh ledger is uncontended");

        state.users.insert(
            "user_001".into(),
            User {
                id: "user_001".into(),
                email: "john.smith@example.com".into(),
                name: "John Smith".into(),
                created_at: Utc::now(),
            },
        );
        state.tokens.insert("mock_token_001".into(), "user_001".into());

        state.accounts.insert(
            "user_001".into(),
            vec![
                Account {
                    id: "acc1".into(),
                    name: "Daily Expense Account".into(),
                    account_type: AccountType::Transactional,
                    balance_cents: 50_000,
                },
                Account {
                    id: "acc2".into(),
                    name: "Savings Account".into(),
                    account_type: AccountType::Savings,
                    balance_cents: 1_500_000,
                },
            ],
        );

        state.contacts.insert(
            "user_001".into(),
            vec![
                Contact {
                    id: "contact1".into(),
                    name: "Coffee Supplier".into(),
                    kind: ContactKind::Business,
                    payment_instruments: vec![
                        PaymentInstrument {
                            id: "pi1".into(),
                            details: PaymentInstrumentDetails::BankAccount {
                                bsb: "123456".into(),
                                account_number: "987654321".into(),
                                name: "Bean Supplier".into(),
                            },
                        },
                        PaymentInstrument {
                            id: "pi2".into(),
                            details: PaymentInstrumentDetails::BpayBiller {
                                biller_name: "Milk Supplier".into(),
                                biller_code: "654321".into(),
                                crn: "1234567890".into(),
                            },
                        },
                    ],
                },
                Contact {
                    id: "contact2".into(),
                    name: "Sarah Johnson".into(),
                    kind: ContactKind::Person,
                    payment_instruments: vec![PaymentInstrument {
                        id: "pi3".into(),
                        details: PaymentInstrumentDetails::BankAccount {
                            bsb: "456789".into(),
                            account_number: "789012345".into(),
                            name: "Paper Cup Supplier".into(),
                        },
                    }],
                },
            ],
        );

        let seed_billers = [
            ("biller_001", "23796", "Sydney Water", Some("Water Bill"), BillerCategory::Utilities),
            ("biller_002", "12345", "AGL Energy", None, BillerCategory::Utilities),
            ("biller_003", "54321", "Telstra", Some("Mobile"), BillerCategory::Telecom),
            ("biller_004", "67890", "Origin Energy", None, BillerCategory::Utilities),
        ];
        for (id, code, name, nickname, category) in seed_billers {
            state.billers.insert(
                id.to_string(),
                SavedBiller {
                    id: id.to_string(),
                    user_id: "user_001".into(),
                    biller_code: code.to_string(),
                    biller_name: name.to_string(),
                    account_number: "123456789".into(),
                    customer_ref: "987654321".into(),
                    nickname: nickname.map(str::to_string),
                    category,
                    is_active: true,
                    created_at: Utc::now(),
                    last_paid_at: None,
                },
            );
        }

        for code in ["23796", "12345", "54321", "67890", "11111", "99999", "654321"] {
            state.valid_biller_codes.insert(code.to_string());
        }
        for (code, name) in [
            ("23796", "Sydney Water"),
            ("12345", "AGL Energy"),
            ("54321", "Telstra"),
            ("67890", "Origin Energy"),
            ("11111", "Optus"),
            ("654321", "Milk Supplier"),
        ] {
            state
                .biller_code_names
                .insert(code.to_string(), name.to_string());
        }

        drop(state);
        ledger
    }

    // Test/bootstrap seeding. Kept on the ledger so scenarios can build
    // arbitrary fixtures without going through the service traits.

    pub async fn seed_user(&self, user: User, token: &str) {
        let mut state = self.state.lock().await;
        state.tokens.insert(token.to_string(), user.id.clone());
        state.users.insert(user.id.clone(), user);
    }

    pub async fn seed_account(&self, user_id: &str, account: Account) {
        let mut state = self.state.lock().await;
        state
            .accounts
            .entry(user_id.to_string())
            .or_default()
            .push(account);
    }

    pub async fn seed_contact(&self, user_id: &str, contact: Contact) {
        let mut state = self.state.lock().await;
        state
            .contacts
            .entry(user_id.to_string())
            .or_default()
            .push(contact);
    }

    pub async fn seed_biller(&self, biller: SavedBiller) {
        let mut state = self.state.lock().await;
        state.valid_biller_codes.insert(biller.biller_code.clone());
        state
            .biller_code_names
            .insert(biller.biller_code.clone(), biller.biller_name.clone());
        state.billers.insert(biller.id.clone(), biller);
    }

    /// Current balance of an account, for assertions.
    pub async fn balance_of(&self, user_id: &str, account_id: &str) -> Option<Cents> {
        let state = self.state.lock().await;
        state.account(user_id, account_id).map(|a| a.balance_cents)
    }
}

fn insufficient_funds(balance: Cents) -> ServiceError {
    ServiceError::with_message(
        ServiceErrorCode::InsufficientFunds,
        format!("Insufficient funds. Available: {}", format_cents(balance)),
    )
}

fn require_positive(amount: Cents) -> ServiceResult<()> {
    if amount <= 0 {
        return Err(ServiceError::new(ServiceErrorCode::InvalidAmount));
    }
    Ok(())
}

#[async_trait]
impl UserService for InMemoryLedger {
    async fn get_user(&self, token: &str) -> ServiceResult<User> {
        let state = self.state.lock().await;
        let user_id = state
            .tokens
            .get(token)
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::InvalidToken))?;
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::UserNotFound))
    }
}

#[async_trait]
impl AccountService for InMemoryLedger {
    async fn get_accounts(&self, user_id: &str) -> ServiceResult<Vec<Account>> {
        let state = self.state.lock().await;
        Ok(state.accounts.get(user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl ContactService for InMemoryLedger {
    async fn get_contacts(&self, user_id: &str) -> ServiceResult<Vec<Contact>> {
        let state = self.state.lock().await;
        Ok(state.contacts.get(user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TransferService for InMemoryLedger {
    async fn transfer_between_own_accounts(
        &self,
        user_id: &str,
        from_account_id: &str,
        to_account_id: &str,
        amount: Cents,
    ) -> ServiceResult<TransferOutcome> {
        require_positive(amount)?;

        let mut state = self.state.lock().await;

        let source = state
            .account(user_id, from_account_id)
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::AccountNotFound))?;
        let balance = source.balance_cents;

        if state.account(user_id, to_account_id).is_none() {
            return Err(ServiceError::with_message(
                ServiceErrorCode::AccountNotFound,
                "Destination account not found.",
            ));
        }
        if balance < amount {
            return Err(insufficient_funds(balance));
        }

        // Debit and credit under the same lock hold: all-or-nothing.
        state
            .account_mut(user_id, from_account_id)
            .expect("source checked above")
            .balance_cents -= amount;
        state
            .account_mut(user_id, to_account_id)
            .expect("destination checked above")
            .balance_cents += amount;

        let record = state.record_completed(user_id, amount, "transfer", "TRF");
        debug!(
            user_id,
            from_account_id, to_account_id, amount, "internal transfer committed"
        );

        Ok(TransferOutcome {
            transfer_id: record.id,
            reference: record.reference,
            status: record.status,
        })
    }

    async fn transfer_to_external(
        &self,
        user_id: &str,
        from_account_id: &str,
        payment_instrument_id: &str,
        amount: Cents,
        kind: ExternalTransferKind,
    ) -> ServiceResult<TransferOutcome> {
        require_positive(amount)?;

        let mut state = self.state.lock().await;

        let source = state
            .account(user_id, from_account_id)
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::AccountNotFound))?;

        if source.account_type != AccountType::Transactional {
            return Err(ServiceError::new(ServiceErrorCode::InvalidAccountType));
        }
        let balance = source.balance_cents;

        let instrument = state
            .instrument(user_id, payment_instrument_id)
            .ok_or_else(|| {
                ServiceError::with_message(
                    ServiceErrorCode::AccountNotFound,
                    "Payment instrument not found.",
                )
            })?;

        // The instrument variant must agree with the requested kind.
        let matches_kind = match (&instrument.details, kind) {
            (PaymentInstrumentDetails::BankAccount { .. }, ExternalTransferKind::External) => true,
            (PaymentInstrumentDetails::BpayBiller { .. }, ExternalTransferKind::Bpay) => true,
            _ => false,
        };
        if !matches_kind {
            return Err(ServiceError::with_message(
                ServiceErrorCode::PaymentFailed,
                "Payment instrument does not support this transfer type.",
            ));
        }

        if balance < amount {
            return Err(insufficient_funds(balance));
        }

        state
            .account_mut(user_id, from_account_id)
            .expect("source checked above")
            .balance_cents -= amount;

        let prefix = match kind {
            ExternalTransferKind::External => "TRF",
            ExternalTransferKind::Bpay => "BPY",
        };
        let record = state.record_completed(user_id, amount, "transfer", prefix);
        debug!(
            user_id,
            from_account_id,
            payment_instrument_id,
            amount,
            ?kind,
            "external transfer committed"
        );

        Ok(TransferOutcome {
            transfer_id: record.id,
            reference: record.reference,
            status: record.status,
        })
    }
}

#[async_trait]
impl BillerService for InMemoryLedger {
    async fn get_saved_billers(
        &self,
        user_id: &str,
        name_filter: Option<&str>,
        category: Option<BillerCategory>,
    ) -> ServiceResult<Vec<SavedBiller>> {
        let state = self.state.lock().await;

        let mut billers: Vec<SavedBiller> = state
            .billers
            .values()
            .filter(|b| b.user_id == user_id && b.is_active)
            .filter(|b| {
                name_filter.map_or(true, |term| {
                    let term = term.to_lowercase();
                    b.biller_name.to_lowercase().contains(&term)
                        || b.nickname
                            .as_deref()
                            .is_some_and(|n| n.to_lowercase().contains(&term))
                        || b.category.as_str().contains(&term)
                })
            })
            .filter(|b| category.map_or(true, |c| b.category == c))
            .cloned()
            .collect();

        billers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(billers)
    }

    async fn validate_biller(
        &self,
        biller_code: &str,
        account_number: &str,
        customer_ref: &str,
    ) -> ServiceResult<BillerValidation> {
        let state = self.state.lock().await;

        if !state.valid_biller_codes.contains(biller_code) {
            return Ok(BillerValidation {
                is_valid: false,
                biller_name: None,
                error_message: Some("Invalid biller code. Please check and try again.".into()),
            });
        }
        if account_number.len() < 6 {
            return Ok(BillerValidation {
                is_valid: false,
                biller_name: None,
                error_message: Some("Account number must be at least 6 digits.".into()),
            });
        }
        if customer_ref.len() < 4 {
            return Ok(BillerValidation {
                is_valid: false,
                biller_name: None,
                error_message: Some(
                    "Customer reference number must be at least 4 digits.".into(),
                ),
            });
        }

        Ok(BillerValidation {
            is_valid: true,
            biller_name: Some(
                state
                    .biller_code_names
                    .get(biller_code)
                    .cloned()
                    .unwrap_or_else(|| "Unknown Biller".into()),
            ),
            error_message: None,
        })
    }

    async fn create_biller(
        &self,
        user_id: &str,
        input: CreateBillerInput,
    ) -> ServiceResult<SavedBiller> {
        let mut state = self.state.lock().await;

        if !state.valid_biller_codes.contains(&input.biller_code) {
            return Err(ServiceError::new(ServiceErrorCode::InvalidBillerCode));
        }

        let id = state.next_id("biller");
        let biller = SavedBiller {
            id: id.clone(),
            user_id: user_id.to_string(),
            biller_code: input.biller_code,
            biller_name: input.biller_name,
            account_number: input.account_number,
            customer_ref: input.customer_ref,
            nickname: input.nickname,
            category: input.category,
            is_active: true,
            created_at: Utc::now(),
            last_paid_at: None,
        };
        state.billers.insert(id, biller.clone());

        Ok(biller)
    }
}

#[async_trait]
impl PaymentService for InMemoryLedger {
    async fn pay_bill(
        &self,
        user_id: &str,
        biller_code: &str,
        account_number: &str,
        _customer_ref: &str,
        amount: Cents,
    ) -> ServiceResult<PaymentOutcome> {
        require_positive(amount)?;

        let mut state = self.state.lock().await;

        if !state.valid_biller_codes.contains(biller_code) {
            return Err(ServiceError::new(ServiceErrorCode::InvalidBillerCode));
        }

        let source = state
            .accounts
            .get(user_id)
            .and_then(|accounts| {
                accounts
                    .iter()
                    .find(|a| a.account_type == AccountType::Transactional)
            })
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::AccountNotFound))?;
        let (source_id, balance) = (source.id.clone(), source.balance_cents);

        if balance < amount {
            return Err(insufficient_funds(balance));
        }

        state
            .account_mut(user_id, &source_id)
            .expect("source checked above")
            .balance_cents -= amount;

        let record = state.record_completed(user_id, amount, "pay", "REF");

        // Stamp the matching saved biller so listings show recency.
        let now = Utc::now();
        if let Some(biller) = state
            .billers
            .values_mut()
            .find(|b| b.biller_code == biller_code && b.account_number == account_number)
        {
            biller.last_paid_at = Some(now);
        }

        debug!(user_id, biller_code, amount, "bill payment committed");

        Ok(PaymentOutcome {
            payment_id: record.id,
            reference: record.reference.clone(),
            status: record.status,
            message: format!(
                "Payment of {} processed successfully. Reference: {}",
                format_cents(amount),
                record.reference
            ),
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> ServiceResult<TransferRecord> {
        let state = self.state.lock().await;
        state
            .records
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ServiceError::new(ServiceErrorCode::PaymentNotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_user_by_token() {
        let ledger = InMemoryLedger::with_seed_data();
        let user = ledger.get_user("mock_token_001").await.unwrap();
        assert_eq!(user.id, "user_001");

        let err = ledger.get_user("bogus").await.unwrap_err();
        assert_eq!(err.code, ServiceErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn test_internal_transfer_conserves_total() {
        let ledger = InMemoryLedger::with_seed_data();

        let before: Cents = ledger
            .get_accounts("user_001")
            .await
            .unwrap()
            .iter()
            .map(|a| a.balance_cents)
            .sum();

        ledger
            .transfer_between_own_accounts("user_001", "acc2", "acc1", 10_000)
            .await
            .unwrap();

        let accounts = ledger.get_accounts("user_001").await.unwrap();
        let after: Cents = accounts.iter().map(|a| a.balance_cents).sum();
        assert_eq!(before, after);
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(60_000));
        assert_eq!(
            ledger.balance_of("user_001", "acc2").await,
            Some(1_490_000)
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balances_untouched() {
        let ledger = InMemoryLedger::with_seed_data();

        let err = ledger
            .transfer_between_own_accounts("user_001", "acc1", "acc2", 60_000)
            .await
            .unwrap_err();
        assert_eq!(err.code, ServiceErrorCode::InsufficientFunds);
        assert!(err.message.contains("$500.00 AUD"));

        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(50_000));
        assert_eq!(
            ledger.balance_of("user_001", "acc2").await,
            Some(1_500_000)
        );
    }

    #[tokio::test]
    async fn test_external_transfer_requires_transactional_source() {
        let ledger = InMemoryLedger::with_seed_data();

        let err = ledger
            .transfer_to_external(
                "user_001",
                "acc2",
                "pi1",
                1_000,
                ExternalTransferKind::External,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ServiceErrorCode::InvalidAccountType);
    }

    #[tokio::test]
    async fn test_external_transfer_kind_must_match_instrument() {
        let ledger = InMemoryLedger::with_seed_data();

        // pi1 is a bank account; a BPAY submission against it must fail.
        let err = ledger
            .transfer_to_external("user_001", "acc1", "pi1", 1_000, ExternalTransferKind::Bpay)
            .await
            .unwrap_err();
        assert_eq!(err.code, ServiceErrorCode::PaymentFailed);
    }

    #[tokio::test]
    async fn test_external_transfer_debits_source() {
        let ledger = InMemoryLedger::with_seed_data();

        let outcome = ledger
            .transfer_to_external(
                "user_001",
                "acc1",
                "pi1",
                20_000,
                ExternalTransferKind::External,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, PaymentStatus::Completed);
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(30_000));
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize() {
        use std::sync::Arc;

        let ledger = Arc::new(InMemoryLedger::with_seed_data());

        // Two $400 external transfers against a $500 account: exactly one
        // may pass the sufficiency check.
        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .transfer_to_external(
                        "user_001",
                        "acc1",
                        "pi1",
                        40_000,
                        ExternalTransferKind::External,
                    )
                    .await
            })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .transfer_to_external(
                        "user_001",
                        "acc1",
                        "pi3",
                        40_000,
                        ExternalTransferKind::External,
                    )
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(10_000));
    }

    #[tokio::test]
    async fn test_saved_biller_name_filter() {
        let ledger = InMemoryLedger::with_seed_data();

        let matches = ledger
            .get_saved_billers("user_001", Some("water"), None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].biller_name, "Sydney Water");

        let all = ledger.get_saved_billers("user_001", None, None).await.unwrap();
        assert_eq!(all.len(), 4);

        let telecom = ledger
            .get_saved_billers("user_001", None, Some(BillerCategory::Telecom))
            .await
            .unwrap();
        assert_eq!(telecom.len(), 1);
        assert_eq!(telecom[0].biller_name, "Telstra");
    }

    #[tokio::test]
    async fn test_validate_biller() {
        let ledger = InMemoryLedger::with_seed_data();

        let ok = ledger
            .validate_biller("23796", "123456789", "987654321")
            .await
            .unwrap();
        assert!(ok.is_valid);
        assert_eq!(ok.biller_name.as_deref(), Some("Sydney Water"));

        let bad_code = ledger
            .validate_biller("00000", "123456789", "987654321")
            .await
            .unwrap();
        assert!(!bad_code.is_valid);

        let short_ref = ledger
            .validate_biller("23796", "123456789", "12")
            .await
            .unwrap();
        assert!(!short_ref.is_valid);
    }

    #[tokio::test]
    async fn test_pay_bill_debits_transactional_account() {
        let ledger = InMemoryLedger::with_seed_data();

        let outcome = ledger
            .pay_bill("user_001", "23796", "123456789", "987654321", 12_550)
            .await
            .unwrap();
        assert_eq!(outcome.status, PaymentStatus::Completed);
        assert!(outcome.message.contains("$125.50 AUD"));
        assert_eq!(ledger.balance_of("user_001", "acc1").await, Some(37_450));

        let record = ledger.get_payment_status(&outcome.payment_id).await.unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(record.amount_cents, 12_550);

        // Savings untouched.
        assert_eq!(
            ledger.balance_of("user_001", "acc2").await,
            Some(1_500_000)
        );
    }

    #[tokio::test]
    async fn test_create_biller_rejects_unknown_code() {
        let ledger = InMemoryLedger::with_seed_data();

        let err = ledger
            .create_biller(
                "user_001",
                CreateBillerInput {
                    biller_code: "00000".into(),
                    biller_name: "Nowhere Gas".into(),
                    account_number: "123456".into(),
                    customer_ref: "9999".into(),
                    nickname: None,
                    category: BillerCategory::Utilities,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ServiceErrorCode::InvalidBillerCode);
    }
}
