//! Destination matching
//!
//! Case-insensitive, partial-token matching of a spoken destination name
//! against the user's own accounts first, then saved contacts. Resolution
//! is a pure function of its inputs, so the same query over the same data
//! always yields the same candidate set.

use crate::models::{Account, Contact, PaymentInstrument, PaymentInstrumentDetails};

/// True when every whitespace-separated token of `query` occurs somewhere
/// in `candidate`, ignoring case.
pub fn name_matches(query: &str, candidate: &str) -> bool {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return false;
    }
    let candidate = candidate.to_lowercase();
    query.split_whitespace().all(|token| candidate.contains(token))
}

/// A possible destination for a transfer.
#[derive(Debug, Clone)]
pub enum DestinationCandidate {
    OwnAccount(Account),
    ContactInstrument {
        contact_name: String,
        instrument: PaymentInstrument,
    },
}

impl DestinationCandidate {
    /// Label shown in a numbered disambiguation list.
    pub fn label(&self) -> String {
        match self {
            DestinationCandidate::OwnAccount(account) => {
                format!("{} ({} account)", account.name, account.account_type)
            }
            DestinationCandidate::ContactInstrument {
                contact_name,
                instrument,
            } => match &instrument.details {
                PaymentInstrumentDetails::BankAccount {
                    name,
                    account_number,
                    ..
                } => {
                    let tail = if account_number.len() > 4 {
                        &account_number[account_number.len() - 4..]
                    } else {
                        account_number.as_str()
                    };
                    format!("{} — {} (bank account ***{})", contact_name, name, tail)
                }
                PaymentInstrumentDetails::BpayBiller {
                    biller_name,
                    biller_code,
                    ..
                } => format!(
                    "{} — {} (BPAY biller {})",
                    contact_name, biller_name, biller_code
                ),
            },
        }
    }
}

/// Resolve a destination query. Own accounts shadow contacts: if any of
/// the user's accounts match, contacts are not considered at all.
pub fn resolve_destination(
    query: &str,
    accounts: &[Account],
    contacts: &[Contact],
) -> Vec<DestinationCandidate> {
    let own: Vec<DestinationCandidate> = accounts
        .iter()
        .filter(|a| name_matches(query, &a.name))
        .cloned()
        .map(DestinationCandidate::OwnAccount)
        .collect();
    if !own.is_empty() {
        return own;
    }

    let mut out = Vec::new();
    for contact in contacts {
        let contact_hit = name_matches(query, &contact.name);
        for instrument in &contact.payment_instruments {
            if contact_hit || name_matches(query, instrument.details.display_name()) {
                out.push(DestinationCandidate::ContactInstrument {
                    contact_name: contact.name.clone(),
                    instrument: instrument.clone(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccountType, ContactKind};

    fn account(id: &str, name: &str, account_type: AccountType) -> Account {
        Account {
            id: id.into(),
            name: name.into(),
            account_type,
            balance_cents: 0,
        }
    }

    fn fixture() -> (Vec<Account>, Vec<Contact>) {
        let accounts = vec![
            account("acc1", "Daily Expense Account", AccountType::Transactional),
            account("acc2", "Savings Account", AccountType::Savings),
        ];
        let contacts = vec![
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
        ];
        (accounts, contacts)
    }

    #[test]
    fn test_name_matches_partial_tokens() {
        assert!(name_matches("sarah", "Sarah Johnson"));
        assert!(name_matches("SARAH JOHN", "Sarah Johnson"));
        assert!(name_matches("savings", "Savings Account"));
        assert!(!name_matches("sarah smith", "Sarah Johnson"));
        assert!(!name_matches("", "Sarah Johnson"));
        assert!(!name_matches("   ", "Sarah Johnson"));
    }

    #[test]
    fn test_own_accounts_shadow_contacts() {
        let (accounts, contacts) = fixture();
        let candidates = resolve_destination("savings", &accounts, &contacts);
        assert_eq!(candidates.len(), 1);
        assert!(matches!(
            &candidates[0],
            DestinationCandidate::OwnAccount(a) if a.id == "acc2"
        ));
    }

    #[test]
    fn test_contact_match_expands_instruments() {
        let (accounts, contacts) = fixture();
        let candidates = resolve_destination("coffee", &accounts, &contacts);
        // One candidate per payment instrument of the matching contact.
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_instrument_display_name_participates() {
        let (accounts, contacts) = fixture();
        let candidates = resolve_destination("milk", &accounts, &contacts);
        assert_eq!(candidates.len(), 1);
        assert!(matches!(
            &candidates[0],
            DestinationCandidate::ContactInstrument { instrument, .. } if instrument.id == "pi2"
        ));
    }

    #[test]
    fn test_no_match_returns_empty() {
        let (accounts, contacts) = fixture();
        assert!(resolve_destination("landlord", &accounts, &contacts).is_empty());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let (accounts, contacts) = fixture();
        let first = resolve_destination("supplier", &accounts, &contacts);
        let second = resolve_destination("supplier", &accounts, &contacts);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.label(), b.label());
        }
    }
}
