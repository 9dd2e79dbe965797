//! Domain types shared by the node gateway, the database layer and the crank

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of clicks in one ADS
pub const CLICKS_PER_ADS: i64 = 100_000_000_000;

/// An ADS account address in its canonical `NNNN-UUUUUUUU-XXXX` form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountAddress(String);

impl AccountAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Exact match against an address reported by the node
    pub fn matches(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl FromStr for AccountAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let parts: Vec<&str> = normalized.split('-').collect();
        let valid = parts.len() == 3
            && [4, 8, 4]
                .iter()
                .zip(parts.iter())
                .all(|(len, part)| part.len() == *len && part.chars().all(|c| c.is_ascii_hexdigit()));

        if !valid {
            return Err(format!("Invalid account address: {}", s));
        }
        Ok(Self(normalized))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of an incoming payment
///
/// `New` is the only non-terminal status. A payment leaves `New` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    /// Observed on chain, not yet classified
    New = 0,
    /// Not addressed to us, unknown type, or target mismatch
    Invalid = 1,
    /// Addressed to us but not attributable to a deposit or an event payment
    Reserved = 2,
    /// Settled as payment for ad events served by a peer host
    EventPayment = 3,
    /// Credited to a user's wallet ledger
    UserDeposit = 4,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::New,
        PaymentStatus::Invalid,
        PaymentStatus::Reserved,
        PaymentStatus::EventPayment,
        PaymentStatus::UserDeposit,
    ];

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(PaymentStatus::New),
            1 => Some(PaymentStatus::Invalid),
            2 => Some(PaymentStatus::Reserved),
            3 => Some(PaymentStatus::EventPayment),
            4 => Some(PaymentStatus::UserDeposit),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::New => "new",
            PaymentStatus::Invalid => "invalid",
            PaymentStatus::Reserved => "reserved",
            PaymentStatus::EventPayment => "event_payment",
            PaymentStatus::UserDeposit => "user_deposit",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::New)
    }

    /// Only `New -> terminal` is allowed
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incoming payment row awaiting classification
#[derive(Debug, Clone)]
pub struct AdsPayment {
    pub id: i64,
    /// Transaction id as reported by the node
    pub txid: String,
    /// Sender address
    pub address: String,
    /// Amount received (clicks)
    pub amount: i64,
    pub status: PaymentStatus,
    /// Unix timestamp when the payment was observed
    pub created_at: i64,
}

/// One recipient of a `send_many` transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wire {
    pub target_address: String,
    /// Amount (clicks)
    pub amount: i64,
}

/// Transaction body fetched from the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdsTransaction {
    SendOne {
        sender_address: String,
        target_address: String,
        amount: i64,
        /// Hex encoded message payload
        message: String,
    },
    SendMany { wires: Vec<Wire> },
    /// Any other transaction type, kept by name for logging
    Other { kind: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEntryType {
    Deposit = 1,
}

impl LedgerEntryType {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

/// Append-only user wallet ledger record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLedgerEntry {
    pub user_id: i64,
    /// Signed amount (clicks)
    pub amount: i64,
    pub address_from: String,
    pub address_to: String,
    pub txid: String,
    pub entry_type: LedgerEntryType,
}

/// Known peer ad server, keyed by its account address
#[derive(Debug, Clone)]
pub struct NetworkHost {
    pub id: i64,
    pub address: String,
    /// Base URL of the peer
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
}

/// One event payment record returned by a peer host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentDetail {
    /// Hex encoded case id
    pub case_id: String,
    /// Hex encoded publisher id
    pub publisher_id: String,
    /// Value of the event (clicks)
    pub event_value: i64,
}
