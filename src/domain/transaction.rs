use super::account::{AccountId, Amount, Balance, Version};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The two supported balance mutations.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Deposit,
    Withdraw,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Deposit => "deposit",
            MutationKind::Withdraw => "withdraw",
        }
    }

    /// Applies the mutation to `balance` without any bounds checking.
    /// The balance after this mutation, or `None` if it overflows `Decimal`.
    pub fn apply(&self, balance: Balance, amount: Amount) -> Option<Balance> {
        match self {
            MutationKind::Deposit => balance.checked_add(amount),
            MutationKind::Withdraw => balance.checked_sub(amount),
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMutationKind(pub String);

impl fmt::Display for UnknownMutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported transaction type '{}'", self.0)
    }
}

impl std::error::Error for UnknownMutationKind {}

impl FromStr for MutationKind {
    type Err = UnknownMutationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(MutationKind::Deposit),
            "withdraw" | "withdrawal" => Ok(MutationKind::Withdraw),
            _ => Err(UnknownMutationKind(s.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Completed,
    Failed,
    Pending,
}

/// Client-chosen token that makes a logical operation apply at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A fresh random key for a new logical operation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of the append-only audit log.
///
/// Every attempted mutation that gets as far as computing a new balance
/// leaves exactly one entry behind, completed or failed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct AuditEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    pub kind: MutationKind,
    pub amount: Amount,
    pub balance_before: Balance,
    pub balance_after: Balance,
    /// Resulting version for completed entries, the validated version otherwise.
    pub version_at: Version,
    pub status: EntryStatus,
    pub error_message: Option<String>,
    pub idempotency_key: Option<IdempotencyKey>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn completed(
        account_id: AccountId,
        kind: MutationKind,
        amount: Amount,
        balance_before: Balance,
        new_version: Version,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Option<Self> {
        Some(Self {
            id: Uuid::now_v7(),
            account_id,
            kind,
            amount,
            balance_before,
            balance_after: kind.apply(balance_before, amount)?,
            version_at: new_version,
            status: EntryStatus::Completed,
            error_message: None,
            idempotency_key,
            created_at: Utc::now(),
        })
    }

    /// A rejected attempt; the balance is recorded unchanged.
    pub fn failed(
        account_id: AccountId,
        kind: MutationKind,
        amount: Amount,
        balance: Balance,
        version: Version,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            kind,
            amount,
            balance_before: balance,
            balance_after: balance,
            version_at: version,
            status: EntryStatus::Failed,
            error_message: Some(reason.into()),
            idempotency_key: None,
            created_at: Utc::now(),
        }
    }

    /// Checks `balance_after` against `balance_before` for completed entries.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            EntryStatus::Completed => {
                self.kind.apply(self.balance_before, self.amount) == Some(self.balance_after)
            }
            EntryStatus::Failed | EntryStatus::Pending => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("deposit".parse::<MutationKind>(), Ok(MutationKind::Deposit));
        assert_eq!(" Withdraw ".parse::<MutationKind>(), Ok(MutationKind::Withdraw));
        assert_eq!("withdrawal".parse::<MutationKind>(), Ok(MutationKind::Withdraw));
        assert!("transfer".parse::<MutationKind>().is_err());
    }

    #[test]
    fn test_completed_entry_balances() {
        let amount = Amount::new(dec!(10)).unwrap();
        let entry = AuditEntry::completed(
            AccountId(1),
            MutationKind::Withdraw,
            amount,
            Balance::new(dec!(25)),
            Version(3),
            Some(IdempotencyKey::new("k1")),
        ).unwrap();
        assert_eq!(entry.balance_after, Balance::new(dec!(15)));
        assert_eq!(entry.status, EntryStatus::Completed);
        assert!(entry.is_consistent());
    }

    #[test]
    fn test_failed_entry_keeps_balance_and_drops_key() {
        let amount = Amount::new(dec!(10)).unwrap();
        let entry = AuditEntry::failed(
            AccountId(1),
            MutationKind::Withdraw,
            amount,
            Balance::new(dec!(5)),
            Version(1),
            "insufficient funds",
        );
        assert_eq!(entry.balance_before, entry.balance_after);
        assert_eq!(entry.idempotency_key, None);
        assert!(entry.is_consistent());
    }

    #[test]
    fn test_tampered_completed_entry_is_inconsistent() {
        let amount = Amount::new(dec!(10)).unwrap();
        let mut entry = AuditEntry::completed(
            AccountId(1),
            MutationKind::Deposit,
            amount,
            Balance::ZERO,
            Version(2),
            None,
        ).unwrap();
        entry.balance_after = Balance::new(dec!(11));
        assert!(!entry.is_consistent());
    }

    #[test]
    fn test_generated_keys_are_distinct() {
        assert_ne!(IdempotencyKey::generate(), IdempotencyKey::generate());
    }
}
