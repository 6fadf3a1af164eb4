use super::account::{Account, AccountId, Balance, Version};
use super::transaction::{AuditEntry, IdempotencyKey};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// What happened to a conditional write.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitResult {
    /// The write landed; carries the account as stored.
    Committed(Account),
    /// Another writer got there first; carries the account's current state.
    VersionMismatch(Account),
    /// The idempotency key already belongs to a completed entry.
    DuplicateKey(AuditEntry),
}

/// Storage contract for accounts and their audit log.
///
/// Reads are unguarded. `commit_mutation` is the only place implementations
/// need to serialize writers.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new account. Fails if the id is taken or the balance is negative.
    async fn create_account(&self, account: Account) -> Result<()>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn all_accounts(&self) -> Result<Vec<Account>>;

    /// Removes the account and its audit trail. Returns whether it existed.
    async fn delete_account(&self, id: AccountId) -> Result<bool>;

    /// Atomically applies `new_balance` at `expected_version + 1` and appends
    /// the completed `entry`, provided the version still matches and the
    /// entry's idempotency key is unused.
    async fn commit_mutation(
        &self,
        id: AccountId,
        expected_version: Version,
        new_balance: Balance,
        entry: AuditEntry,
    ) -> Result<CommitResult>;

    /// Appends a non-completed entry (failed attempts).
    async fn append_entry(&self, entry: AuditEntry) -> Result<()>;

    async fn find_completed_by_key(&self, key: &IdempotencyKey) -> Result<Option<AuditEntry>>;

    /// Audit trail of one account, oldest first.
    async fn entries_for_account(&self, id: AccountId) -> Result<Vec<AuditEntry>>;
}

pub type LedgerStoreRef = Arc<dyn LedgerStore>;

/// Storage-level `CHECK (balance >= 0)`.
pub(crate) fn check_balance(id: AccountId, balance: Balance) -> Result<()> {
    if balance.is_negative() {
        return Err(LedgerError::ConstraintViolation(format!(
            "account {id} balance would become {balance}"
        )));
    }
    Ok(())
}

/// Storage-level checks on an audit row.
pub(crate) fn check_entry(entry: &AuditEntry) -> Result<()> {
    if !entry.is_consistent() {
        return Err(LedgerError::ConstraintViolation(format!(
            "entry {} does not balance: {} {} {} != {}",
            entry.id, entry.balance_before, entry.kind, entry.amount.value(), entry.balance_after
        )));
    }
    Ok(())
}
