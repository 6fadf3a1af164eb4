use crate::domain::account::{Account, AccountId, Balance, Version};
use crate::domain::ports::{CommitResult, LedgerStore, check_balance, check_entry};
use crate::domain::transaction::{AuditEntry, EntryStatus, IdempotencyKey};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerTables {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<AuditEntry>,
    /// Unique index over completed entries: key -> position in `entries`.
    idempotency: HashMap<IdempotencyKey, usize>,
}

/// A thread-safe in-memory ledger.
///
/// All tables sit behind one `Arc<RwLock<..>>`, so reads run concurrently and
/// `commit_mutation` gets its atomicity from the write guard.
/// Ideal for testing or when persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryLedgerStore {
    tables: Arc<RwLock<LedgerTables>>,
}

impl InMemoryLedgerStore {
    /// Creates a new, empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, account: Account) -> Result<()> {
        check_balance(account.id, account.balance)?;
        let mut tables = self.tables.write().await;
        if tables.accounts.contains_key(&account.id) {
            return Err(LedgerError::ConstraintViolation(format!(
                "account {} already exists",
                account.id
            )));
        }
        tables.accounts.insert(account.id, account);
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let tables = self.tables.read().await;
        Ok(tables.accounts.get(&id).cloned())
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<Account> = tables.accounts.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.accounts.remove(&id).is_some();
        tables.entries.retain(|e| e.account_id != id);
        // positions shifted, rebuild the index
        let index: HashMap<IdempotencyKey, usize> = tables
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == EntryStatus::Completed)
            .filter_map(|(pos, e)| e.idempotency_key.clone().map(|k| (k, pos)))
            .collect();
        tables.idempotency = index;
        Ok(existed)
    }

    async fn commit_mutation(
        &self,
        id: AccountId,
        expected_version: Version,
        new_balance: Balance,
        entry: AuditEntry,
    ) -> Result<CommitResult> {
        check_balance(id, new_balance)?;
        check_entry(&entry)?;
        if entry.status != EntryStatus::Completed || entry.balance_after != new_balance {
            return Err(LedgerError::ConstraintViolation(format!(
                "entry {} does not describe the committed balance",
                entry.id
            )));
        }

        let mut tables = self.tables.write().await;
        let current = tables
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::StorageError(format!("account {id} vanished")))?;

        if current.version != expected_version {
            return Ok(CommitResult::VersionMismatch(current));
        }
        if let Some(key) = &entry.idempotency_key
            && let Some(&pos) = tables.idempotency.get(key)
        {
            return Ok(CommitResult::DuplicateKey(tables.entries[pos].clone()));
        }

        let updated = current.applied(new_balance);
        tables.accounts.insert(id, updated.clone());
        if let Some(key) = entry.idempotency_key.clone() {
            let pos = tables.entries.len();
            tables.idempotency.insert(key, pos);
        }
        tables.entries.push(entry);
        Ok(CommitResult::Committed(updated))
    }

    async fn append_entry(&self, entry: AuditEntry) -> Result<()> {
        if entry.status == EntryStatus::Completed {
            return Err(LedgerError::ConstraintViolation(
                "completed entries are only written by commit_mutation".to_string(),
            ));
        }
        check_entry(&entry)?;
        let mut tables = self.tables.write().await;
        tables.entries.push(entry);
        Ok(())
    }

    async fn find_completed_by_key(&self, key: &IdempotencyKey) -> Result<Option<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .idempotency
            .get(key)
            .map(|&pos| tables.entries[pos].clone()))
    }

    async fn entries_for_account(&self, id: AccountId) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.account_id == id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::Amount;
    use crate::domain::transaction::MutationKind;
    use rust_decimal_macros::dec;

    fn deposit_entry(before: Balance, amount: &str, version: Version, key: Option<&str>) -> AuditEntry {
        AuditEntry::completed(
            AccountId(1),
            MutationKind::Deposit,
            Amount::new(amount.parse().unwrap()).unwrap(),
            before,
            version,
            key.map(IdempotencyKey::new),
        ).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let store = InMemoryLedgerStore::new();
        let account = Account::open(AccountId(1), None, Balance::new(dec!(100.0)));

        store.create_account(account.clone()).await.unwrap();
        let retrieved = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(retrieved, account);

        assert!(store.get_account(AccountId(2)).await.unwrap().is_none());
        assert!(matches!(
            store.create_account(account).await,
            Err(LedgerError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_negative_opening_balance_is_refused() {
        let store = InMemoryLedgerStore::new();
        let account = Account::open(AccountId(1), None, Balance::new(dec!(-1)));
        assert!(matches!(
            store.create_account(account).await,
            Err(LedgerError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_commit_checks_version() {
        let store = InMemoryLedgerStore::new();
        store
            .create_account(Account::open(AccountId(1), None, Balance::ZERO))
            .await
            .unwrap();

        let entry = deposit_entry(Balance::ZERO, "10", Version(2), None);
        let result = store
            .commit_mutation(AccountId(1), Version(1), Balance::new(dec!(10)), entry)
            .await
            .unwrap();
        let CommitResult::Committed(account) = result else {
            panic!("expected commit, got {result:?}");
        };
        assert_eq!(account.version, Version(2));

        // stale writer
        let entry = deposit_entry(Balance::ZERO, "10", Version(2), None);
        let result = store
            .commit_mutation(AccountId(1), Version(1), Balance::new(dec!(10)), entry)
            .await
            .unwrap();
        assert!(matches!(result, CommitResult::VersionMismatch(a) if a.version == Version(2)));

        let account = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.balance, Balance::new(dec!(10)));
        assert_eq!(store.entries_for_account(AccountId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_enforces_unique_key() {
        let store = InMemoryLedgerStore::new();
        store
            .create_account(Account::open(AccountId(1), None, Balance::ZERO))
            .await
            .unwrap();

        let first = deposit_entry(Balance::ZERO, "10", Version(2), Some("k1"));
        store
            .commit_mutation(AccountId(1), Version(1), Balance::new(dec!(10)), first.clone())
            .await
            .unwrap();

        let again = deposit_entry(Balance::new(dec!(10)), "10", Version(3), Some("k1"));
        let result = store
            .commit_mutation(AccountId(1), Version(2), Balance::new(dec!(20)), again)
            .await
            .unwrap();
        assert_eq!(result, CommitResult::DuplicateKey(first.clone()));

        let cached = store
            .find_completed_by_key(&IdempotencyKey::new("k1"))
            .await
            .unwrap();
        assert_eq!(cached, Some(first));
    }

    #[tokio::test]
    async fn test_commit_refuses_negative_balance() {
        let store = InMemoryLedgerStore::new();
        store
            .create_account(Account::open(AccountId(1), None, Balance::new(dec!(5))))
            .await
            .unwrap();

        let entry = AuditEntry::completed(
            AccountId(1),
            MutationKind::Withdraw,
            Amount::new(dec!(10)).unwrap(),
            Balance::new(dec!(5)),
            Version(2),
            None,
        ).unwrap();
        let result = store
            .commit_mutation(AccountId(1), Version(1), Balance::new(dec!(-5)), entry)
            .await;
        assert!(matches!(result, Err(LedgerError::ConstraintViolation(_))));

        let account = store.get_account(AccountId(1)).await.unwrap().unwrap();
        assert_eq!(account.version, Version(1));
    }

    #[tokio::test]
    async fn test_append_entry_rejects_completed() {
        let store = InMemoryLedgerStore::new();
        let entry = deposit_entry(Balance::ZERO, "1", Version(2), None);
        assert!(store.append_entry(entry).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_account_drops_trail() {
        let store = InMemoryLedgerStore::new();
        store
            .create_account(Account::open(AccountId(1), None, Balance::ZERO))
            .await
            .unwrap();
        let entry = deposit_entry(Balance::ZERO, "10", Version(2), Some("k1"));
        store
            .commit_mutation(AccountId(1), Version(1), Balance::new(dec!(10)), entry)
            .await
            .unwrap();

        assert!(store.delete_account(AccountId(1)).await.unwrap());
        assert!(!store.delete_account(AccountId(1)).await.unwrap());
        assert!(store.entries_for_account(AccountId(1)).await.unwrap().is_empty());
        assert!(
            store
                .find_completed_by_key(&IdempotencyKey::new("k1"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
