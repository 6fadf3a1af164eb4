use crate::domain::account::{Account, AccountId, Balance, Version};
use crate::domain::ports::{CommitResult, LedgerStore, check_balance, check_entry};
use crate::domain::transaction::{AuditEntry, EntryStatus, IdempotencyKey};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for storing account rows.
pub const CF_ACCOUNTS: &str = "accounts";
/// Column Family for the audit log, keyed by account id then entry id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family mapping idempotency keys to audit log keys.
pub const CF_IDEMPOTENCY: &str = "idempotency";

/// A persistent ledger backed by RocksDB.
///
/// Accounts, audit entries and the idempotency index live in separate Column
/// Families. Conditional writes are serialized by `commit_gate` and land as a
/// single `WriteBatch`, so the balance update, the audit row and the index row
/// commit together or not at all.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_gate: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_ACCOUNTS, CF_TRANSACTIONS, CF_IDEMPOTENCY]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_gate: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| LedgerError::StorageError(format!("column family {name} not found")))
    }

    fn entry_key(entry: &AuditEntry) -> Vec<u8> {
        let mut key = entry.account_id.0.to_be_bytes().to_vec();
        key.extend_from_slice(entry.id.as_bytes());
        key
    }

    fn read_account(&self, id: AccountId) -> Result<Option<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_completed(&self, key: &IdempotencyKey) -> Result<Option<AuditEntry>> {
        let index = self.cf(CF_IDEMPOTENCY)?;
        let Some(entry_key) = self.db.get_cf(index, key.as_str().as_bytes())? else {
            return Ok(None);
        };
        let cf = self.cf(CF_TRANSACTIONS)?;
        match self.db.get_cf(cf, entry_key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Err(LedgerError::StorageError(format!(
                "idempotency key {key} points at a missing entry"
            ))),
        }
    }

    fn read_entries(&self, id: AccountId) -> Result<Vec<AuditEntry>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let prefix = id.0.to_be_bytes();
        let mut entries = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(serde_json::from_slice(&value)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl LedgerStore for RocksDBStore {
    async fn create_account(&self, account: Account) -> Result<()> {
        check_balance(account.id, account.balance)?;
        let _gate = self.commit_gate.lock().await;
        if self.read_account(account.id)?.is_some() {
            return Err(LedgerError::ConstraintViolation(format!(
                "account {} already exists",
                account.id
            )));
        }
        let cf = self.cf(CF_ACCOUNTS)?;
        self.db
            .put_cf(cf, account.id.0.to_be_bytes(), serde_json::to_vec(&account)?)?;
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.read_account(id)
    }

    async fn all_accounts(&self) -> Result<Vec<Account>> {
        let cf = self.cf(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            accounts.push(serde_json::from_slice(&value)?);
        }
        Ok(accounts)
    }

    async fn delete_account(&self, id: AccountId) -> Result<bool> {
        let _gate = self.commit_gate.lock().await;
        let existed = self.read_account(id)?.is_some();
        let entries = self.read_entries(id)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_ACCOUNTS)?, id.0.to_be_bytes());
        for entry in &entries {
            batch.delete_cf(self.cf(CF_TRANSACTIONS)?, Self::entry_key(entry));
            if let Some(key) = &entry.idempotency_key {
                batch.delete_cf(self.cf(CF_IDEMPOTENCY)?, key.as_str().as_bytes());
            }
        }
        self.db.write(batch)?;
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

        let _gate = self.commit_gate.lock().await;
        let current = self
            .read_account(id)?
            .ok_or_else(|| LedgerError::StorageError(format!("account {id} vanished")))?;

        if current.version != expected_version {
            return Ok(CommitResult::VersionMismatch(current));
        }
        if let Some(key) = &entry.idempotency_key
            && let Some(existing) = self.read_completed(key)?
        {
            return Ok(CommitResult::DuplicateKey(existing));
        }

        let updated = current.applied(new_balance);
        let entry_key = Self::entry_key(&entry);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_ACCOUNTS)?,
            id.0.to_be_bytes(),
            serde_json::to_vec(&updated)?,
        );
        if let Some(key) = &entry.idempotency_key {
            batch.put_cf(self.cf(CF_IDEMPOTENCY)?, key.as_str().as_bytes(), &entry_key);
        }
        batch.put_cf(self.cf(CF_TRANSACTIONS)?, entry_key, serde_json::to_vec(&entry)?);
        self.db.write(batch)?;

        Ok(CommitResult::Committed(updated))
    }

    async fn append_entry(&self, entry: AuditEntry) -> Result<()> {
        if entry.status == EntryStatus::Completed {
            return Err(LedgerError::ConstraintViolation(
                "completed entries are only written by commit_mutation".to_string(),
            ));
        }
        check_entry(&entry)?;
        let cf = self.cf(CF_TRANSACTIONS)?;
        self.db
            .put_cf(cf, Self::entry_key(&entry), serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    async fn find_completed_by_key(&self, key: &IdempotencyKey) -> Result<Option<AuditEntry>> {
        self.read_completed(key)
    }

    async fn entries_for_account(&self, id: AccountId) -> Result<Vec<AuditEntry>> {
        self.read_entries(id)
    }
}
