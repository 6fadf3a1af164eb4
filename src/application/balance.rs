use crate::domain::account::{Account, AccountId, Amount, Balance, OwnerId, Version};
use crate::domain::outcome::{ErrorCode, Outcome};
use crate::domain::ports::{CommitResult, LedgerStoreRef};
use crate::domain::transaction::{AuditEntry, IdempotencyKey, MutationKind};
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Wire shape of an `applyBalanceChange` request.
///
/// `kind` and `amount` stay unvalidated here so that a bad request can be
/// answered with `INVALID_TYPE` / `INVALID_AMOUNT` instead of a decode fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChangeRequest {
    pub account_id: AccountId,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: String,
    pub expected_version: u64,
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

/// The balance and version a caller observed at some point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccountSnapshot {
    pub balance: Balance,
    pub version: Version,
}

/// The surface the retry layer talks to.
///
/// [`BalanceService`] implements it in-process; a remote client would
/// implement it by forwarding over its transport and reporting transport
/// failures as [`crate::error::LedgerError::TransportError`].
#[async_trait]
pub trait BalanceApi: Send + Sync {
    async fn account_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>>;

    async fn apply_balance_change(
        &self,
        caller: Option<&OwnerId>,
        request: BalanceChangeRequest,
    ) -> Result<Outcome>;
}

/// Validates and conditionally commits single balance changes.
///
/// No lock is taken while validating; the store's `commit_mutation` is the
/// only point where concurrent writers are ordered.
#[derive(Clone)]
pub struct BalanceService {
    store: LedgerStoreRef,
}

impl BalanceService {
    pub fn new(store: LedgerStoreRef) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LedgerStoreRef {
        &self.store
    }

    /// Creates an account at version 1. Opening is administrative and does
    /// not go through the audit log.
    pub async fn open_account(
        &self,
        id: AccountId,
        owner: Option<OwnerId>,
        initial: Decimal,
    ) -> Result<Account> {
        let account = Account::open(id, owner, Balance::new(initial));
        self.store.create_account(account.clone()).await?;
        info!(account = %id, balance = %account.balance, "account opened");
        Ok(account)
    }
}

/// Answers a request whose key already has a completed entry. A key belongs to
/// the account it was first applied to; reuse elsewhere is refused.
fn replay(id: AccountId, done: AuditEntry) -> Outcome {
    if done.account_id != id {
        info!(key = ?done.idempotency_key, "idempotency key bound to another account");
        return Outcome::rejected(
            ErrorCode::UnknownError,
            "idempotency key already used for another account",
        );
    }
    debug!(version = %done.version_at, "replaying completed operation");
    Outcome::replayed(done.balance_after, done.version_at)
}

#[async_trait]
impl BalanceApi for BalanceService {
    async fn account_snapshot(&self, id: AccountId) -> Result<Option<AccountSnapshot>> {
        Ok(self.store.get_account(id).await?.map(|a| AccountSnapshot {
            balance: a.balance,
            version: a.version,
        }))
    }

    #[instrument(
        skip(self, caller, request),
        fields(account = %request.account_id, kind = %request.kind, expected = request.expected_version)
    )]
    async fn apply_balance_change(
        &self,
        caller: Option<&OwnerId>,
        request: BalanceChangeRequest,
    ) -> Result<Outcome> {
        let id = request.account_id;
        let expected = Version(request.expected_version);

        let Some(account) = self.store.get_account(id).await? else {
            info!("account not found");
            return Ok(Outcome::rejected(
                ErrorCode::AccountNotFound,
                format!("account {id} not found"),
            ));
        };

        if !account.is_accessible_by(caller) {
            info!(caller = ?caller.map(|c| c.as_str()), "caller does not own account");
            return Ok(Outcome::rejected(
                ErrorCode::Unauthorized,
                format!("caller may not modify account {id}"),
            ));
        }

        if let Some(key) = &request.idempotency_key
            && let Some(done) = self.store.find_completed_by_key(key).await?
        {
            return Ok(replay(id, done));
        }

        let (balance, version) = (account.balance, account.version);
        if version != expected {
            debug!(current = %version, "version conflict");
            return Ok(Outcome::rejected_at(
                ErrorCode::VersionConflict,
                balance,
                version,
                format!("expected version {expected}, found {version}"),
            ));
        }

        let kind: MutationKind = match request.kind.parse() {
            Ok(kind) => kind,
            Err(err) => {
                info!("invalid transaction type");
                return Ok(Outcome::rejected_at(
                    ErrorCode::InvalidType,
                    balance,
                    version,
                    err.to_string(),
                ));
            }
        };
        let amount = match Amount::new(request.amount) {
            Ok(amount) => amount,
            Err(err) => {
                info!(amount = %request.amount, "invalid amount");
                return Ok(Outcome::rejected_at(
                    ErrorCode::InvalidAmount,
                    balance,
                    version,
                    err.to_string(),
                ));
            }
        };

        let Some(entry) = AuditEntry::completed(
            id,
            kind,
            amount,
            balance,
            version.next(),
            request.idempotency_key.clone(),
        ) else {
            info!(balance = %balance, amount = %amount.value(), "amount overflows balance");
            return Ok(Outcome::rejected_at(
                ErrorCode::InvalidAmount,
                balance,
                version,
                format!("amount {} overflows balance {balance}", amount.value()),
            ));
        };
        let candidate = entry.balance_after;

        if candidate.is_negative() {
            self.store
                .append_entry(AuditEntry::failed(
                    id,
                    kind,
                    amount,
                    balance,
                    version,
                    "insufficient funds",
                ))
                .await?;
            info!(balance = %balance, amount = %amount.value(), "insufficient funds");
            return Ok(Outcome::rejected_at(
                ErrorCode::InsufficientFunds,
                balance,
                version,
                format!("balance {balance} cannot cover {}", amount.value()),
            ));
        }

        match self
            .store
            .commit_mutation(id, expected, candidate, entry)
            .await?
        {
            CommitResult::Committed(updated) => {
                info!(balance = %updated.balance, version = %updated.version, "balance change applied");
                Ok(Outcome::applied(updated.balance, updated.version))
            }
            CommitResult::VersionMismatch(current) => {
                debug!(current = %current.version, "lost the conditional write");
                Ok(Outcome::rejected_at(
                    ErrorCode::VersionConflict,
                    current.balance,
                    current.version,
                    format!("expected version {expected}, found {}", current.version),
                ))
            }
            CommitResult::DuplicateKey(done) => {
                debug!(version = %done.version_at, "lost race to an identical request");
                Ok(replay(id, done))
            }
        }
    }
}
