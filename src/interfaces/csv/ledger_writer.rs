use crate::domain::account::Account;
use crate::domain::transaction::{AuditEntry, EntryStatus};
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow<'a> {
    account: u64,
    owner: &'a str,
    balance: String,
    version: u64,
    currency: &'a str,
}

#[derive(Serialize)]
struct EntryRow<'a> {
    id: String,
    account: u64,
    r#type: &'static str,
    amount: String,
    balance_before: String,
    balance_after: String,
    version_at: u64,
    status: &'static str,
    error_message: &'a str,
    idempotency_key: &'a str,
    created_at: String,
}

/// Writes ledger state as CSV.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(sink),
        }
    }

    /// Header `account,owner,balance,version,currency`; balances are normalized
    /// (`20.0` prints as `20`).
    pub fn write_accounts(&mut self, accounts: &[Account]) -> Result<()> {
        self.writer
            .write_record(["account", "owner", "balance", "version", "currency"])?;
        for account in accounts {
            self.writer.serialize(AccountRow {
                account: account.id.0,
                owner: account.owner.as_ref().map(|o| o.as_str()).unwrap_or(""),
                balance: account.balance.to_string(),
                version: account.version.0,
                currency: &account.currency,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_entries(&mut self, entries: &[AuditEntry]) -> Result<()> {
        self.writer.write_record([
            "id",
            "account",
            "type",
            "amount",
            "balance_before",
            "balance_after",
            "version_at",
            "status",
            "error_message",
            "idempotency_key",
            "created_at",
        ])?;
        for entry in entries {
            self.writer.serialize(EntryRow {
                id: entry.id.to_string(),
                account: entry.account_id.0,
                r#type: entry.kind.as_str(),
                amount: entry.amount.value().normalize().to_string(),
                balance_before: entry.balance_before.to_string(),
                balance_after: entry.balance_after.to_string(),
                version_at: entry.version_at.0,
                status: match entry.status {
                    EntryStatus::Completed => "completed",
                    EntryStatus::Failed => "failed",
                    EntryStatus::Pending => "pending",
                },
                error_message: entry.error_message.as_deref().unwrap_or(""),
                idempotency_key: entry
                    .idempotency_key
                    .as_ref()
                    .map(|k| k.as_str())
                    .unwrap_or(""),
                created_at: entry.created_at.to_rfc3339(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
