use crate::domain::account::{AccountId, OwnerId};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Creates the account; `amount` is the opening balance.
    Open,
    Deposit,
    #[serde(alias = "withdrawal")]
    Withdraw,
}

/// One row of the driver's input: `op, account, amount, caller`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct OperationRecord {
    pub op: OperationType,
    pub account: u64,
    #[serde(default)]
    pub amount: Option<Decimal>,
    /// For `open` rows the owner (empty = shared); otherwise the acting principal.
    #[serde(default)]
    pub caller: Option<String>,
}

impl OperationRecord {
    pub fn account_id(&self) -> AccountId {
        AccountId(self.account)
    }

    pub fn principal(&self) -> Option<OwnerId> {
        self.caller
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(OwnerId::new)
    }
}

/// Reads operations from a CSV source.
///
/// Wraps `csv::Reader` and yields `Result<OperationRecord>` lazily, trimming
/// whitespace and tolerating short rows.
pub struct OperationReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OperationReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn operations(self) -> impl Iterator<Item = Result<OperationRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(LedgerError::from))
    }
}
