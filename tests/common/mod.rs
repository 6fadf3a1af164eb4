#![allow(dead_code)]

use occledger::application::balance::BalanceService;
use occledger::application::retry::{RetryController, RetryPolicy};
use occledger::domain::account::{AccountId, OwnerId};
use occledger::infrastructure::in_memory::InMemoryLedgerStore;
use rust_decimal::Decimal;
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const ACCOUNT: AccountId = AccountId(1);

/// A service over a fresh in-memory store holding one account.
pub async fn service_with_account(owner: Option<OwnerId>, balance: Decimal) -> Arc<BalanceService> {
    let service = Arc::new(BalanceService::new(Arc::new(InMemoryLedgerStore::new())));
    service
        .open_account(ACCOUNT, owner, balance)
        .await
        .expect("Failed to open account");
    service
}

pub fn controller(service: &Arc<BalanceService>) -> RetryController {
    RetryController::new(service.clone())
}

/// Enough attempts for 20 contenders on one account: a caller only loses a
/// round when someone else commits, so it needs at most one attempt per rival.
pub fn contention_policy() -> RetryPolicy {
    RetryPolicy::new(40, 1, 10, 0.5)
}

pub fn generate_csv(path: &Path, deposits: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "account", "amount", "caller"])?;
    wtr.write_record(["open", "1", "0", ""])?;

    for _ in 0..deposits {
        wtr.write_record(["deposit", "1", "1.0", ""])?;
    }

    wtr.flush()?;
    Ok(())
}
