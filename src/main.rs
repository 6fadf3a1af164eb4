use clap::Parser;
use miette::{IntoDiagnostic, Result};
use occledger::application::balance::BalanceService;
use occledger::application::retry::{RetryController, RetryPolicy};
use occledger::config::Config;
use occledger::domain::ports::LedgerStoreRef;
use occledger::domain::transaction::MutationKind;
use occledger::infrastructure::in_memory::InMemoryLedgerStore;
use occledger::interfaces::csv::ledger_writer::LedgerWriter;
use occledger::interfaces::csv::operation_reader::{OperationReader, OperationRecord, OperationType};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file (`op, account, amount, caller`)
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Submit all deposits and withdrawals at once instead of one by one
    #[arg(long)]
    concurrent: bool,

    /// Write the audit trail of every account to this CSV file
    #[arg(long)]
    audit_log: Option<PathBuf>,
}

fn open_store(db_path: Option<&Path>) -> Result<LedgerStoreRef> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            use occledger::infrastructure::rocksdb::RocksDBStore;
            info!(path = %path.display(), "using RocksDB storage");
            Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

async fn run_mutation(
    controller: RetryController,
    policy: Arc<RetryPolicy>,
    record: OperationRecord,
    kind: MutationKind,
) {
    let Some(amount) = record.amount else {
        error!(account = record.account, op = %kind, "Error processing operation: missing amount");
        return;
    };
    let caller = record.principal();
    match controller
        .perform_with_retry(caller.as_ref(), record.account_id(), amount, kind, &policy)
        .await
    {
        Ok(outcome) => match outcome.error_code() {
            None => {}
            Some(code) => warn!(
                account = record.account,
                op = %kind,
                %amount,
                %code,
                "operation rejected"
            ),
        },
        Err(e) => error!(account = record.account, op = %kind, "Error processing operation: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };
    if cli.db_path.is_some() {
        config.storage.db_path = cli.db_path.clone();
    }

    let store = open_store(config.storage.db_path.as_deref())?;
    let service = Arc::new(BalanceService::new(store.clone()));
    let controller = RetryController::new(service.clone());
    let policy = Arc::new(config.retry.clone());

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);

    let mut pending = JoinSet::new();
    for op_result in reader.operations() {
        let record = match op_result {
            Ok(record) => record,
            Err(e) => {
                error!("Error reading operation: {}", e);
                continue;
            }
        };
        let kind = match record.op {
            OperationType::Open => {
                let initial = record.amount.unwrap_or_default();
                if let Err(e) = service
                    .open_account(record.account_id(), record.principal(), initial)
                    .await
                {
                    error!(account = record.account, "Error opening account: {}", e);
                }
                continue;
            }
            OperationType::Deposit => MutationKind::Deposit,
            OperationType::Withdraw => MutationKind::Withdraw,
        };

        let task = run_mutation(controller.clone(), policy.clone(), record, kind);
        if cli.concurrent {
            pending.spawn(task);
        } else {
            task.await;
        }
    }
    while let Some(joined) = pending.join_next().await {
        joined.into_diagnostic()?;
    }

    let accounts = store.all_accounts().await.into_diagnostic()?;

    if let Some(path) = &cli.audit_log {
        let mut entries = Vec::new();
        for account in &accounts {
            entries.extend(store.entries_for_account(account.id).await.into_diagnostic()?);
        }
        let mut writer = LedgerWriter::new(File::create(path).into_diagnostic()?);
        writer.write_entries(&entries).into_diagnostic()?;
    }

    let stdout = io::stdout();
    let mut writer = LedgerWriter::new(stdout.lock());
    writer.write_accounts(&accounts).into_diagnostic()?;

    Ok(())
}
