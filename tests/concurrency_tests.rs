use occledger::application::balance::BalanceApi;
use occledger::domain::account::{Balance, Version};
use occledger::domain::outcome::{ErrorCode, Outcome};
use occledger::domain::transaction::{EntryStatus, MutationKind};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::task::JoinSet;

mod common;
use common::{ACCOUNT, contention_policy, controller, service_with_account};

async fn run_concurrently(
    service: &Arc<occledger::application::balance::BalanceService>,
    ops: Vec<(MutationKind, Decimal)>,
) -> Vec<Outcome> {
    let controller = controller(service);
    let policy = Arc::new(contention_policy());
    let mut set = JoinSet::new();
    for (kind, amount) in ops {
        let controller = controller.clone();
        let policy = policy.clone();
        set.spawn(async move {
            controller
                .perform_with_retry(None, ACCOUNT, amount, kind, &policy)
                .await
                .unwrap()
        });
    }
    let mut outcomes = Vec::new();
    while let Some(outcome) = set.join_next().await {
        outcomes.push(outcome.unwrap());
    }
    outcomes
}

fn count(outcomes: &[Outcome], code: Option<ErrorCode>) -> usize {
    outcomes.iter().filter(|o| o.error_code() == code).count()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_lose_no_updates() {
    let service = service_with_account(None, dec!(0)).await;

    let outcomes = run_concurrently(&service, vec![(MutationKind::Deposit, dec!(10)); 20]).await;

    assert_eq!(count(&outcomes, None), 20);
    let snapshot = service.account_snapshot(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(snapshot.balance, Balance::new(dec!(200)));
    assert_eq!(snapshot.version, Version(21));

    let entries = service.store().entries_for_account(ACCOUNT).await.unwrap();
    assert_eq!(entries.len(), 20);
    assert!(entries.iter().all(|e| e.status == EntryStatus::Completed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_cannot_overdraw() {
    let service = service_with_account(None, dec!(50)).await;

    let outcomes = run_concurrently(&service, vec![(MutationKind::Withdraw, dec!(10)); 20]).await;

    assert_eq!(count(&outcomes, None), 5);
    assert_eq!(count(&outcomes, Some(ErrorCode::InsufficientFunds)), 15);

    let snapshot = service.account_snapshot(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(snapshot.balance, Balance::ZERO);
    assert_eq!(snapshot.version, Version(6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overdraft_bound_with_remainder() {
    // B0 = 47, A = 10: floor(47 / 10) = 4 succeed, 7 is left over
    let service = service_with_account(None, dec!(47)).await;

    let outcomes = run_concurrently(&service, vec![(MutationKind::Withdraw, dec!(10)); 12]).await;

    assert_eq!(count(&outcomes, None), 4);
    assert_eq!(count(&outcomes, Some(ErrorCode::InsufficientFunds)), 8);
    let snapshot = service.account_snapshot(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(snapshot.balance, Balance::new(dec!(7)));
    assert_eq!(snapshot.version, Version(5));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_traffic_balances_out() {
    let service = service_with_account(None, dec!(30)).await;

    let mut ops = vec![(MutationKind::Deposit, dec!(5)); 10];
    ops.extend(vec![(MutationKind::Withdraw, dec!(8)); 10]);
    let outcomes = run_concurrently(&service, ops).await;

    let applied_withdrawals = outcomes
        .iter()
        .filter(|o| o.is_success())
        .count()
        - 10;
    assert_eq!(count(&outcomes, None), 10 + applied_withdrawals);
    assert_eq!(
        count(&outcomes, Some(ErrorCode::InsufficientFunds)),
        10 - applied_withdrawals
    );

    let expected = dec!(30) + dec!(50) - Decimal::from(applied_withdrawals as u64) * dec!(8);
    let snapshot = service.account_snapshot(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(snapshot.balance, Balance::new(expected));
    assert!(!snapshot.balance.is_negative());
    assert_eq!(snapshot.version, Version(1 + 10 + applied_withdrawals as u64));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_trail_is_a_version_chain() {
    let service = service_with_account(None, dec!(20)).await;

    let mut ops = vec![(MutationKind::Deposit, dec!(1)); 8];
    ops.extend(vec![(MutationKind::Withdraw, dec!(3)); 8]);
    run_concurrently(&service, ops).await;

    let mut completed: Vec<_> = service
        .store()
        .entries_for_account(ACCOUNT)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.status == EntryStatus::Completed)
        .collect();
    completed.sort_by_key(|e| e.version_at);

    // every applied mutation moved the version by exactly one and started
    // from the balance the previous one left behind
    let mut balance = Balance::new(dec!(20));
    for (i, entry) in completed.iter().enumerate() {
        assert_eq!(entry.version_at, Version(i as u64 + 2));
        assert_eq!(entry.balance_before, balance);
        assert!(!entry.balance_after.is_negative());
        balance = entry.balance_after;
    }
    let snapshot = service.account_snapshot(ACCOUNT).await.unwrap().unwrap();
    assert_eq!(snapshot.balance, balance);
}
