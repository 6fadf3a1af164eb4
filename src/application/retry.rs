use super::balance::{AccountSnapshot, BalanceApi, BalanceChangeRequest};
use crate::domain::account::{AccountId, OwnerId};
use crate::domain::outcome::{ErrorCode, Outcome};
use crate::domain::transaction::{IdempotencyKey, MutationKind};
use crate::error::Result;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Upper bound for any single backoff delay: one hour.
pub const MAX_DELAY_CAP_MS: u64 = 60 * 60 * 1_000;

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed for one logical operation.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Each delay is scaled by a random factor in `1 ± jitter_ratio`.
    pub jitter_ratio: f64,
    pub growth_factor: f64,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ratio: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_ratio,
            growth_factor: 2.0,
        }
        .clamped()
    }

    pub fn with_growth_factor(mut self, growth_factor: f64) -> Self {
        self.growth_factor = growth_factor;
        self.clamped()
    }

    /// Brings hand-edited or deserialized values back into a usable range.
    pub fn clamped(self) -> Self {
        let base_delay_ms = self.base_delay_ms.clamp(1, MAX_DELAY_CAP_MS);
        let growth_factor = if self.growth_factor.is_finite() {
            self.growth_factor.max(1.0)
        } else {
            2.0
        };
        let jitter_ratio = if self.jitter_ratio.is_finite() {
            self.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            max_retries: self.max_retries.max(1),
            base_delay_ms,
            max_delay_ms: self.max_delay_ms.clamp(base_delay_ms, MAX_DELAY_CAP_MS),
            jitter_ratio,
            growth_factor,
        }
    }

    /// `min(base * growth^attempt, max)` before jitter.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exp = self.growth_factor.powi(attempt.min(i32::MAX as u32) as i32);
        let raw = self.base_delay_ms as f64 * exp;
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Delay to wait after the `attempt`-th failure (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if self.jitter_ratio <= 0.0 {
            return ceiling;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter_ratio..=1.0 + self.jitter_ratio);
        ceiling.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, 50, 2_000, 0.25)
    }
}

/// Drives balance changes to completion against a [`BalanceApi`].
///
/// Conflicts and transient faults are retried with backoff; every other
/// result is handed back as-is. Backoff state lives on the stack of a single
/// call, so one controller can serve any number of concurrent operations.
#[derive(Clone)]
pub struct RetryController {
    api: Arc<dyn BalanceApi>,
}

impl RetryController {
    pub fn new(api: Arc<dyn BalanceApi>) -> Self {
        Self { api }
    }

    /// Runs one logical operation under a freshly generated idempotency key.
    pub async fn perform_with_retry(
        &self,
        caller: Option<&OwnerId>,
        account_id: AccountId,
        amount: Decimal,
        kind: MutationKind,
        policy: &RetryPolicy,
    ) -> Result<Outcome> {
        let key = IdempotencyKey::generate();
        self.perform_with_key(caller, account_id, amount, kind, key, policy)
            .await
    }

    /// Like [`Self::perform_with_retry`], reusing a key the caller already owns,
    /// e.g. one persisted before a crash.
    pub async fn perform_with_key(
        &self,
        caller: Option<&OwnerId>,
        account_id: AccountId,
        amount: Decimal,
        kind: MutationKind,
        key: IdempotencyKey,
        policy: &RetryPolicy,
    ) -> Result<Outcome> {
        let mut last_seen: Option<AccountSnapshot> = None;
        let mut attempt = 0;

        loop {
            match self
                .attempt(caller, account_id, amount, kind, &key, &mut last_seen)
                .await
            {
                Ok(outcome) => match outcome.error_code() {
                    None => {
                        debug!(account = %account_id, attempt, "operation succeeded");
                        return Ok(outcome);
                    }
                    Some(code) if !code.is_retryable() => return Ok(outcome),
                    Some(code) => {
                        debug!(account = %account_id, attempt, %code, "retryable outcome");
                        if let (Some(balance), Some(version)) = (outcome.balance(), outcome.version())
                        {
                            last_seen = Some(AccountSnapshot { balance, version });
                        }
                    }
                },
                Err(err) if err.is_transient() => {
                    warn!(account = %account_id, attempt, error = %err, "transient failure");
                }
                Err(err) => return Err(err),
            }

            attempt += 1;
            if attempt >= policy.max_retries {
                break;
            }
            let delay = policy.next_delay(attempt - 1);
            debug!(account = %account_id, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            sleep(delay).await;
        }

        info!(account = %account_id, attempts = attempt, "giving up after max retries");
        let message = format!("gave up after {attempt} attempts");
        Ok(match last_seen {
            Some(seen) => Outcome::rejected_at(
                ErrorCode::MaxRetriesExceeded,
                seen.balance,
                seen.version,
                message,
            ),
            None => Outcome::rejected(ErrorCode::MaxRetriesExceeded, message),
        })
    }

    async fn attempt(
        &self,
        caller: Option<&OwnerId>,
        account_id: AccountId,
        amount: Decimal,
        kind: MutationKind,
        key: &IdempotencyKey,
        last_seen: &mut Option<AccountSnapshot>,
    ) -> Result<Outcome> {
        let Some(snapshot) = self.api.account_snapshot(account_id).await? else {
            return Ok(Outcome::rejected(
                ErrorCode::AccountNotFound,
                format!("account {account_id} not found"),
            ));
        };
        *last_seen = Some(snapshot);

        // Local shortcut only; the service re-checks against the committed balance.
        if kind == MutationKind::Withdraw && snapshot.balance.0 < amount {
            debug!(account = %account_id, balance = %snapshot.balance, "insufficient funds observed locally");
            return Ok(Outcome::rejected_at(
                ErrorCode::InsufficientFunds,
                snapshot.balance,
                snapshot.version,
                format!("balance {} cannot cover {amount}", snapshot.balance),
            ));
        }

        let request = BalanceChangeRequest {
            account_id,
            amount,
            kind: kind.as_str().to_string(),
            expected_version: snapshot.version.0,
            idempotency_key: Some(key.clone()),
        };
        self.api.apply_balance_change(caller, request).await
    }
}
