use super::account::{Balance, Version};
use crate::error::LedgerError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of reasons a balance change did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AccountNotFound,
    Unauthorized,
    VersionConflict,
    InsufficientFunds,
    InvalidType,
    InvalidAmount,
    NetworkError,
    MaxRetriesExceeded,
    UnknownError,
}

impl ErrorCode {
    /// Only version conflicts and transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::VersionConflict | ErrorCode::NetworkError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AccountNotFound => "ACCOUNT_NOT_FOUND",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::VersionConflict => "VERSION_CONFLICT",
            ErrorCode::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorCode::InvalidType => "INVALID_TYPE",
            ErrorCode::InvalidAmount => "INVALID_AMOUNT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one balance change, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied {
        balance: Balance,
        version: Version,
        /// Set when the result was served from the idempotency cache.
        replayed: bool,
    },
    Rejected {
        code: ErrorCode,
        /// Last known state of the account, when there is one.
        balance: Option<Balance>,
        version: Option<Version>,
        message: String,
    },
}

impl Outcome {
    pub fn applied(balance: Balance, version: Version) -> Self {
        Outcome::Applied {
            balance,
            version,
            replayed: false,
        }
    }

    pub fn replayed(balance: Balance, version: Version) -> Self {
        Outcome::Applied {
            balance,
            version,
            replayed: true,
        }
    }

    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        Outcome::Rejected {
            code,
            balance: None,
            version: None,
            message: message.into(),
        }
    }

    pub fn rejected_at(
        code: ErrorCode,
        balance: Balance,
        version: Version,
        message: impl Into<String>,
    ) -> Self {
        Outcome::Rejected {
            code,
            balance: Some(balance),
            version: Some(version),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Outcome::Applied { .. } => None,
            Outcome::Rejected { code, .. } => Some(*code),
        }
    }

    pub fn balance(&self) -> Option<Balance> {
        match self {
            Outcome::Applied { balance, .. } => Some(*balance),
            Outcome::Rejected { balance, .. } => *balance,
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            Outcome::Applied { version, .. } => Some(*version),
            Outcome::Rejected { version, .. } => *version,
        }
    }
}

/// Wire shape of an `applyBalanceChange` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChangeResponse {
    pub success: bool,
    pub new_balance: Option<Decimal>,
    pub new_version: Option<u64>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

impl From<&Outcome> for BalanceChangeResponse {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Applied {
                balance, version, ..
            } => Self {
                success: true,
                new_balance: Some(balance.0),
                new_version: Some(version.0),
                error_code: None,
                error_message: None,
            },
            Outcome::Rejected {
                code,
                balance,
                version,
                message,
            } => Self {
                success: false,
                new_balance: balance.map(|b| b.0),
                new_version: version.map(|v| v.0),
                error_code: Some(*code),
                error_message: Some(message.clone()),
            },
        }
    }
}

impl From<&LedgerError> for BalanceChangeResponse {
    fn from(err: &LedgerError) -> Self {
        let code = if err.is_transient() {
            ErrorCode::NetworkError
        } else {
            ErrorCode::UnknownError
        };
        Self {
            success: false,
            new_balance: None,
            new_version: None,
            error_code: Some(code),
            error_message: Some(err.to_string()),
        }
    }
}
