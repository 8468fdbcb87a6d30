use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{EventId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, thiserror::Error)]
#[ts(export)]
pub enum ScoreError {
    #[error("No authenticated user")]
    Unauthenticated,
    #[error("Score store unavailable: {reason}")]
    StoreUnavailable {
        reason: String,
        /// Last value seen locally, if any. Callers may display it as stale.
        fallback: Option<i64>,
    },
    #[error("Transaction aborted after {attempts} attempts")]
    TransactionAborted { attempts: u32 },
    #[error("Score event {event_id} is missing field '{field}'")]
    MalformedRecord { event_id: EventId, field: String },
    #[error("User {user_id} already exists")]
    UserAlreadyExists { user_id: UserId },
    #[error("Invalid period '{period}', expected YYYY-MM")]
    InvalidPeriod { period: String },
    #[error("Adding {delta} to {current} overflows the score range")]
    ScoreOverflow { current: i64, delta: i64 },
}

impl ScoreError {
    pub fn store_unavailable(reason: impl Into<String>, fallback: Option<i64>) -> Self {
        ScoreError::StoreUnavailable {
            reason: reason.into(),
            fallback,
        }
    }

    /// The stale value a failed read can still offer, if any.
    pub fn fallback(&self) -> Option<i64> {
        match self {
            ScoreError::StoreUnavailable { fallback, .. } => *fallback,
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScoreError::TransactionAborted { .. } | ScoreError::StoreUnavailable { .. }
        )
    }
}
