use tracing::debug;

use crate::{CommitOutcome, CounterKey, CounterWrite, ScoreStore, StoreError, Versioned};
use score_types::{EventId, ScoreEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The update could not be represented; nothing was written.
    #[error("counter update out of range (current {current:?})")]
    OutOfRange { current: Option<i64> },
}

/// What a counter transaction reports back: whether it committed and the
/// last snapshot it saw (the committed one on success).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResult {
    pub committed: bool,
    pub snapshot: Option<Versioned>,
    pub event: Option<ScoreEvent>,
    pub attempts: u32,
}

/// Optimistic read-modify-write on one versioned counter.
///
/// Reads the counter, computes the new value with `update` (which receives
/// `None` when the counter does not exist yet), and attempts a conditional
/// commit. `update` returning `None` aborts with `OutOfRange` before anything
/// is written. A version conflict re-reads and retries, up to `max_attempts`.
/// `append_event` (id and value) is written in the same commit as the counter.
pub async fn run_counter_transaction<F>(
    store: &dyn ScoreStore,
    key: CounterKey,
    max_attempts: u32,
    append_event: Option<(EventId, i64)>,
    mut update: F,
) -> Result<TransactionResult, TransactionError>
where
    F: FnMut(Option<i64>) -> Option<i64> + Send,
{
    let mut last_seen = None;

    for attempt in 1..=max_attempts.max(1) {
        let current = store.read_counter(key).await?;
        last_seen = current;

        let current_value = current.map(|c| c.value);
        let new_value = update(current_value).ok_or(TransactionError::OutOfRange {
            current: current_value,
        })?;

        let write = CounterWrite {
            key,
            expected_version: current.map(|c| c.version),
            new_value,
            append_event,
        };

        match store.commit_counter(write).await? {
            CommitOutcome::Committed { snapshot, event } => {
                return Ok(TransactionResult {
                    committed: true,
                    snapshot: Some(snapshot),
                    event,
                    attempts: attempt,
                });
            }
            CommitOutcome::Conflict => {
                debug!("Counter {:?} changed underneath attempt {}, retrying", key, attempt);
            }
        }
    }

    Ok(TransactionResult {
        committed: false,
        snapshot: last_seen,
        event: None,
        attempts: max_attempts.max(1),
    })
}
