//! Boundary to the authoritative score store.
//!
//! The store owns three things per user: the running score counter, the
//! append-only log of score events, and the per-month point counters. Every
//! counter carries a version so writers can do optimistic read-modify-write.

use async_trait::async_trait;
use score_types::{EventId, MonthKey, ScoreEvent, UserId, UserScoreState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("record already exists")]
    AlreadyExists,
}

/// Identifies one versioned counter in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKey {
    /// `users/{user_id}/score`
    Score(UserId),
    /// `users/{user_id}/monthly_points/{period}/point`
    MonthlyPoints(UserId, MonthKey),
}

impl CounterKey {
    pub fn user_id(&self) -> UserId {
        match self {
            CounterKey::Score(user_id) | CounterKey::MonthlyPoints(user_id, _) => *user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Versioned {
    pub value: i64,
    pub version: u64,
}

/// A score event exactly as the store holds it. Fields may be missing in
/// records written by older clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredScoreEvent {
    pub id: EventId,
    pub value: Option<i64>,
    pub timestamp: Option<i64>,
}

impl From<ScoreEvent> for StoredScoreEvent {
    fn from(event: ScoreEvent) -> Self {
        Self {
            id: event.id,
            value: Some(event.value),
            timestamp: Some(event.server_timestamp),
        }
    }
}

/// One conditional write. `expected_version == None` means the counter must
/// not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterWrite {
    pub key: CounterKey,
    pub expected_version: Option<u64>,
    pub new_value: i64,
    /// Event to append to the key's user log in the same atomic unit. The
    /// store stamps it with its own clock; the value is the delta applied.
    pub append_event: Option<(EventId, i64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        snapshot: Versioned,
        event: Option<ScoreEvent>,
    },
    /// Version mismatch. Nothing was written.
    Conflict,
}

#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Allocate a fresh, unique event key.
    fn allocate_event_id(&self) -> EventId;

    async fn create_user(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<UserScoreState, StoreError>;

    /// A user exists once it has a score counter, either from registration
    /// or a first score commit. Monthly points alone do not create a user.
    async fn load_user(&self, user_id: UserId) -> Result<Option<UserScoreState>, StoreError>;

    /// Every user with a score counter, in the sense of `load_user`.
    async fn list_users(&self) -> Result<Vec<UserScoreState>, StoreError>;

    async fn read_counter(&self, key: CounterKey) -> Result<Option<Versioned>, StoreError>;

    /// Apply `write` atomically: either the counter update and the optional
    /// event append both land, or neither does.
    async fn commit_counter(&self, write: CounterWrite) -> Result<CommitOutcome, StoreError>;

    /// Unconditional overwrite of the score counter. Appends no event.
    async fn set_score(&self, user_id: UserId, score: i64) -> Result<(), StoreError>;

    async fn fetch_events(&self, user_id: UserId) -> Result<Vec<StoredScoreEvent>, StoreError>;
}
