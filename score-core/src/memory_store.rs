use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Clock, CommitOutcome, CounterKey, CounterWrite, ScoreStore, StoreError, StoredScoreEvent,
    SystemClock, Versioned,
};
use score_types::{EventId, MonthKey, ScoreEvent, UserId, UserScoreState};

#[derive(Debug, Default)]
struct UserRecord {
    nickname: String,
    score: Option<Versioned>,
    events: Vec<StoredScoreEvent>,
    monthly_points: HashMap<MonthKey, Versioned>,
}

impl UserRecord {
    fn to_state(&self, user_id: UserId) -> UserScoreState {
        UserScoreState {
            user_id,
            current_score: self.score.map(|s| s.value).unwrap_or(0),
            nickname: self.nickname.clone(),
            monthly_points: self
                .monthly_points
                .iter()
                .map(|(period, points)| (period.to_string(), points.value))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn counter(&self, key: &CounterKey) -> Option<Versioned> {
        match key {
            CounterKey::Score(_) => self.score,
            CounterKey::MonthlyPoints(_, period) => self.monthly_points.get(period).copied(),
        }
    }
}

/// Process-local store. Every commit happens under one write lock, which makes
/// the version check and the event append a single atomic step.
pub struct MemoryScoreStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write an event record directly, bypassing the counter. Lets callers
    /// import legacy logs, including records with missing fields.
    pub async fn insert_raw_event(&self, user_id: UserId, event: StoredScoreEvent) {
        let mut users = self.users.write().await;
        users.entry(user_id).or_default().events.push(event);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    fn allocate_event_id(&self) -> EventId {
        Uuid::new_v4()
    }

    async fn create_user(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<UserScoreState, StoreError> {
        self.check_available()?;
        let mut users = self.users.write().await;
        let record = users.entry(user_id).or_default();
        if record.score.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        record.nickname = nickname.to_string();
        record.score = Some(Versioned {
            value: 0,
            version: 1,
        });
        Ok(record.to_state(user_id))
    }

    async fn load_user(&self, user_id: UserId) -> Result<Option<UserScoreState>, StoreError> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .filter(|record| record.score.is_some())
            .map(|record| record.to_state(user_id)))
    }

    async fn list_users(&self) -> Result<Vec<UserScoreState>, StoreError> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .iter()
            .filter(|(_, record)| record.score.is_some())
            .map(|(user_id, record)| record.to_state(*user_id))
            .collect())
    }

    async fn read_counter(&self, key: CounterKey) -> Result<Option<Versioned>, StoreError> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .get(&key.user_id())
            .and_then(|record| record.counter(&key)))
    }

    async fn commit_counter(&self, write: CounterWrite) -> Result<CommitOutcome, StoreError> {
        self.check_available()?;
        let mut users = self.users.write().await;
        let record = users.entry(write.key.user_id()).or_default();

        let current_version = record.counter(&write.key).map(|c| c.version);
        if current_version != write.expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        let snapshot = Versioned {
            value: write.new_value,
            version: current_version.unwrap_or(0) + 1,
        };
        match write.key {
            CounterKey::Score(_) => record.score = Some(snapshot),
            CounterKey::MonthlyPoints(_, period) => {
                record.monthly_points.insert(period, snapshot);
            }
        }

        let event = write.append_event.map(|(id, value)| ScoreEvent {
            id,
            value,
            server_timestamp: self.clock.now_millis(),
        });
        if let Some(event) = &event {
            record.events.push(event.clone().into());
        }

        Ok(CommitOutcome::Committed { snapshot, event })
    }

    async fn set_score(&self, user_id: UserId, score: i64) -> Result<(), StoreError> {
        self.check_available()?;
        let mut users = self.users.write().await;
        let record = users.entry(user_id).or_default();
        let version = record.score.map(|s| s.version).unwrap_or(0) + 1;
        record.score = Some(Versioned {
            value: score,
            version,
        });
        Ok(())
    }

    async fn fetch_events(&self, user_id: UserId) -> Result<Vec<StoredScoreEvent>, StoreError> {
        self.check_available()?;
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .map(|record| record.events.clone())
            .unwrap_or_default())
    }
}
