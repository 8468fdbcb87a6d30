use async_trait::async_trait;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{monthly_points, prelude::*, score_events, users};
use score_core::{
    Clock, CommitOutcome, CounterKey, CounterWrite, ScoreStore, StoreError, StoredScoreEvent,
    SystemClock, Versioned,
};
use score_types::{EventId, MonthKey, ScoreEvent, UserId, UserScoreState};

/// `ScoreStore` backed by a SQL database. Counter commits run inside a
/// database transaction and only apply when the row's version is unchanged.
pub struct ScoreRepository {
    db: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

fn db_err(e: DbErr) -> StoreError {
    StoreError::Unavailable(format!("database error: {}", e))
}

fn now() -> sea_orm::prelude::DateTimeWithTimeZone {
    chrono::Utc::now().into()
}

impl ScoreRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Insert an event row as-is, without touching the score. Used to import
    /// logs from older clients.
    pub async fn insert_raw_event(
        &self,
        user_id: UserId,
        event: StoredScoreEvent,
    ) -> Result<(), StoreError> {
        let row = score_events::ActiveModel {
            id: ActiveValue::Set(event.id),
            user_id: ActiveValue::Set(user_id),
            value: ActiveValue::Set(event.value),
            timestamp: ActiveValue::Set(event.timestamp),
        };
        ScoreEvents::insert(row)
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    fn to_state(model: users::Model, monthly: &[monthly_points::Model]) -> UserScoreState {
        UserScoreState {
            user_id: model.id,
            current_score: model.score,
            nickname: model.nickname,
            monthly_points: monthly
                .iter()
                .map(|row| (row.period.clone(), row.point))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Conditional update of one counter plus the optional event insert,
    /// executed on an open transaction.
    async fn apply_write(
        txn: &DatabaseTransaction,
        write: CounterWrite,
        server_timestamp: i64,
    ) -> Result<CommitOutcome, DbErr> {
        let next_version = write.expected_version.unwrap_or(0) + 1;

        let applied = match write.key {
            CounterKey::Score(user_id) => {
                Self::write_score(txn, user_id, write.expected_version, write.new_value).await?
            }
            CounterKey::MonthlyPoints(user_id, period) => {
                Self::write_monthly(txn, user_id, period, write.expected_version, write.new_value)
                    .await?
            }
        };
        if !applied {
            return Ok(CommitOutcome::Conflict);
        }

        let event = match write.append_event {
            Some((id, value)) => {
                let row = score_events::ActiveModel {
                    id: ActiveValue::Set(id),
                    user_id: ActiveValue::Set(write.key.user_id()),
                    value: ActiveValue::Set(Some(value)),
                    timestamp: ActiveValue::Set(Some(server_timestamp)),
                };
                ScoreEvents::insert(row).exec_without_returning(txn).await?;
                Some(ScoreEvent {
                    id,
                    value,
                    server_timestamp,
                })
            }
            None => None,
        };

        Ok(CommitOutcome::Committed {
            snapshot: Versioned {
                value: write.new_value,
                version: next_version,
            },
            event,
        })
    }

    async fn write_score(
        txn: &DatabaseTransaction,
        user_id: UserId,
        expected_version: Option<u64>,
        new_value: i64,
    ) -> Result<bool, DbErr> {
        match expected_version {
            None => {
                let row = users::ActiveModel {
                    id: ActiveValue::Set(user_id),
                    nickname: ActiveValue::Set(String::new()),
                    score: ActiveValue::Set(new_value),
                    version: ActiveValue::Set(1),
                    created_at: ActiveValue::Set(now()),
                    updated_at: ActiveValue::Set(now()),
                };
                let inserted = Users::insert(row)
                    .on_conflict(OnConflict::column(users::Column::Id).do_nothing().to_owned())
                    .exec_without_returning(txn)
                    .await?;
                Ok(inserted == 1)
            }
            Some(version) => {
                let result = Users::update_many()
                    .col_expr(users::Column::Score, Expr::value(new_value))
                    .col_expr(users::Column::Version, Expr::value(version as i64 + 1))
                    .col_expr(users::Column::UpdatedAt, Expr::value(now()))
                    .filter(users::Column::Id.eq(user_id))
                    .filter(users::Column::Version.eq(version as i64))
                    .exec(txn)
                    .await?;
                Ok(result.rows_affected == 1)
            }
        }
    }

    async fn write_monthly(
        txn: &DatabaseTransaction,
        user_id: UserId,
        period: MonthKey,
        expected_version: Option<u64>,
        new_value: i64,
    ) -> Result<bool, DbErr> {
        match expected_version {
            None => {
                let row = monthly_points::ActiveModel {
                    user_id: ActiveValue::Set(user_id),
                    period: ActiveValue::Set(period.to_string()),
                    point: ActiveValue::Set(new_value),
                    version: ActiveValue::Set(1),
                };
                let inserted = MonthlyPoints::insert(row)
                    .on_conflict(
                        OnConflict::columns([
                            monthly_points::Column::UserId,
                            monthly_points::Column::Period,
                        ])
                        .do_nothing()
                        .to_owned(),
                    )
                    .exec_without_returning(txn)
                    .await?;
                Ok(inserted == 1)
            }
            Some(version) => {
                let result = MonthlyPoints::update_many()
                    .col_expr(monthly_points::Column::Point, Expr::value(new_value))
                    .col_expr(monthly_points::Column::Version, Expr::value(version as i64 + 1))
                    .filter(monthly_points::Column::UserId.eq(user_id))
                    .filter(monthly_points::Column::Period.eq(period.to_string()))
                    .filter(monthly_points::Column::Version.eq(version as i64))
                    .exec(txn)
                    .await?;
                Ok(result.rows_affected == 1)
            }
        }
    }
}

#[async_trait]
impl ScoreStore for ScoreRepository {
    fn allocate_event_id(&self) -> EventId {
        Uuid::new_v4()
    }

    async fn create_user(
        &self,
        user_id: UserId,
        nickname: &str,
    ) -> Result<UserScoreState, StoreError> {
        let row = users::ActiveModel {
            id: ActiveValue::Set(user_id),
            nickname: ActiveValue::Set(nickname.to_string()),
            score: ActiveValue::Set(0),
            version: ActiveValue::Set(1),
            created_at: ActiveValue::Set(now()),
            updated_at: ActiveValue::Set(now()),
        };

        let inserted = Users::insert(row)
            .on_conflict(OnConflict::column(users::Column::Id).do_nothing().to_owned())
            .exec_without_returning(&self.db)
            .await
            .map_err(db_err)?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists);
        }

        Ok(UserScoreState::new(user_id, nickname))
    }

    async fn load_user(&self, user_id: UserId) -> Result<Option<UserScoreState>, StoreError> {
        let Some(model) = Users::find_by_id(user_id)
            .one(&self.db)
            .await
            .map_err(db_err)?
        else {
            return Ok(None);
        };

        let monthly = MonthlyPoints::find()
            .filter(monthly_points::Column::UserId.eq(user_id))
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(Some(Self::to_state(model, &monthly)))
    }

    async fn list_users(&self) -> Result<Vec<UserScoreState>, StoreError> {
        let models = Users::find()
            .order_by_asc(users::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        let mut monthly: HashMap<UserId, Vec<monthly_points::Model>> = HashMap::new();
        for row in MonthlyPoints::find().all(&self.db).await.map_err(db_err)? {
            monthly.entry(row.user_id).or_default().push(row);
        }

        Ok(models
            .into_iter()
            .map(|model| {
                let rows = monthly.remove(&model.id).unwrap_or_default();
                Self::to_state(model, &rows)
            })
            .collect())
    }

    async fn read_counter(&self, key: CounterKey) -> Result<Option<Versioned>, StoreError> {
        let counter = match key {
            CounterKey::Score(user_id) => Users::find_by_id(user_id)
                .one(&self.db)
                .await
                .map_err(db_err)?
                .map(|m| Versioned {
                    value: m.score,
                    version: m.version as u64,
                }),
            CounterKey::MonthlyPoints(user_id, period) => {
                MonthlyPoints::find_by_id((user_id, period.to_string()))
                    .one(&self.db)
                    .await
                    .map_err(db_err)?
                    .map(|m| Versioned {
                        value: m.point,
                        version: m.version as u64,
                    })
            }
        };
        Ok(counter)
    }

    async fn commit_counter(&self, write: CounterWrite) -> Result<CommitOutcome, StoreError> {
        let server_timestamp = self.clock.now_millis();

        self.db
            .transaction::<_, CommitOutcome, DbErr>(move |txn| {
                Box::pin(async move { Self::apply_write(txn, write, server_timestamp).await })
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("transaction failed: {}", e)))
    }

    async fn set_score(&self, user_id: UserId, score: i64) -> Result<(), StoreError> {
        self.db
            .transaction::<_, (), DbErr>(move |txn| {
                Box::pin(async move {
                    let updated = Users::update_many()
                        .col_expr(users::Column::Score, Expr::value(score))
                        .col_expr(
                            users::Column::Version,
                            Expr::col(users::Column::Version).add(1),
                        )
                        .col_expr(users::Column::UpdatedAt, Expr::value(now()))
                        .filter(users::Column::Id.eq(user_id))
                        .exec(txn)
                        .await?;

                    if updated.rows_affected == 0 {
                        let row = users::ActiveModel {
                            id: ActiveValue::Set(user_id),
                            nickname: ActiveValue::Set(String::new()),
                            score: ActiveValue::Set(score),
                            version: ActiveValue::Set(1),
                            created_at: ActiveValue::Set(now()),
                            updated_at: ActiveValue::Set(now()),
                        };
                        Users::insert(row).exec_without_returning(txn).await?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("transaction failed: {}", e)))
    }

    async fn fetch_events(&self, user_id: UserId) -> Result<Vec<StoredScoreEvent>, StoreError> {
        let rows = ScoreEvents::find()
            .filter(score_events::Column::UserId.eq(user_id))
            .order_by_asc(score_events::Column::Timestamp)
            .all(&self.db)
            .await
            .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|row| StoredScoreEvent {
                id: row.id,
                value: row.value,
                timestamp: row.timestamp,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::connect_to_memory_database;
    use migration::{Migrator, MigratorTrait};
    use score_core::{
        AggregatorConfig, ManualClock, MemoryCache, ScoreAggregator, run_counter_transaction,
        total_sum,
    };
    use score_types::{Identity, RankingWindow};
    use std::time::Duration;

    const START_MILLIS: i64 = 1_700_000_000_000;

    async fn setup_test_db() -> (Arc<ScoreRepository>, Arc<ManualClock>) {
        let db = connect_to_memory_database().await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        (Arc::new(ScoreRepository::with_clock(db, clock.clone())), clock)
    }

    fn aggregator_for(repo: Arc<ScoreRepository>, clock: Arc<ManualClock>) -> ScoreAggregator {
        ScoreAggregator::new(
            repo,
            Arc::new(MemoryCache::new()),
            clock,
            AggregatorConfig {
                max_transaction_attempts: 200,
                ..AggregatorConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_and_load_user() {
        let (repo, _) = setup_test_db().await;
        let user_id = Uuid::new_v4();

        let created = repo.create_user(user_id, "Bramble").await.unwrap();
        assert_eq!(created.current_score, 0);

        let loaded = repo.load_user(user_id).await.unwrap().unwrap();
        assert_eq!(loaded.nickname, "Bramble");
        assert_eq!(loaded.current_score, 0);

        let duplicate = repo.create_user(user_id, "Bramble").await;
        assert_eq!(duplicate.unwrap_err(), StoreError::AlreadyExists);

        assert!(repo.load_user(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let (repo, _) = setup_test_db().await;
        let user_id = Uuid::new_v4();
        repo.create_user(user_id, "Alder").await.unwrap();

        let first = repo
            .commit_counter(CounterWrite {
                key: CounterKey::Score(user_id),
                expected_version: Some(1),
                new_value: 5,
                append_event: Some((Uuid::new_v4(), 5)),
            })
            .await
            .unwrap();
        assert!(matches!(first, CommitOutcome::Committed { snapshot, .. } if snapshot.version == 2));

        let stale = repo
            .commit_counter(CounterWrite {
                key: CounterKey::Score(user_id),
                expected_version: Some(1),
                new_value: 99,
                append_event: Some((Uuid::new_v4(), 94)),
            })
            .await
            .unwrap();
        assert_eq!(stale, CommitOutcome::Conflict);

        let counter = repo.read_counter(CounterKey::Score(user_id)).await.unwrap().unwrap();
        assert_eq!(counter.value, 5);
        assert_eq!(counter.version, 2);
        assert_eq!(repo.fetch_events(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_creates_missing_counter() {
        let (repo, clock) = setup_test_db().await;
        let user_id = Uuid::new_v4();
        let event_id = repo.allocate_event_id();

        let result = run_counter_transaction(
            repo.as_ref(),
            CounterKey::Score(user_id),
            3,
            Some((event_id, 8)),
            |current| current.unwrap_or(0).checked_add(8),
        )
        .await
        .unwrap();
        assert!(result.committed);

        let events = repo.fetch_events(user_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event_id);
        assert_eq!(events[0].value, Some(8));
        assert_eq!(events[0].timestamp, Some(clock.now_millis()));
    }

    #[tokio::test]
    async fn test_monthly_points_round_trip() {
        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock);
        let user_id = Uuid::new_v4();
        let identity = Identity::authenticated(user_id);
        let period: MonthKey = "2024-05".parse().unwrap();

        aggregator.register_user(&identity, "Hazel").await.unwrap();
        aggregator.add_monthly_points(&identity, period, 30).await.unwrap();
        let total = aggregator.add_monthly_points(&identity, period, 12).await.unwrap();
        assert_eq!(total, 42);

        let state = repo.load_user(user_id).await.unwrap().unwrap();
        assert_eq!(state.monthly_points.get("2024-05"), Some(&42));
        assert_eq!(state.current_score, 0);
    }

    #[tokio::test]
    async fn test_monthly_points_alone_do_not_list_user() {
        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock);
        let user_id = Uuid::new_v4();
        let identity = Identity::authenticated(user_id);
        let period: MonthKey = "2024-05".parse().unwrap();

        aggregator.add_monthly_points(&identity, period, 7).await.unwrap();
        assert!(repo.load_user(user_id).await.unwrap().is_none());
        assert!(repo.list_users().await.unwrap().is_empty());

        aggregator.register_user(&identity, "Wren").await.unwrap();
        let users = repo.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].monthly_points.get("2024-05"), Some(&7));
    }

    #[tokio::test]
    async fn test_set_score_overwrites_without_event() {
        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock);
        let user_id = Uuid::new_v4();
        let identity = Identity::authenticated(user_id);

        aggregator.add_score(&identity, 4).await.unwrap();
        aggregator.set_absolute_score(user_id, 0).await.unwrap();
        let receipt = aggregator.add_score(&identity, 1).await.unwrap();

        assert_eq!(receipt.new_score, 1);
        let events = repo.fetch_events(user_id).await.unwrap();
        assert_eq!(total_sum(&events), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_against_sqlite() {
        const WRITERS: usize = 50;

        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock);
        let user_id = Uuid::new_v4();
        let identity = Identity::authenticated(user_id);
        aggregator.register_user(&identity, "Rowan").await.unwrap();

        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let aggregator = aggregator.clone();
                let identity = identity.clone();
                tokio::spawn(async move { aggregator.add_score(&identity, 1).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let counter = repo.read_counter(CounterKey::Score(user_id)).await.unwrap().unwrap();
        let events = repo.fetch_events(user_id).await.unwrap();
        assert_eq!(counter.value, WRITERS as i64);
        assert_eq!(events.len(), WRITERS);
        assert_eq!(total_sum(&events), counter.value);
    }

    #[tokio::test]
    async fn test_windowed_leaderboard_from_sql() {
        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock.clone());

        let early = Identity::authenticated(Uuid::new_v4());
        let late = Identity::authenticated(Uuid::new_v4());
        aggregator.register_user(&early, "Early").await.unwrap();
        aggregator.register_user(&late, "Late").await.unwrap();

        aggregator.add_score(&early, 20).await.unwrap();
        clock.advance(Duration::from_secs(3 * 24 * 3600));
        aggregator.add_score(&late, 5).await.unwrap();

        let weekly = aggregator.leaderboard(RankingWindow::Weekly, None).await.unwrap();
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].nickname, "Early");

        let daily = aggregator.leaderboard(RankingWindow::Daily, None).await.unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].nickname, "Late");
        assert_eq!(daily[0].score, 5);
    }

    #[tokio::test]
    async fn test_raw_events_with_missing_fields() {
        let (repo, clock) = setup_test_db().await;
        let aggregator = aggregator_for(repo.clone(), clock);
        let user_id = Uuid::new_v4();

        repo.insert_raw_event(
            user_id,
            StoredScoreEvent {
                id: Uuid::new_v4(),
                value: None,
                timestamp: Some(START_MILLIS),
            },
        )
        .await
        .unwrap();
        repo.insert_raw_event(
            user_id,
            StoredScoreEvent {
                id: Uuid::new_v4(),
                value: Some(3),
                timestamp: Some(START_MILLIS),
            },
        )
        .await
        .unwrap();

        let daily = aggregator
            .get_windowed_score(&user_id, RankingWindow::Daily, None)
            .await
            .unwrap();
        assert_eq!(daily, 3);
    }
}
