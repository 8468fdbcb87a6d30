use futures_util::future::join_all;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    Clock, CounterKey, LocalCache, RankingProjector, ScoreStore, StoreError, TransactionError,
    nickname_cache_key, run_counter_transaction, score_cache_key, window_cache_key, windowed_sum,
};
use score_types::{
    Identity, LeaderboardEntry, LeaderboardTiers, MonthKey, RankingCandidate, RankingWindow,
    ScoreError, ScoreReceipt, UserId, UserScoreState,
};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Commit attempts before a transaction is reported as aborted.
    pub max_transaction_attempts: u32,
    /// Snapshots buffered per live score subscription.
    pub subscription_buffer: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            max_transaction_attempts: 25,
            subscription_buffer: 16,
        }
    }
}

/// A committed change to some user's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub user_id: UserId,
    pub score: i64,
}

/// Maintains authoritative per-user scores and answers windowed queries.
///
/// The score counter is only ever changed through the store's conditional
/// commit, so concurrent writers (two devices on one account, several server
/// replicas) never lose an increment.
#[derive(Clone)]
pub struct ScoreAggregator {
    store: Arc<dyn ScoreStore>,
    cache: Arc<dyn LocalCache>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    updates: broadcast::Sender<ScoreUpdate>,
}

impl ScoreAggregator {
    pub fn new(
        store: Arc<dyn ScoreStore>,
        cache: Arc<dyn LocalCache>,
        clock: Arc<dyn Clock>,
        config: AggregatorConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            store,
            cache,
            clock,
            config,
            updates,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub async fn register_user(
        &self,
        identity: &Identity,
        nickname: &str,
    ) -> Result<UserScoreState, ScoreError> {
        let user_id = identity.require_user()?;

        let state = self
            .store
            .create_user(user_id, nickname)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists => ScoreError::UserAlreadyExists { user_id },
                StoreError::Unavailable(reason) => ScoreError::store_unavailable(reason, None),
            })?;

        self.cache.set_int(&score_cache_key(&user_id), state.current_score);
        self.cache.set_string(&nickname_cache_key(&user_id), &state.nickname);
        info!("Registered user {} as '{}'", user_id, state.nickname);
        Ok(state)
    }

    /// Add `delta` to the caller's score and log it as a score event, as one
    /// atomic unit.
    pub async fn add_score(
        &self,
        identity: &Identity,
        delta: i64,
    ) -> Result<ScoreReceipt, ScoreError> {
        let user_id = identity.require_user()?;
        let cached = self.cached_score(&user_id);
        let event_id = self.store.allocate_event_id();

        let result = run_counter_transaction(
            self.store.as_ref(),
            CounterKey::Score(user_id),
            self.config.max_transaction_attempts,
            Some((event_id, delta)),
            |current| current.or(cached).unwrap_or(0).checked_add(delta),
        )
        .await
        .map_err(|e| self.transaction_failed(e, delta, cached))?;

        if !result.committed {
            warn!(
                "Score transaction for {} aborted after {} attempts",
                user_id, result.attempts
            );
            return Err(ScoreError::TransactionAborted {
                attempts: result.attempts,
            });
        }

        let new_score = result.snapshot.map(|s| s.value).unwrap_or(0);
        self.remember_score(user_id, new_score);
        info!(
            "Added {} to user {} (now {}, event {})",
            delta, user_id, new_score, event_id
        );

        Ok(ScoreReceipt {
            new_score,
            event_id,
        })
    }

    /// Administrative overwrite of a user's score. Appends no event, so the
    /// score stops matching the sum of the event log.
    pub async fn set_absolute_score(
        &self,
        user_id: UserId,
        new_score: i64,
    ) -> Result<(), ScoreError> {
        let cached = self.cached_score(&user_id);
        self.store
            .set_score(user_id, new_score)
            .await
            .map_err(|e| self.unavailable(e, cached))?;

        self.remember_score(user_id, new_score);
        warn!(
            "Score for {} overwritten to {}; event log no longer sums to it",
            user_id, new_score
        );
        Ok(())
    }

    pub fn cached_score(&self, user_id: &UserId) -> Option<i64> {
        self.cache.get_int(&score_cache_key(user_id))
    }

    pub fn cached_nickname(&self, user_id: &UserId) -> Option<String> {
        self.cache.get_string(&nickname_cache_key(user_id))
    }

    /// Read the score straight from the store, refreshing the cache. Falls back
    /// to the cached value when the store cannot be reached.
    pub async fn fetch_current_score(&self, user_id: &UserId) -> Result<i64, ScoreError> {
        let cached = self.cached_score(user_id);
        match self.store.read_counter(CounterKey::Score(*user_id)).await {
            Ok(Some(counter)) => {
                if cached != Some(counter.value) {
                    self.cache.set_int(&score_cache_key(user_id), counter.value);
                }
                Ok(counter.value)
            }
            Ok(None) => Ok(cached.unwrap_or(0)),
            Err(e) => Err(self.unavailable(e, cached)),
        }
    }

    /// Stale-then-fresh stream of the user's score.
    ///
    /// The cached value (if any) is available immediately. The store is then
    /// read and the fresh value delivered when it differs, followed by every
    /// score committed through this aggregator. Must be called from within a
    /// tokio runtime; dropping the subscription stops it.
    pub fn get_current_score(&self, user_id: &UserId) -> ScoreSubscription {
        let user_id = *user_id;
        let (sender, receiver) = mpsc::channel(self.config.subscription_buffer.max(1));
        let mut updates = self.updates.subscribe();

        let cached = self.cached_score(&user_id);
        if let Some(score) = cached {
            let _ = sender.try_send(score);
        }

        let store = self.store.clone();
        let cache = self.cache.clone();
        let task = tokio::spawn(async move {
            let mut last = cached;

            match store.read_counter(CounterKey::Score(user_id)).await {
                Ok(counter) => {
                    let fresh = counter.map(|c| c.value).or(last).unwrap_or(0);
                    if last != Some(fresh) {
                        debug!("Refreshed score for {}: {:?} -> {}", user_id, last, fresh);
                        cache.set_int(&score_cache_key(&user_id), fresh);
                        last = Some(fresh);
                        if sender.send(fresh).await.is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("Could not refresh score for {}: {}", user_id, e),
            }

            loop {
                match updates.recv().await {
                    Ok(update) if update.user_id == user_id => {
                        if last == Some(update.score) {
                            continue;
                        }
                        last = Some(update.score);
                        if sender.send(update.score).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Score subscription for {} skipped {} updates", user_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        ScoreSubscription { receiver, task }
    }

    /// Score within a trailing window ending at `as_of` (defaults to now).
    pub async fn get_windowed_score(
        &self,
        user_id: &UserId,
        window: RankingWindow,
        as_of: Option<i64>,
    ) -> Result<i64, ScoreError> {
        let Some(window_millis) = window.length_millis() else {
            return self.fetch_current_score(user_id).await;
        };

        let as_of = as_of.unwrap_or_else(|| self.clock.now_millis());
        let cache_key = window_cache_key(window, user_id);

        let events = match self.store.fetch_events(*user_id).await {
            Ok(events) => events,
            Err(e) => return Err(self.unavailable(e, self.cache.get_int(&cache_key))),
        };

        let total = windowed_sum(&events, window_millis, as_of).total;
        self.cache.set_int(&cache_key, total);
        Ok(total)
    }

    /// Add points to a calendar-month progress counter and return the new total.
    pub async fn add_monthly_points(
        &self,
        identity: &Identity,
        period: MonthKey,
        points: i64,
    ) -> Result<i64, ScoreError> {
        let user_id = identity.require_user()?;

        let result = run_counter_transaction(
            self.store.as_ref(),
            CounterKey::MonthlyPoints(user_id, period),
            self.config.max_transaction_attempts,
            None,
            |current| current.unwrap_or(0).checked_add(points),
        )
        .await
        .map_err(|e| self.transaction_failed(e, points, None))?;

        if !result.committed {
            return Err(ScoreError::TransactionAborted {
                attempts: result.attempts,
            });
        }

        let total = result.snapshot.map(|s| s.value).unwrap_or(0);
        debug!("Monthly points for {} in {} now {}", user_id, period, total);
        Ok(total)
    }

    pub async fn monthly_points(
        &self,
        user_id: &UserId,
        period: MonthKey,
    ) -> Result<i64, ScoreError> {
        let counter = self
            .store
            .read_counter(CounterKey::MonthlyPoints(*user_id, period))
            .await
            .map_err(|e| self.unavailable(e, None))?;
        Ok(counter.map(|c| c.value).unwrap_or(0))
    }

    /// Ranked leaderboard of every known user for `window`.
    pub async fn leaderboard(
        &self,
        window: RankingWindow,
        as_of: Option<i64>,
    ) -> Result<Vec<LeaderboardEntry>, ScoreError> {
        let users = self
            .store
            .list_users()
            .await
            .map_err(|e| self.unavailable(e, None))?;

        let candidates = match window.length_millis() {
            None => users
                .into_iter()
                .map(|user| RankingCandidate {
                    user_id: user.user_id,
                    nickname: user.nickname,
                    score: user.current_score,
                })
                .collect::<Vec<_>>(),
            Some(window_millis) => {
                let as_of = as_of.unwrap_or_else(|| self.clock.now_millis());
                let logs = join_all(
                    users
                        .iter()
                        .map(|user| self.store.fetch_events(user.user_id)),
                )
                .await;

                let mut candidates = Vec::with_capacity(users.len());
                for (user, events) in users.into_iter().zip(logs) {
                    let events = events.map_err(|e| self.unavailable(e, None))?;
                    candidates.push(RankingCandidate {
                        user_id: user.user_id,
                        nickname: user.nickname,
                        score: windowed_sum(&events, window_millis, as_of).total,
                    });
                }
                candidates
            }
        };

        debug!(
            "Projecting {} leaderboard over {} users",
            window,
            candidates.len()
        );
        Ok(RankingProjector::project(candidates))
    }

    pub async fn leaderboard_tiers(
        &self,
        window: RankingWindow,
        as_of: Option<i64>,
        top_size: usize,
    ) -> Result<LeaderboardTiers, ScoreError> {
        let board = self.leaderboard(window, as_of).await?;
        let (top, rest) = RankingProjector::partition(board, top_size);
        Ok(LeaderboardTiers { window, top, rest })
    }

    /// 1-based rank of a user, `None` when the user is not on the board.
    pub async fn user_rank(
        &self,
        user_id: &UserId,
        window: RankingWindow,
        as_of: Option<i64>,
    ) -> Result<Option<u32>, ScoreError> {
        let board = self.leaderboard(window, as_of).await?;
        Ok(RankingProjector::rank_of(&board, user_id))
    }

    fn remember_score(&self, user_id: UserId, score: i64) {
        self.cache.set_int(&score_cache_key(&user_id), score);
        // No subscribers is fine
        let _ = self.updates.send(ScoreUpdate { user_id, score });
    }

    fn transaction_failed(
        &self,
        error: TransactionError,
        delta: i64,
        fallback: Option<i64>,
    ) -> ScoreError {
        match error {
            TransactionError::Store(e) => self.unavailable(e, fallback),
            TransactionError::OutOfRange { current } => {
                let current = current.or(fallback).unwrap_or(0);
                warn!("Rejected delta {} on counter at {}: out of range", delta, current);
                ScoreError::ScoreOverflow { current, delta }
            }
        }
    }

    fn unavailable(&self, error: StoreError, fallback: Option<i64>) -> ScoreError {
        warn!("Score store failure: {} (fallback {:?})", error, fallback);
        match error {
            StoreError::Unavailable(reason) => ScoreError::store_unavailable(reason, fallback),
            other => ScoreError::store_unavailable(other.to_string(), fallback),
        }
    }
}

/// Live feed of one user's score. Implements `Stream`; dropping it cancels
/// the background refresh.
pub struct ScoreSubscription {
    receiver: mpsc::Receiver<i64>,
    task: JoinHandle<()>,
}

impl ScoreSubscription {
    pub async fn next_score(&mut self) -> Option<i64> {
        self.receiver.recv().await
    }

    /// Value already delivered and not yet consumed, without waiting.
    pub fn try_next_score(&mut self) -> Option<i64> {
        self.receiver.try_recv().ok()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Stream for ScoreSubscription {
    type Item = i64;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for ScoreSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
