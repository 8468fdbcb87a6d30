#![allow(dead_code)]

use score_core::{AggregatorConfig, ManualClock, MemoryCache, MemoryScoreStore, ScoreAggregator};
use score_types::{Identity, UserId};
use std::sync::Arc;
use uuid::Uuid;

/// 2023-11-14T22:13:20Z, an arbitrary fixed starting instant
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Everything a test needs to drive an aggregator and inspect its collaborators
pub struct TestHarness {
    pub aggregator: ScoreAggregator,
    pub store: Arc<MemoryScoreStore>,
    pub cache: Arc<MemoryCache>,
    pub clock: Arc<ManualClock>,
}

/// Creates an aggregator over an in-memory store with a manual clock
pub fn create_harness() -> TestHarness {
    create_harness_with_config(AggregatorConfig::default())
}

pub fn create_harness_with_config(config: AggregatorConfig) -> TestHarness {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let store = Arc::new(MemoryScoreStore::with_clock(clock.clone()));
    let cache = Arc::new(MemoryCache::new());
    let aggregator = ScoreAggregator::new(store.clone(), cache.clone(), clock.clone(), config);

    TestHarness {
        aggregator,
        store,
        cache,
        clock,
    }
}

/// Creates a fresh authenticated identity
pub fn create_test_identity() -> (UserId, Identity) {
    let user_id = Uuid::new_v4();
    (user_id, Identity::authenticated(user_id))
}

/// Registers a user and gives them `score` points through normal increments
pub async fn create_scored_user(harness: &TestHarness, nickname: &str, score: i64) -> UserId {
    let (user_id, identity) = create_test_identity();
    harness
        .aggregator
        .register_user(&identity, nickname)
        .await
        .unwrap();
    if score != 0 {
        harness.aggregator.add_score(&identity, score).await.unwrap();
    }
    user_id
}
