use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{RankingWindow, ScoreError, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RegisterRequest {
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AddScoreRequest {
    pub delta: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SetScoreRequest {
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlyPointsRequest {
    pub period: Option<String>, // defaults to the current month
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MonthlyPointsResponse {
    pub period: String,
    pub points: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WindowedScoreResponse {
    pub user_id: UserId,
    pub window: RankingWindow,
    pub score: i64,
    /// True when the store was unreachable and `score` is the last cached value.
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankResponse {
    pub user_id: UserId,
    pub window: RankingWindow,
    pub rank: Option<u32>,
}

/// Pushed over the score feed socket whenever the user's score changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreFeedMessage {
    pub user_id: UserId,
    pub score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: Option<ScoreError>,
}

impl ErrorResponse {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            detail: None,
        }
    }
}

impl From<ScoreError> for ErrorResponse {
    fn from(err: ScoreError) -> Self {
        Self {
            error: err.to_string(),
            detail: Some(err),
        }
    }
}
