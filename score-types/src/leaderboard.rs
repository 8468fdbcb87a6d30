use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{RankingWindow, UserId};

/// A user's score for one ranking request, before ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RankingCandidate {
    pub user_id: UserId,
    pub nickname: String,
    pub score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    pub nickname: String,
    pub score: i64,
    pub rank: u32, // 1-based, dense
}

/// Leaderboard split into the highlighted top tier and everyone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LeaderboardTiers {
    pub window: RankingWindow,
    pub top: Vec<LeaderboardEntry>,
    pub rest: Vec<LeaderboardEntry>,
}
