use chrono::{DateTime, Datelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;
use uuid::Uuid;

use crate::ScoreError;

pub type UserId = Uuid;
pub type EventId = Uuid;

const HOUR_MILLIS: i64 = 60 * 60 * 1000;
const DAY_MILLIS: i64 = 24 * HOUR_MILLIS;

/// An immutable score delta, timestamped by the store when it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreEvent {
    pub id: EventId,
    pub value: i64,
    pub server_timestamp: i64, // ms since epoch
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct UserScoreState {
    pub user_id: UserId,
    pub current_score: i64,
    pub nickname: String,
    pub monthly_points: BTreeMap<String, i64>, // "YYYY-MM" -> points
}

impl UserScoreState {
    pub fn new(user_id: UserId, nickname: impl Into<String>) -> Self {
        Self {
            user_id,
            current_score: 0,
            nickname: nickname.into(),
            monthly_points: BTreeMap::new(),
        }
    }
}

/// Outcome of a committed score increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ScoreReceipt {
    pub new_score: i64,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum RankingWindow {
    Now,     // current score, unbounded
    Daily,   // trailing 24h
    Weekly,  // trailing 7d
    Monthly, // trailing 30d, not calendar aware
}

impl RankingWindow {
    pub const ALL: [RankingWindow; 4] = [
        RankingWindow::Now,
        RankingWindow::Daily,
        RankingWindow::Weekly,
        RankingWindow::Monthly,
    ];

    /// Window length in milliseconds, `None` for the unbounded `Now` window.
    pub fn length_millis(&self) -> Option<i64> {
        match self {
            RankingWindow::Now => None,
            RankingWindow::Daily => Some(DAY_MILLIS),
            RankingWindow::Weekly => Some(7 * DAY_MILLIS),
            RankingWindow::Monthly => Some(30 * DAY_MILLIS),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RankingWindow::Now => "now",
            RankingWindow::Daily => "daily",
            RankingWindow::Weekly => "weekly",
            RankingWindow::Monthly => "monthly",
        }
    }
}

impl fmt::Display for RankingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RankingWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "now" => Ok(RankingWindow::Now),
            "daily" => Ok(RankingWindow::Daily),
            "weekly" => Ok(RankingWindow::Weekly),
            "monthly" => Ok(RankingWindow::Monthly),
            other => Err(format!("unknown ranking window '{}'", other)),
        }
    }
}

/// Calendar month key for monthly progress points, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    year: i32,
    month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, ScoreError> {
        if !(1..=12).contains(&month) || !(0..=9999).contains(&year) {
            return Err(ScoreError::InvalidPeriod {
                period: format!("{}-{}", year, month),
            });
        }
        Ok(Self { year, month })
    }

    /// The calendar month (UTC) containing the given instant.
    pub fn from_timestamp_millis(millis: i64) -> Option<Self> {
        let at = DateTime::from_timestamp_millis(millis)?;
        Some(Self {
            year: at.year(),
            month: at.month(),
        })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = ScoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScoreError::InvalidPeriod {
            period: s.to_string(),
        };

        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        if !year.chars().chain(month.chars()).all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthKey::new(year, month).map_err(|_| invalid())
    }
}
