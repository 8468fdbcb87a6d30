use tracing::warn;

use crate::StoredScoreEvent;
use score_types::{ScoreError, ScoreEvent};

/// Sum of an event log over a trailing window, plus the records that had to
/// be patched up to get there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowedSum {
    pub total: i64,
    pub malformed: Vec<ScoreError>,
}

/// Turn a stored record into a `ScoreEvent`. Missing fields count as zero;
/// each one is reported as a `MalformedRecord`.
pub fn normalize_event(raw: &StoredScoreEvent) -> (ScoreEvent, Vec<ScoreError>) {
    let mut problems = Vec::new();

    let value = raw.value.unwrap_or_else(|| {
        problems.push(ScoreError::MalformedRecord {
            event_id: raw.id,
            field: "value".to_string(),
        });
        0
    });
    let server_timestamp = raw.timestamp.unwrap_or_else(|| {
        problems.push(ScoreError::MalformedRecord {
            event_id: raw.id,
            field: "timestamp".to_string(),
        });
        0
    });

    (
        ScoreEvent {
            id: raw.id,
            value,
            server_timestamp,
        },
        problems,
    )
}

/// Sum `value` over events with `as_of - timestamp <= window_millis`.
///
/// The bound is inclusive. Events stamped after `as_of` fall inside the window.
pub fn windowed_sum(events: &[StoredScoreEvent], window_millis: i64, as_of: i64) -> WindowedSum {
    let mut sum = WindowedSum::default();

    for raw in events {
        let (event, problems) = normalize_event(raw);
        for problem in problems {
            warn!("{}; counting it as 0", problem);
            sum.malformed.push(problem);
        }

        if as_of.saturating_sub(event.server_timestamp) <= window_millis {
            sum.total = sum.total.saturating_add(event.value);
        }
    }

    sum
}

/// Sum of every event in the log, regardless of age. Saturates at the i64
/// bounds.
pub fn total_sum(events: &[StoredScoreEvent]) -> i64 {
    events
        .iter()
        .fold(0i64, |total, e| total.saturating_add(e.value.unwrap_or(0)))
}
