use crate::error::{Result, SyncError};
use crate::utils::API_DATE_FORMAT;
use chrono::{Duration, Months, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default trailing overlap re-fetched on every update.
///
/// The registry publishes operations up to two weeks after their nominal date.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 14;

/// Inclusive `[start, end]` timestamp range bounding a remote fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self> {
        if end < start {
            return Err(SyncError::DateError(format!(
                "Window end {} is before start {}",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts <= self.end
    }

    pub fn with_start(self, start: NaiveDateTime) -> Self {
        Self {
            start: start.min(self.end),
            end: self.end,
        }
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(API_DATE_FORMAT),
            self.end.format(API_DATE_FORMAT)
        )
    }
}

/// `[now - period, now]`; used when no local snapshot exists yet.
pub fn initial_window(period: Months, now: NaiveDateTime) -> Result<DateWindow> {
    let start = now.checked_sub_months(period).ok_or_else(|| {
        SyncError::DateError(format!("Cannot go back {:?} from {}", period, now))
    })?;
    DateWindow::new(start, now)
}

/// Start of the re-fetch window for an existing snapshot.
///
/// Goes back `lookback` from the last locally seen record, but never starts
/// later than the originally requested start.
pub fn update_window_start(
    last_seen: NaiveDateTime,
    requested_start: NaiveDateTime,
    lookback: Duration,
) -> NaiveDateTime {
    let max_look_back = last_seen
        .checked_sub_signed(lookback)
        .unwrap_or(NaiveDateTime::MIN);
    max_look_back.min(requested_start)
}

/// Records inside `window`, ascending by timestamp.
pub fn filter_by_window<T, F>(records: &[T], window: &DateWindow, timestamp: F) -> Vec<T>
where
    T: Clone,
    F: Fn(&T) -> NaiveDateTime,
{
    let mut result: Vec<T> = records
        .iter()
        .filter(|r| window.contains(timestamp(r)))
        .cloned()
        .collect();
    result.sort_by_key(|r| timestamp(r));
    result
}
