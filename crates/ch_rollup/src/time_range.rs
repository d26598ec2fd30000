//! Time helpers shared by the engine and the checkpoint store.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Half-open time range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Splits the range into consecutive pieces no longer than `interval`.
    ///
    /// The last piece ends exactly at `to`, so it may be shorter. An empty or
    /// inverted range yields no pieces.
    pub fn split_by(&self, interval: Duration) -> Result<Vec<TimeRange>> {
        if self.from >= self.to {
            return Ok(Vec::new());
        }
        let step = to_time_delta(interval)?;
        if step <= TimeDelta::zero() {
            return Err(anyhow!("split interval must be greater than 0"));
        }

        let mut pieces = Vec::new();
        let mut next = self.from;
        while next < self.to {
            let end = next
                .checked_add_signed(step)
                .map_or(self.to, |end| end.min(self.to));
            pieces.push(TimeRange::new(next, end));
            next = end;
        }
        Ok(pieces)
    }
}

/// Rounds `at` down to a multiple of `step` counted from the Unix epoch.
pub fn truncate(at: DateTime<Utc>, step: Duration) -> Result<DateTime<Utc>> {
    let step = to_time_delta(step)?;
    at.duration_trunc(step)
        .with_context(|| format!("truncate {at} to {step}"))
}

/// Whole seconds in `duration`, the unit stored in the checkpoint table and
/// used by the bucketing expression.
pub fn seconds(duration: Duration) -> u64 {
    duration.as_secs()
}

/// Converts a configuration duration into a chrono delta.
pub fn to_time_delta(duration: Duration) -> Result<TimeDelta> {
    TimeDelta::from_std(duration).with_context(|| format!("duration {duration:?} out of range"))
}
