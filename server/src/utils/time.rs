//! Parsing of time-ish request parameters: `since` cursors and delays

use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::data::cache::Since;

/// Parse a `since` parameter: `all`, a unix timestamp, or a duration like
/// `12h` (meaning "messages from the last 12 hours")
pub fn parse_since(value: &str) -> Option<Since> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.eq_ignore_ascii_case("all") {
        return Some(Since::All);
    }
    if let Ok(unix) = value.parse::<i64>() {
        if unix >= 0 {
            return Some(Since::Time(unix));
        }
        return None;
    }
    if let Ok(duration) = humantime::parse_duration(value) {
        return Some(Since::Time(Utc::now().timestamp() - duration.as_secs() as i64));
    }
    None
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DelayError {
    #[error("invalid delay")]
    Invalid,
    #[error("delay is too small")]
    TooSmall,
    #[error("delay is too large")]
    TooLarge,
}

/// Parse a `delay` parameter into an absolute delivery time (unix seconds).
/// Accepts an absolute unix timestamp or a duration like `30m`; the result
/// must fall within [now + min, now + max].
pub fn parse_delay(value: &str, min: Duration, max: Duration) -> Result<i64, DelayError> {
    let value = value.trim();
    let now = Utc::now().timestamp();
    let target = if let Ok(unix) = value.parse::<i64>() {
        unix
    } else {
        let duration = humantime::parse_duration(value).map_err(|_| DelayError::Invalid)?;
        now + duration.as_secs() as i64
    };

    if target < now + min.as_secs() as i64 {
        return Err(DelayError::TooSmall);
    }
    if target > now + max.as_secs() as i64 {
        return Err(DelayError::TooLarge);
    }
    Ok(target)
}
