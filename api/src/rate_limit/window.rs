//! Window arithmetic and counter key layout.
//!
//! Keys are `{purpose}:{principal}:{window_or_date}`. Window ids are the
//! window start in epoch milliseconds; daily ids are the UTC date.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Days, Utc};

/// Daily keys outlive midnight by an hour to tolerate clock skew between replicas.
pub const DAILY_COUNTER_TTL: Duration = Duration::from_secs(25 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterPurpose {
    Read,
    Write,
    ReadDaily,
    WriteDaily,
    Ip,
}

impl CounterPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            CounterPurpose::Read => "ratelimit",
            CounterPurpose::Write => "ratelimit_write",
            CounterPurpose::ReadDaily => "daily",
            CounterPurpose::WriteDaily => "daily_write",
            CounterPurpose::Ip => "ratelimit_ip",
        }
    }

    /// Window and daily namespaces for one pool.
    pub fn for_pool(is_write: bool) -> (CounterPurpose, CounterPurpose) {
        if is_write {
            (CounterPurpose::Write, CounterPurpose::WriteDaily)
        } else {
            (CounterPurpose::Read, CounterPurpose::ReadDaily)
        }
    }
}

pub fn counter_key(purpose: CounterPurpose, principal: &str, bucket: impl fmt::Display) -> String {
    format!("{}:{}:{}", purpose.as_str(), principal, bucket)
}

/// Position of `now` relative to the fixed windows of size `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowFrame {
    pub current_id: i64,
    pub previous_id: i64,
    /// Fraction of the current window already elapsed, in `[0, 1)`.
    pub position: f64,
    pub reset_at: DateTime<Utc>,
}

impl WindowFrame {
    pub fn at(now: DateTime<Utc>, window_ms: u64) -> Self {
        let window = i64::try_from(window_ms.max(1)).unwrap_or(i64::MAX);
        let now_ms = now.timestamp_millis();
        let current_id = now_ms.div_euclid(window) * window;
        let position = now_ms.rem_euclid(window) as f64 / window as f64;
        let reset_at = DateTime::from_timestamp_millis(current_id.saturating_add(window))
            .unwrap_or(now);

        Self {
            current_id,
            previous_id: current_id - window,
            position,
            reset_at,
        }
    }

    /// TTL for a window counter: it must survive one rollover so the next
    /// window can still read it as "previous".
    pub fn counter_ttl(window_ms: u64) -> Duration {
        Duration::from_millis(window_ms.saturating_mul(2).max(1))
    }
}

/// Weighted request count across the rollover:
/// `floor(previous * (1 - position) + current)`.
pub fn sliding_count(previous: u64, current: u64, position: f64) -> u64 {
    let position = position.clamp(0.0, 1.0);
    let weighted = previous as f64 * (1.0 - position) + current as f64;
    weighted.max(0.0).floor() as u64
}

pub fn utc_date_id(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

/// Whole seconds (rounded up, at least 1) from `now` until `until`.
pub fn seconds_until(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    let millis = (until - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
