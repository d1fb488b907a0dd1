//! Time-derived views over pending inputs: urgency and waiting time.
//!
//! Every helper comes in an `_at` form taking an explicit `now` and a
//! wall-clock form that reads `Utc::now()` at call time. Results are never
//! cached; they age with the clock.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::PendingHumanInput;

pub const URGENT_AFTER_MINUTES: i64 = 5;
pub const MEDIUM_AFTER_MINUTES: i64 = 10;
pub const HIGH_AFTER_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
}

impl UrgencyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            UrgencyLevel::Low => "low",
            UrgencyLevel::Medium => "medium",
            UrgencyLevel::High => "high",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elapsed time since `requested_at`. Timestamps in the future count as zero.
pub fn waited_at(requested_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let waited = now - requested_at;
    if waited < Duration::zero() {
        Duration::zero()
    } else {
        waited
    }
}

/// Whole minutes waited, floored.
pub fn waiting_minutes_at(requested_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    waited_at(requested_at, now).num_minutes()
}

pub fn urgency_level_at(requested_at: DateTime<Utc>, now: DateTime<Utc>) -> UrgencyLevel {
    let minutes = waiting_minutes_at(requested_at, now);
    if minutes > HIGH_AFTER_MINUTES {
        UrgencyLevel::High
    } else if minutes > MEDIUM_AFTER_MINUTES {
        UrgencyLevel::Medium
    } else {
        UrgencyLevel::Low
    }
}

pub fn urgency_level(requested_at: DateTime<Utc>) -> UrgencyLevel {
    urgency_level_at(requested_at, Utc::now())
}

/// True once a request has waited strictly longer than five minutes.
pub fn is_urgent_at(requested_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    waited_at(requested_at, now) > Duration::minutes(URGENT_AFTER_MINUTES)
}

pub fn has_urgent_inputs_at(inputs: &[PendingHumanInput], now: DateTime<Utc>) -> bool {
    inputs
        .iter()
        .any(|input| is_urgent_at(input.requested_at, now))
}

pub fn has_urgent_inputs(inputs: &[PendingHumanInput]) -> bool {
    has_urgent_inputs_at(inputs, Utc::now())
}

pub fn format_waiting_time_at(requested_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = waiting_minutes_at(requested_at, now);
    if minutes < 1 {
        return "Just now".to_string();
    }
    if minutes < 60 {
        return plural_ago(minutes, "minute");
    }
    plural_ago(minutes / 60, "hour")
}

pub fn format_waiting_time(requested_at: DateTime<Utc>) -> String {
    format_waiting_time_at(requested_at, Utc::now())
}

fn plural_ago(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}
