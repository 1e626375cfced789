//! Derives the display state of a poll's time window. Everything here is a
//! pure function of timestamps; `now` is always passed in by the caller.

use chrono::{DateTime, Utc};

use crate::models::Poll;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStatus {
    Active,
    EndedNormally,
    EndedEarly,
}

pub fn classify(poll: &Poll, now: DateTime<Utc>) -> TimeStatus {
    if poll.is_active_at(now) {
        return TimeStatus::Active;
    }
    match poll.ended_at {
        // Only a close that beat the scheduled expiry counts as "early".
        Some(ended_at) if ended_at < poll.expires_at => TimeStatus::EndedEarly,
        _ => TimeStatus::EndedNormally,
    }
}

pub fn time_text(poll: &Poll, now: DateTime<Utc>) -> String {
    match classify(poll, now) {
        TimeStatus::Active => remaining_text(now, poll.expires_at),
        TimeStatus::EndedEarly => {
            // classify only returns EndedEarly when ended_at is set
            let ended_at = poll.ended_at.unwrap_or(poll.expires_at);
            elapsed_text(poll.created_at, ended_at)
        }
        TimeStatus::EndedNormally => ended_text(poll.expires_at),
    }
}

// Remaining time while active, coarsest two non-zero units only:
// hours+minutes, minutes+seconds under an hour, bare seconds under a minute.
pub fn remaining_text(now: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let diff = end - now;
    if diff.num_seconds() <= 0 {
        return "종료됨".to_string();
    }

    let hours = diff.num_hours();
    let minutes = diff.num_minutes() % 60;
    let seconds = diff.num_seconds() % 60;

    if hours > 0 {
        format!("종료까지 {}시간 {}분 남음", hours, minutes)
    } else if minutes > 0 {
        format!("종료까지 {}분 {}초 남음", minutes, seconds)
    } else {
        format!("종료까지 {}초 남음", seconds)
    }
}

// How long an early-ended poll actually ran.
pub fn elapsed_text(started: DateTime<Utc>, ended: DateTime<Utc>) -> String {
    let elapsed = ended - started;
    let hours = elapsed.num_hours();
    let minutes = elapsed.num_minutes() % 60;

    if hours > 0 {
        format!("{}시간 {}분동안 투표 진행 했음", hours, minutes)
    } else if minutes > 0 {
        format!("{}분동안 투표 진행 했음", minutes)
    } else {
        "시작하자마자 종료됨".to_string()
    }
}

pub fn ended_text(end: DateTime<Utc>) -> String {
    format!("{} 종료됨", end.format("%Y. %m. %d."))
}
