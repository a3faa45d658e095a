// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fire-time computation for interval and cron schedules.
//!
//! Catch-up policy is coalesce-only: when several fire times have passed,
//! the latest one wins and the rest are counted, never replayed.

use crate::error::SchedulerError;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use drover_core::CronSchedule;
use drover_store::ScheduleOutcome;
use std::str::FromStr;

/// Stop scanning cron fire times after this many missed firings; the
/// remainder coalesces into the count anyway.
const MAX_MISSED_SCAN: u32 = 10_000;

/// Evaluate a due schedule at `now`.
///
/// `None` means no fire time has actually passed (stale `next_run_at`);
/// the caller should recompute the next fire and release its claim.
pub fn outcome_at(
    schedule: &CronSchedule,
    last_run_at_ms: Option<u64>,
    next_run_at_ms: Option<u64>,
    now_ms: u64,
) -> Result<Option<ScheduleOutcome>, SchedulerError> {
    match schedule {
        CronSchedule::Interval { every_ms, .. } => {
            interval_outcome(*every_ms, last_run_at_ms, next_run_at_ms, now_ms)
        }
        CronSchedule::Cron { expr, tz } => {
            cron_outcome(expr, tz, last_run_at_ms, next_run_at_ms, now_ms)
        }
    }
}

/// The first fire time at or after `now` for a newly registered job.
pub fn first_next_run(schedule: &CronSchedule, now_ms: u64) -> Result<u64, SchedulerError> {
    match schedule {
        CronSchedule::Interval { every_ms, .. } => {
            if *every_ms == 0 {
                return Err(SchedulerError::InvalidSchedule("interval of 0 ms".to_string()));
            }
            Ok(now_ms + every_ms)
        }
        CronSchedule::Cron { expr, tz } => {
            let (schedule, tz) = parse_cron(expr, tz)?;
            let now = in_tz(now_ms, tz);
            schedule
                .after(&now)
                .next()
                .map(|dt| dt.timestamp_millis() as u64)
                .ok_or_else(|| {
                    SchedulerError::InvalidSchedule(format!("cron {expr:?} never fires"))
                })
        }
    }
}

fn interval_outcome(
    every_ms: u64,
    last_run_at_ms: Option<u64>,
    next_run_at_ms: Option<u64>,
    now_ms: u64,
) -> Result<Option<ScheduleOutcome>, SchedulerError> {
    if every_ms == 0 {
        return Err(SchedulerError::InvalidSchedule("interval of 0 ms".to_string()));
    }
    // Fires land at anchor + k·every_ms, k ≥ 1. The anchor is the last
    // run when known, else one period before the stored next fire.
    let anchor = match (last_run_at_ms, next_run_at_ms) {
        (Some(last), _) => last,
        (None, Some(next)) => next.saturating_sub(every_ms),
        (None, None) => return Ok(None),
    };
    if now_ms < anchor {
        return Ok(None);
    }
    let count = (now_ms - anchor) / every_ms;
    if count == 0 {
        return Ok(None);
    }
    let scheduled_for_ms = anchor + count * every_ms;
    Ok(Some(ScheduleOutcome {
        scheduled_for_ms,
        coalesced_count: (count - 1) as u32,
        next_run_at_ms: scheduled_for_ms + every_ms,
    }))
}

fn cron_outcome(
    expr: &str,
    tz: &str,
    last_run_at_ms: Option<u64>,
    next_run_at_ms: Option<u64>,
    now_ms: u64,
) -> Result<Option<ScheduleOutcome>, SchedulerError> {
    let (schedule, tz) = parse_cron(expr, tz)?;
    let anchor_ms = match (last_run_at_ms, next_run_at_ms) {
        (Some(last), _) => last,
        // No run yet: scan from just before the stored first fire so it
        // counts itself.
        (None, Some(next)) => next.saturating_sub(1),
        (None, None) => return Ok(None),
    };

    let anchor = in_tz(anchor_ms, tz);
    let mut count: u32 = 0;
    let mut latest: Option<DateTime<Tz>> = None;
    for fire in schedule.after(&anchor) {
        if fire.timestamp_millis() as u64 > now_ms {
            break;
        }
        count += 1;
        latest = Some(fire);
        if count >= MAX_MISSED_SCAN {
            tracing::warn!(expr, "cron catch-up scan truncated");
            break;
        }
    }

    let Some(latest) = latest else {
        return Ok(None);
    };
    let next = schedule
        .after(&latest)
        .next()
        .map(|dt| dt.timestamp_millis() as u64)
        .ok_or_else(|| SchedulerError::InvalidSchedule(format!("cron {expr:?} never fires")))?;

    Ok(Some(ScheduleOutcome {
        scheduled_for_ms: latest.timestamp_millis() as u64,
        coalesced_count: count - 1,
        next_run_at_ms: next,
    }))
}

fn parse_cron(expr: &str, tz: &str) -> Result<(cron::Schedule, Tz), SchedulerError> {
    let tz = Tz::from_str(tz)
        .map_err(|_| SchedulerError::InvalidSchedule(format!("unknown timezone {tz:?}")))?;
    // The cron crate wants a seconds field; a 5-field expression gets
    // seconds pinned to zero.
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    let schedule = cron::Schedule::from_str(&normalized)
        .map_err(|e| SchedulerError::InvalidSchedule(format!("cron {expr:?}: {e}")))?;
    Ok((schedule, tz))
}

fn in_tz(ms: u64, tz: Tz) -> DateTime<Tz> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .with_timezone(&tz)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
