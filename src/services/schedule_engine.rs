//! Schedule Engine (spec.md §4.6, C6).
//!
//! Cron parsing is delegated to the `cron` crate, the same dependency
//! the teacher's `task_schedule_service.rs` used. All time decisions take
//! an explicit `now: DateTime<Utc>` from the injected `Clock` (§9 "cron
//! state" design note) rather than calling `Utc::now()`, so fire-time
//! math is deterministic under test (P6).

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::domain::error::ScheduleError;
use crate::domain::models::{AgentRun, AgentRunPhase, ConcurrencyPolicy};

/// Parse a cron expression and return the next fire time strictly after
/// `after` (spec.md §4.6 step 1 — `max(status.lastScheduleTime,
/// creationTime)` is computed by the caller and passed in as `after`).
pub fn next_fire_after(cron_expression: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ScheduleError> {
    let schedule = CronSchedule::from_str(cron_expression)
        .map_err(|e| ScheduleError::InvalidCron(cron_expression.to_string(), e.to_string()))?;
    Ok(schedule.after(&after).next())
}

/// Whether `schedule` is due to fire at `now`, given its last recorded
/// fire time (or creation time if it has never fired).
pub fn is_due(cron_expression: &str, last_fire_or_created: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool, ScheduleError> {
    Ok(next_fire_after(cron_expression, last_fire_or_created)?.is_some_and(|fire_at| now >= fire_at))
}

/// What the reconciler should do about a due schedule, after applying its
/// concurrency policy against the set of currently-Running AgentRuns
/// labeled with this schedule's name (spec.md §4.6 step 2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireDecision {
    /// Forbid policy, and a run is already active: skip this fire.
    Skip,
    /// Create a new run unconditionally.
    CreateRun,
    /// Delete the named active runs, then create a new one.
    ReplaceAndCreateRun { runs_to_delete: Vec<String> },
}

/// Decide what to do for a due schedule (spec.md §4.6 step 2). `active_runs`
/// are the names of AgentRuns labeled with this schedule's name whose
/// phase is Running.
pub fn decide_fire(policy: ConcurrencyPolicy, active_run_names: &[String]) -> FireDecision {
    match policy {
        ConcurrencyPolicy::Forbid => {
            if active_run_names.is_empty() {
                FireDecision::CreateRun
            } else {
                FireDecision::Skip
            }
        }
        ConcurrencyPolicy::Allow => FireDecision::CreateRun,
        ConcurrencyPolicy::Replace => FireDecision::ReplaceAndCreateRun { runs_to_delete: active_run_names.to_vec() },
    }
}

/// Names of AgentRuns labeled with `schedule_name` that are currently
/// Running, as seen by the caller's already-fetched run list.
pub fn active_runs_for_schedule<'a>(schedule_name: &str, runs: &'a [AgentRun]) -> Vec<&'a AgentRun> {
    runs.iter()
        .filter(|r| {
            r.metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(crate::domain::models::common::labels::SCHEDULE))
                .map(|v| v.as_str())
                == Some(schedule_name)
                && r.status.as_ref().map(|s| s.phase) == Some(AgentRunPhase::Running)
        })
        .collect()
}

/// Status fields to write after processing one due fire (spec.md §4.6
/// step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireOutcome {
    pub total_runs_delta: u64,
    pub last_schedule_time: DateTime<Utc>,
    pub last_run_name: Option<String>,
    pub next_schedule_time: Option<DateTime<Utc>>,
}

/// Combine a [`FireDecision`]'s effect with the next computed fire time
/// into the status update (spec.md §4.6 step 4). `created_run_name` is
/// `None` only when the decision was [`FireDecision::Skip`].
pub fn fire_outcome(
    now: DateTime<Utc>,
    created_run_name: Option<String>,
    next_fire: Option<DateTime<Utc>>,
) -> FireOutcome {
    FireOutcome {
        total_runs_delta: if created_run_name.is_some() { 1 } else { 0 },
        last_schedule_time: now,
        last_run_name: created_run_name,
        next_schedule_time: next_fire,
    }
}

/// Validate a schedule's cron expression without computing a fire time —
/// used by the PersonaPack Reconciler (C7) and the IPC schedule router
/// (C9) before accepting a Schedule spec.
pub fn validate_cron(cron_expression: &str) -> Result<(), ScheduleError> {
    CronSchedule::from_str(cron_expression)
        .map(|_| ())
        .map_err(|e| ScheduleError::InvalidCron(cron_expression.to_string(), e.to_string()))
}

/// Also accept plain interval-in-seconds schedules by converting them to
/// an equivalent `* * * * * *` style cron expression up front — this is
/// the conversion spec.md §4.7 step 2 calls out for PersonaPack personas
/// ("converting `interval` into a cron expression"). `cron` parses
/// six-field (with seconds) expressions, so an interval of N seconds
/// becomes `*/N * * * * *` for N < 60, or a minute-granularity expression
/// otherwise.
pub fn interval_seconds_to_cron(interval_seconds: u64) -> String {
    if interval_seconds < 60 {
        format!("*/{interval_seconds} * * * * *")
    } else {
        let minutes = (interval_seconds / 60).max(1);
        format!("0 */{minutes} * * * *")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_minute_cron_fires_roughly_a_minute_later() {
        let after = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let next = next_fire_after("0 * * * * *", after).unwrap().unwrap();
        assert_eq!(next, DateTime::parse_from_rfc3339("2026-01-01T00:01:00Z").unwrap().with_timezone(&Utc));
    }

    #[test]
    fn invalid_cron_is_rejected() {
        assert!(validate_cron("not a cron").is_err());
    }

    #[test]
    fn is_due_compares_against_wall_clock() {
        let created = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let almost_due = created + chrono::Duration::seconds(30);
        let due = created + chrono::Duration::minutes(2);
        assert!(!is_due("0 * * * * *", created, almost_due).unwrap());
        assert!(is_due("0 * * * * *", created, due).unwrap());
    }

    #[test]
    fn forbid_with_no_active_run_creates() {
        assert_eq!(decide_fire(ConcurrencyPolicy::Forbid, &[]), FireDecision::CreateRun);
    }

    #[test]
    fn forbid_with_active_run_skips() {
        assert_eq!(decide_fire(ConcurrencyPolicy::Forbid, &["run-1".to_string()]), FireDecision::Skip);
    }

    #[test]
    fn allow_always_creates_even_with_active_runs() {
        assert_eq!(decide_fire(ConcurrencyPolicy::Allow, &["run-1".to_string()]), FireDecision::CreateRun);
    }

    #[test]
    fn replace_deletes_active_then_creates() {
        assert_eq!(
            decide_fire(ConcurrencyPolicy::Replace, &["run-1".to_string(), "run-2".to_string()]),
            FireDecision::ReplaceAndCreateRun { runs_to_delete: vec!["run-1".to_string(), "run-2".to_string()] }
        );
    }

    #[test]
    fn interval_under_a_minute_uses_seconds_field() {
        assert_eq!(interval_seconds_to_cron(30), "*/30 * * * * *");
    }

    #[test]
    fn interval_over_a_minute_uses_minutes_field() {
        assert_eq!(interval_seconds_to_cron(300), "0 */5 * * * *");
    }
}
