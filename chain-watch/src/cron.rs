//! Cron next-fire-time evaluation (spec §4.6 / C6).

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use workflow_common::WorkflowMeta;

#[derive(thiserror::Error, Debug)]
pub enum CronError {
	#[error("invalid cron schedule {schedule:?}: {source}")]
	InvalidSchedule { schedule: String, source: cron::error::Error },
}

/// Computes the earliest next fire time across all of `meta`'s cron
/// triggers, strictly after `now`. Returns `None` for a workflow with zero
/// triggers at all (spec §4.6 "the workflow is a one-shot"); a workflow
/// with non-cron triggers but no cron trigger also returns `None` here
/// (those are gated by event/onchain checks instead, spec §4.8).
pub fn next_fire_time(meta: &WorkflowMeta, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CronError> {
	if meta.triggers.is_empty() {
		return Ok(None);
	}

	let mut earliest: Option<DateTime<Utc>> = None;
	for schedule_str in meta.cron_triggers() {
		let schedule = Schedule::from_str(schedule_str)
			.map_err(|source| CronError::InvalidSchedule { schedule: schedule_str.to_owned(), source })?;
		if let Some(next) = schedule.after(&now).next() {
			earliest = Some(match earliest {
				Some(current) => current.min(next),
				None => next,
			});
		}
	}
	Ok(earliest)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use workflow_common::Trigger;

	fn meta_with(schedules: Vec<&str>) -> WorkflowMeta {
		WorkflowMeta {
			owner: "0x0".into(),
			triggers: schedules.into_iter().map(|s| Trigger::Cron { schedule: s.to_string() }).collect(),
			jobs: vec![],
			session: serde_json::Value::Null,
		}
	}

	#[test]
	fn picks_the_earliest_of_multiple_schedules() {
		let meta = meta_with(vec!["0 */2 * * * *", "0 0 * * * *"]);
		let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
		let next = next_fire_time(&meta, now).unwrap().unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 2, 0).unwrap());
	}

	#[test]
	fn no_triggers_is_one_shot() {
		let meta = meta_with(vec![]);
		assert_eq!(next_fire_time(&meta, Utc::now()).unwrap(), None);
	}

	#[test]
	fn invalid_schedule_is_rejected() {
		let meta = meta_with(vec!["not a cron expression"]);
		assert!(next_fire_time(&meta, Utc::now()).is_err());
	}

	#[test]
	fn cron_gating_scenario_s4() {
		// spec §8 S4: "*/2 * * * *" at 12:00:01 -> next 12:02:00.
		let meta = meta_with(vec!["0 */2 * * * *"]);
		let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 1).unwrap();
		let next = next_fire_time(&meta, t).unwrap().unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 12, 2, 0).unwrap());
	}
}
