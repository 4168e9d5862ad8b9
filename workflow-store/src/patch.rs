//! Partial updates applied by `WorkflowStore::update`.
//!
//! Kept as an explicit builder rather than a raw BSON document so every
//! caller states exactly which fields it mutates, matching the invariants
//! each component is responsible for (I3, I4, I5, I6).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use workflow_common::{BlockWatermark, LastSimulationSummary, ValidationDetails, WorkflowDocument, WorkflowMeta};

#[derive(Debug, Clone, Default)]
pub struct WorkflowPatch {
	pub meta: Option<WorkflowMeta>,
	pub next_simulation_time: Option<Option<DateTime<Utc>>>,
	pub block_tracking: Option<HashMap<String, BlockWatermark>>,
	pub last_simulation: Option<LastSimulationSummary>,
	pub is_cancelled: Option<bool>,
	pub validation_details: Option<ValidationDetails>,
	pub increment_runs: bool,
}

impl WorkflowPatch {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_next_simulation_time(mut self, t: Option<DateTime<Utc>>) -> Self {
		self.next_simulation_time = Some(t);
		self
	}

	pub fn with_block_tracking(mut self, tracking: HashMap<String, BlockWatermark>) -> Self {
		self.block_tracking = Some(tracking);
		self
	}

	pub fn with_last_simulation(mut self, summary: LastSimulationSummary) -> Self {
		self.last_simulation = Some(summary);
		self
	}

	pub fn with_cancellation(mut self, details: ValidationDetails) -> Self {
		self.is_cancelled = Some(true);
		self.validation_details = Some(details);
		self
	}

	pub fn with_incremented_runs(mut self) -> Self {
		self.increment_runs = true;
		self
	}

	/// Applies this patch to `document` in place. Enforces I3 (watermarks
	/// never decrease) defensively: a caller supplying a lower watermark
	/// than what's already persisted is a bug upstream, but we never let
	/// storage silently regress it.
	pub fn apply(self, document: &mut WorkflowDocument) {
		if let Some(meta) = self.meta {
			document.meta = Some(meta);
		}
		if let Some(next) = self.next_simulation_time {
			document.next_simulation_time = next;
		}
		if let Some(tracking) = self.block_tracking {
			for (chain_key, incoming) in tracking {
				let keep_existing = document
					.block_tracking
					.get(&chain_key)
					.is_some_and(|existing| existing.last_processed_block > incoming.last_processed_block);
				if !keep_existing {
					document.block_tracking.insert(chain_key, incoming);
				}
			}
		}
		if let Some(summary) = self.last_simulation {
			document.last_simulation = Some(summary);
		}
		if let Some(cancelled) = self.is_cancelled {
			document.is_cancelled = cancelled;
		}
		if let Some(details) = self.validation_details {
			document.validation_details = Some(details);
		}
		if self.increment_runs {
			document.runs += 1;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use workflow_common::ContentHash;

	#[test]
	fn block_tracking_never_regresses() {
		let mut doc = WorkflowDocument::new(ContentHash::from("x".to_string()));
		doc.block_tracking.insert(
			"chain_1".to_string(),
			BlockWatermark { last_processed_block: 100, last_updated: Utc::now() },
		);

		let mut lower = HashMap::new();
		lower.insert(
			"chain_1".to_string(),
			BlockWatermark { last_processed_block: 50, last_updated: Utc::now() },
		);
		WorkflowPatch::new().with_block_tracking(lower).apply(&mut doc);
		assert_eq!(doc.block_tracking["chain_1"].last_processed_block, 100);

		let mut higher = HashMap::new();
		higher.insert(
			"chain_1".to_string(),
			BlockWatermark { last_processed_block: 150, last_updated: Utc::now() },
		);
		WorkflowPatch::new().with_block_tracking(higher).apply(&mut doc);
		assert_eq!(doc.block_tracking["chain_1"].last_processed_block, 150);
	}

	#[test]
	fn increment_runs_only_after_commit() {
		let mut doc = WorkflowDocument::new(ContentHash::from("x".to_string()));
		assert_eq!(doc.runs, 0);
		WorkflowPatch::new().with_incremented_runs().apply(&mut doc);
		assert_eq!(doc.runs, 1);
	}
}
