//! Per-workflow worker: trigger gating, simulate, optional execute, report,
//! reschedule (spec §4.8 / C8).

pub mod gate;
pub mod ipfs_executor;
pub mod simulator;
pub mod state;

pub use gate::{ChainGate, TriggerGate};
pub use ipfs_executor::IpfsExecutorSimulator;
pub use simulator::Simulator;
pub use state::WorkerState;

use chrono::Utc;
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};
use workflow_common::{
	error::{classify_execution_error, summarize_error, ErrorClass},
	time::INDEXER_CATCHUP,
	BlockWatermark, ContentHash, LastSimulationSummary, SimulationResult, ValidationDetails, WorkflowDocument,
};
use workflow_store::{WorkflowPatch, WorkflowStore};

pub struct Worker<S: WorkflowStore> {
	store: Arc<S>,
	gate: Arc<dyn TriggerGate>,
	simulator: Arc<dyn Simulator>,
	reporting: Option<Arc<reporting_client::ReportingClient>>,
	full_node: bool,
}

/// Outcome of one full run, mostly useful to tests and the scheduler's
/// per-cycle logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
	pub hash: ContentHash,
	pub final_state: WorkerState,
}

impl<S: WorkflowStore> Worker<S> {
	pub fn new(
		store: Arc<S>,
		gate: Arc<dyn TriggerGate>,
		simulator: Arc<dyn Simulator>,
		reporting: Option<Arc<reporting_client::ReportingClient>>,
		full_node: bool,
	) -> Self {
		Self { store, gate, simulator, reporting, full_node }
	}

	/// Runs one processing attempt for `document` end to end. Never panics
	/// on a simulation/execution failure; those are captured into the
	/// persisted state per spec §4.8's transition table.
	#[instrument(skip(self, document), fields(hash = %document.content_hash))]
	pub async fn process(&self, document: WorkflowDocument) -> anyhow::Result<WorkerOutcome> {
		let hash = document.content_hash.clone();

		// Admitted -> ValidateTriggers. I2: no meta, no trigger evaluation.
		let Some(meta) = document.meta.clone() else {
			warn!(%hash, "workflow has no resolved meta, skipping");
			return Ok(WorkerOutcome { hash, final_state: WorkerState::Done });
		};

		let mut block_tracking_updates: HashMap<String, BlockWatermark> = HashMap::new();
		let mut any_events_found = meta.event_triggers().next().is_none();

		for chain_id in meta.event_chains() {
			let last_processed = document.block_watermark(chain_id).map(|w| w.last_processed_block).unwrap_or(0);
			let per_chain_triggers: Vec<_> = meta
				.triggers
				.iter()
				.filter(|t| matches!(t, workflow_common::Trigger::Event { chain_id: c, .. } if *c == chain_id))
				.cloned()
				.collect();
			let outcome = self.gate.check_events(chain_id, &per_chain_triggers, last_processed).await?;
			if outcome.has_events {
				any_events_found = true;
			}
			block_tracking_updates.insert(
				chain_id.tracking_key(),
				BlockWatermark { last_processed_block: outcome.new_watermark, last_updated: Utc::now() },
			);
		}

		if !block_tracking_updates.is_empty() {
			self.store
				.update(&hash, WorkflowPatch::new().with_block_tracking(block_tracking_updates))
				.await?;
		}

		let onchain_ok = self.gate.onchain_all_true(&meta.triggers).await?;

		if !any_events_found || !onchain_ok {
			// ValidateTriggers -> EventsPending -> Reschedule.
			info!(%hash, any_events_found, onchain_ok, "triggers not satisfied this cycle");
			self.reschedule(&hash, &meta, false).await?;
			return Ok(WorkerOutcome { hash, final_state: WorkerState::Reschedule });
		}

		// ValidateTriggers -> Simulate.
		let simulation = self.simulator.simulate(&document, None).await;
		let (simulation, sim_error) = split_result(simulation);

		if let Some(error) = sim_error.as_deref() {
			if classify_execution_error(error) == ErrorClass::CancelWorthy {
				self.cancel(&hash, error).await?;
				return Ok(WorkerOutcome { hash, final_state: WorkerState::Cancelled });
			}
		}

		let should_execute = self.full_node && sim_error.is_none() && simulation.success;

		let (final_result, final_error, executed) = if should_execute {
			let execution = self.simulator.execute(&document, &simulation).await;
			let (execution_result, exec_error) = split_result(execution);
			if let Some(error) = exec_error.as_deref() {
				if classify_execution_error(error) == ErrorClass::CancelWorthy {
					self.cancel(&hash, error).await?;
					return Ok(WorkerOutcome { hash, final_state: WorkerState::Cancelled });
				}
			}
			(execution_result, exec_error, exec_error.is_none())
		} else {
			(simulation, sim_error, false)
		};

		// Execute/Simulate -> Report.
		self.report(&hash, &final_result, final_error.as_deref(), executed).await?;

		// Report -> Reschedule -> Done.
		self.reschedule(&hash, &meta, executed).await?;

		Ok(WorkerOutcome { hash, final_state: WorkerState::Done })
	}

	async fn report(
		&self,
		hash: &ContentHash,
		result: &SimulationResult,
		error: Option<&str>,
		executed: bool,
	) -> anyhow::Result<()> {
		let summary = LastSimulationSummary {
			success: error.is_none() && result.success,
			at: Utc::now(),
			error: error.map(summarize_error),
			per_chain: result.per_chain_results.clone(),
		};

		let mut patch = WorkflowPatch::new().with_last_simulation(summary);
		if executed {
			patch = patch.with_incremented_runs();
		}
		self.store.update(hash, patch).await?;

		if let Some(reporting) = &self.reporting {
			let payload = serde_json::json!({
				"contentHash": hash.as_str(),
				"success": error.is_none() && result.success,
				"executed": executed,
				"perChainResults": result.per_chain_results,
			});
			if let Err(e) = reporting.submit_report(&payload).await {
				warn!(%hash, error = %e, "failed to submit report");
			}
		}
		Ok(())
	}

	async fn cancel(&self, hash: &ContentHash, error: &str) -> anyhow::Result<()> {
		warn!(%hash, error, "workflow hit the cancel-worthy failure class");
		let details = ValidationDetails {
			reason: error.to_string(),
			matched_pattern: workflow_common::error::CANCEL_PATTERN_MESSAGE.to_string(),
			at: Utc::now(),
		};
		self.store.update(hash, WorkflowPatch::new().with_cancellation(details)).await?;
		Ok(())
	}

	/// Reschedule rule (spec §4.8): next time is the earliest cron fire
	/// after now; a fixed 60s "indexer catch-up" offset is added when an
	/// execution just succeeded.
	async fn reschedule(
		&self,
		hash: &ContentHash,
		meta: &workflow_common::WorkflowMeta,
		just_executed: bool,
	) -> anyhow::Result<()> {
		let now = Utc::now();
		let mut next = chain_watch::next_fire_time(meta, now)?;
		if just_executed {
			next = next.map(|t| t + INDEXER_CATCHUP);
		}
		self.store.update(hash, WorkflowPatch::new().with_next_simulation_time(next)).await?;
		Ok(())
	}
}

fn split_result(result: anyhow::Result<SimulationResult>) -> (SimulationResult, Option<String>) {
	match result {
		Ok(simulation) => {
			let error = simulation.per_chain_results.iter().find_map(|r| r.error.clone());
			(simulation, error)
		},
		Err(e) => (SimulationResult::default(), Some(e.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chain_watch::EventCheckOutcome;
	use std::sync::Mutex;
	use workflow_common::{ChainId, Trigger, WorkflowMeta};
	use workflow_store::test_support::InMemoryStore;

	struct FixedGate {
		has_events: bool,
		onchain_ok: bool,
	}

	#[async_trait]
	impl TriggerGate for FixedGate {
		async fn check_events(
			&self,
			_chain_id: ChainId,
			_triggers: &[Trigger],
			last_processed: u64,
		) -> anyhow::Result<EventCheckOutcome> {
			Ok(EventCheckOutcome { has_events: self.has_events, blocks_checked: 1, new_watermark: last_processed + 1 })
		}

		async fn onchain_all_true(&self, _triggers: &[Trigger]) -> anyhow::Result<bool> {
			Ok(self.onchain_ok)
		}

		async fn head(&self, _chain_id: ChainId) -> anyhow::Result<u64> {
			Ok(1000)
		}
	}

	struct ScriptedSimulator {
		simulate: Mutex<Option<anyhow::Result<SimulationResult>>>,
	}

	#[async_trait]
	impl Simulator for ScriptedSimulator {
		async fn simulate(
			&self,
			_workflow: &WorkflowDocument,
			_context_refs: Option<&workflow_common::ContextRefs>,
		) -> anyhow::Result<SimulationResult> {
			self.simulate.lock().unwrap().take().unwrap()
		}

		async fn execute(
			&self,
			_workflow: &WorkflowDocument,
			simulation: &SimulationResult,
		) -> anyhow::Result<SimulationResult> {
			Ok(simulation.clone())
		}
	}

	fn cron_document(hash: &str) -> WorkflowDocument {
		let mut doc = WorkflowDocument::new(ContentHash::from(hash.to_string()));
		doc.meta = Some(WorkflowMeta {
			owner: "0xowner".into(),
			triggers: vec![Trigger::Cron { schedule: "0 */2 * * * *".into() }],
			jobs: vec![],
			session: serde_json::Value::Null,
		});
		doc
	}

	#[tokio::test]
	async fn cancel_worthy_error_sets_is_cancelled() {
		let store = Arc::new(InMemoryStore::new());
		let doc = cron_document("a");
		store.insert(doc.clone()).await.unwrap();

		let gate = Arc::new(FixedGate { has_events: true, onchain_ok: true });
		let simulator = Arc::new(ScriptedSimulator {
			simulate: Mutex::new(Some(Err(anyhow::anyhow!("AA23 reverted: 0xc48cf8ee")))),
		});
		let worker = Worker::new(store.clone(), gate, simulator, None, false);

		let outcome = worker.process(doc).await.unwrap();
		assert_eq!(outcome.final_state, WorkerState::Cancelled);

		let persisted = store.find(&ContentHash::from("a".to_string())).await.unwrap().unwrap();
		assert!(persisted.is_cancelled);
		assert!(persisted.validation_details.is_some());
	}

	#[tokio::test]
	async fn non_cancel_error_reschedules_without_cancelling() {
		let store = Arc::new(InMemoryStore::new());
		let doc = cron_document("b");
		store.insert(doc.clone()).await.unwrap();

		let gate = Arc::new(FixedGate { has_events: true, onchain_ok: true });
		let simulator = Arc::new(ScriptedSimulator {
			simulate: Mutex::new(Some(Err(anyhow::anyhow!("insufficient funds for gas")))),
		});
		let worker = Worker::new(store.clone(), gate, simulator, None, false);

		let outcome = worker.process(doc).await.unwrap();
		assert_eq!(outcome.final_state, WorkerState::Done);

		let persisted = store.find(&ContentHash::from("b".to_string())).await.unwrap().unwrap();
		assert!(!persisted.is_cancelled);
		assert!(persisted.next_simulation_time.is_some());
		assert_eq!(persisted.last_simulation.as_ref().unwrap().error.as_deref(), Some("insufficient funds"));
	}

	#[tokio::test]
	async fn successful_execution_adds_indexer_catchup_offset() {
		let store = Arc::new(InMemoryStore::new());
		let doc = cron_document("c");
		store.insert(doc.clone()).await.unwrap();

		let gate = Arc::new(FixedGate { has_events: true, onchain_ok: true });
		let simulator = Arc::new(ScriptedSimulator {
			simulate: Mutex::new(Some(Ok(SimulationResult { success: true, ..Default::default() }))),
		});
		let worker = Worker::new(store.clone(), gate, simulator, None, true);

		let now = Utc::now();
		worker.process(doc).await.unwrap();

		let persisted = store.find(&ContentHash::from("c".to_string())).await.unwrap().unwrap();
		assert_eq!(persisted.runs, 1);
		let next = persisted.next_simulation_time.unwrap();
		// Next cron fire is >=60s past "now" + the 2 minute period, so well
		// past a plain 2-minute-only reschedule would land.
		assert!(next - now >= INDEXER_CATCHUP);
	}

	#[tokio::test]
	async fn no_events_found_skips_simulation_and_reschedules() {
		let store = Arc::new(InMemoryStore::new());
		let mut doc = cron_document("d");
		doc.meta.as_mut().unwrap().triggers.push(Trigger::Event {
			signature: "Foo()".into(),
			chain_id: ChainId(1),
			address: None,
			indexed_filters: None,
		});
		store.insert(doc.clone()).await.unwrap();

		let gate = Arc::new(FixedGate { has_events: false, onchain_ok: true });
		let simulator =
			Arc::new(ScriptedSimulator { simulate: Mutex::new(Some(Ok(SimulationResult::default()))) });
		let worker = Worker::new(store.clone(), gate, simulator, None, false);

		let outcome = worker.process(doc).await.unwrap();
		assert_eq!(outcome.final_state, WorkerState::Reschedule);

		let persisted = store.find(&ContentHash::from("d".to_string())).await.unwrap().unwrap();
		assert!(persisted.last_simulation.is_none(), "simulator must not be called when gated by events");
	}
}
