//! Outer scheduling loop (spec §4.9 / C9): chain-sync gate, bootstrap,
//! due-set selection, block-watermark priming, and bounded worker dispatch.

pub mod settings;

use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use workflow_common::{BlockWatermark, ContentHash, WorkflowDocument};
use workflow_store::{WorkflowPatch, WorkflowStore};

pub use settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
	/// At least one chain is unsynced; no workflows were processed this
	/// cycle (spec §4.9 step 1).
	WaitingForChainSync,
	Processed { dispatched: usize },
}

pub struct Scheduler<S: WorkflowStore> {
	store: Arc<S>,
	gate: Arc<dyn worker::TriggerGate>,
	simulator: Arc<dyn worker::Simulator>,
	reporting: Option<Arc<reporting_client::ReportingClient>>,
	max_workers: usize,
	max_missing_next_sim_limit: usize,
	full_node: bool,
}

impl<S: WorkflowStore + 'static> Scheduler<S> {
	pub fn new(
		store: Arc<S>,
		gate: Arc<dyn worker::TriggerGate>,
		simulator: Arc<dyn worker::Simulator>,
		reporting: Option<Arc<reporting_client::ReportingClient>>,
		max_workers: usize,
		max_missing_next_sim_limit: usize,
		full_node: bool,
	) -> Self {
		Self { store, gate, simulator, reporting, max_workers, max_missing_next_sim_limit, full_node }
	}

	/// Runs the background ticker that refreshes the reporting client's
	/// auth token every `interval` (spec §4.9 "Independently, a background
	/// ticker...").
	pub async fn run_token_refresh_ticker(&self, interval: Duration, cancel: CancellationToken) {
		let Some(reporting) = self.reporting.clone() else { return };
		let mut ticker = tokio::time::interval(interval);
		loop {
			tokio::select! {
				_ = ticker.tick() => {
					if let Err(e) = reporting.refresh().await {
						warn!(error = %e, "token refresh failed");
					}
				},
				_ = cancel.cancelled() => break,
			}
		}
	}

	#[instrument(skip(self))]
	pub async fn run_once(&self) -> anyhow::Result<CycleOutcome> {
		// Step 1: chain-sync gate.
		if self.store.unsynced_chains_count().await? > 0 {
			info!("one or more chains unsynced, skipping cycle");
			return Ok(CycleOutcome::WaitingForChainSync);
		}

		// Step 2: bootstrap missing next_simulation_time (and, for
		// event-triggered workflows, block watermarks).
		let missing = self.store.get_missing_next_time(self.max_missing_next_sim_limit).await?;
		for document in &missing {
			self.bootstrap_next_time(document).await?;
			self.bootstrap_watermarks(document).await?;
		}

		// Step 3: select the due set.
		let due = self.store.get_due().await?;

		// Step 4: prime block watermarks for due workflows missing them.
		for document in &due {
			self.bootstrap_watermarks(document).await?;
		}

		// Step 5: reload by hash to pick up the watermarks just written.
		let hashes: Vec<ContentHash> = due.iter().map(|d| d.content_hash.clone()).collect();
		let refreshed = self.store.get_by_hashes(&hashes).await?;

		// Step 6: dispatch to the bounded worker pool.
		let dispatched = self.dispatch(refreshed).await?;

		Ok(CycleOutcome::Processed { dispatched })
	}

	async fn bootstrap_next_time(&self, document: &WorkflowDocument) -> anyhow::Result<()> {
		let Some(meta) = &document.meta else { return Ok(()) };
		let next = chain_watch::next_fire_time(meta, Utc::now())?;
		self.store
			.update(&document.content_hash, WorkflowPatch::new().with_next_simulation_time(next))
			.await?;
		Ok(())
	}

	async fn bootstrap_watermarks(&self, document: &WorkflowDocument) -> anyhow::Result<()> {
		let Some(meta) = &document.meta else { return Ok(()) };
		let mut updates: HashMap<String, BlockWatermark> = HashMap::new();
		for chain_id in meta.event_chains() {
			if document.block_watermark(chain_id).is_some() {
				continue;
			}
			// Priming: initial value is the current head, never zero, so a
			// freshly-enrolled workflow doesn't replay history (spec §4.4).
			let head = self.gate.head(chain_id).await?;
			updates.insert(chain_id.tracking_key(), BlockWatermark { last_processed_block: head, last_updated: Utc::now() });
		}
		if !updates.is_empty() {
			self.store.update(&document.content_hash, WorkflowPatch::new().with_block_tracking(updates)).await?;
		}
		Ok(())
	}

	async fn dispatch(&self, due: Vec<WorkflowDocument>) -> anyhow::Result<usize> {
		let semaphore = Arc::new(Semaphore::new(self.max_workers));
		let mut handles = Vec::with_capacity(due.len());

		for document in due {
			// I5/testable-property 2: never hand a cancelled workflow to a
			// worker.
			if document.is_cancelled {
				continue;
			}
			let permit = semaphore.clone().acquire_owned().await?;
			let store = self.store.clone();
			let gate = self.gate.clone();
			let simulator = self.simulator.clone();
			let reporting = self.reporting.clone();
			let full_node = self.full_node;

			handles.push(tokio::spawn(async move {
				let _permit = permit;
				let worker = worker::Worker::new(store, gate, simulator, reporting, full_node);
				let hash = document.content_hash.clone();
				if let Err(e) = worker.process(document).await {
					warn!(%hash, error = %e, "worker run failed");
				}
			}));
		}

		let dispatched = handles.len();
		for handle in handles {
			let _ = handle.await;
		}
		Ok(dispatched)
	}

	/// Drives `run_once` forever, sleeping between cycles per spec §4.9
	/// step 7, until `cancel` fires.
	pub async fn run_forever(&self, runner_node_sleep: Duration, chain_sync_interval: Duration, cancel: CancellationToken) {
		loop {
			if cancel.is_cancelled() {
				break;
			}
			let sleep_for = match self.run_once().await {
				Ok(CycleOutcome::WaitingForChainSync) => chain_sync_interval,
				Ok(CycleOutcome::Processed { dispatched }) => {
					info!(dispatched, "scheduler cycle complete");
					runner_node_sleep
				},
				Err(e) => {
					warn!(error = %e, "scheduler cycle failed");
					runner_node_sleep
				},
			};
			tokio::select! {
				_ = tokio::time::sleep(sleep_for) => {},
				_ = cancel.cancelled() => break,
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chain_watch::EventCheckOutcome;
	use workflow_common::{ChainId, Trigger, WorkflowMeta};
	use workflow_store::test_support::InMemoryStore;

	struct AlwaysGate;

	#[async_trait]
	impl worker::TriggerGate for AlwaysGate {
		async fn check_events(
			&self,
			_chain_id: ChainId,
			_triggers: &[Trigger],
			last_processed: u64,
		) -> anyhow::Result<EventCheckOutcome> {
			Ok(EventCheckOutcome { has_events: true, blocks_checked: 1, new_watermark: last_processed + 1 })
		}

		async fn onchain_all_true(&self, _triggers: &[Trigger]) -> anyhow::Result<bool> {
			Ok(true)
		}

		async fn head(&self, _chain_id: ChainId) -> anyhow::Result<u64> {
			Ok(1000)
		}
	}

	fn scheduler(store: Arc<InMemoryStore>) -> Scheduler<InMemoryStore> {
		Scheduler::new(
			store,
			Arc::new(AlwaysGate),
			Arc::new(worker::simulator::fake::FakeSimulator::default()),
			None,
			4,
			100,
			false,
		)
	}

	#[tokio::test]
	async fn chain_sync_gate_skips_cycle_when_unsynced() {
		let store = Arc::new(InMemoryStore::new());
		store.set_unsynced_chains(1);
		let scheduler = scheduler(store);
		assert_eq!(scheduler.run_once().await.unwrap(), CycleOutcome::WaitingForChainSync);
	}

	#[tokio::test]
	async fn bootstraps_next_simulation_time_for_cron_workflows() {
		let store = Arc::new(InMemoryStore::new());
		let mut document = WorkflowDocument::new(ContentHash::from("a".to_string()));
		document.meta = Some(WorkflowMeta {
			owner: "0x0".into(),
			triggers: vec![Trigger::Cron { schedule: "0 */2 * * * *".into() }],
			jobs: vec![],
			session: serde_json::Value::Null,
		});
		store.insert(document).await.unwrap();

		let scheduler = scheduler(store.clone());
		scheduler.run_once().await.unwrap();

		let persisted = store.find(&ContentHash::from("a".to_string())).await.unwrap().unwrap();
		assert!(persisted.next_simulation_time.is_some());
	}

	#[tokio::test]
	async fn never_dispatches_a_cancelled_workflow() {
		let store = Arc::new(InMemoryStore::new());
		let mut document = WorkflowDocument::new(ContentHash::from("b".to_string()));
		document.is_cancelled = true;
		document.next_simulation_time = Some(Utc::now() - chrono::Duration::seconds(1));
		store.insert(document).await.unwrap();

		let scheduler = scheduler(store);
		let outcome = scheduler.run_once().await.unwrap();
		assert_eq!(outcome, CycleOutcome::Processed { dispatched: 0 });
	}
}
