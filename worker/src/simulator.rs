//! The opaque boundary to the smart-account execution library (spec §1
//! "Out of scope... given as an opaque `executeFromIpfs(...)` operation").
//!
//! This crate never constructs account-abstraction transactions itself;
//! it only defines the typed interface the worker and validation service
//! call through, and an in-memory fake for tests.

use async_trait::async_trait;
use workflow_common::{ContextRefs, SimulationResult, WorkflowDocument};

/// Dry-runs (`simulate`) or commits (`execute`) a workflow's on-chain
/// effects. `context_refs`, when present, pins the simulation to
/// previously-recorded block numbers and WASM outputs for deterministic
/// replay (spec §4.10 step 3-4, used by the validation service).
#[async_trait]
pub trait Simulator: Send + Sync {
	async fn simulate(
		&self,
		workflow: &WorkflowDocument,
		context_refs: Option<&ContextRefs>,
	) -> anyhow::Result<SimulationResult>;

	/// Commits a previously-simulated user-operation on-chain
	/// (`executeFromIpfs` in the source system); only reachable in
	/// full-node mode (spec §4.8 `Simulate -> Execute`).
	async fn execute(
		&self,
		workflow: &WorkflowDocument,
		simulation: &SimulationResult,
	) -> anyhow::Result<SimulationResult>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
	use super::*;
	use std::sync::Mutex;

	/// Scripted responses for worker/validation-api unit tests.
	#[derive(Default)]
	pub struct FakeSimulator {
		pub simulate_results: Mutex<Vec<anyhow::Result<SimulationResult>>>,
		pub execute_results: Mutex<Vec<anyhow::Result<SimulationResult>>>,
	}

	#[async_trait]
	impl Simulator for FakeSimulator {
		async fn simulate(
			&self,
			_workflow: &WorkflowDocument,
			_context_refs: Option<&ContextRefs>,
		) -> anyhow::Result<SimulationResult> {
			self.simulate_results.lock().unwrap().pop().unwrap_or_else(|| Ok(SimulationResult::default()))
		}

		async fn execute(
			&self,
			_workflow: &WorkflowDocument,
			_simulation: &SimulationResult,
		) -> anyhow::Result<SimulationResult> {
			self.execute_results.lock().unwrap().pop().unwrap_or_else(|| Ok(SimulationResult::default()))
		}
	}
}
