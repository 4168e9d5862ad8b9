//! Thin HTTP adapter over the opaque smart-account execution library (spec
//! §1 "given as an opaque `executeFromIpfs(...)` operation"). This crate
//! never builds account-abstraction transactions itself; it posts the
//! resolved workflow document to an external executor service and decodes
//! its `SimulationResult` response, the same backoff/retry shape the
//! reporting client uses for its own HTTP calls.

use async_trait::async_trait;
use reqwest::Client;
use workflow_common::{
	backoff::{retry_with_backoff, REPORTING_BACKOFF},
	ContextRefs, SimulationResult, WorkflowDocument,
};

use crate::Simulator;

pub struct IpfsExecutorSimulator {
	http: Client,
	base_url: String,
}

impl IpfsExecutorSimulator {
	pub fn new(base_url: String) -> Self {
		Self { http: Client::new(), base_url }
	}

	async fn post(&self, path: &str, body: serde_json::Value) -> anyhow::Result<SimulationResult> {
		let url = format!("{}{path}", self.base_url);
		let response = retry_with_backoff(
			&REPORTING_BACKOFF,
			|| async { self.http.post(&url).json(&body).send().await },
			|e| e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()),
		)
		.await?;
		Ok(response.error_for_status()?.json::<SimulationResult>().await?)
	}
}

#[async_trait]
impl Simulator for IpfsExecutorSimulator {
	async fn simulate(
		&self,
		workflow: &WorkflowDocument,
		context_refs: Option<&ContextRefs>,
	) -> anyhow::Result<SimulationResult> {
		self.post(
			"/executeFromIpfs/simulate",
			serde_json::json!({
				"contentHash": workflow.content_hash.as_str(),
				"meta": workflow.meta,
				"contextRefs": context_refs,
			}),
		)
		.await
	}

	async fn execute(&self, workflow: &WorkflowDocument, simulation: &SimulationResult) -> anyhow::Result<SimulationResult> {
		self.post(
			"/executeFromIpfs/execute",
			serde_json::json!({
				"contentHash": workflow.content_hash.as_str(),
				"meta": workflow.meta,
				"simulation": simulation,
			}),
		)
		.await
	}
}
