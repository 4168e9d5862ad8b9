//! HTTP validation service (spec §4.10 / C10): re-simulates a peer's
//! proposed user-operation and approves or rejects it by deterministic
//! comparison against contexts propagated from the leader.

pub mod decode;
pub mod proof;
pub mod settings;
pub mod wasm_client;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tracing::{instrument, warn};
use worker::{Simulator, TriggerGate};
use workflow_common::{ContextRefs, PerChainResult, SimulationResult};
use workflow_store::WorkflowStore;

pub use settings::Settings;
pub use wasm_client::WasmValidationClient;

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
	#[serde(rename = "proofOfTask")]
	pub proof_of_task: String,
	pub data: String,
	#[serde(alias = "taskDefinitionID")]
	pub task_definition_id: String,
	pub performer: String,
	#[serde(rename = "targetChainId", default)]
	pub target_chain_id: Option<u64>,
	#[serde(rename = "dataRefContextSerialized", default)]
	pub data_ref_context_serialized: Option<String>,
	#[serde(rename = "wasmRefContextSerialized", default)]
	pub wasm_ref_context_serialized: Option<String>,
	#[serde(rename = "wasmB64", default)]
	pub wasm_b64: Option<String>,
	#[serde(rename = "wasmHash", default)]
	pub wasm_hash: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ValidateResponse {
	pub data: bool,
	pub error: bool,
	pub message: Option<String>,
}

impl ValidateResponse {
	pub fn reject(message: impl Into<String>) -> Self {
		Self { data: false, error: true, message: Some(message.into()) }
	}

	pub fn decided(approved: bool) -> Self {
		Self { data: approved, error: false, message: None }
	}
}

pub struct ValidationApi<S: WorkflowStore> {
	store: Arc<S>,
	gate: Arc<dyn TriggerGate>,
	simulator: Arc<dyn Simulator>,
	reporting: Option<Arc<reporting_client::ReportingClient>>,
	wasm: Option<WasmValidationClient>,
	operator_address: String,
}

impl<S: WorkflowStore> ValidationApi<S> {
	pub fn new(
		store: Arc<S>,
		gate: Arc<dyn TriggerGate>,
		simulator: Arc<dyn Simulator>,
		reporting: Option<Arc<reporting_client::ReportingClient>>,
		wasm: Option<WasmValidationClient>,
		operator_address: String,
	) -> Self {
		Self { store, gate, simulator, reporting, wasm, operator_address }
	}

	/// Runs the full `/task/validate` algorithm (spec §4.10 steps 1-9).
	#[instrument(skip(self, request), fields(proof = %request.proof_of_task))]
	pub async fn validate(&self, request: ValidateRequest) -> anyhow::Result<ValidateResponse> {
		// Step 1: validate shape.
		let proof = match proof::parse(&request.proof_of_task) {
			Ok(p) => p,
			Err(e) => return Ok(ValidateResponse::reject(format!("invalid proofOfTask: {e}"))),
		};
		if request.task_definition_id.trim().is_empty() {
			return Ok(ValidateResponse::reject("taskDefinitionId is required"));
		}
		let data_bytes = match hex::decode(request.data.trim_start_matches("0x")) {
			Ok(b) => b,
			Err(e) => return Ok(ValidateResponse::reject(format!("invalid data hex: {e}"))),
		};

		// Step 2: resolve workflow via the store; ensure a reporting token.
		let Some(document) = self.store.find(&proof.content_hash).await? else {
			return Ok(ValidateResponse::reject("unknown workflow content hash"));
		};
		if let Some(reporting) = &self.reporting {
			if let Err(e) = reporting.ensure_token().await {
				warn!(error = %e, "failed to ensure reporting token, proceeding without it");
			}
		}

		// Step 3: deserialize provided contexts (operator mode), or leave
		// undefined for a fresh simulation.
		let context_refs = match parse_context_refs(&request.data_ref_context_serialized, &request.wasm_ref_context_serialized) {
			Ok(refs) => refs,
			Err(e) => return Ok(ValidateResponse::reject(format!("invalid context: {e}"))),
		};

		// Step 4: invoke the external simulator with those contexts for a
		// deterministic replay.
		let simulation = match self.simulator.simulate(&document, context_refs.as_ref()).await {
			Ok(result) => result,
			Err(e) => {
				warn!(error = %e, "simulation failed during validation");
				SimulationResult { success: false, ..Default::default() }
			},
		};

		// Step 5: per-chain report, suppressing self-reports (spec §9 open
		// question: compared case-insensitively).
		let is_self_report = request.performer.eq_ignore_ascii_case(&self.operator_address);
		if !is_self_report {
			if let Some(reporting) = &self.reporting {
				for result in &simulation.per_chain_results {
					let head = self.gate.head(result.chain_id).await.unwrap_or(0);
					let payload = serde_json::json!({
						"contentHash": proof.content_hash.as_str(),
						"chainId": result.chain_id.0,
						"head": head,
						"success": simulation.success,
						"error": result.error,
					});
					if let Err(e) = reporting.submit_report(&payload).await {
						warn!(error = %e, "failed to submit validation report");
					}
				}
			}
		}

		// Step 6: simulation failure always rejects.
		if !simulation.success {
			return Ok(ValidateResponse::decided(false));
		}

		// Step 7: filter to targetChainId, decode the packed user operation,
		// approve iff callData and nonce both match a simulated result.
		let decoded = match decode::decode_packed_user_operation(&data_bytes) {
			Ok(d) => d,
			Err(e) => return Ok(ValidateResponse::reject(format!("invalid packed user operation: {e}"))),
		};
		let target_chain_id = request.target_chain_id;
		let matches = simulation.per_chain_results.iter().any(|result| {
			let in_scope = target_chain_id.map(|target| result.chain_id.0 == target).unwrap_or(true);
			in_scope && result_matches(result, &decoded)
		});
		if !matches {
			return Ok(ValidateResponse::decided(false));
		}

		// Step 8: optional WASM validation, bounded by a 2s budget.
		if let (Some(wasm_b64), Some(wasm)) = (&request.wasm_b64, &self.wasm) {
			let approved = wasm
				.validate(
					proof.content_hash.as_str(),
					wasm_b64,
					request.wasm_hash.as_deref(),
					serde_json::json!({ "data": request.data, "targetChainId": request.target_chain_id }),
				)
				.await;
			if !approved {
				return Ok(ValidateResponse::decided(false));
			}
		}

		// Step 9: decided.
		Ok(ValidateResponse::decided(true))
	}
}

fn result_matches(result: &PerChainResult, decoded: &decode::PackedUserOperation) -> bool {
	let Some(user_op) = &result.user_op else { return false };
	let call_data_matches = user_op
		.get("callData")
		.and_then(|v| v.as_str())
		.map(|s| s.trim_start_matches("0x").eq_ignore_ascii_case(&hex::encode(&decoded.call_data)))
		.unwrap_or(false);
	let nonce_matches = user_op
		.get("nonce")
		.and_then(|v| v.as_str())
		.map(|s| s == decoded.nonce.to_string())
		.unwrap_or(false);
	call_data_matches && nonce_matches
}

fn parse_context_refs(data_ref: &Option<String>, wasm_ref: &Option<String>) -> anyhow::Result<Option<ContextRefs>> {
	if data_ref.is_none() && wasm_ref.is_none() {
		return Ok(None);
	}
	let mut refs = ContextRefs::default();
	if let Some(raw) = data_ref {
		refs.pinned_blocks = serde_json::from_str::<HashMap<String, u64>>(raw)?;
	}
	if let Some(raw) = wasm_ref {
		refs.wasm_outputs = serde_json::from_str::<HashMap<String, serde_json::Value>>(raw)?;
	}
	Ok(Some(refs))
}

/// Axum handler: always HTTP 200 on a decidable outcome, HTTP 500 only on an
/// unexpected exception (spec §4.10 step 9, §7 "Internal").
pub async fn handle_validate<S: WorkflowStore + 'static>(
	State(api): State<Arc<ValidationApi<S>>>,
	Json(request): Json<ValidateRequest>,
) -> (StatusCode, Json<ValidateResponse>) {
	let started = std::time::Instant::now();
	let proof = request.proof_of_task.clone();
	let (status, response) = match api.validate(request).await {
		Ok(response) => (StatusCode::OK, response),
		Err(e) => {
			tracing::error!(error = %e, proof_of_task = %proof, "unexpected failure in validation handler");
			(StatusCode::INTERNAL_SERVER_ERROR, ValidateResponse::reject("internal error"))
		},
	};
	tracing::info!(
		proof_of_task = %proof,
		approved = response.data,
		error = response.error,
		latency_ms = started.elapsed().as_millis() as u64,
		"validation request handled"
	);
	(status, Json(response))
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chain_watch::EventCheckOutcome;
	use ethers::abi::{encode, Token};
	use ethers::types::{H160, U256};
	use workflow_common::{ChainId, ContentHash, Trigger, WorkflowDocument, WorkflowMeta};
	use workflow_store::test_support::InMemoryStore;

	struct FixedGate;

	#[async_trait]
	impl TriggerGate for FixedGate {
		async fn check_events(&self, _chain_id: ChainId, _triggers: &[Trigger], last_processed: u64) -> anyhow::Result<EventCheckOutcome> {
			Ok(EventCheckOutcome { has_events: false, blocks_checked: 0, new_watermark: last_processed })
		}

		async fn onchain_all_true(&self, _triggers: &[Trigger]) -> anyhow::Result<bool> {
			Ok(true)
		}

		async fn head(&self, _chain_id: ChainId) -> anyhow::Result<u64> {
			Ok(12345)
		}
	}

	struct FixedSimulator {
		result: SimulationResult,
	}

	#[async_trait]
	impl Simulator for FixedSimulator {
		async fn simulate(
			&self,
			_workflow: &WorkflowDocument,
			_context_refs: Option<&ContextRefs>,
		) -> anyhow::Result<SimulationResult> {
			Ok(self.result.clone())
		}

		async fn execute(&self, _workflow: &WorkflowDocument, simulation: &SimulationResult) -> anyhow::Result<SimulationResult> {
			Ok(simulation.clone())
		}
	}

	fn encoded_user_op(nonce: u64, call_data: Vec<u8>) -> String {
		let tokens = vec![Token::Tuple(vec![
			Token::Address(H160::repeat_byte(0xab)),
			Token::Uint(U256::from(nonce)),
			Token::Bytes(vec![]),
			Token::Bytes(call_data),
			Token::FixedBytes(vec![0u8; 32]),
			Token::Uint(U256::from(21000u64)),
			Token::FixedBytes(vec![0u8; 32]),
			Token::Bytes(vec![]),
			Token::Bytes(vec![0x01]),
		])];
		format!("0x{}", hex::encode(encode(&tokens)))
	}

	fn api_with(result: SimulationResult) -> ValidationApi<InMemoryStore> {
		ValidationApi::new(
			Arc::new(InMemoryStore::new()),
			Arc::new(FixedGate),
			Arc::new(FixedSimulator { result }),
			None,
			None,
			"0xoperator".into(),
		)
	}

	async fn seed(store: &InMemoryStore, hash: &str) {
		store.insert(WorkflowDocument::new(ContentHash::from(hash.to_string()))).await.unwrap();
	}

	#[tokio::test]
	async fn malformed_proof_of_task_rejects_with_http_200_shape() {
		let api = api_with(SimulationResult::default());
		let response = api
			.validate(ValidateRequest {
				proof_of_task: "not-enough-parts".into(),
				data: "0x".into(),
				task_definition_id: "td-1".into(),
				performer: "0xsomeone".into(),
				target_chain_id: None,
				data_ref_context_serialized: None,
				wasm_ref_context_serialized: None,
				wasm_b64: None,
				wasm_hash: None,
			})
			.await
			.unwrap();
		assert!(response.error);
		assert!(!response.data);
	}

	#[tokio::test]
	async fn matching_call_data_and_nonce_approves() {
		let store = Arc::new(InMemoryStore::new());
		seed(&store, "hash1").await;
		let mut result = SimulationResult { success: true, ..Default::default() };
		result.per_chain_results.push(PerChainResult {
			chain_id: ChainId(1),
			start: chrono::Utc::now(),
			finish: chrono::Utc::now(),
			user_op: Some(serde_json::json!({"callData": "0xabcd", "nonce": "7"})),
			gas_breakdown: None,
			error: None,
		});
		let api = ValidationApi::new(
			store,
			Arc::new(FixedGate),
			Arc::new(FixedSimulator { result }),
			None,
			None,
			"0xoperator".into(),
		);

		let response = api
			.validate(ValidateRequest {
				proof_of_task: "hash1_1700000000000_1".into(),
				data: encoded_user_op(7, vec![0xab, 0xcd]),
				task_definition_id: "td-1".into(),
				performer: "0xsomeone".into(),
				target_chain_id: Some(1),
				data_ref_context_serialized: None,
				wasm_ref_context_serialized: None,
				wasm_b64: None,
				wasm_hash: None,
			})
			.await
			.unwrap();
		assert_eq!(response, ValidateResponse::decided(true));
	}

	#[tokio::test]
	async fn mismatched_nonce_rejects() {
		let store = Arc::new(InMemoryStore::new());
		seed(&store, "hash2").await;
		let mut result = SimulationResult { success: true, ..Default::default() };
		result.per_chain_results.push(PerChainResult {
			chain_id: ChainId(1),
			start: chrono::Utc::now(),
			finish: chrono::Utc::now(),
			user_op: Some(serde_json::json!({"callData": "0xabcd", "nonce": "7"})),
			gas_breakdown: None,
			error: None,
		});
		let api = ValidationApi::new(
			store,
			Arc::new(FixedGate),
			Arc::new(FixedSimulator { result }),
			None,
			None,
			"0xoperator".into(),
		);

		let response = api
			.validate(ValidateRequest {
				proof_of_task: "hash2_1700000000000_1".into(),
				data: encoded_user_op(8, vec![0xab, 0xcd]),
				task_definition_id: "td-1".into(),
				performer: "0xsomeone".into(),
				target_chain_id: Some(1),
				data_ref_context_serialized: None,
				wasm_ref_context_serialized: None,
				wasm_b64: None,
				wasm_hash: None,
			})
			.await
			.unwrap();
		assert_eq!(response, ValidateResponse::decided(false));
	}

	#[tokio::test]
	async fn failed_simulation_always_rejects() {
		let store = Arc::new(InMemoryStore::new());
		seed(&store, "hash3").await;
		let api = ValidationApi::new(
			store,
			Arc::new(FixedGate),
			Arc::new(FixedSimulator { result: SimulationResult { success: false, ..Default::default() } }),
			None,
			None,
			"0xoperator".into(),
		);

		let response = api
			.validate(ValidateRequest {
				proof_of_task: "hash3_1700000000000_1".into(),
				data: encoded_user_op(1, vec![0x01]),
				task_definition_id: "td-1".into(),
				performer: "0xsomeone".into(),
				target_chain_id: None,
				data_ref_context_serialized: None,
				wasm_ref_context_serialized: None,
				wasm_b64: None,
				wasm_hash: None,
			})
			.await
			.unwrap();
		assert_eq!(response, ValidateResponse::decided(false));
	}

	#[tokio::test]
	async fn unknown_workflow_rejects_without_error() {
		let api = api_with(SimulationResult::default());
		let response = api
			.validate(ValidateRequest {
				proof_of_task: "missing_1700000000000_1".into(),
				data: encoded_user_op(1, vec![0x01]),
				task_definition_id: "td-1".into(),
				performer: "0xsomeone".into(),
				target_chain_id: None,
				data_ref_context_serialized: None,
				wasm_ref_context_serialized: None,
				wasm_b64: None,
				wasm_hash: None,
			})
			.await
			.unwrap();
		assert!(response.error);
	}

	#[test]
	fn accepts_either_task_definition_id_casing() {
		let via_lower: ValidateRequest = serde_json::from_value(serde_json::json!({
			"proofOfTask": "a_1_1",
			"data": "0x",
			"taskDefinitionId": "td-1",
			"performer": "0x0",
		}))
		.unwrap();
		assert_eq!(via_lower.task_definition_id, "td-1");

		let via_upper: ValidateRequest = serde_json::from_value(serde_json::json!({
			"proofOfTask": "a_1_1",
			"data": "0x",
			"taskDefinitionID": "td-2",
			"performer": "0x0",
		}))
		.unwrap();
		assert_eq!(via_upper.task_definition_id, "td-2");
	}
}
