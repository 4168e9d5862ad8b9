//! File-channel RPC bridge between guest WASM code and the host (spec
//! §4.2 / C2). Protocol files all live under one ephemeral work directory
//! exported to the guest via `WASM_RPC_WORK_DIR`, `WASM_RPC_REQUEST_FILE`,
//! `WASM_RPC_RESPONSE_FILE` (spec §6).

use rpc_simulator::RpcSimulator;
use serde_json::Value;
use std::{path::Path, sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};
use workflow_common::ChainId;

pub const REQUEST_FILE: &str = "wasm_rpc_request.json";
pub const RESPONSE_FILE: &str = "wasm_rpc_response.json";
pub const PROCESSING_SUFFIX: &str = ".processing";

const MAX_REQUEST_BYTES: usize = 64 * 1024;
const MAX_RESPONSE_BYTES: usize = 1024 * 1024;
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Either dispatches locally to the in-process `RpcSimulator` or forwards to
/// a configured HTTP proxy (spec §4.2 step 4).
pub enum Dispatch {
	Local(Arc<RpcSimulator>),
	Proxy { client: reqwest::Client, url: String },
}

pub struct HostBridge {
	dispatch: Dispatch,
	chain_id: Option<ChainId>,
}

impl HostBridge {
	pub fn local(simulator: Arc<RpcSimulator>, chain_id: Option<ChainId>) -> Self {
		Self { dispatch: Dispatch::Local(simulator), chain_id }
	}

	pub fn proxy(url: String, chain_id: Option<ChainId>) -> Self {
		Self { dispatch: Dispatch::Proxy { client: reqwest::Client::new(), url }, chain_id }
	}

	/// One poll of `workDir`: claims a pending request file (if any),
	/// dispatches it, and writes the response. Returns `true` if a request
	/// was processed, `false` if there was nothing to do (spec §4.2 step 1
	/// "Missing file = nothing to do").
	#[instrument(skip(self, work_dir))]
	pub async fn process(&self, work_dir: &Path) -> anyhow::Result<bool> {
		let request_path = work_dir.join(REQUEST_FILE);
		let processing_path = work_dir.join(format!("{REQUEST_FILE}{PROCESSING_SUFFIX}"));

		// Atomic claim: rename guarantees at-most-once delivery under
		// concurrent polling (spec §4.2 step 1, §8 law "bridge at-most-once").
		if let Err(e) = tokio::fs::rename(&request_path, &processing_path).await {
			if e.kind() == std::io::ErrorKind::NotFound {
				return Ok(false);
			}
			return Err(e.into());
		}

		let result = self.handle_claimed(&processing_path, work_dir).await;
		let _ = tokio::fs::remove_file(&processing_path).await;
		result.map(|()| true)
	}

	async fn handle_claimed(&self, processing_path: &Path, work_dir: &Path) -> anyhow::Result<()> {
		let raw = tokio::fs::read(processing_path).await?;

		let response = if raw.len() > MAX_REQUEST_BYTES {
			error_response(extract_id(&raw), -32600, "too large")
		} else {
			match serde_json::from_slice::<Value>(&raw) {
				Ok(_) => self.dispatch(&raw).await,
				Err(_) => error_response(Value::Null, -32700, "parse error"),
			}
		};

		let encoded = serde_json::to_vec(&response)?;
		let encoded = if encoded.len() > MAX_RESPONSE_BYTES {
			serde_json::to_vec(&error_response(extract_id(&raw), -32000, "response too large"))?
		} else {
			encoded
		};

		let response_path = work_dir.join(RESPONSE_FILE);
		let tmp_path = work_dir.join(format!("{RESPONSE_FILE}.tmp"));
		tokio::fs::write(&tmp_path, &encoded).await?;
		tokio::fs::rename(&tmp_path, &response_path).await?;
		Ok(())
	}

	async fn dispatch(&self, raw: &[u8]) -> Value {
		let id = extract_id(raw);
		match &self.dispatch {
			Dispatch::Local(simulator) => {
				serde_json::to_value(simulator.dispatch(raw, self.chain_id).await).unwrap_or(Value::Null)
			},
			Dispatch::Proxy { client, url } => {
				let send = client.post(url).header("content-type", "application/json").body(raw.to_vec()).send();
				match tokio::time::timeout(DISPATCH_TIMEOUT, send).await {
					Ok(Ok(response)) => match response.json::<Value>().await {
						Ok(v) => v,
						Err(e) => {
							warn!(error = %e, "proxy returned non-json body");
							serde_json::to_value(error_response(id, -32000, "upstream error")).unwrap()
						},
					},
					Ok(Err(e)) => {
						warn!(error = %e, "proxy dispatch failed");
						serde_json::to_value(error_response(id, -32000, e.to_string())).unwrap()
					},
					Err(_) => serde_json::to_value(error_response(id, -32000, "timeout")).unwrap(),
				}
			},
		}
	}

	/// Polls `process` every 50ms until `stop` resolves (spec §4.3 step 5).
	pub async fn poll_until(&self, work_dir: &Path, mut stop: tokio::sync::oneshot::Receiver<()>) {
		let mut interval = tokio::time::interval(Duration::from_millis(50));
		loop {
			tokio::select! {
				_ = interval.tick() => {
					if let Err(e) = self.process(work_dir).await {
						debug!(error = %e, "bridge poll iteration failed");
					}
				},
				_ = &mut stop => break,
			}
		}
	}
}

fn extract_id(raw: &[u8]) -> Value {
	serde_json::from_slice::<Value>(raw).ok().and_then(|v| v.get("id").cloned()).unwrap_or(Value::Null)
}

fn error_response(id: Value, code: i64, message: &str) -> serde_json::Value {
	serde_json::json!({
		"jsonrpc": "2.0",
		"id": id,
		"error": { "code": code, "message": message },
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use rpc_simulator::ChainRegistry;

	fn bridge() -> HostBridge {
		HostBridge::local(Arc::new(RpcSimulator::new(ChainRegistry::new())), None)
	}

	#[tokio::test]
	async fn missing_request_file_is_a_noop() {
		let dir = tempfile::tempdir().unwrap();
		let bridge = bridge();
		assert!(!bridge.process(dir.path()).await.unwrap());
	}

	#[tokio::test]
	async fn oversize_request_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let request_path = dir.path().join(REQUEST_FILE);
		let oversized = vec![b'a'; MAX_REQUEST_BYTES + 1];
		tokio::fs::write(&request_path, &oversized).await.unwrap();

		let bridge = bridge();
		assert!(bridge.process(dir.path()).await.unwrap());

		let response_path = dir.path().join(RESPONSE_FILE);
		let response: Value =
			serde_json::from_slice(&tokio::fs::read(response_path).await.unwrap()).unwrap();
		assert_eq!(response["error"]["code"], -32600);
		assert_eq!(response["error"]["message"], "too large");
	}

	#[tokio::test]
	async fn malformed_json_yields_parse_error() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join(REQUEST_FILE), b"not json").await.unwrap();

		let bridge = bridge();
		assert!(bridge.process(dir.path()).await.unwrap());

		let response: Value =
			serde_json::from_slice(&tokio::fs::read(dir.path().join(RESPONSE_FILE)).await.unwrap())
				.unwrap();
		assert_eq!(response["error"]["code"], -32700);
	}

	#[tokio::test]
	async fn concurrent_claims_deliver_at_most_once() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(
			dir.path().join(REQUEST_FILE),
			serde_json::to_vec(&serde_json::json!({"jsonrpc":"2.0","id":1,"method":"eth_sendRawTransaction","params":["0x"]})).unwrap(),
		)
		.await
		.unwrap();

		let bridge = Arc::new(bridge());
		let work_dir = dir.path().to_path_buf();
		let (a, b) = tokio::join!(
			{
				let bridge = bridge.clone();
				let work_dir = work_dir.clone();
				tokio::spawn(async move { bridge.process(&work_dir).await.unwrap() })
			},
			{
				let bridge = bridge.clone();
				let work_dir = work_dir.clone();
				tokio::spawn(async move { bridge.process(&work_dir).await.unwrap() })
			}
		);
		let processed_count = [a.unwrap(), b.unwrap()].into_iter().filter(|x| *x).count();
		assert_eq!(processed_count, 1);
	}
}
