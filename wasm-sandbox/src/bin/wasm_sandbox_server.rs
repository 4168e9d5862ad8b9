//! Standalone HTTP surface for the WASM sandbox (spec §6):
//! `POST /wasm/run`, `GET /wasm/health`, `GET /health`.

use anyhow::Context;
use axum::{
	extract::{DefaultBodyLimit, State},
	routing::{get, post},
	Json, Router,
};
use rpc_simulator::{ChainRegistry, RpcSimulator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use wasm_sandbox::{
	bridge::HostBridge, cache::WasmCache, runner::RunRequest, settings::Settings, WasmRunner,
};

#[derive(Clone)]
struct AppState {
	runner: Arc<WasmRunner>,
}

#[derive(Debug, Deserialize)]
struct RunHttpRequest {
	job_id: String,
	#[serde(default)]
	wasm_hash: Option<String>,
	wasm_b64: String,
	input: serde_json::Value,
	timeout_ms: u64,
	#[serde(default)]
	max_stdout_bytes: Option<usize>,
	#[serde(default)]
	max_stderr_bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RunHttpResponse {
	#[serde(rename = "jobId")]
	job_id: String,
	ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	result: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	stderr: Option<String>,
	#[serde(rename = "durationMs")]
	duration_ms: u64,
}

async fn run_handler(
	State(state): State<AppState>,
	Json(request): Json<RunHttpRequest>,
) -> Json<RunHttpResponse> {
	let wasm_bytes = match decode_base64(&request.wasm_b64) {
		Ok(bytes) => bytes,
		Err(e) => {
			return Json(RunHttpResponse {
				job_id: request.job_id,
				ok: false,
				result: None,
				error: Some(format!("invalid wasmB64: {e}")),
				stderr: None,
				duration_ms: 0,
			})
		},
	};

	let outcome = state
		.runner
		.run(RunRequest {
			job_id: request.job_id.clone(),
			wasm_bytes,
			expected_hash: request.wasm_hash,
			input_json: request.input,
			timeout_ms: request.timeout_ms,
			max_stdout: request.max_stdout_bytes.unwrap_or(wasm_sandbox::runner::DEFAULT_MAX_STDOUT),
			max_stderr: request.max_stderr_bytes.unwrap_or(wasm_sandbox::runner::DEFAULT_MAX_STDERR),
		})
		.await;

	Json(match outcome {
		wasm_sandbox::RunOutcome::Ok { result, stderr, duration_ms } => RunHttpResponse {
			job_id: request.job_id,
			ok: true,
			result: Some(result),
			error: None,
			stderr: Some(stderr),
			duration_ms,
		},
		wasm_sandbox::RunOutcome::Err { error, stderr, duration_ms } => RunHttpResponse {
			job_id: request.job_id,
			ok: false,
			result: None,
			error: Some(error),
			stderr,
			duration_ms,
		},
	})
}

fn decode_base64(input: &str) -> anyhow::Result<Vec<u8>> {
	use base64::{engine::general_purpose::STANDARD, Engine};
	STANDARD.decode(input).context("invalid base64")
}

async fn wasm_health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "ok": true }))
}

async fn root_health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "ok": true, "service": "wasm-sandbox" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

	let settings = Settings::load()?;
	info!(port = settings.http_port, "starting wasm-sandbox-server");

	let chains = ChainRegistry::from_env().unwrap_or_default();
	let simulator = Arc::new(RpcSimulator::new(chains));
	let bridge = Arc::new(match &settings.rpc_proxy_url {
		Some(url) => HostBridge::proxy(url.clone(), None),
		None => HostBridge::local(simulator, None),
	});
	let cache = WasmCache::new(settings.wasm_cache_dir.clone());
	let runner = Arc::new(WasmRunner::new(
		cache,
		bridge,
		settings.wasm_engine_bin.clone(),
		settings.max_wasm_bytes as usize,
		settings.max_timeout_ms,
	));

	let state = AppState { runner };

	let app = Router::new()
		.route("/wasm/run", post(run_handler))
		.route("/wasm/health", get(wasm_health))
		.route("/health", get(root_health))
		.layer(DefaultBodyLimit::max(settings.max_body_bytes as usize))
		.layer(TraceLayer::new_for_http())
		.with_state(state);

	let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.http_port)).await?;
	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
		})
		.await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use base64::{engine::general_purpose::STANDARD, Engine};

	#[test]
	fn base64_round_trips_small_inputs() {
		let bytes = b"\0asm\x01\x00\x00\x00";
		let encoded = STANDARD.encode(bytes);
		let decoded = decode_base64(&encoded).unwrap();
		assert_eq!(decoded, bytes);
	}

	#[test]
	fn rejects_invalid_base64() {
		assert!(decode_base64("not base64 !!!").is_err());
	}
}
