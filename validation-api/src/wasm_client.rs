//! Calls the WASM sandbox's HTTP surface (C3, `POST /wasm/run`) to run a
//! request-supplied validation module, bounded by a 2s budget (spec §4.10
//! step 8, §5 "validation WASM <= 2s").

use serde::Serialize;
use std::time::Duration;

const VALIDATION_WASM_TIMEOUT_MS: u64 = 2000;

pub struct WasmValidationClient {
	http: reqwest::Client,
	base_url: String,
}

#[derive(Serialize)]
struct RunRequest<'a> {
	#[serde(rename = "jobId")]
	job_id: &'a str,
	#[serde(rename = "wasmHash", skip_serializing_if = "Option::is_none")]
	wasm_hash: Option<&'a str>,
	#[serde(rename = "wasmB64")]
	wasm_b64: &'a str,
	input: serde_json::Value,
	#[serde(rename = "timeoutMs")]
	timeout_ms: u64,
}

impl WasmValidationClient {
	pub fn new(base_url: String) -> Self {
		Self { http: reqwest::Client::new(), base_url }
	}

	/// Runs `wasm_b64` against `input` and reports whether the guest's result
	/// object carries `approved == true`. Any transport failure, non-ok
	/// response, or timeout overrun is treated as a rejection, never an
	/// error: validation always answers a boolean (spec §4.10 step 9).
	pub async fn validate(
		&self,
		job_id: &str,
		wasm_b64: &str,
		wasm_hash: Option<&str>,
		input: serde_json::Value,
	) -> bool {
		match self.run(job_id, wasm_b64, wasm_hash, input).await {
			Ok(approved) => approved,
			Err(e) => {
				tracing::warn!(error = %e, job_id, "wasm validation run failed, rejecting");
				false
			},
		}
	}

	async fn run(
		&self,
		job_id: &str,
		wasm_b64: &str,
		wasm_hash: Option<&str>,
		input: serde_json::Value,
	) -> anyhow::Result<bool> {
		let url = format!("{}/wasm/run", self.base_url);
		let request = RunRequest { job_id, wasm_hash, wasm_b64, input, timeout_ms: VALIDATION_WASM_TIMEOUT_MS };

		let response: serde_json::Value = self
			.http
			.post(&url)
			.json(&request)
			.timeout(Duration::from_millis(VALIDATION_WASM_TIMEOUT_MS) + Duration::from_millis(500))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		if !response.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false) {
			return Ok(false);
		}
		let approved = response
			.get("result")
			.and_then(|r| r.get("approved"))
			.and_then(serde_json::Value::as_bool)
			.unwrap_or(false);
		Ok(approved)
	}
}
