//! Supervises one guest WASM subprocess: cache, resource limits, timeout,
//! stdout JSON parsing (spec §4.3 / C3).

use crate::{
	bridge::HostBridge,
	cache::{CacheError, WasmCache},
};
use serde::Serialize;
use serde_json::Value;
use std::{
	path::PathBuf,
	process::Stdio,
	sync::Arc,
	time::{Duration, Instant},
};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	process::{Child, Command},
};
use tracing::{instrument, warn};

pub const MAX_WASM_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_MAX_STDOUT: usize = 256 * 1024;
pub const DEFAULT_MAX_STDERR: usize = 256 * 1024;

pub struct RunRequest {
	pub job_id: String,
	pub wasm_bytes: Vec<u8>,
	pub expected_hash: Option<String>,
	pub input_json: Value,
	pub timeout_ms: u64,
	pub max_stdout: usize,
	pub max_stderr: usize,
}

#[derive(Debug, Serialize)]
#[serde(tag = "ok")]
pub enum RunOutcome {
	#[serde(rename = "true")]
	Ok { result: Value, stderr: String, duration_ms: u64 },
	#[serde(rename = "false")]
	Err { error: String, #[serde(skip_serializing_if = "Option::is_none")] stderr: Option<String>, duration_ms: u64 },
}

pub struct WasmRunner {
	cache: WasmCache,
	bridge: Arc<HostBridge>,
	engine_bin: PathBuf,
	max_wasm_bytes: usize,
	max_timeout_ms: u64,
}

impl WasmRunner {
	/// `max_wasm_bytes`/`max_timeout_ms` come from `MAX_WASM_BYTES` /
	/// `MAX_TIMEOUT_MS` (spec §6); the module consts of the same name are
	/// only the hard-coded defaults those settings start from.
	pub fn new(
		cache: WasmCache,
		bridge: Arc<HostBridge>,
		engine_bin: PathBuf,
		max_wasm_bytes: usize,
		max_timeout_ms: u64,
	) -> Self {
		Self { cache, bridge, engine_bin, max_wasm_bytes, max_timeout_ms }
	}

	#[instrument(skip(self, request), fields(job_id = %request.job_id))]
	pub async fn run(&self, request: RunRequest) -> RunOutcome {
		let started = Instant::now();

		if request.wasm_bytes.len() > self.max_wasm_bytes {
			return RunOutcome::Err {
				error: format!("wasm bytes exceed {} byte limit", self.max_wasm_bytes),
				stderr: None,
				duration_ms: elapsed_ms(started),
			};
		}
		let timeout_ms = request.timeout_ms.min(self.max_timeout_ms);

		// Step 1-2: hash check + content-addressed cache write-once.
		let (_, wasm_path) =
			match self.cache.ensure_cached(&request.wasm_bytes, request.expected_hash.as_deref()).await {
				Ok(ok) => ok,
				Err(CacheError::HashMismatch { expected, computed }) => {
					return RunOutcome::Err {
						error: format!("hashMismatch: expected {expected}, got {computed}"),
						stderr: None,
						duration_ms: elapsed_ms(started),
					};
				},
				Err(CacheError::Io(e)) => {
					return RunOutcome::Err {
						error: format!("cache write failed: {e}"),
						stderr: None,
						duration_ms: elapsed_ms(started),
					};
				},
			};

		// Step 3: ephemeral work directory, pre-opened to the guest.
		let work_dir = match tempfile::tempdir() {
			Ok(dir) => dir,
			Err(e) => {
				return RunOutcome::Err {
					error: format!("could not allocate work dir: {e}"),
					stderr: None,
					duration_ms: elapsed_ms(started),
				}
			},
		};

		let result = self.run_in(&wasm_path, work_dir.path(), &request, timeout_ms, started).await;

		// Step 10: remove the work directory; errors ignored.
		let _ = tokio::fs::remove_dir_all(work_dir.path()).await;

		result
	}

	async fn run_in(
		&self,
		wasm_path: &std::path::Path,
		work_dir: &std::path::Path,
		request: &RunRequest,
		timeout_ms: u64,
		started: Instant,
	) -> RunOutcome {
		let mut command = Command::new(&self.engine_bin);
		command
			.arg("run")
			.arg("--invoke")
			.arg("run")
			.arg("--dir")
			.arg(work_dir)
			.arg(wasm_path)
			.env("WASM_RPC_WORK_DIR", work_dir)
			.env("WASM_RPC_REQUEST_FILE", crate::bridge::REQUEST_FILE)
			.env("WASM_RPC_RESPONSE_FILE", crate::bridge::RESPONSE_FILE)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		let mut child = match command.spawn() {
			Ok(c) => c,
			Err(e) => {
				return RunOutcome::Err {
					error: format!("failed to spawn wasm engine: {e}"),
					stderr: None,
					duration_ms: elapsed_ms(started),
				}
			},
		};

		// Step 4: pipe input JSON + newline, then close stdin.
		if let Some(mut stdin) = child.stdin.take() {
			let mut payload = request.input_json.to_string().into_bytes();
			payload.push(b'\n');
			if let Err(e) = stdin.write_all(&payload).await {
				warn!(error = %e, "failed writing wasm stdin");
			}
			drop(stdin);
		}

		// Step 5: start the bridge poller alongside the child.
		let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
		let bridge = self.bridge.clone();
		let work_dir_owned = work_dir.to_path_buf();
		let poller = tokio::spawn(async move { bridge.poll_until(&work_dir_owned, stop_rx).await });

		let outcome = self.supervise(&mut child, request, timeout_ms, started).await;

		let _ = stop_tx.send(());
		let _ = poller.await;

		outcome
	}

	async fn supervise(
		&self,
		child: &mut Child,
		request: &RunRequest,
		timeout_ms: u64,
		started: Instant,
	) -> RunOutcome {
		let mut stdout = child.stdout.take().expect("stdout piped");
		let mut stderr = child.stderr.take().expect("stderr piped");

		let capture = async {
			let stdout_fut = read_capped(&mut stdout, request.max_stdout);
			let stderr_fut = read_capped(&mut stderr, request.max_stderr);
			tokio::join!(stdout_fut, stderr_fut)
		};

		tokio::select! {
			status_and_output = async {
				let (stdout_result, stderr_result) = capture.await;
				let status = child.wait().await;
				(status, stdout_result, stderr_result)
			} => {
				let (status, stdout_result, stderr_result) = status_and_output;

				// Step 6: exceeding a stdout/stderr cap kills the process.
				if stdout_result.is_err() || stderr_result.is_err() {
					let limit_name = stdout_result.as_ref().err().or(stderr_result.as_ref().err()).copied().unwrap_or("stdout/stderr");
					let _ = child.start_kill();
					return RunOutcome::Err {
						error: format!("{limit_name} size limit exceeded"),
						stderr: stderr_result.ok().map(|b| String::from_utf8_lossy(&b).into_owned()),
						duration_ms: elapsed_ms(started),
					};
				}
				let stdout_bytes = stdout_result.unwrap();
				let stderr_bytes = stderr_result.unwrap();
				let stderr_text = String::from_utf8_lossy(&stderr_bytes).into_owned();

				let status = match status {
					Ok(s) => s,
					Err(e) => {
						return RunOutcome::Err {
							error: format!("failed waiting on wasm process: {e}"),
							stderr: Some(stderr_text),
							duration_ms: elapsed_ms(started),
						}
					}
				};

				// Step 8: nonzero exit status.
				if !status.success() {
					return RunOutcome::Err {
						error: format!("exit code {}", status.code().unwrap_or(-1)),
						stderr: Some(stderr_text),
						duration_ms: elapsed_ms(started),
					};
				}

				// Step 9: trim stdout, take first non-empty line, parse as JSON.
				match parse_stdout(&stdout_bytes) {
					Ok(result) => RunOutcome::Ok { result, stderr: stderr_text, duration_ms: elapsed_ms(started) },
					Err(e) => RunOutcome::Err { error: e, stderr: Some(stderr_text), duration_ms: elapsed_ms(started) },
				}
			},
			_ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
				// Step 7: wall clock exceeded.
				let _ = child.start_kill();
				let _ = child.wait().await;
				RunOutcome::Err {
					error: format!("timeout after {timeout_ms}ms"),
					stderr: None,
					duration_ms: elapsed_ms(started),
				}
			}
		}
	}
}

/// Reads from `reader` until EOF, killing the read (and signalling the
/// caller to kill the process) once more than `limit` bytes have been seen.
/// `Err` carries which stream tripped the limit, for the caller's message.
async fn read_capped<R: tokio::io::AsyncRead + Unpin>(
	reader: &mut R,
	limit: usize,
) -> Result<Vec<u8>, &'static str> {
	let mut buf = Vec::new();
	let mut chunk = [0u8; 8192];
	loop {
		match reader.read(&mut chunk).await {
			Ok(0) => break,
			Ok(n) => {
				buf.extend_from_slice(&chunk[..n]);
				if buf.len() > limit {
					return Err("stdout/stderr");
				}
			},
			Err(_) => break,
		}
	}
	Ok(buf)
}

/// Step 9: first non-empty line of trimmed stdout, parsed as JSON.
fn parse_stdout(bytes: &[u8]) -> Result<Value, String> {
	let text = String::from_utf8_lossy(bytes);
	let trimmed = text.trim();
	let first_line = trimmed.lines().find(|l| !l.trim().is_empty());
	match first_line {
		None => Err("empty stdout".to_string()),
		Some(line) => serde_json::from_str(line).map_err(|e| format!("non-json stdout: {e}")),
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_first_non_empty_line() {
		let out = parse_stdout(b"\n  \n{\"approved\":true}\nignored trailing\n").unwrap();
		assert_eq!(out, serde_json::json!({"approved": true}));
	}

	#[test]
	fn empty_stdout_is_a_typed_error() {
		assert_eq!(parse_stdout(b"   \n\n").unwrap_err(), "empty stdout");
	}

	#[test]
	fn non_json_first_line_is_a_typed_error() {
		assert!(parse_stdout(b"not json at all").is_err());
	}
}
