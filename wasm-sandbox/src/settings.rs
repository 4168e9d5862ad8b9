//! Configuration for the standalone `wasm-sandbox-server` binary, matching
//! the teacher's `config` + `clap` layering (spec §6 environment list).

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser, Deserialize)]
#[command(name = "wasm-sandbox-server")]
pub struct Settings {
	#[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
	#[serde(default = "default_http_port")]
	pub http_port: u16,

	#[arg(long, env = "MAX_WASM_BYTES", default_value_t = crate::runner::MAX_WASM_BYTES as u64)]
	#[serde(default)]
	pub max_wasm_bytes: u64,

	#[arg(long, env = "MAX_TIMEOUT_MS", default_value_t = crate::runner::MAX_TIMEOUT_MS)]
	#[serde(default)]
	pub max_timeout_ms: u64,

	#[arg(long, env = "MAX_BODY_BYTES", default_value_t = 12 * 1024 * 1024)]
	#[serde(default)]
	pub max_body_bytes: u64,

	#[arg(long, env = "WASM_CACHE_DIR", default_value = "/var/lib/workflow-engine/wasm-cache")]
	#[serde(default)]
	pub wasm_cache_dir: PathBuf,

	#[arg(long, env = "WASM_ENGINE_BIN", default_value = "wasmtime")]
	#[serde(default)]
	pub wasm_engine_bin: PathBuf,

	#[arg(long, env = "RPC_PROXY_URL")]
	pub rpc_proxy_url: Option<String>,
}

fn default_http_port() -> u16 {
	8080
}

impl Settings {
	pub fn load() -> anyhow::Result<Self> {
		Ok(Settings::parse())
	}
}
