//! Environment-driven configuration for the validation-service process
//! (spec §6), mirroring the scheduler's `clap`-derived settings.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "validation-service")]
pub struct Settings {
	#[arg(long, env = "MONGO_URI")]
	pub mongo_uri: String,

	#[arg(long, env = "DB_NAME")]
	pub db_name: String,

	#[arg(long, env = "HTTP_PORT", default_value_t = 8081)]
	pub http_port: u16,

	#[arg(long, env = "MAX_BODY_BYTES", default_value_t = 12 * 1024 * 1024)]
	pub max_body_bytes: u64,

	#[arg(long, env = "WASM_SERVER_URL")]
	pub wasm_server_url: Option<String>,

	#[arg(long, env = "IPFS_SERVICE_URL")]
	pub ipfs_service_url: Option<String>,

	#[arg(long, env = "ONCHAIN_TIMEOUT_MS", default_value_t = 5000)]
	pub onchain_timeout_ms: u64,

	#[arg(long, env = "ONCHAIN_RETRIES", default_value_t = 1)]
	pub onchain_retries: u32,

	/// See `scheduler::Settings::reporting_service_url` for why this isn't
	/// named among the spec's selected environment variables.
	#[arg(long, env = "REPORTING_SERVICE_URL")]
	pub reporting_service_url: Option<String>,

	#[arg(long, env = "EXECUTOR_PRIVATE_KEY")]
	pub executor_private_key: Option<String>,

	#[arg(long, env = "EXECUTOR_ADDRESS")]
	pub executor_address: Option<String>,

	#[arg(long, env = "IS_PROD", default_value_t = false)]
	pub is_prod: bool,
}

impl Settings {
	pub fn load() -> anyhow::Result<Self> {
		Ok(Settings::parse())
	}

	pub fn onchain_timeout(&self) -> Duration {
		Duration::from_millis(self.onchain_timeout_ms)
	}
}
