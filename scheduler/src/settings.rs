//! Environment-driven configuration for the scheduler process (spec §6),
//! layered the way the teacher's `settings.rs` combines `config` defaults
//! with `clap`-derived environment overrides.

use clap::Parser;
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "workflow-scheduler")]
pub struct Settings {
	#[arg(long, env = "MONGO_URI")]
	pub mongo_uri: String,

	#[arg(long, env = "DB_NAME")]
	pub db_name: String,

	#[arg(long, env = "MAX_WORKERS", default_value_t = 4)]
	pub max_workers: usize,

	#[arg(long, env = "RUNNER_NODE_SLEEP", default_value_t = 60)]
	pub runner_node_sleep_secs: u64,

	#[arg(long, env = "CHAIN_SYNC_CHECK_INTERVAL_MS", default_value_t = 5000)]
	pub chain_sync_check_interval_ms: u64,

	#[arg(long, env = "TOKEN_REFRESH_INTERVAL_MS", default_value_t = 3_600_000)]
	pub token_refresh_interval_ms: u64,

	#[arg(long, env = "MAX_MISSING_NEXT_SIM_LIMIT", default_value_t = 100)]
	pub max_missing_next_sim_limit: usize,

	#[arg(long, env = "FULL_NODE", default_value_t = false)]
	pub full_node: bool,

	#[arg(long, env = "ONCHAIN_TIMEOUT_MS", default_value_t = 5000)]
	pub onchain_timeout_ms: u64,

	#[arg(long, env = "ONCHAIN_RETRIES", default_value_t = 1)]
	pub onchain_retries: u32,

	#[arg(long, env = "IPFS_SERVICE_URL")]
	pub ipfs_service_url: Option<String>,

	#[arg(long, env = "EXECUTOR_PRIVATE_KEY")]
	pub executor_private_key: Option<String>,

	#[arg(long, env = "EXECUTOR_ADDRESS")]
	pub executor_address: Option<String>,

	#[arg(long, env = "WASM_SERVER_URL")]
	pub wasm_server_url: Option<String>,

	/// Base URL of the reporting service's `/operator/*` endpoints. Not
	/// named explicitly among the spec's selected environment variables;
	/// reusing `WASM_SERVER_URL` for two unrelated services would be
	/// wrong, so this crate names its own (spec §9 open question).
	#[arg(long, env = "REPORTING_SERVICE_URL")]
	pub reporting_service_url: Option<String>,

	#[arg(long, env = "HTTP_PORT", default_value_t = 8080)]
	pub http_port: u16,

	#[arg(long, env = "IS_PROD", default_value_t = false)]
	pub is_prod: bool,
}

impl Settings {
	pub fn load() -> anyhow::Result<Self> {
		Ok(Settings::parse())
	}

	pub fn runner_node_sleep(&self) -> Duration {
		Duration::from_secs(self.runner_node_sleep_secs)
	}

	pub fn chain_sync_check_interval(&self) -> Duration {
		Duration::from_millis(self.chain_sync_check_interval_ms)
	}

	pub fn token_refresh_interval(&self) -> Duration {
		Duration::from_millis(self.token_refresh_interval_ms)
	}

	pub fn onchain_timeout(&self) -> Duration {
		Duration::from_millis(self.onchain_timeout_ms)
	}
}
