//! Entry point for the `validation-service` process (spec §4.10 / C10): a
//! stateless HTTP surface that re-simulates a peer's proposed operation and
//! answers with a boolean approval.

use axum::{
	extract::DefaultBodyLimit,
	routing::{get, post},
	Json, Router,
};
use chain_watch::RpcChainReader;
use reporting_client::ReportingClient;
use rpc_simulator::ChainRegistry;
use secp256k1::SecretKey;
use std::sync::Arc;
use tracing::info;
use validation_api::{handle_validate, Settings, ValidationApi, WasmValidationClient};
use worker::{ChainGate, IpfsExecutorSimulator, Simulator, TriggerGate};
use workflow_store::MongoWorkflowStore;

async fn root_health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "ok": true, "service": "validation-service" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

	let settings = Settings::load()?;
	info!(port = settings.http_port, "starting validation-service");

	let store = Arc::new(MongoWorkflowStore::connect(&settings.mongo_uri, &settings.db_name).await?);

	let chains = Arc::new(ChainRegistry::from_env()?);
	let reader = Arc::new(RpcChainReader::new(chains));
	let gate: Arc<dyn TriggerGate> =
		Arc::new(ChainGate::new(reader, settings.onchain_timeout(), settings.onchain_retries));

	let ipfs_service_url = settings
		.ipfs_service_url
		.clone()
		.ok_or_else(|| anyhow::anyhow!("IPFS_SERVICE_URL is required to reach the execution library"))?;
	let simulator: Arc<dyn Simulator> = Arc::new(IpfsExecutorSimulator::new(ipfs_service_url));

	let (reporting, operator_address) =
		match (&settings.executor_private_key, &settings.executor_address, &settings.reporting_service_url) {
			(Some(key), Some(address), Some(url)) => {
				let key_bytes = hex::decode(key.trim_start_matches("0x"))?;
				let secret_key = SecretKey::from_slice(&key_bytes)?;
				(Some(ReportingClient::new(url.clone(), address.clone(), secret_key)), address.clone())
			},
			(_, address, _) => {
				info!("reporting client not configured, self-reports cannot be suppressed by address match");
				(None, address.clone().unwrap_or_default())
			},
		};

	let wasm = settings.wasm_server_url.clone().map(WasmValidationClient::new);

	let api = Arc::new(ValidationApi::new(store, gate, simulator, reporting, wasm, operator_address));

	let app = Router::new()
		.route("/health", get(root_health))
		.route("/task/validate", post(handle_validate::<MongoWorkflowStore>))
		.layer(DefaultBodyLimit::max(settings.max_body_bytes as usize))
		.with_state(api);

	let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.http_port)).await?;
	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
		})
		.await?;

	Ok(())
}
