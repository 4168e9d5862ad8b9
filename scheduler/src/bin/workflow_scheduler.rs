//! Entry point for the `workflow-scheduler` process (spec §4.9 / C9): wires
//! the Mongo-backed store, chain readers, simulator, and reporting client
//! into a `Scheduler` and drives it forever alongside a minimal HTTP health
//! surface.

use axum::{routing::get, Json, Router};
use chain_watch::RpcChainReader;
use reporting_client::ReportingClient;
use rpc_simulator::ChainRegistry;
use scheduler::{Scheduler, Settings};
use secp256k1::SecretKey;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use worker::{ChainGate, IpfsExecutorSimulator, Simulator, TriggerGate};
use workflow_store::MongoWorkflowStore;

async fn root_health() -> Json<serde_json::Value> {
	Json(serde_json::json!({ "ok": true, "service": "workflow-scheduler" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).json().init();

	let settings = Settings::load()?;
	info!(port = settings.http_port, full_node = settings.full_node, "starting workflow-scheduler");

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

	let reporting = match (&settings.executor_private_key, &settings.executor_address, &settings.reporting_service_url)
	{
		(Some(key), Some(address), Some(url)) => {
			let key_bytes = hex::decode(key.trim_start_matches("0x"))?;
			let secret_key = SecretKey::from_slice(&key_bytes)?;
			Some(ReportingClient::new(url.clone(), address.clone(), secret_key))
		},
		_ => {
			info!("reporting client not configured, reports will not be submitted");
			None
		},
	};

	let scheduler = Arc::new(Scheduler::new(
		store,
		gate,
		simulator,
		reporting,
		settings.max_workers,
		settings.max_missing_next_sim_limit,
		settings.full_node,
	));

	let cancel = CancellationToken::new();

	let run_handle = {
		let scheduler = scheduler.clone();
		let cancel = cancel.clone();
		let runner_sleep = settings.runner_node_sleep();
		let chain_sync_interval = settings.chain_sync_check_interval();
		tokio::spawn(async move { scheduler.run_forever(runner_sleep, chain_sync_interval, cancel).await })
	};

	let token_refresh_handle = {
		let scheduler = scheduler.clone();
		let cancel = cancel.clone();
		let interval = settings.token_refresh_interval();
		tokio::spawn(async move { scheduler.run_token_refresh_ticker(interval, cancel).await })
	};

	let app = Router::new().route("/health", get(root_health));
	let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.http_port)).await?;
	let server_cancel = cancel.clone();
	axum::serve(listener, app)
		.with_graceful_shutdown(async move {
			let _ = tokio::signal::ctrl_c().await;
			info!("shutdown signal received");
			server_cancel.cancel();
		})
		.await?;

	cancel.cancel();
	let _ = run_handle.await;
	let _ = token_refresh_handle.await;

	Ok(())
}
