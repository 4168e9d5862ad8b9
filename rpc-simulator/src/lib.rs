//! Whitelisted read-only JSON-RPC dispatcher over per-chain clients (spec
//! §4.1 / C1). This is the only component that is allowed to reach an
//! actual blockchain node; guest WASM code only ever talks to it through
//! the host bridge (C2).

pub mod chains;
pub mod types;

use ethers::{
	providers::{Http, Middleware, Provider},
	types::{BlockId, BlockNumber, H160, U256},
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{instrument, warn};
use workflow_common::ChainId;

pub use chains::ChainRegistry;
pub use types::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// The closed set of methods the simulator will forward upstream. Every
/// signing/sending method (`eth_sendTransaction`, `eth_sendRawTransaction`,
/// `personal_*`, ...) is absent by construction (spec §4.1).
const ALLOWED_METHODS: &[&str] = &[
	"eth_blockNumber",
	"eth_chainId",
	"net_version",
	"web3_clientVersion",
	"eth_getBalance",
	"eth_getTransactionCount",
	"eth_getCode",
	"eth_getStorageAt",
	"eth_call",
	"eth_estimateGas",
	"eth_getBlockByNumber",
	"eth_getBlockByHash",
	"eth_getTransactionByHash",
	"eth_getTransactionReceipt",
];

const WEB3_CLIENT_VERSION_BANNER: &str = "workflow-engine-rpc-simulator/1.0";

/// Distinguishes a malformed/missing parameter (-32602) from a genuine
/// upstream provider failure (-32000) so `dispatch` can map each to the
/// right JSON-RPC error code.
#[derive(Debug)]
enum CallError {
	InvalidParams(String),
	Upstream(anyhow::Error),
}

impl std::fmt::Display for CallError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			CallError::InvalidParams(msg) => write!(f, "{msg}"),
			CallError::Upstream(e) => write!(f, "{e}"),
		}
	}
}

impl std::error::Error for CallError {}

impl From<ethers::providers::ProviderError> for CallError {
	fn from(e: ethers::providers::ProviderError) -> Self {
		CallError::Upstream(e.into())
	}
}

pub struct RpcSimulator {
	chains: ChainRegistry,
	upstream_timeout: Duration,
}

impl RpcSimulator {
	pub fn new(chains: ChainRegistry) -> Self {
		Self { chains, upstream_timeout: Duration::from_secs(5) }
	}

	/// Dispatches one JSON-RPC request against `chain_id` (or the default
	/// chain when `None`). Never returns an `Err` — every failure mode is
	/// encoded as a JSON-RPC error object per spec §4.1.
	#[instrument(skip(self, raw), fields(chain_id))]
	pub async fn dispatch(&self, raw: &[u8], chain_id: Option<ChainId>) -> JsonRpcResponse {
		let parsed: Value = match serde_json::from_slice(raw) {
			Ok(v) => v,
			Err(_) => return JsonRpcResponse::err(Value::Null, codes::PARSE_ERROR, "parse error"),
		};

		let request: JsonRpcRequest = match serde_json::from_value(parsed.clone()) {
			Ok(r) => r,
			Err(_) => {
				let id = parsed.get("id").cloned().unwrap_or(Value::Null);
				return JsonRpcResponse::err(id, codes::INVALID_REQUEST, "invalid request envelope");
			},
		};

		let id = request.id.clone().unwrap_or(Value::Null);

		if request.jsonrpc.as_deref() != Some("2.0") {
			return JsonRpcResponse::err(id, codes::INVALID_REQUEST, "jsonrpc must be \"2.0\"");
		}

		if !ALLOWED_METHODS.contains(&request.method.as_str()) {
			return JsonRpcResponse::err(
				id,
				codes::METHOD_NOT_FOUND,
				format!("method not found: {}", request.method),
			);
		}

		let resolved_chain = chain_id.or_else(|| self.chains.default_chain());
		let Some(resolved_chain) = resolved_chain else {
			return JsonRpcResponse::err(id, codes::UPSTREAM_ERROR, "no chain configured");
		};
		let Some(client) = self.chains.client(resolved_chain) else {
			return JsonRpcResponse::err(
				id,
				codes::UPSTREAM_ERROR,
				format!("no client configured for chain {resolved_chain}"),
			);
		};

		match tokio::time::timeout(self.upstream_timeout, self.call(&client, &request)).await {
			Ok(Ok(result)) => JsonRpcResponse::ok(id, result),
			Ok(Err(CallError::InvalidParams(message))) => {
				JsonRpcResponse::err(id, codes::INVALID_PARAMS, message)
			},
			Ok(Err(CallError::Upstream(e))) => {
				warn!(error = %e, method = %request.method, "upstream rpc call failed");
				JsonRpcResponse::err(id, codes::UPSTREAM_ERROR, e.to_string())
			},
			Err(_) => JsonRpcResponse::err(id, codes::UPSTREAM_ERROR, "upstream timeout"),
		}
	}

	async fn call(&self, client: &Provider<Http>, request: &JsonRpcRequest) -> Result<Value, CallError> {
		let params = request.params.as_array().cloned().unwrap_or_default();

		match request.method.as_str() {
			"web3_clientVersion" => Ok(json!(WEB3_CLIENT_VERSION_BANNER)),
			"eth_blockNumber" => {
				let n = Middleware::get_block_number(client).await?;
				Ok(json!(format!("{n:#x}")))
			},
			"eth_chainId" => {
				let n = Middleware::get_chainid(client).await?;
				Ok(json!(format!("{n:#x}")))
			},
			"net_version" => {
				let n = Middleware::get_chainid(client).await?;
				Ok(json!(n.to_string()))
			},
			"eth_getBalance" => {
				let address = param_address(&params, 0)?;
				let block = param_block(&params, 1);
				let balance = Middleware::get_balance(client, address, block).await?;
				Ok(json!(format!("{balance:#x}")))
			},
			"eth_getTransactionCount" => {
				let address = param_address(&params, 0)?;
				let block = param_block(&params, 1);
				let count = Middleware::get_transaction_count(client, address, block).await?;
				Ok(json!(format!("{count:#x}")))
			},
			"eth_getCode" => {
				let address = param_address(&params, 0)?;
				let block = param_block(&params, 1);
				let code = Middleware::get_code(client, address, block).await?;
				Ok(json!(format!("0x{}", hex::encode(code))))
			},
			"eth_getStorageAt" => {
				let address = param_address(&params, 0)?;
				let slot_raw = params
					.get(1)
					.and_then(|v| v.as_str())
					.ok_or_else(|| CallError::InvalidParams("missing storage slot".into()))?;
				let slot = slot_raw.parse().map_err(|e| CallError::InvalidParams(format!("invalid storage slot: {e}")))?;
				let block = param_block(&params, 2);
				let value = Middleware::get_storage_at(client, address, slot, block).await?;
				Ok(json!(format!("{value:#x}")))
			},
			"eth_call" => {
				let tx = params.first().cloned().ok_or_else(|| CallError::InvalidParams("missing call object".into()))?;
				let typed_tx: ethers::types::transaction::eip2718::TypedTransaction =
					serde_json::from_value(tx).map_err(|e| CallError::InvalidParams(format!("invalid call object: {e}")))?;
				let block = param_block(&params, 1);
				let result = Middleware::call(client, &typed_tx, block).await?;
				Ok(json!(format!("0x{}", hex::encode(result))))
			},
			"eth_estimateGas" => {
				let tx = params.first().cloned().ok_or_else(|| CallError::InvalidParams("missing call object".into()))?;
				let typed_tx: ethers::types::transaction::eip2718::TypedTransaction =
					serde_json::from_value(tx).map_err(|e| CallError::InvalidParams(format!("invalid call object: {e}")))?;
				let gas = Middleware::estimate_gas(client, &typed_tx, None).await?;
				Ok(json!(format!("{gas:#x}")))
			},
			"eth_getBlockByNumber" => {
				let block = param_block(&params, 0).unwrap_or(BlockId::Number(BlockNumber::Latest));
				let full = params.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
				let block = Middleware::get_block(client, block).await?;
				Ok(block_json(block, full))
			},
			"eth_getBlockByHash" => {
				let raw = params
					.first()
					.and_then(|v| v.as_str())
					.ok_or_else(|| CallError::InvalidParams("missing block hash".into()))?;
				let hash: ethers::types::H256 =
					raw.parse().map_err(|e| CallError::InvalidParams(format!("invalid block hash: {e}")))?;
				let full = params.get(1).and_then(|v| v.as_bool()).unwrap_or(false);
				let block = Middleware::get_block(client, hash).await?;
				Ok(block_json(block, full))
			},
			"eth_getTransactionByHash" => {
				let raw = params
					.first()
					.and_then(|v| v.as_str())
					.ok_or_else(|| CallError::InvalidParams("missing tx hash".into()))?;
				let hash: ethers::types::H256 =
					raw.parse().map_err(|e| CallError::InvalidParams(format!("invalid tx hash: {e}")))?;
				let tx = Middleware::get_transaction(client, hash).await?;
				serde_json::to_value(tx).map_err(|e| CallError::Upstream(e.into()))
			},
			"eth_getTransactionReceipt" => {
				let raw = params
					.first()
					.and_then(|v| v.as_str())
					.ok_or_else(|| CallError::InvalidParams("missing tx hash".into()))?;
				let hash: ethers::types::H256 =
					raw.parse().map_err(|e| CallError::InvalidParams(format!("invalid tx hash: {e}")))?;
				let receipt = Middleware::get_transaction_receipt(client, hash).await?;
				serde_json::to_value(receipt).map_err(|e| CallError::Upstream(e.into()))
			},
			other => Err(CallError::Upstream(anyhow::anyhow!("unreachable: unwhitelisted method {other} dispatched"))),
		}
	}
}

fn param_address(params: &[Value], idx: usize) -> Result<H160, CallError> {
	let raw = params
		.get(idx)
		.and_then(|v| v.as_str())
		.ok_or_else(|| CallError::InvalidParams("missing address param".into()))?;
	raw.parse().map_err(|e| CallError::InvalidParams(format!("invalid address: {e}")))
}

fn param_block(params: &[Value], idx: usize) -> Option<BlockId> {
	let raw = params.get(idx)?.as_str()?;
	match raw {
		"latest" => Some(BlockId::Number(BlockNumber::Latest)),
		"earliest" => Some(BlockId::Number(BlockNumber::Earliest)),
		"pending" => Some(BlockId::Number(BlockNumber::Pending)),
		hex_block => {
			let n = U256::from_str_radix(hex_block.trim_start_matches("0x"), 16).ok()?;
			Some(BlockId::Number(BlockNumber::Number(n.as_u64().into())))
		},
	}
}

fn block_json<TX: serde::Serialize>(block: Option<ethers::types::Block<TX>>, _full: bool) -> Value {
	match block {
		Some(b) => serde_json::to_value(b).unwrap_or(Value::Null),
		None => Value::Null,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn rejects_unwhitelisted_methods() {
		let simulator = RpcSimulator::new(ChainRegistry::new());
		let raw = serde_json::to_vec(&json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "eth_sendRawTransaction",
			"params": ["0x"],
		}))
		.unwrap();

		let response = simulator.dispatch(&raw, None).await;
		assert_eq!(response.error.as_ref().unwrap().code, codes::METHOD_NOT_FOUND);
		assert!(response.result.is_none());
	}

	#[tokio::test]
	async fn rejects_malformed_json() {
		let simulator = RpcSimulator::new(ChainRegistry::new());
		let response = simulator.dispatch(b"not json", None).await;
		assert_eq!(response.error.as_ref().unwrap().code, codes::PARSE_ERROR);
	}

	#[tokio::test]
	async fn rejects_wrong_jsonrpc_version() {
		let simulator = RpcSimulator::new(ChainRegistry::new());
		let raw = serde_json::to_vec(&json!({
			"jsonrpc": "1.0",
			"id": 1,
			"method": "eth_blockNumber",
			"params": [],
		}))
		.unwrap();
		let response = simulator.dispatch(&raw, None).await;
		assert_eq!(response.error.as_ref().unwrap().code, codes::INVALID_REQUEST);
	}

	#[tokio::test]
	async fn errors_when_no_chain_configured() {
		let simulator = RpcSimulator::new(ChainRegistry::new());
		let raw = serde_json::to_vec(&json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "eth_blockNumber",
			"params": [],
		}))
		.unwrap();
		let response = simulator.dispatch(&raw, None).await;
		assert_eq!(response.error.as_ref().unwrap().code, codes::UPSTREAM_ERROR);
	}

	#[tokio::test]
	async fn missing_param_returns_invalid_params_not_upstream_error() {
		let mut chains = ChainRegistry::new();
		chains.insert(ChainId(1), "http://localhost:1").unwrap();
		let simulator = RpcSimulator::new(chains);
		let raw = serde_json::to_vec(&json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "eth_getBalance",
			"params": [],
		}))
		.unwrap();
		let response = simulator.dispatch(&raw, None).await;
		assert_eq!(response.error.as_ref().unwrap().code, codes::INVALID_PARAMS);
	}
}
