//! JSON-RPC 2.0 envelope types (spec §4.1).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
	#[serde(default)]
	pub jsonrpc: Option<String>,
	#[serde(default)]
	pub id: Option<Value>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
	pub jsonrpc: &'static str,
	pub id: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Standard JSON-RPC 2.0 error codes used by the simulator (spec §4.1).
pub mod codes {
	pub const PARSE_ERROR: i64 = -32700;
	pub const INVALID_REQUEST: i64 = -32600;
	pub const METHOD_NOT_FOUND: i64 = -32601;
	pub const INVALID_PARAMS: i64 = -32602;
	pub const UPSTREAM_ERROR: i64 = -32000;
}

impl JsonRpcResponse {
	pub fn ok(id: Value, result: Value) -> Self {
		Self { jsonrpc: "2.0", id, result: Some(result), error: None }
	}

	pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(JsonRpcError { code, message: message.into(), data: None }),
		}
	}

	pub fn err_with_data(id: Value, code: i64, message: impl Into<String>, data: Value) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(JsonRpcError { code, message: message.into(), data: Some(data) }),
		}
	}
}
