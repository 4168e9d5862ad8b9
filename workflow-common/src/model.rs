//! The persisted workflow document and its nested types (spec §3).

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-address of an immutable payload. Doubles as the workflow's
/// primary key (I1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
	/// Computes the content hash of `bytes` as a lowercase hex-encoded SHA-256 digest.
	pub fn of(bytes: &[u8]) -> Self {
		let digest = Sha256::digest(bytes);
		Self(hex::encode(digest))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// First two hex characters, used as the cache shard directory (spec §4.3).
	pub fn shard(&self) -> &str {
		&self.0[..2.min(self.0.len())]
	}
}

impl fmt::Display for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl std::str::FromStr for ContentHash {
	type Err = std::convert::Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(s.to_owned()))
	}
}

impl From<String> for ContentHash {
	fn from(s: String) -> Self {
		Self(s)
	}
}

/// Numeric chain identifier (e.g. EVM chain id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl ChainId {
	/// The `block_tracking` / env-var key for this chain, e.g. `chain_1`.
	pub fn tracking_key(&self) -> String {
		format!("chain_{}", self.0)
	}
}

/// An indexed-parameter constraint for an event trigger's log filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicFilter {
	/// Position of the indexed parameter (0-based, excluding the signature topic).
	pub position: u8,
	/// Hex-encoded 32-byte topic value to match.
	pub value: String,
}

/// Comparison applied to the result of an on-chain view-call trigger (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
	Equal,
	NotEqual,
	GreaterThan,
	LessThan,
	GreaterThanOrEqual,
	LessThanOrEqual,
	OneOf,
}

/// An onchain trigger's expected-result condition. Absence of the enclosing
/// `Option` means "result must be boolean true" (spec §4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnchainCondition {
	pub condition: Condition,
	pub value: serde_json::Value,
}

/// A predicate that, when satisfied, admits a workflow for a processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Trigger {
	Cron {
		schedule: String,
	},
	Event {
		signature: String,
		chain_id: ChainId,
		#[serde(skip_serializing_if = "Option::is_none")]
		address: Option<String>,
		#[serde(skip_serializing_if = "Option::is_none")]
		indexed_filters: Option<Vec<TopicFilter>>,
	},
	Onchain {
		target: String,
		abi: String,
		args: Vec<serde_json::Value>,
		chain_id: ChainId,
		#[serde(skip_serializing_if = "Option::is_none")]
		condition: Option<OnchainCondition>,
	},
}

/// One unit of on-chain or WASM work within a job (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Step {
	Contract {
		target: String,
		abi: String,
		/// May contain string sentinels `"$wasm:<wasmId>"` resolved before encoding.
		args: Vec<serde_json::Value>,
		value: String,
	},
	Wasm {
		wasm_hash: ContentHash,
		wasm_id: String,
		input_json: serde_json::Value,
		timeout_ms: u64,
	},
}

impl Step {
	/// Extracts the `wasmId` referenced by a `"$wasm:<wasmId>"` sentinel, if any.
	pub fn wasm_sentinel(value: &serde_json::Value) -> Option<&str> {
		value.as_str()?.strip_prefix("$wasm:")
	}
}

/// One chain-scoped job: an ordered sequence of steps run against a single chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
	pub chain_id: ChainId,
	pub steps: Vec<Step>,
}

/// The immutable workflow payload, resolved from content-addressed storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMeta {
	pub owner: String,
	pub triggers: Vec<Trigger>,
	pub jobs: Vec<Job>,
	/// Opaque signed session-key material; not interpreted by this engine.
	#[serde(default)]
	pub session: serde_json::Value,
}

impl WorkflowMeta {
	pub fn cron_triggers(&self) -> impl Iterator<Item = &str> {
		self.triggers.iter().filter_map(|t| match t {
			Trigger::Cron { schedule } => Some(schedule.as_str()),
			_ => None,
		})
	}

	pub fn event_triggers(&self) -> impl Iterator<Item = &Trigger> {
		self.triggers.iter().filter(|t| matches!(t, Trigger::Event { .. }))
	}

	pub fn onchain_triggers(&self) -> impl Iterator<Item = &Trigger> {
		self.triggers.iter().filter(|t| matches!(t, Trigger::Onchain { .. }))
	}

	/// Distinct chains that carry at least one event trigger.
	pub fn event_chains(&self) -> Vec<ChainId> {
		let mut chains: Vec<ChainId> = self
			.event_triggers()
			.filter_map(|t| match t {
				Trigger::Event { chain_id, .. } => Some(*chain_id),
				_ => None,
			})
			.collect();
		chains.sort();
		chains.dedup();
		chains
	}
}

/// Per-chain block watermark (I3: `last_processed_block` never decreases).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlockWatermark {
	pub last_processed_block: u64,
	pub last_updated: DateTime<Utc>,
}

/// Gas cost breakdown returned by a simulated user-operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasBreakdown {
	pub estimated_gas: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub gas_price: Option<String>,
}

/// Pinned context needed to deterministically replay a simulation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextRefs {
	#[serde(default)]
	pub pinned_blocks: HashMap<String, u64>,
	#[serde(default)]
	pub wasm_outputs: HashMap<String, serde_json::Value>,
}

/// Outcome of one chain's leg of a simulation or execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerChainResult {
	pub chain_id: ChainId,
	pub start: DateTime<Utc>,
	pub finish: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user_op: Option<serde_json::Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub gas_breakdown: Option<GasBreakdown>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// A dry-run (or, once executed, the record) of a workflow's on-chain effects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
	pub success: bool,
	pub per_chain_results: Vec<PerChainResult>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub context_refs: Option<ContextRefs>,
}

/// Summary persisted into `WorkflowDocument::last_simulation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastSimulationSummary {
	pub success: bool,
	pub at: DateTime<Utc>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub per_chain: Vec<PerChainResult>,
}

/// Populated iff `is_cancelled == true` due to a policy-triggered cancellation (spec §7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
	pub reason: String,
	pub matched_pattern: String,
	pub at: DateTime<Utc>,
}

/// The persisted workflow document, keyed by `content_hash` (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
	pub content_hash: ContentHash,
	#[serde(default)]
	pub meta: Option<WorkflowMeta>,
	#[serde(default)]
	pub runs: u64,
	#[serde(default)]
	pub is_cancelled: bool,
	#[serde(default)]
	pub next_simulation_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub block_tracking: HashMap<String, BlockWatermark>,
	#[serde(default)]
	pub last_simulation: Option<LastSimulationSummary>,
	#[serde(default)]
	pub validation_details: Option<ValidationDetails>,
	/// One-shot validity window, used when a workflow has no triggers (spec §4.7 `get_due`).
	#[serde(default)]
	pub valid_after: Option<DateTime<Utc>>,
	#[serde(default)]
	pub valid_until: Option<DateTime<Utc>>,
}

impl WorkflowDocument {
	pub fn new(content_hash: ContentHash) -> Self {
		Self {
			content_hash,
			meta: None,
			runs: 0,
			is_cancelled: false,
			next_simulation_time: None,
			block_tracking: HashMap::new(),
			last_simulation: None,
			validation_details: None,
			valid_after: None,
			valid_until: None,
		}
	}

	/// I2: documents without `meta` cannot be trigger-evaluated.
	pub fn is_resolvable(&self) -> bool {
		self.meta.is_some()
	}

	pub fn block_watermark(&self, chain_id: ChainId) -> Option<BlockWatermark> {
		self.block_tracking.get(&chain_id.tracking_key()).copied()
	}
}

/// A stored WASM blob; `hash` uniquely identifies `bytes` (spec §3, law: idempotent cache).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WasmBlob {
	pub hash: ContentHash,
	#[serde(with = "bson_binary")]
	pub bytes: Vec<u8>,
	pub size: u64,
	pub stored_at: DateTime<Utc>,
}

impl WasmBlob {
	pub fn new(bytes: Vec<u8>) -> Self {
		let hash = ContentHash::of(&bytes);
		let size = bytes.len() as u64;
		Self { hash, bytes, size, stored_at: Utc::now() }
	}
}

/// `serde` helper so `Vec<u8>` round-trips through both JSON and BSON as a
/// hex string.
mod bson_binary {
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		hex::encode(bytes).serialize(s)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(d)?;
		hex::decode(encoded).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn content_hash_matches_sha256() {
		let bytes = b"hello wasm";
		let hash = ContentHash::of(bytes);
		let mut hasher = Sha256::new();
		hasher.update(bytes);
		assert_eq!(hash.as_str(), hex::encode(hasher.finalize()));
	}

	#[test]
	fn shard_is_first_two_hex_chars() {
		let hash = ContentHash::from("abcd1234".to_string());
		assert_eq!(hash.shard(), "ab");
	}

	#[test]
	fn wasm_sentinel_extracts_id() {
		let value = serde_json::json!("$wasm:step-1");
		assert_eq!(Step::wasm_sentinel(&value), Some("step-1"));
		assert_eq!(Step::wasm_sentinel(&serde_json::json!("literal")), None);
	}

	#[test]
	fn event_chains_are_deduped_and_sorted() {
		let meta = WorkflowMeta {
			owner: "0xabc".into(),
			triggers: vec![
				Trigger::Event { signature: "Foo()".into(), chain_id: ChainId(2), address: None, indexed_filters: None },
				Trigger::Event { signature: "Bar()".into(), chain_id: ChainId(1), address: None, indexed_filters: None },
				Trigger::Event { signature: "Baz()".into(), chain_id: ChainId(2), address: None, indexed_filters: None },
			],
			jobs: vec![],
			session: serde_json::Value::Null,
		};
		assert_eq!(meta.event_chains(), vec![ChainId(1), ChainId(2)]);
	}

	#[test]
	fn wasm_blob_round_trips_through_json() {
		let blob = WasmBlob::new(vec![0x00, 0x61, 0x73, 0x6d]);
		let json = serde_json::to_string(&blob).unwrap();
		let decoded: WasmBlob = serde_json::from_str(&json).unwrap();
		assert_eq!(decoded.bytes, blob.bytes);
		assert_eq!(decoded.hash, blob.hash);
	}
}
