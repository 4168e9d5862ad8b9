//! `proofOfTask` parsing (spec §4.10): `"<contentHash>_<nextSimulationTimeEpochMs>_<chainId>"`,
//! any further underscore-separated segments are ignored.

use chrono::{DateTime, TimeZone, Utc};
use workflow_common::{ChainId, ContentHash};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProofError {
	#[error("proofOfTask has fewer than 3 underscore-separated segments")]
	TooFewSegments,
	#[error("proofOfTask segment is not a valid timestamp")]
	BadTimestamp,
	#[error("proofOfTask epoch-milliseconds timestamp is implausible")]
	ImplausibleTimestamp,
	#[error("proofOfTask segment is not a valid chain id")]
	BadChainId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProofOfTask {
	pub content_hash: ContentHash,
	pub next_simulation_time: DateTime<Utc>,
	pub chain_id: ChainId,
}

/// Sanity bounds on the epoch-milliseconds timestamp (spec §9: "this spec
/// chose epoch milliseconds... a conforming implementation should... surface
/// a schema error if the value is implausible"). A value that parses cleanly
/// as epoch *seconds* instead lands in 1970-2001 when read as milliseconds;
/// reject anything before 2015 or implausibly far in the future.
const MIN_PLAUSIBLE_MS: i64 = 1_420_070_400_000; // 2015-01-01T00:00:00Z
const MAX_PLAUSIBLE_MS: i64 = 4_102_444_800_000; // 2100-01-01T00:00:00Z

pub fn parse(raw: &str) -> Result<ProofOfTask, ProofError> {
	let mut parts = raw.splitn(4, '_');
	let content_hash = parts.next().ok_or(ProofError::TooFewSegments)?;
	let epoch_ms_raw = parts.next().ok_or(ProofError::TooFewSegments)?;
	let chain_id_raw = parts.next().ok_or(ProofError::TooFewSegments)?;

	let epoch_ms: i64 = epoch_ms_raw.parse().map_err(|_| ProofError::BadTimestamp)?;
	if !(MIN_PLAUSIBLE_MS..=MAX_PLAUSIBLE_MS).contains(&epoch_ms) {
		return Err(ProofError::ImplausibleTimestamp);
	}
	let next_simulation_time = Utc.timestamp_millis_opt(epoch_ms).single().ok_or(ProofError::BadTimestamp)?;

	let chain_id: u64 = chain_id_raw.parse().map_err(|_| ProofError::BadChainId)?;

	Ok(ProofOfTask { content_hash: ContentHash::from(content_hash.to_owned()), next_simulation_time, chain_id: ChainId(chain_id) })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_well_formed_proof() {
		let proof = parse("abc123_1700000000000_1").unwrap();
		assert_eq!(proof.content_hash.as_str(), "abc123");
		assert_eq!(proof.chain_id, ChainId(1));
	}

	#[test]
	fn ignores_trailing_segments() {
		let proof = parse("abc123_1700000000000_1_extra_stuff").unwrap();
		assert_eq!(proof.chain_id, ChainId(1));
	}

	#[test]
	fn rejects_too_few_segments() {
		assert_eq!(parse("abc123_1700000000000"), Err(ProofError::TooFewSegments));
	}

	#[test]
	fn rejects_seconds_mistaken_for_milliseconds() {
		// A plausible epoch-seconds value, read as milliseconds, lands in 1970.
		assert_eq!(parse("abc123_1700000000_1"), Err(ProofError::ImplausibleTimestamp));
	}

	#[test]
	fn rejects_non_numeric_chain_id() {
		assert_eq!(parse("abc123_1700000000000_not-a-chain"), Err(ProofError::BadChainId));
	}
}
