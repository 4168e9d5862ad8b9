//! Onchain (view-call) trigger evaluation (spec §4.5 / C5).

use crate::{abi, client::ChainReader};
use std::{sync::Arc, time::Duration};
use tracing::{instrument, warn};
use workflow_common::{Condition, OnchainCondition, Trigger};

const VIEW_CALL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_RETRIES: u32 = 1;

pub struct OnchainChecker<R: ChainReader> {
	reader: Arc<R>,
	retries: u32,
	timeout: Duration,
}

impl<R: ChainReader> OnchainChecker<R> {
	pub fn new(reader: Arc<R>) -> Self {
		Self { reader, retries: DEFAULT_RETRIES, timeout: VIEW_CALL_TIMEOUT }
	}

	pub fn with_retries(mut self, retries: u32) -> Self {
		self.retries = retries;
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	/// Evaluates every onchain trigger, pinning all of them to one head
	/// fetched at the start of the check (spec §4.5). An empty or missing
	/// trigger list yields `all_true = true`.
	#[instrument(skip(self, triggers))]
	pub async fn all_true(&self, triggers: &[Trigger]) -> anyhow::Result<bool> {
		let onchain: Vec<&Trigger> = triggers.iter().filter(|t| matches!(t, Trigger::Onchain { .. })).collect();
		if onchain.is_empty() {
			return Ok(true);
		}

		for trigger in onchain {
			let Trigger::Onchain { target, abi: abi_sig, args, chain_id, condition } = trigger else {
				unreachable!()
			};
			let head = self.reader.head(*chain_id).await?;
			if !self.evaluate_one(*chain_id, target, abi_sig, args, condition.as_ref(), head).await? {
				return Ok(false);
			}
		}
		Ok(true)
	}

	async fn evaluate_one(
		&self,
		chain_id: workflow_common::ChainId,
		target: &str,
		abi_sig: &str,
		args: &[serde_json::Value],
		condition: Option<&OnchainCondition>,
		head: u64,
	) -> anyhow::Result<bool> {
		let function = abi::parse_function(abi_sig)?;
		let calldata = abi::encode_call(&function, args)?;
		let target: ethers::types::H160 = target.parse()?;

		let mut attempt = 0u32;
		let raw = loop {
			let call = self.reader.call(chain_id, target, calldata.clone().into(), head);
			match tokio::time::timeout(self.timeout, call).await {
				Ok(Ok(bytes)) => break bytes,
				Ok(Err(e)) if attempt < self.retries => {
					warn!(error = %e, attempt, "onchain view-call failed, retrying");
					attempt += 1;
				},
				Ok(Err(e)) => return Err(e),
				Err(_) if attempt < self.retries => {
					warn!(attempt, "onchain view-call timed out, retrying");
					attempt += 1;
				},
				Err(_) => anyhow::bail!("onchain view-call timed out after {} attempts", attempt + 1),
			}
		};

		let value = abi::decode_single_output(&function, &raw)?;
		Ok(evaluate_condition(condition, &value))
	}
}

/// Absence of `condition` means "result must be boolean true" (spec §4.5).
fn evaluate_condition(condition: Option<&OnchainCondition>, actual: &serde_json::Value) -> bool {
	let Some(condition) = condition else {
		return actual.as_bool() == Some(true);
	};

	match condition.condition {
		Condition::Equal => values_equal(actual, &condition.value),
		Condition::NotEqual => !values_equal(actual, &condition.value),
		Condition::GreaterThan => compare_numeric(actual, &condition.value).is_some_and(|o| o.is_gt()),
		Condition::LessThan => compare_numeric(actual, &condition.value).is_some_and(|o| o.is_lt()),
		Condition::GreaterThanOrEqual => {
			compare_numeric(actual, &condition.value).is_some_and(|o| o.is_ge())
		},
		Condition::LessThanOrEqual => compare_numeric(actual, &condition.value).is_some_and(|o| o.is_le()),
		Condition::OneOf => condition
			.value
			.as_array()
			.is_some_and(|candidates| candidates.iter().any(|c| values_equal(actual, c))),
	}
}

fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
	match (numeric_string(a), numeric_string(b)) {
		(Some(a), Some(b)) => a == b,
		_ => a == b,
	}
}

fn compare_numeric(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
	let a: i128 = numeric_string(a)?.parse().ok()?;
	let b: i128 = numeric_string(b)?.parse().ok()?;
	Some(a.cmp(&b))
}

/// Normalizes a JSON scalar that may be a plain number or the engine's
/// string-encoded `U256` representation into a base-10 string for
/// comparison.
fn numeric_string(value: &serde_json::Value) -> Option<String> {
	if let Some(n) = value.as_i64() {
		return Some(n.to_string());
	}
	if let Some(s) = value.as_str() {
		return Some(s.to_owned());
	}
	None
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absent_condition_requires_boolean_true() {
		assert!(evaluate_condition(None, &serde_json::json!(true)));
		assert!(!evaluate_condition(None, &serde_json::json!(false)));
		assert!(!evaluate_condition(None, &serde_json::json!("5")));
	}

	#[test]
	fn equal_condition_matches_numeric_strings() {
		let condition = OnchainCondition { condition: Condition::Equal, value: serde_json::json!(5) };
		assert!(evaluate_condition(Some(&condition), &serde_json::json!("5")));
		let condition7 = OnchainCondition { condition: Condition::Equal, value: serde_json::json!(7) };
		assert!(!evaluate_condition(Some(&condition7), &serde_json::json!("5")));
	}

	#[test]
	fn greater_than_condition() {
		let condition = OnchainCondition { condition: Condition::GreaterThan, value: serde_json::json!(3) };
		assert!(evaluate_condition(Some(&condition), &serde_json::json!("5")));
		assert!(!evaluate_condition(Some(&condition), &serde_json::json!("2")));
	}

	#[test]
	fn one_of_condition() {
		let condition =
			OnchainCondition { condition: Condition::OneOf, value: serde_json::json!(["1", "2", "3"]) };
		assert!(evaluate_condition(Some(&condition), &serde_json::json!("2")));
		assert!(!evaluate_condition(Some(&condition), &serde_json::json!("9")));
	}
}
