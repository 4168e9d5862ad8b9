//! Error classification shared by every component (spec §7).

use std::fmt;

/// The five error kinds named in spec §7. Each component maps its failures
/// into one of these so the caller's policy (retry, cancel, report, reject,
/// 500) is decided in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
	/// Network failure, 5xx, RPC timeout, transaction-number error on a
	/// non-replica-set database. Policy: retry with backoff, or fall back.
	Transient,
	/// The single failure class `AA23 reverted ... 0xc48cf8ee`. Policy: set
	/// `is_cancelled=true`, persist `validation_details`, stop processing.
	CancelWorthy,
	/// All other simulation/execution failures. Policy: record and
	/// reschedule normally.
	ReportAndContinue,
	/// Malformed `proofOfTask`, bad hex, oversize body. Policy: negative
	/// decision returned with HTTP 200, never 5xx.
	Schema,
	/// Unexpected exception paths. Policy: HTTP 500 on the validation
	/// surface; logged and counted elsewhere.
	Internal,
}

/// The top-level error type threaded through the engine's library crates.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
	#[error("transient: {0}")]
	Transient(String),
	#[error("cancel-worthy: {reason} (pattern {pattern})")]
	CancelWorthy { reason: String, pattern: &'static str },
	#[error("{0}")]
	ReportAndContinue(String),
	#[error("schema: {0}")]
	Schema(String),
	#[error("internal: {0}")]
	Internal(#[from] anyhow::Error),
}

impl EngineError {
	pub fn class(&self) -> ErrorClass {
		match self {
			EngineError::Transient(_) => ErrorClass::Transient,
			EngineError::CancelWorthy { .. } => ErrorClass::CancelWorthy,
			EngineError::ReportAndContinue(_) => ErrorClass::ReportAndContinue,
			EngineError::Schema(_) => ErrorClass::Schema,
			EngineError::Internal(_) => ErrorClass::Internal,
		}
	}
}

/// The literal substring and literal code that together identify the sole
/// cancel-worthy failure class (spec §4.8, §7).
pub const CANCEL_PATTERN_MESSAGE: &str = "AA23 reverted";
pub const CANCEL_PATTERN_CODE: &str = "0xc48cf8ee";

/// Classifies a raw simulation/execution error message per spec §4.8.
///
/// Returns `CancelWorthy` only when both the literal message substring and
/// the literal revert code are present; everything else is
/// `ReportAndContinue`.
pub fn classify_execution_error(message: &str) -> ErrorClass {
	if message.contains(CANCEL_PATTERN_MESSAGE) && message.contains(CANCEL_PATTERN_CODE) {
		ErrorClass::CancelWorthy
	} else {
		ErrorClass::ReportAndContinue
	}
}

impl fmt::Display for ErrorClass {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ErrorClass::Transient => "transient",
			ErrorClass::CancelWorthy => "cancel-worthy",
			ErrorClass::ReportAndContinue => "report-and-continue",
			ErrorClass::Schema => "schema",
			ErrorClass::Internal => "internal",
		};
		f.write_str(s)
	}
}

/// Ordered list of `(regex, canonical short form)` pairs used to summarize
/// simulation/execution errors before persisting them (spec §4.8). Unmatched
/// messages are truncated to 200 characters with an ellipsis.
pub fn summarize_error(message: &str) -> String {
	use std::sync::OnceLock;

	static PATTERNS: OnceLock<Vec<(regex::Regex, &'static str)>> = OnceLock::new();
	let patterns = PATTERNS.get_or_init(|| {
		vec![
			(regex::Regex::new(r"(?i)AA23 reverted").unwrap(), "AA23 reverted (validation failed)"),
			(regex::Regex::new(r"(?i)AA21 didn't pay prefund").unwrap(), "AA21 insufficient prefund"),
			(regex::Regex::new(r"(?i)insufficient funds").unwrap(), "insufficient funds"),
			(regex::Regex::new(r"(?i)nonce too low").unwrap(), "nonce too low"),
			(regex::Regex::new(r"(?i)gas required exceeds allowance").unwrap(), "gas limit exceeded"),
			(regex::Regex::new(r"(?i)timeout").unwrap(), "timeout"),
			(regex::Regex::new(r"(?i)connection refused|ECONNREFUSED").unwrap(), "connection refused"),
		]
	});

	for (re, canonical) in patterns {
		if re.is_match(message) {
			return (*canonical).to_owned();
		}
	}

	const MAX: usize = 200;
	if message.chars().count() > MAX {
		let truncated: String = message.chars().take(MAX).collect();
		format!("{truncated}...")
	} else {
		message.to_owned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cancel_pattern_requires_both_substrings() {
		assert_eq!(
			classify_execution_error("AA23 reverted: 0xc48cf8ee"),
			ErrorClass::CancelWorthy
		);
		assert_eq!(classify_execution_error("AA23 reverted: 0xdeadbeef"), ErrorClass::ReportAndContinue);
		assert_eq!(classify_execution_error("0xc48cf8ee"), ErrorClass::ReportAndContinue);
		assert_eq!(classify_execution_error("insufficient funds"), ErrorClass::ReportAndContinue);
	}

	#[test]
	fn summarize_maps_known_patterns() {
		assert_eq!(summarize_error("execution reverted: insufficient funds for gas"), "insufficient funds");
	}

	#[test]
	fn summarize_truncates_unknown_long_messages() {
		let long = "x".repeat(500);
		let summary = summarize_error(&long);
		assert!(summary.ends_with("..."));
		assert_eq!(summary.chars().count(), 203);
	}
}
