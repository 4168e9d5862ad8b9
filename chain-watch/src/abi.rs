//! Minimal helpers to ABI-encode a view-call from a human-readable function
//! signature and loosely-typed JSON args (spec §4.5, Trigger::Onchain /
//! Step::Contract carry `{target, abi, args}`).

use ethers::{
	abi::{Function, HumanReadableParser, ParamType, Token},
	types::{Address, Bytes, U256},
};
use serde_json::Value;

pub fn parse_function(signature: &str) -> anyhow::Result<Function> {
	Ok(HumanReadableParser::parse_function(signature)?)
}

pub fn encode_call(function: &Function, args: &[Value]) -> anyhow::Result<Bytes> {
	anyhow::ensure!(
		args.len() == function.inputs.len(),
		"expected {} args for {}, got {}",
		function.inputs.len(),
		function.name,
		args.len()
	);
	let tokens = function
		.inputs
		.iter()
		.zip(args)
		.map(|(param, value)| json_to_token(&param.kind, value))
		.collect::<anyhow::Result<Vec<_>>>()?;
	Ok(function.encode_input(&tokens)?.into())
}

/// Decodes a single return value per `function.outputs[0]` into a JSON
/// scalar comparable against an `OnchainCondition::value` (spec §4.5).
pub fn decode_single_output(function: &Function, raw: &[u8]) -> anyhow::Result<Value> {
	let tokens = function.decode_output(raw)?;
	let token = tokens.into_iter().next().ok_or_else(|| anyhow::anyhow!("view-call returned no value"))?;
	Ok(token_to_json(&token))
}

fn json_to_token(kind: &ParamType, value: &Value) -> anyhow::Result<Token> {
	Ok(match kind {
		ParamType::Address => {
			let s = value.as_str().ok_or_else(|| anyhow::anyhow!("expected address string"))?;
			Token::Address(s.parse::<Address>()?)
		},
		ParamType::Uint(_) => Token::Uint(json_to_u256(value)?),
		ParamType::Int(_) => Token::Int(json_to_u256(value)?),
		ParamType::Bool => Token::Bool(value.as_bool().ok_or_else(|| anyhow::anyhow!("expected bool"))?),
		ParamType::String => {
			Token::String(value.as_str().ok_or_else(|| anyhow::anyhow!("expected string"))?.to_owned())
		},
		ParamType::Bytes => {
			let s = value.as_str().ok_or_else(|| anyhow::anyhow!("expected hex bytes string"))?;
			Token::Bytes(hex::decode(s.trim_start_matches("0x"))?)
		},
		ParamType::FixedBytes(n) => {
			let s = value.as_str().ok_or_else(|| anyhow::anyhow!("expected hex bytes string"))?;
			let bytes = hex::decode(s.trim_start_matches("0x"))?;
			anyhow::ensure!(bytes.len() == *n, "fixed bytes length mismatch");
			Token::FixedBytes(bytes)
		},
		ParamType::Array(inner) => {
			let arr = value.as_array().ok_or_else(|| anyhow::anyhow!("expected array"))?;
			Token::Array(arr.iter().map(|v| json_to_token(inner, v)).collect::<anyhow::Result<_>>()?)
		},
		other => anyhow::bail!("unsupported abi param type: {other:?}"),
	})
}

fn json_to_u256(value: &Value) -> anyhow::Result<U256> {
	if let Some(n) = value.as_u64() {
		return Ok(U256::from(n));
	}
	if let Some(s) = value.as_str() {
		return if let Some(hex_str) = s.strip_prefix("0x") {
			Ok(U256::from_str_radix(hex_str, 16)?)
		} else {
			Ok(U256::from_dec_str(s)?)
		};
	}
	anyhow::bail!("expected numeric value")
}

fn token_to_json(token: &Token) -> Value {
	match token {
		Token::Address(a) => Value::String(format!("{a:#x}")),
		Token::Uint(n) | Token::Int(n) => Value::String(n.to_string()),
		Token::Bool(b) => Value::Bool(*b),
		Token::String(s) => Value::String(s.clone()),
		Token::Bytes(b) | Token::FixedBytes(b) => Value::String(format!("0x{}", hex::encode(b))),
		Token::Array(items) | Token::FixedArray(items) => {
			Value::Array(items.iter().map(token_to_json).collect())
		},
		_ => Value::Null,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_simple_view_call() {
		let function = parse_function("function balanceOf(address) view returns (uint256)").unwrap();
		let calldata =
			encode_call(&function, &[Value::String("0x0000000000000000000000000000000000000001".into())])
				.unwrap();
		assert_eq!(&calldata[..4], &function.short_signature());
	}

	#[test]
	fn decodes_bool_output() {
		let function = parse_function("function isReady() view returns (bool)").unwrap();
		let mut raw = vec![0u8; 32];
		raw[31] = 1;
		let decoded = decode_single_output(&function, &raw).unwrap();
		assert_eq!(decoded, Value::Bool(true));
	}
}
