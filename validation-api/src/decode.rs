//! Decodes the packed user-operation tuple carried in a validation request's
//! `data` field (spec §4.10 step 7):
//! `(address,uint256,bytes,bytes,bytes32,uint256,bytes32,bytes,bytes)`.

use ethers::{
	abi::{decode, ParamType, Token},
	types::{Bytes, H160, U256},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PackedUserOperation {
	pub sender: H160,
	pub nonce: U256,
	pub init_code: Bytes,
	pub call_data: Bytes,
	pub account_gas_limits: [u8; 32],
	pub pre_verification_gas: U256,
	pub gas_fees: [u8; 32],
	pub paymaster_and_data: Bytes,
	pub signature: Bytes,
}

fn tuple_schema() -> ParamType {
	ParamType::Tuple(vec![
		ParamType::Address,
		ParamType::Uint(256),
		ParamType::Bytes,
		ParamType::Bytes,
		ParamType::FixedBytes(32),
		ParamType::Uint(256),
		ParamType::FixedBytes(32),
		ParamType::Bytes,
		ParamType::Bytes,
	])
}

pub fn decode_packed_user_operation(raw: &[u8]) -> anyhow::Result<PackedUserOperation> {
	let tokens = decode(&[tuple_schema()], raw)?;
	let Some(Token::Tuple(fields)) = tokens.into_iter().next() else {
		anyhow::bail!("expected a single tuple token");
	};
	anyhow::ensure!(fields.len() == 9, "packed user operation tuple must have 9 fields, got {}", fields.len());

	let sender = fields[0].clone().into_address().ok_or_else(|| anyhow::anyhow!("field 0 is not an address"))?;
	let nonce = fields[1].clone().into_uint().ok_or_else(|| anyhow::anyhow!("field 1 is not a uint"))?;
	let init_code = fields[2].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("field 2 is not bytes"))?.into();
	let call_data = fields[3].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("field 3 is not bytes"))?.into();
	let account_gas_limits = fixed_bytes_32(&fields[4])?;
	let pre_verification_gas = fields[5].clone().into_uint().ok_or_else(|| anyhow::anyhow!("field 5 is not a uint"))?;
	let gas_fees = fixed_bytes_32(&fields[6])?;
	let paymaster_and_data = fields[7].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("field 7 is not bytes"))?.into();
	let signature = fields[8].clone().into_bytes().ok_or_else(|| anyhow::anyhow!("field 8 is not bytes"))?.into();

	Ok(PackedUserOperation {
		sender,
		nonce,
		init_code,
		call_data,
		account_gas_limits,
		pre_verification_gas,
		gas_fees,
		paymaster_and_data,
		signature,
	})
}

fn fixed_bytes_32(token: &Token) -> anyhow::Result<[u8; 32]> {
	let bytes = token.clone().into_fixed_bytes().ok_or_else(|| anyhow::anyhow!("expected fixed bytes32"))?;
	anyhow::ensure!(bytes.len() == 32, "fixed bytes field is not 32 bytes");
	let mut out = [0u8; 32];
	out.copy_from_slice(&bytes);
	Ok(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use ethers::abi::{encode, Token};

	fn sample_tokens(nonce: u64, call_data: Vec<u8>) -> Vec<Token> {
		vec![Token::Tuple(vec![
			Token::Address(H160::repeat_byte(0xab)),
			Token::Uint(U256::from(nonce)),
			Token::Bytes(vec![]),
			Token::Bytes(call_data),
			Token::FixedBytes(vec![0u8; 32]),
			Token::Uint(U256::from(21000u64)),
			Token::FixedBytes(vec![0u8; 32]),
			Token::Bytes(vec![]),
			Token::Bytes(vec![0x01, 0x02]),
		])]
	}

	#[test]
	fn decodes_sender_nonce_and_call_data() {
		let encoded = encode(&sample_tokens(7, vec![0xab, 0xcd]));
		let decoded = decode_packed_user_operation(&encoded).unwrap();
		assert_eq!(decoded.nonce, U256::from(7u64));
		assert_eq!(decoded.call_data.to_vec(), vec![0xab, 0xcd]);
		assert_eq!(decoded.sender, H160::repeat_byte(0xab));
	}

	#[test]
	fn rejects_truncated_input() {
		let encoded = encode(&sample_tokens(7, vec![0xab, 0xcd]));
		assert!(decode_packed_user_operation(&encoded[..encoded.len() - 32]).is_err());
	}
}
