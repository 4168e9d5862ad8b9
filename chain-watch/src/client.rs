//! Per-chain read surface shared by the event monitor (C4) and onchain
//! checker (C5): current head, log-range queries, and view-calls. Kept as
//! a trait so both components can be unit tested with mocks instead of a
//! live node.

use async_trait::async_trait;
use ethers::types::{Bytes, Log, H160};
use rpc_simulator::ChainRegistry;
use std::sync::Arc;
use workflow_common::ChainId;

/// A half-open block range `[from, to]`, both inclusive, used for one log
/// query chunk (spec §4.4 "Range splitting").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
	pub from: u64,
	pub to: u64,
}

#[derive(Debug, Clone)]
pub struct LogFilterSpec {
	pub signature: String,
	pub address: Option<String>,
	pub indexed_topics: Vec<Option<String>>,
}

#[async_trait]
pub trait ChainReader: Send + Sync {
	async fn head(&self, chain_id: ChainId) -> anyhow::Result<u64>;

	async fn get_logs(
		&self,
		chain_id: ChainId,
		filter: &LogFilterSpec,
		range: BlockRange,
	) -> anyhow::Result<Vec<Log>>;

	/// Performs a read-only view-call at a pinned block and returns the raw
	/// ABI-encoded return bytes.
	async fn call(
		&self,
		chain_id: ChainId,
		target: H160,
		calldata: Bytes,
		block: u64,
	) -> anyhow::Result<Bytes>;
}

pub struct RpcChainReader {
	chains: Arc<ChainRegistry>,
}

impl RpcChainReader {
	pub fn new(chains: Arc<ChainRegistry>) -> Self {
		Self { chains }
	}

	fn provider(&self, chain_id: ChainId) -> anyhow::Result<Arc<ethers::providers::Provider<ethers::providers::Http>>> {
		self.chains.client(chain_id).ok_or_else(|| anyhow::anyhow!("no rpc client for chain {chain_id}"))
	}
}

#[async_trait]
impl ChainReader for RpcChainReader {
	async fn head(&self, chain_id: ChainId) -> anyhow::Result<u64> {
		use ethers::providers::Middleware;
		let provider = self.provider(chain_id)?;
		Ok(provider.get_block_number().await?.as_u64())
	}

	async fn get_logs(
		&self,
		chain_id: ChainId,
		filter: &LogFilterSpec,
		range: BlockRange,
	) -> anyhow::Result<Vec<Log>> {
		use ethers::{
			providers::Middleware,
			types::{Filter, H256},
		};
		let provider = self.provider(chain_id)?;

		let signature_topic = H256::from_slice(&ethers::utils::keccak256(filter.signature.as_bytes()));

		let mut log_filter = Filter::new().from_block(range.from).to_block(range.to).topic0(signature_topic);
		if let Some(address) = &filter.address {
			log_filter = log_filter.address(address.parse::<H160>()?);
		}
		// `indexed_topics[0]` constrains the first indexed parameter, which
		// sits at topic1 (topic0 is always the event signature hash).
		for (position, topic) in filter.indexed_topics.iter().enumerate() {
			let Some(topic) = topic else { continue };
			let topic: H256 = topic.parse()?;
			log_filter = match position {
				0 => log_filter.topic1(topic),
				1 => log_filter.topic2(topic),
				2 => log_filter.topic3(topic),
				_ => continue,
			};
		}

		Ok(provider.get_logs(&log_filter).await?)
	}

	async fn call(
		&self,
		chain_id: ChainId,
		target: H160,
		calldata: Bytes,
		block: u64,
	) -> anyhow::Result<Bytes> {
		use ethers::types::{
			transaction::eip2718::TypedTransaction, BlockId, BlockNumber, Eip1559TransactionRequest,
		};
		use ethers::providers::Middleware;
		let provider = self.provider(chain_id)?;
		let tx = TypedTransaction::Eip1559(Eip1559TransactionRequest::new().to(target).data(calldata));
		let result =
			provider.call(&tx, Some(BlockId::Number(BlockNumber::Number(block.into())))).await?;
		Ok(result)
	}
}
