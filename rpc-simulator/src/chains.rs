//! Per-chain HTTP JSON-RPC client registry, keyed by the `RPC_URL_<id>`
//! environment variables (spec §4.1 "Default chain").

use ethers::providers::{Http, Provider};
use std::{collections::BTreeMap, sync::Arc};
use workflow_common::ChainId;

#[derive(Clone)]
pub struct ChainRegistry {
	/// Insertion order matches the order `RPC_URL_<id>` variables were
	/// discovered; the first one is the default chain.
	order: Vec<ChainId>,
	clients: BTreeMap<ChainId, Arc<Provider<Http>>>,
}

impl ChainRegistry {
	pub fn new() -> Self {
		Self { order: Vec::new(), clients: BTreeMap::new() }
	}

	/// Builds a registry from `RPC_URL_<chainId>` environment variables,
	/// preserving the order in which `std::env::vars()` yields them.
	pub fn from_env() -> anyhow::Result<Self> {
		let mut registry = Self::new();
		for (key, value) in std::env::vars() {
			let Some(suffix) = key.strip_prefix("RPC_URL_") else { continue };
			let chain_id: u64 = suffix.parse()?;
			registry.insert(ChainId(chain_id), &value)?;
		}
		Ok(registry)
	}

	pub fn insert(&mut self, chain_id: ChainId, url: &str) -> anyhow::Result<()> {
		let provider = Provider::<Http>::try_from(url)?;
		self.clients.insert(chain_id, Arc::new(provider));
		self.order.push(chain_id);
		Ok(())
	}

	pub fn default_chain(&self) -> Option<ChainId> {
		self.order.first().copied()
	}

	pub fn client(&self, chain_id: ChainId) -> Option<Arc<Provider<Http>>> {
		self.clients.get(&chain_id).cloned()
	}
}

impl Default for ChainRegistry {
	fn default() -> Self {
		Self::new()
	}
}
