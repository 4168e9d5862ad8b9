//! Adapts chain-watch's generic `EventMonitor<R>`/`OnchainChecker<R>` into
//! one object-safe trait the worker can hold without itself being generic
//! over the chain reader implementation.

use async_trait::async_trait;
use chain_watch::{ChainReader, EventCheckOutcome, EventMonitor, OnchainChecker};
use std::{sync::Arc, time::Duration};
use workflow_common::{ChainId, Trigger};

#[async_trait]
pub trait TriggerGate: Send + Sync {
	async fn check_events(
		&self,
		chain_id: ChainId,
		triggers: &[Trigger],
		last_processed: u64,
	) -> anyhow::Result<EventCheckOutcome>;

	async fn onchain_all_true(&self, triggers: &[Trigger]) -> anyhow::Result<bool>;

	async fn head(&self, chain_id: ChainId) -> anyhow::Result<u64>;
}

pub struct ChainGate<R: ChainReader> {
	reader: Arc<R>,
	events: EventMonitor<R>,
	onchain: OnchainChecker<R>,
}

impl<R: ChainReader + 'static> ChainGate<R> {
	/// `onchain_timeout`/`onchain_retries` come from `ONCHAIN_TIMEOUT_MS` /
	/// `ONCHAIN_RETRIES` (spec §6); event watching has no equivalent knobs.
	pub fn new(reader: Arc<R>, onchain_timeout: Duration, onchain_retries: u32) -> Self {
		Self {
			events: EventMonitor::new(reader.clone()),
			onchain: OnchainChecker::new(reader.clone()).with_timeout(onchain_timeout).with_retries(onchain_retries),
			reader,
		}
	}
}

#[async_trait]
impl<R: ChainReader + 'static> TriggerGate for ChainGate<R> {
	async fn check_events(
		&self,
		chain_id: ChainId,
		triggers: &[Trigger],
		last_processed: u64,
	) -> anyhow::Result<EventCheckOutcome> {
		self.events.check_chain(chain_id, triggers, last_processed).await
	}

	async fn onchain_all_true(&self, triggers: &[Trigger]) -> anyhow::Result<bool> {
		self.onchain.all_true(triggers).await
	}

	async fn head(&self, chain_id: ChainId) -> anyhow::Result<u64> {
		self.reader.head(chain_id).await
	}
}
