//! Event monitor (C4), onchain checker (C5) and cron evaluator (C6): the
//! three trigger-evaluation components consulted by the worker before a
//! workflow is simulated (spec §4.4–§4.6).

pub mod abi;
pub mod client;
pub mod cron;
pub mod events;
pub mod onchain;

pub use client::{ChainReader, RpcChainReader};
pub use cron::next_fire_time;
pub use events::{EventCheckOutcome, EventMonitor};
pub use onchain::OnchainChecker;
