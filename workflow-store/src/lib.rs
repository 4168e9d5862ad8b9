//! Typed adapter over the MongoDB-like document store (spec §4.7 / C7).
//!
//! `WorkflowStore` is the sole trait boundary through which every other
//! component reads and mutates workflow documents and WASM blobs; no
//! component is allowed to hold a raw `mongodb::Collection` of its own
//! (spec §9 "cyclic document <-> adapter references").

pub mod mongo;
pub mod patch;

use async_trait::async_trait;
use workflow_common::{ChainId, ContentHash, WorkflowDocument};

pub use mongo::MongoWorkflowStore;
pub use patch::WorkflowPatch;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	#[error("not found: {0}")]
	NotFound(ContentHash),
	#[error("backend error: {0}")]
	Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Body passed to `with_transaction`. The closure calls back into the same
/// store's other methods; the Mongo-backed implementation wraps them in a
/// session-bound transaction where the backend supports it, the in-memory
/// implementation just runs the body (spec §4.7 "must succeed without a
/// session on standalone backends").
pub type TxnBody<'a> = Box<dyn FnOnce() -> futures::future::BoxFuture<'a, StoreResult<()>> + Send + 'a>;

/// Typed read/update surface over workflow documents and WASM blobs (C7).
#[async_trait]
pub trait WorkflowStore: Send + Sync {
	/// Workflows due for processing per spec §4.7:
	/// `is_cancelled = false AND (next_simulation_time <= now OR (triggers
	/// is empty AND valid_after <= now <= valid_until))`.
	async fn get_due(&self) -> StoreResult<Vec<WorkflowDocument>>;

	/// Up to `limit` documents with `meta != null` and `next_simulation_time
	/// == null`, for scheduler bootstrap (spec §4.9 step 2).
	async fn get_missing_next_time(&self, limit: usize) -> StoreResult<Vec<WorkflowDocument>>;

	async fn get_by_hashes(&self, hashes: &[ContentHash]) -> StoreResult<Vec<WorkflowDocument>>;

	async fn find(&self, hash: &ContentHash) -> StoreResult<Option<WorkflowDocument>>;

	async fn insert(&self, document: WorkflowDocument) -> StoreResult<()>;

	async fn update(&self, hash: &ContentHash, patch: WorkflowPatch) -> StoreResult<()>;

	/// Count of chains flagged as not yet synced to head (spec §4.9 step 1,
	/// "chain-sync gate").
	async fn unsynced_chains_count(&self) -> StoreResult<u64>;

	async fn has_wasm(&self, hash: &ContentHash) -> StoreResult<bool>;

	async fn store_wasm(&self, hash: &ContentHash, bytes: Vec<u8>) -> StoreResult<()>;

	async fn load_wasm(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>>;

	/// Runs `body` as a unit of work. The default (and in-memory test)
	/// implementation simply awaits it; `MongoWorkflowStore` overrides this
	/// to start a session-bound transaction when the backend is a replica
	/// set, falling back to the same non-transactional behavior otherwise
	/// (spec §4.7).
	async fn with_transaction<'a>(&'a self, body: TxnBody<'a>) -> StoreResult<()> {
		body().await
	}
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
	//! An in-memory `WorkflowStore` used by every other crate's unit tests,
	//! so worker/scheduler/validation-api tests don't need a live MongoDB.

	use super::*;
	use chrono::Utc;
	use dashmap::DashMap;
	use std::sync::atomic::{AtomicU64, Ordering};

	#[derive(Default)]
	pub struct InMemoryStore {
		documents: DashMap<ContentHash, WorkflowDocument>,
		wasm: DashMap<ContentHash, Vec<u8>>,
		unsynced: AtomicU64,
	}

	impl InMemoryStore {
		pub fn new() -> Self {
			Self::default()
		}

		pub fn set_unsynced_chains(&self, n: u64) {
			self.unsynced.store(n, Ordering::SeqCst);
		}
	}

	#[async_trait]
	impl WorkflowStore for InMemoryStore {
		async fn get_due(&self) -> StoreResult<Vec<WorkflowDocument>> {
			let now = Utc::now();
			Ok(self
				.documents
				.iter()
				.filter(|e| {
					let d = e.value();
					if d.is_cancelled {
						return false;
					}
					let by_time = d.next_simulation_time.is_some_and(|t| t <= now);
					let by_window = d
						.meta
						.as_ref()
						.is_some_and(|m| m.triggers.is_empty())
						&& d.valid_after.is_some_and(|a| a <= now)
						&& d.valid_until.is_some_and(|u| now <= u);
					by_time || by_window
				})
				.map(|e| e.value().clone())
				.collect())
		}

		async fn get_missing_next_time(&self, limit: usize) -> StoreResult<Vec<WorkflowDocument>> {
			Ok(self
				.documents
				.iter()
				.filter(|e| e.value().meta.is_some() && e.value().next_simulation_time.is_none())
				.take(limit)
				.map(|e| e.value().clone())
				.collect())
		}

		async fn get_by_hashes(&self, hashes: &[ContentHash]) -> StoreResult<Vec<WorkflowDocument>> {
			Ok(hashes.iter().filter_map(|h| self.documents.get(h).map(|e| e.value().clone())).collect())
		}

		async fn find(&self, hash: &ContentHash) -> StoreResult<Option<WorkflowDocument>> {
			Ok(self.documents.get(hash).map(|e| e.value().clone()))
		}

		async fn insert(&self, document: WorkflowDocument) -> StoreResult<()> {
			self.documents.insert(document.content_hash.clone(), document);
			Ok(())
		}

		async fn update(&self, hash: &ContentHash, patch: WorkflowPatch) -> StoreResult<()> {
			let mut entry =
				self.documents.get_mut(hash).ok_or_else(|| StoreError::NotFound(hash.clone()))?;
			patch.apply(&mut entry);
			Ok(())
		}

		async fn unsynced_chains_count(&self) -> StoreResult<u64> {
			Ok(self.unsynced.load(Ordering::SeqCst))
		}

		async fn has_wasm(&self, hash: &ContentHash) -> StoreResult<bool> {
			Ok(self.wasm.contains_key(hash))
		}

		async fn store_wasm(&self, hash: &ContentHash, bytes: Vec<u8>) -> StoreResult<()> {
			self.wasm.entry(hash.clone()).or_insert(bytes);
			Ok(())
		}

		async fn load_wasm(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>> {
			Ok(self.wasm.get(hash).map(|e| e.value().clone()))
		}
	}

	#[tokio::test]
	async fn get_due_by_time_and_by_window() {
		let store = InMemoryStore::new();
		let now = Utc::now();

		let mut due_by_time = WorkflowDocument::new(ContentHash::from("a".to_string()));
		due_by_time.next_simulation_time = Some(now - chrono::Duration::seconds(1));
		store.insert(due_by_time).await.unwrap();

		let mut due_by_window = WorkflowDocument::new(ContentHash::from("b".to_string()));
		due_by_window.meta = Some(workflow_common::WorkflowMeta {
			owner: "0x0".into(),
			triggers: vec![],
			jobs: vec![],
			session: serde_json::Value::Null,
		});
		due_by_window.valid_after = Some(now - chrono::Duration::seconds(10));
		due_by_window.valid_until = Some(now + chrono::Duration::seconds(10));
		store.insert(due_by_window).await.unwrap();

		let mut not_due = WorkflowDocument::new(ContentHash::from("c".to_string()));
		not_due.next_simulation_time = Some(now + chrono::Duration::seconds(100));
		store.insert(not_due).await.unwrap();

		let mut cancelled = WorkflowDocument::new(ContentHash::from("d".to_string()));
		cancelled.is_cancelled = true;
		cancelled.next_simulation_time = Some(now - chrono::Duration::seconds(1));
		store.insert(cancelled).await.unwrap();

		let due = store.get_due().await.unwrap();
		let hashes: std::collections::HashSet<_> =
			due.iter().map(|d| d.content_hash.as_str().to_owned()).collect();
		assert_eq!(hashes, ["a", "b"].into_iter().map(String::from).collect());
	}

	#[tokio::test]
	async fn wasm_store_round_trips() {
		let store = InMemoryStore::new();
		let hash = ContentHash::of(b"wasm bytes");
		assert!(!store.has_wasm(&hash).await.unwrap());
		store.store_wasm(&hash, b"wasm bytes".to_vec()).await.unwrap();
		assert!(store.has_wasm(&hash).await.unwrap());
		assert_eq!(store.load_wasm(&hash).await.unwrap(), Some(b"wasm bytes".to_vec()));
	}
}
