//! MongoDB-backed `WorkflowStore` (spec §4.7, §6 collections `workflows`,
//! `chains`, `wasm_modules`, `wasm_whitelist`).

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::Utc;
use mongodb::{options::ClientOptions, Client, Collection, Database};
use tracing::{debug, instrument, warn};
use workflow_common::{ContentHash, WorkflowDocument};

use crate::{StoreError, StoreResult, TxnBody, WorkflowStore};

/// Transaction-number errors reported by a standalone (non replica-set)
/// mongod; the spec requires falling back to non-transactional execution
/// rather than failing the whole operation (spec §4.7, §7 Transient).
const STANDALONE_TXN_ERROR: &str = "Transaction numbers are only allowed on a replica set";

pub struct MongoWorkflowStore {
	workflows: Collection<Document>,
	wasm_modules: Collection<Document>,
	chains: Collection<Document>,
	client: Client,
}

impl MongoWorkflowStore {
	pub async fn connect(mongo_uri: &str, db_name: &str) -> anyhow::Result<Self> {
		let options = ClientOptions::parse(mongo_uri).await?;
		let client = Client::with_options(options)?;
		let db: Database = client.database(db_name);
		Ok(Self {
			workflows: db.collection("workflows"),
			wasm_modules: db.collection("wasm_modules"),
			chains: db.collection("chains"),
			client,
		})
	}

	fn to_document(workflow: &WorkflowDocument) -> anyhow::Result<Document> {
		Ok(bson::to_document(workflow)?)
	}

	fn from_document(document: Document) -> anyhow::Result<WorkflowDocument> {
		Ok(bson::from_document(document)?)
	}
}

#[async_trait]
impl WorkflowStore for MongoWorkflowStore {
	#[instrument(skip(self))]
	async fn get_due(&self) -> StoreResult<Vec<WorkflowDocument>> {
		let now = bson::DateTime::from_chrono(Utc::now());
		// spec §4.7: is_cancelled = false AND (next_simulation_time <= now OR
		// (triggers is empty AND validAfter <= now <= validUntil)).
		let filter = doc! {
			"is_cancelled": false,
			"$or": [
				{ "next_simulation_time": { "$lte": now } },
				{
					"meta.triggers": { "$size": 0 },
					"valid_after": { "$lte": now },
					"valid_until": { "$gte": now },
				},
			],
		};
		let mut cursor = self.workflows.find(filter, None).await.map_err(anyhow::Error::from)?;
		let mut out = Vec::new();
		use futures::StreamExt;
		while let Some(document) = cursor.next().await {
			let document = document.map_err(anyhow::Error::from)?;
			out.push(Self::from_document(document).map_err(StoreError::Backend)?);
		}
		Ok(out)
	}

	#[instrument(skip(self))]
	async fn get_missing_next_time(&self, limit: usize) -> StoreResult<Vec<WorkflowDocument>> {
		let filter = doc! { "meta": { "$ne": null }, "next_simulation_time": null };
		let options = mongodb::options::FindOptions::builder().limit(limit as i64).build();
		let mut cursor = self.workflows.find(filter, options).await.map_err(anyhow::Error::from)?;
		let mut out = Vec::new();
		use futures::StreamExt;
		while let Some(document) = cursor.next().await {
			let document = document.map_err(anyhow::Error::from)?;
			out.push(Self::from_document(document).map_err(StoreError::Backend)?);
		}
		Ok(out)
	}

	async fn get_by_hashes(&self, hashes: &[ContentHash]) -> StoreResult<Vec<WorkflowDocument>> {
		let ids: Vec<&str> = hashes.iter().map(|h| h.as_str()).collect();
		let filter = doc! { "content_hash": { "$in": ids } };
		let mut cursor = self.workflows.find(filter, None).await.map_err(anyhow::Error::from)?;
		let mut out = Vec::new();
		use futures::StreamExt;
		while let Some(document) = cursor.next().await {
			let document = document.map_err(anyhow::Error::from)?;
			out.push(Self::from_document(document).map_err(StoreError::Backend)?);
		}
		Ok(out)
	}

	async fn find(&self, hash: &ContentHash) -> StoreResult<Option<WorkflowDocument>> {
		let filter = doc! { "content_hash": hash.as_str() };
		match self.workflows.find_one(filter, None).await.map_err(anyhow::Error::from)? {
			Some(document) => Ok(Some(Self::from_document(document).map_err(StoreError::Backend)?)),
			None => Ok(None),
		}
	}

	async fn insert(&self, document: WorkflowDocument) -> StoreResult<()> {
		let bson_doc = Self::to_document(&document).map_err(StoreError::Backend)?;
		self.workflows.insert_one(bson_doc, None).await.map_err(anyhow::Error::from)?;
		Ok(())
	}

	async fn update(&self, hash: &ContentHash, patch: crate::WorkflowPatch) -> StoreResult<()> {
		let filter = doc! { "content_hash": hash.as_str() };
		let existing = self
			.workflows
			.find_one(filter.clone(), None)
			.await
			.map_err(anyhow::Error::from)?
			.ok_or_else(|| StoreError::NotFound(hash.clone()))?;
		let mut document = Self::from_document(existing).map_err(StoreError::Backend)?;
		patch.apply(&mut document);
		let replacement = Self::to_document(&document).map_err(StoreError::Backend)?;
		self.workflows.replace_one(filter, replacement, None).await.map_err(anyhow::Error::from)?;
		Ok(())
	}

	async fn unsynced_chains_count(&self) -> StoreResult<u64> {
		let count = self
			.chains
			.count_documents(doc! { "synced": false }, None)
			.await
			.map_err(anyhow::Error::from)?;
		Ok(count)
	}

	async fn has_wasm(&self, hash: &ContentHash) -> StoreResult<bool> {
		let filter = doc! { "wasm_id": hash.as_str() };
		Ok(self.wasm_modules.find_one(filter, None).await.map_err(anyhow::Error::from)?.is_some())
	}

	async fn store_wasm(&self, hash: &ContentHash, bytes: Vec<u8>) -> StoreResult<()> {
		// Idempotent write-once: upsert keyed by wasm_id, never overwriting
		// existing bytes (spec §3 "write is idempotent").
		let filter = doc! { "wasm_id": hash.as_str() };
		if self.wasm_modules.find_one(filter.clone(), None).await.map_err(anyhow::Error::from)?.is_some()
		{
			return Ok(());
		}
		let document = doc! {
			"wasm_id": hash.as_str(),
			"wasm_code": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: bytes.clone() },
			"wasm_code_size": bytes.len() as i64,
			"has_wasm": true,
			"storedAt": bson::DateTime::from_chrono(Utc::now()),
		};
		self.wasm_modules.insert_one(document, None).await.map_err(anyhow::Error::from)?;
		Ok(())
	}

	async fn load_wasm(&self, hash: &ContentHash) -> StoreResult<Option<Vec<u8>>> {
		let filter = doc! { "wasm_id": hash.as_str() };
		match self.wasm_modules.find_one(filter, None).await.map_err(anyhow::Error::from)? {
			Some(document) => {
				let binary = document
					.get_binary_generic("wasm_code")
					.map_err(|e| StoreError::Backend(anyhow::anyhow!("malformed wasm_code: {e}")))?;
				Ok(Some(binary.to_vec()))
			},
			None => Ok(None),
		}
	}

	/// Best-effort transaction (spec §4.7): attempts a session-bound
	/// transaction, falls back to running `body` without one when the
	/// backend reports it is not a replica set member.
	async fn with_transaction<'a>(&'a self, body: TxnBody<'a>) -> StoreResult<()> {
		match self.client.start_session(None).await {
			Ok(mut session) => {
				if let Err(e) = session.start_transaction(None).await {
					warn!(error = %e, "could not start mongo transaction, running without one");
					return body().await;
				}
				let result = body().await;
				match result {
					Ok(()) => {
						if let Err(e) = session.commit_transaction().await {
							if e.to_string().contains(STANDALONE_TXN_ERROR) {
								debug!("standalone deployment, transaction commit is a no-op");
								return Ok(());
							}
							return Err(StoreError::Backend(e.into()));
						}
						Ok(())
					},
					Err(e) => {
						let _ = session.abort_transaction().await;
						Err(e)
					},
				}
			},
			Err(e) => {
				warn!(error = %e, "mongo session unavailable, falling back to non-transactional write");
				body().await
			},
		}
	}
}
