//! Content-addressed, write-once WASM module cache (spec §4.3 step 2,
//! §8 law "idempotent WASM cache").

use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
	#[error("hashMismatch: expected {expected}, computed {computed}")]
	HashMismatch { expected: String, computed: String },
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

pub struct WasmCache {
	root: PathBuf,
}

impl WasmCache {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn path_for(&self, hash_hex: &str) -> PathBuf {
		let shard = &hash_hex[..2.min(hash_hex.len())];
		self.root.join(shard).join(format!("{hash_hex}.wasm"))
	}

	/// Computes the SHA-256 of `bytes`, optionally checking it against
	/// `expected_hash` (spec §4.3 step 1), then ensures the bytes are
	/// present in the cache under their content address, writing them
	/// exactly once via a temp-file-then-rename (spec §4.3 step 2, §5
	/// "writers use rename-into-place").
	///
	/// Readers (the runner spawning the engine) only ever open the final
	/// path, so a writer racing another writer never exposes a torn file.
	pub async fn ensure_cached(
		&self,
		bytes: &[u8],
		expected_hash: Option<&str>,
	) -> Result<(String, PathBuf), CacheError> {
		let computed = hex::encode(Sha256::digest(bytes));
		if let Some(expected) = expected_hash {
			if !expected.eq_ignore_ascii_case(&computed) {
				return Err(CacheError::HashMismatch { expected: expected.to_string(), computed });
			}
		}

		let final_path = self.path_for(&computed);
		if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
			debug!(hash = %computed, "wasm cache hit");
			return Ok((computed, final_path));
		}

		if let Some(parent) = final_path.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}

		let tmp_path = final_path.with_file_name(format!(
			".tmp.{}.wasm",
			Uuid::new_v4()
		));
		{
			let mut file = tokio::fs::OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.open(&tmp_path)
				.await?;
			file.write_all(bytes).await?;
			file.flush().await?;
			let mut perms = file.metadata().await?.permissions();
			perms.set_readonly(true);
			file.set_permissions(perms).await?;
		}

		match tokio::fs::rename(&tmp_path, &final_path).await {
			Ok(()) => {},
			Err(e) if tokio::fs::try_exists(&final_path).await.unwrap_or(false) => {
				// Lost a race with a concurrent writer of identical bytes; the
				// final name already exists, which is all readers require.
				debug!(error = %e, hash = %computed, "lost rename race, cache already populated");
				let _ = tokio::fs::remove_file(&tmp_path).await;
			},
			Err(e) => return Err(e.into()),
		}

		Ok((computed, final_path))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn writes_once_and_is_readable_by_hash() {
		let dir = tempfile::tempdir().unwrap();
		let cache = WasmCache::new(dir.path());
		let bytes = b"\0asm fake module bytes";

		let (hash, path) = cache.ensure_cached(bytes, None).await.unwrap();
		assert!(path.exists());
		assert_eq!(hex::encode(Sha256::digest(bytes)), hash);

		// Second call with identical bytes is a cache hit, not an error.
		let (hash2, path2) = cache.ensure_cached(bytes, None).await.unwrap();
		assert_eq!(hash, hash2);
		assert_eq!(path, path2);
	}

	#[tokio::test]
	async fn rejects_hash_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		let cache = WasmCache::new(dir.path());
		let err = cache.ensure_cached(b"bytes", Some("00".repeat(32).as_str())).await.unwrap_err();
		assert!(matches!(err, CacheError::HashMismatch { .. }));
	}

	#[tokio::test]
	async fn concurrent_writers_of_same_bytes_converge() {
		let dir = tempfile::tempdir().unwrap();
		let cache = std::sync::Arc::new(WasmCache::new(dir.path()));
		let bytes = b"same bytes for every writer";

		let mut tasks = Vec::new();
		for _ in 0..8 {
			let cache = cache.clone();
			tasks.push(tokio::spawn(async move { cache.ensure_cached(bytes, None).await }));
		}
		let mut paths = std::collections::HashSet::new();
		for t in tasks {
			let (_, path) = t.await.unwrap().unwrap();
			paths.insert(path);
		}
		assert_eq!(paths.len(), 1);
	}
}
