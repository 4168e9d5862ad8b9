//! Challenge-signature auth + report submission against the reporting
//! service (spec §4.11 / C11).
//!
//! The token pair is process-wide and refresh is serialized through an
//! internal lock (spec §5 "Shared resources" — "the reporting client's
//! token pair is process-wide; refresh is serialized").

use anyhow::Context;
use secp256k1::{ecdsa::RecoverableSignature, Message, Secp256k1, SecretKey};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use workflow_common::backoff::{retry_with_backoff, REPORTING_BACKOFF};

#[derive(Debug, Clone)]
struct TokenPair {
	access: String,
	refresh: String,
}

#[derive(Debug, Deserialize)]
struct NonceResponse {
	nonce: String,
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
	address: &'a str,
	signature: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access: String,
	refresh: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
	refresh_token: &'a str,
}

/// Challenge-signature auth + report submission against the reporting
/// service's operator endpoints (spec §6).
pub struct ReportingClient {
	http: reqwest::Client,
	base_url: String,
	operator_address: String,
	operator_key: SecretKey,
	tokens: RwLock<Option<TokenPair>>,
}

impl ReportingClient {
	pub fn new(base_url: String, operator_address: String, operator_key: SecretKey) -> Arc<Self> {
		Arc::new(Self { http: reqwest::Client::new(), base_url, operator_address, operator_key, tokens: RwLock::new(None) })
	}

	/// Bootstraps the token pair: fetch a nonce, sign it, register (spec
	/// §4.11). Idempotent — a second call just re-registers.
	#[instrument(skip(self))]
	pub async fn init(&self) -> anyhow::Result<()> {
		let nonce = self.fetch_nonce().await?;
		let signature = self.sign_challenge(&nonce);

		let response: TokenResponse = self
			.post_json(
				&format!("{}/operator/register", self.base_url),
				&RegisterRequest { address: &self.operator_address, signature },
				None,
			)
			.await
			.context("operator registration failed")?;

		*self.tokens.write().await =
			Some(TokenPair { access: response.access, refresh: response.refresh });
		info!("reporting client registered");
		Ok(())
	}

	async fn fetch_nonce(&self) -> anyhow::Result<String> {
		let url = format!("{}/operator/nonce", self.base_url);
		let response: NonceResponse = retry_with_backoff(
			&REPORTING_BACKOFF,
			|| async {
				self.http
					.post(&url)
					.json(&serde_json::json!({ "address": self.operator_address }))
					.send()
					.await
					.context("nonce request failed")?
					.error_for_status()
					.context("nonce request returned error status")?
					.json::<NonceResponse>()
					.await
					.context("nonce response was not valid json")
			},
			|_| true,
		)
		.await?;
		Ok(response.nonce)
	}

	fn sign_challenge(&self, nonce: &str) -> String {
		let secp = Secp256k1::signing_only();
		let digest = Sha256::digest(nonce.as_bytes());
		let message = Message::from_slice(&digest).expect("sha256 digest is 32 bytes");
		let signature: RecoverableSignature = secp.sign_ecdsa_recoverable(&message, &self.operator_key);
		let (recovery_id, bytes) = signature.serialize_compact();
		let mut encoded = bytes.to_vec();
		encoded.push(recovery_id.to_i32() as u8);
		format!("0x{}", hex::encode(encoded))
	}

	/// Ensures a usable access token exists, bootstrapping via `init` if
	/// this is the first call (spec §4.10 step 2 "ensure reporting auth
	/// token").
	pub async fn ensure_token(&self) -> anyhow::Result<String> {
		if let Some(tokens) = self.tokens.read().await.as_ref() {
			return Ok(tokens.access.clone());
		}
		self.init().await?;
		self.tokens.read().await.as_ref().map(|t| t.access.clone()).context("token missing after init")
	}

	/// Refreshes the access token using the stored refresh token and the
	/// current access header, re-registering on failure (spec §4.11).
	#[instrument(skip(self))]
	pub async fn refresh(&self) -> anyhow::Result<()> {
		let current = self.tokens.read().await.clone();
		let Some(current) = current else {
			return self.init().await;
		};

		let url = format!("{}/operator/refresh-token", self.base_url);
		let result: anyhow::Result<TokenResponse> = self
			.http
			.post(&url)
			.bearer_auth(&current.access)
			.json(&RefreshRequest { refresh_token: &current.refresh })
			.send()
			.await
			.context("refresh request failed")
			.and_then(|r| r.error_for_status().context("refresh returned error status"));
		let result = match result {
			Ok(response) => response.json::<TokenResponse>().await.context("refresh response was not valid json"),
			Err(e) => Err(e),
		};

		match result {
			Ok(response) => {
				*self.tokens.write().await =
					Some(TokenPair { access: response.access, refresh: response.refresh });
				Ok(())
			},
			Err(e) => {
				// Two consecutive refresh failures: re-register (spec §4.11).
				warn!(error = %e, "token refresh failed, re-registering");
				self.init().await
			},
		}
	}

	/// POSTs `body` to the reporting service's `submit-report` endpoint with
	/// bearer auth, transparently refreshing on a 401 and retrying transient
	/// failures with backoff (spec §4.11).
	#[instrument(skip(self, body))]
	pub async fn submit_report(&self, body: &serde_json::Value) -> anyhow::Result<()> {
		let url = format!("{}/operator/submit-report", self.base_url);
		self.authed_post::<serde_json::Value, _>(&url, body).await?;
		Ok(())
	}

	async fn authed_post<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> anyhow::Result<T> {
		let mut attempted_refresh = false;
		loop {
			let token = self.ensure_token().await?;
			let response = retry_with_backoff(
				&REPORTING_BACKOFF,
				|| async { self.http.post(url).bearer_auth(&token).json(body).send().await },
				|e| e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()),
			)
			.await
			.context("request failed after retries")?;

			if response.status() == reqwest::StatusCode::UNAUTHORIZED && !attempted_refresh {
				attempted_refresh = true;
				self.refresh().await?;
				continue;
			}

			return response
				.error_for_status()
				.context("request returned error status")?
				.json::<T>()
				.await
				.context("response was not valid json");
		}
	}

	async fn post_json<T: DeserializeOwned, B: Serialize>(
		&self,
		url: &str,
		body: &B,
		bearer: Option<&str>,
	) -> anyhow::Result<T> {
		let mut request = self.http.post(url).json(body);
		if let Some(token) = bearer {
			request = request.bearer_auth(token);
		}
		let response = retry_with_backoff(
			&REPORTING_BACKOFF,
			|| async { request.try_clone().expect("no streaming body").send().await },
			|e| e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error()),
		)
		.await
		.context("request failed after retries")?;
		response.error_for_status().context("request returned error status")?.json::<T>().await.context("response was not valid json")
	}
}

impl Clone for TokenPair {
	fn clone(&self) -> Self {
		Self { access: self.access.clone(), refresh: self.refresh.clone() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::{
		matchers::{method, path},
		Mock, MockServer, ResponseTemplate,
	};

	fn test_key() -> SecretKey {
		SecretKey::from_slice(&[7u8; 32]).unwrap()
	}

	#[tokio::test]
	async fn init_registers_and_stores_tokens() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/operator/nonce"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"nonce": "abc123"})))
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/operator/register"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(serde_json::json!({"access": "acc-1", "refresh": "ref-1"})),
			)
			.mount(&server)
			.await;

		let client = ReportingClient::new(server.uri(), "0xoperator".into(), test_key());
		client.init().await.unwrap();
		assert_eq!(client.ensure_token().await.unwrap(), "acc-1");
	}

	#[tokio::test]
	async fn submit_report_refreshes_on_401_then_succeeds() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/operator/nonce"))
			.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"nonce": "abc123"})))
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/operator/register"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(serde_json::json!({"access": "acc-1", "refresh": "ref-1"})),
			)
			.mount(&server)
			.await;
		Mock::given(method("POST"))
			.and(path("/operator/refresh-token"))
			.respond_with(
				ResponseTemplate::new(200)
					.set_body_json(serde_json::json!({"access": "acc-2", "refresh": "ref-2"})),
			)
			.mount(&server)
			.await;

		let first_call = std::sync::atomic::AtomicBool::new(true);
		Mock::given(method("POST")).and(path("/operator/submit-report")).respond_with(move |_req: &wiremock::Request| {
			if first_call.swap(false, std::sync::atomic::Ordering::SeqCst) {
				ResponseTemplate::new(401)
			} else {
				ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true}))
			}
		}).mount(&server).await;

		let client = ReportingClient::new(server.uri(), "0xoperator".into(), test_key());
		client.init().await.unwrap();
		client.submit_report(&serde_json::json!({"chainId": 1})).await.unwrap();
	}
}
