// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! DID resolution.
//!
//! Identities are `did:rel:<chain>:<account>` strings, optionally carrying
//! an `#<app>` fragment naming the originating application. Resolution maps
//! a DID to the Ed25519 key material published for the account on the
//! platform ledger.
//!
//! ## Caching
//!
//! Resolved keys are cached with a TTL. Key rotation on the ledger is rare
//! and a stale key only ever causes a verification failure, which clients
//! retry after the cache expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use tokio::sync::RwLock;

/// Default resolved-key cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

pub const DID_METHOD_PREFIX: &str = "did:rel:";

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No identity document exists for the DID. Distinguished from other
    /// failures so the caller can map it to "not found" rather than
    /// "unauthorized".
    #[error("no identity document for {0}")]
    NotFound(String),

    #[error("resolver error: {0}")]
    Fetch(String),

    #[error("unsupported key material for {did}: {detail}")]
    Key { did: String, detail: String },
}

/// Maps a DID to the signer's verifying key.
#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<VerifyingKey, ResolveError>;
}

/// Strip any `#fragment` from a DID.
pub fn without_fragment(did: &str) -> &str {
    did.split_once('#').map_or(did, |(base, _)| base)
}

/// The `#fragment` of a DID, if present.
pub fn fragment_of(did: &str) -> Option<&str> {
    did.split_once('#').map(|(_, fragment)| fragment)
}

/// Extract the ledger account name from a `did:rel:<chain>:<account>` DID.
pub fn account_from_did(did: &str) -> Option<&str> {
    let base = without_fragment(did);
    let rest = base.strip_prefix(DID_METHOD_PREFIX)?;
    let (_chain, account) = rest.split_once(':')?;
    if account.is_empty() || account.contains(':') {
        return None;
    }
    Some(account)
}

/// Build the addressable DID for a platform account, as used when the
/// watcher notifies the destination of a completed swap.
pub fn did_for_account(chain_id: &str, account: &str) -> String {
    format!("{DID_METHOD_PREFIX}{chain_id}:{account}")
}

#[derive(Deserialize)]
struct IdentityDocument {
    /// Base64-encoded 32-byte Ed25519 public key.
    public_key: String,
}

struct CacheEntry {
    key: VerifyingKey,
    fetched_at: Instant,
}

/// DID resolver backed by the platform ledger's identity API.
///
/// Contract: `GET {base}/v1/identity/{account}` returns `200` with an
/// identity document, or `404` when the account has no published identity.
pub struct HttpDidResolver {
    base_url: String,
    cache_ttl: Duration,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    client: reqwest::Client,
}

impl HttpDidResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(HashMap::new())),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn fetch_key(&self, did: &str, account: &str) -> Result<VerifyingKey, ResolveError> {
        let url = format!("{}/v1/identity/{}", self.base_url, account);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(did.to_string()));
        }
        if !response.status().is_success() {
            return Err(ResolveError::Fetch(format!(
                "HTTP {} from identity endpoint",
                response.status()
            )));
        }

        let document: IdentityDocument = response
            .json()
            .await
            .map_err(|e| ResolveError::Fetch(e.to_string()))?;

        decode_verifying_key(did, &document.public_key)
    }
}

#[async_trait]
impl DidResolver for HttpDidResolver {
    async fn resolve(&self, did: &str) -> Result<VerifyingKey, ResolveError> {
        let account = account_from_did(did)
            .ok_or_else(|| ResolveError::NotFound(did.to_string()))?
            .to_string();

        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&account) {
                if entry.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(entry.key);
                }
            }
        }

        let key = self.fetch_key(did, &account).await?;

        let mut cache = self.cache.write().await;
        cache.insert(
            account,
            CacheEntry {
                key,
                fetched_at: Instant::now(),
            },
        );

        Ok(key)
    }
}

fn decode_verifying_key(did: &str, encoded: &str) -> Result<VerifyingKey, ResolveError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| ResolveError::Key {
            did: did.to_string(),
            detail: e.to_string(),
        })?;

    let bytes: [u8; 32] = bytes.try_into().map_err(|_| ResolveError::Key {
        did: did.to_string(),
        detail: "expected 32-byte Ed25519 key".to_string(),
    })?;

    VerifyingKey::from_bytes(&bytes).map_err(|e| ResolveError::Key {
        did: did.to_string(),
        detail: e.to_string(),
    })
}

/// Fixed-key resolver used by unit tests across the crate.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct StaticResolver {
    keys: HashMap<String, VerifyingKey>,
}

#[cfg(test)]
impl StaticResolver {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_key(mut self, did: &str, key: VerifyingKey) -> Self {
        self.keys.insert(without_fragment(did).to_string(), key);
        self
    }
}

#[cfg(test)]
#[async_trait]
impl DidResolver for StaticResolver {
    async fn resolve(&self, did: &str) -> Result<VerifyingKey, ResolveError> {
        self.keys
            .get(without_fragment(did))
            .copied()
            .ok_or_else(|| ResolveError::NotFound(did.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_extraction_handles_fragments() {
        assert_eq!(
            account_from_did("did:rel:rel-testnet:alice"),
            Some("alice")
        );
        assert_eq!(
            account_from_did("did:rel:rel-testnet:alice#relational.id"),
            Some("alice")
        );
        assert_eq!(account_from_did("did:web:example.com"), None);
        assert_eq!(account_from_did("did:rel:rel-testnet:"), None);
    }

    #[test]
    fn fragment_extraction() {
        assert_eq!(
            fragment_of("did:rel:rel-testnet:alice#relational.id"),
            Some("relational.id")
        );
        assert_eq!(fragment_of("did:rel:rel-testnet:alice"), None);
    }

    #[test]
    fn did_construction_round_trips() {
        let did = did_for_account("rel-testnet", "bob");
        assert_eq!(did, "did:rel:rel-testnet:bob");
        assert_eq!(account_from_did(&did), Some("bob"));
    }

    #[test]
    fn key_decoding_rejects_wrong_length() {
        let err = decode_verifying_key("did:rel:t:a", "AQID").unwrap_err();
        assert!(matches!(err, ResolveError::Key { .. }));
    }
}
