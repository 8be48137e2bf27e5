//! Remote JWKS key cache.
//!
//! The current [`KeySet`] is an immutable snapshot behind an [`ArcSwap`]; a
//! refresh builds a fresh set and swaps the pointer. Readers never block and
//! a failed refresh leaves the old snapshot in place.

use arc_swap::ArcSwap;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound on a key document body.
pub const MAX_JWKS_BYTES: usize = 512 * 1024;

const USER_AGENT: &str = concat!("toolgate/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error("failed to build JWKS HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("failed to fetch JWKS from {uri}: {source}")]
    Fetch {
        uri: Url,
        #[source]
        source: reqwest::Error,
    },

    #[error("JWKS endpoint {uri} answered {status}")]
    Status { uri: Url, status: StatusCode },

    #[error("JWKS response from {uri} exceeds {limit} bytes")]
    TooLarge { uri: Url, limit: usize },

    #[error("failed to parse JWKS document: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("key cache has a static key set and no JWKS endpoint")]
    Static,
}

/// A verification key and the algorithm its JWK pinned, if any.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub algorithm: Option<Algorithm>,
}

/// Immutable snapshot of verification keys indexed by `kid`.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
}

#[derive(Deserialize)]
struct RawJwkSet {
    keys: Vec<serde_json::Value>,
}

impl KeySet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a standard JWK set document. Entries without a `kid` or with
    /// parameters the verifier cannot use are skipped, not fatal.
    pub fn from_jwks_json(body: &[u8]) -> Result<Self, KeyCacheError> {
        let raw: RawJwkSet = serde_json::from_slice(body).map_err(KeyCacheError::Parse)?;
        let mut set = Self::empty();

        for (index, entry) in raw.keys.into_iter().enumerate() {
            let Some(kid) = entry.get("kid").and_then(|v| v.as_str()).map(str::to_owned) else {
                tracing::warn!(index, "skipping JWK without kid");
                continue;
            };
            let algorithm = match entry.get("alg").and_then(|v| v.as_str()) {
                None => None,
                Some(alg) => match Algorithm::from_str(alg) {
                    Ok(alg) => Some(alg),
                    Err(_) => {
                        tracing::warn!(kid = %kid, alg, "skipping JWK with unsupported alg");
                        continue;
                    }
                },
            };
            let jwk: Jwk = match serde_json::from_value(entry) {
                Ok(jwk) => jwk,
                Err(e) => {
                    tracing::warn!(kid = %kid, error = %e, "skipping unparseable JWK");
                    continue;
                }
            };
            match DecodingKey::from_jwk(&jwk) {
                Ok(key) => set.insert(kid, key, algorithm),
                Err(e) => {
                    tracing::warn!(kid = %kid, error = %e, "skipping unusable JWK");
                }
            }
        }

        Ok(set)
    }

    pub fn insert(&mut self, kid: impl Into<String>, key: DecodingKey, algorithm: Option<Algorithm>) {
        self.keys
            .insert(kid.into(), VerificationKey { key, algorithm });
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kids: Vec<&str> = self.kids().collect();
        kids.sort_unstable();
        f.debug_struct("KeySet").field("kids", &kids).finish()
    }
}

struct RemoteSource {
    client: Client,
    jwks_uri: Url,
}

pub struct KeyCache {
    current: ArcSwap<KeySet>,
    source: Option<RemoteSource>,
}

impl KeyCache {
    /// Cache backed by a remote JWKS endpoint. Starts empty; call
    /// [`KeyCache::refresh`] once before serving.
    pub fn new(jwks_uri: Url, fetch_timeout: Duration) -> Result<Self, KeyCacheError> {
        // Outbound requests carry no request-derived headers.
        let client = Client::builder()
            .timeout(fetch_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(KeyCacheError::Client)?;

        Ok(Self {
            current: ArcSwap::from_pointee(KeySet::empty()),
            source: Some(RemoteSource { client, jwks_uri }),
        })
    }

    pub fn from_key_set(keys: KeySet) -> Self {
        Self {
            current: ArcSwap::from_pointee(keys),
            source: None,
        }
    }

    pub fn jwks_uri(&self) -> Option<&Url> {
        self.source.as_ref().map(|s| &s.jwks_uri)
    }

    pub fn get(&self) -> Arc<KeySet> {
        self.current.load_full()
    }

    /// Fetch the key document and swap in a fresh snapshot. Returns the
    /// number of usable keys.
    pub async fn refresh(&self) -> Result<usize, KeyCacheError> {
        let source = self.source.as_ref().ok_or(KeyCacheError::Static)?;
        let uri = &source.jwks_uri;
        tracing::debug!(event = "jwks_refresh", uri = %uri);

        let fetch_err = |source| KeyCacheError::Fetch {
            uri: uri.clone(),
            source,
        };
        let mut resp = source
            .client
            .get(uri.clone())
            .send()
            .await
            .map_err(fetch_err)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(KeyCacheError::Status {
                uri: uri.clone(),
                status,
            });
        }

        let too_large = || KeyCacheError::TooLarge {
            uri: uri.clone(),
            limit: MAX_JWKS_BYTES,
        };
        if resp
            .content_length()
            .is_some_and(|len| len > MAX_JWKS_BYTES as u64)
        {
            return Err(too_large());
        }

        // Content-Length can be absent or wrong; enforce the cap while reading.
        let mut body = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(fetch_err)? {
            if body.len() + chunk.len() > MAX_JWKS_BYTES {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let keys = KeySet::from_jwks_json(&body)?;
        let count = keys.len();
        if count == 0 {
            tracing::warn!(uri = %uri, "JWKS document contained no usable keys");
        }
        self.current.store(Arc::new(keys));
        tracing::info!(event = "jwks_refreshed", uri = %uri, keys = count);
        Ok(count)
    }

    /// Spawn the background refresh loop. The first refresh happens one
    /// `every` after the call; missed ticks are delayed, never bunched.
    pub fn start(self: Arc<Self>, every: Duration) -> RefreshTask {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh().await {
                            tracing::warn!(error = %e, "JWKS refresh failed, keeping previous key set");
                        }
                    }
                }
            }
            tracing::debug!("JWKS refresh loop stopped");
        });

        RefreshTask {
            cancel,
            handle: Some(handle),
        }
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("jwks_uri", &self.jwks_uri().map(Url::as_str))
            .field("keys", &self.get())
            .finish()
    }
}

/// Handle on the background refresh loop. Dropping it cancels the loop
/// without waiting for it.
pub struct RefreshTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTask {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "JWKS refresh task did not shut down cleanly");
            }
        }
    }
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JWKS_K1: &str = include_str!("../../tests/fixtures/jwks_k1.json");
    const JWKS_K2: &str = include_str!("../../tests/fixtures/jwks_k2.json");

    async fn cache_for(server: &MockServer) -> KeyCache {
        let uri = Url::parse(&format!("{}/jwks.json", server.uri())).unwrap();
        KeyCache::new(uri, Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn parses_fixture_key_set() {
        let set = KeySet::from_jwks_json(JWKS_K1.as_bytes()).unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("k1"));
        assert_eq!(set.get("k1").unwrap().algorithm, Some(Algorithm::RS256));
    }

    #[test]
    fn skips_keys_without_kid_or_with_unsupported_params() {
        let k1: serde_json::Value = serde_json::from_str(JWKS_K1).unwrap();
        let good = k1["keys"][0].clone();
        let mut no_kid = good.clone();
        no_kid.as_object_mut().unwrap().remove("kid");
        let doc = json!({
            "keys": [
                good,
                no_kid,
                {"kty": "RSA", "kid": "weird-alg", "alg": "XX999", "n": "AQAB", "e": "AQAB"},
                {"kty": "banana", "kid": "bad-kty"}
            ]
        });

        let set = KeySet::from_jwks_json(doc.to_string().as_bytes()).unwrap();
        assert_eq!(set.kids().collect::<Vec<_>>(), vec!["k1"]);
    }

    #[test]
    fn rejects_documents_without_keys_array() {
        let err = KeySet::from_jwks_json(br#"{"not_keys": []}"#).unwrap_err();
        assert!(matches!(err, KeyCacheError::Parse(_)));
    }

    #[tokio::test]
    async fn refresh_swaps_in_new_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS_K1, "application/json"))
            .mount(&server)
            .await;

        let cache = cache_for(&server).await;
        assert!(cache.get().is_empty());

        let before = cache.get();
        assert_eq!(cache.refresh().await.unwrap(), 1);
        let after = cache.get();
        assert!(after.contains("k1"));
        // The old snapshot is untouched.
        assert!(before.is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS_K1, "application/json"))
            .mount(&server)
            .await;

        let cache = cache_for(&server).await;
        cache.refresh().await.unwrap();

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = cache.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            KeyCacheError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert!(cache.get().contains("k1"));

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;
        assert!(matches!(
            cache.refresh().await,
            Err(KeyCacheError::Parse(_))
        ));
        assert!(cache.get().contains("k1"));
    }

    #[tokio::test]
    async fn oversized_document_is_rejected() {
        let server = MockServer::start().await;
        let huge = format!(r#"{{"keys":[],"pad":"{}"}}"#, "x".repeat(MAX_JWKS_BYTES));
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(huge))
            .mount(&server)
            .await;

        let cache = cache_for(&server).await;
        assert!(matches!(
            cache.refresh().await,
            Err(KeyCacheError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("location", "https://attacker.invalid/jwks"),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server).await;
        assert!(matches!(
            cache.refresh().await,
            Err(KeyCacheError::Status { status, .. }) if status == StatusCode::FOUND
        ));
    }

    #[tokio::test]
    async fn static_cache_cannot_refresh() {
        let set = KeySet::from_jwks_json(JWKS_K2.as_bytes()).unwrap();
        let cache = KeyCache::from_key_set(set);
        assert!(cache.get().contains("k2"));
        assert!(matches!(cache.refresh().await, Err(KeyCacheError::Static)));
    }

    #[tokio::test]
    async fn background_task_refreshes_and_stops() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks.json"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(JWKS_K2, "application/json"))
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server).await);
        let task = Arc::clone(&cache).start(Duration::from_millis(50));
        assert!(task.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while !cache.get().contains("k2") {
            assert!(Instant::now() < deadline, "refresh loop never ran");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        task.stop().await;
    }
}
