//! Remote JSON Web Key Set cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Key-set endpoint request timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum KeySetError {
    #[error("key-set request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("key-set contained no usable RSA keys")]
    Empty,
}

struct CacheState {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
}

/// Caches the remote key set with a max age and a fetch cooldown. The
/// cooldown also bounds forced refreshes, so a burst of bad tokens cannot
/// hammer the upstream endpoint.
pub struct JwksCache {
    url: String,
    client: reqwest::Client,
    max_age: Duration,
    cooldown: Duration,
    state: Mutex<CacheState>,
}

impl JwksCache {
    pub fn new(url: String, max_age: Duration, cooldown: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            url,
            client,
            max_age,
            cooldown,
            state: Mutex::new(CacheState {
                keys: HashMap::new(),
                fetched_at: None,
                last_attempt: None,
            }),
        }
    }

    /// Decoding key for `kid`, refetching the set when the cache is stale.
    pub async fn key_for(&self, kid: &str) -> Result<Option<DecodingKey>, KeySetError> {
        let mut state = self.state.lock().await;
        let stale = state
            .fetched_at
            .map(|at| at.elapsed() >= self.max_age)
            .unwrap_or(true);
        if stale {
            self.refresh_locked(&mut state).await?;
        }
        Ok(state.keys.get(kid).cloned())
    }

    /// Refresh regardless of max age. Used once when a token fails in a way
    /// that suggests upstream key rotation. Still cooldown-limited.
    pub async fn force_refresh(&self) -> Result<(), KeySetError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut CacheState) -> Result<(), KeySetError> {
        if let Some(at) = state.last_attempt {
            if at.elapsed() < self.cooldown {
                debug!("key-set refresh skipped, within cooldown");
                return Ok(());
            }
        }
        state.last_attempt = Some(Instant::now());

        let set: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut keys = HashMap::new();
        for jwk in set.keys {
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            if jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(error) => {
                    warn!(kid = %kid, %error, "Skipping malformed JWK");
                }
            }
        }
        if keys.is_empty() {
            return Err(KeySetError::Empty);
        }

        debug!(count = keys.len(), "Key set refreshed");
        state.keys = keys;
        state.fetched_at = Some(Instant::now());
        Ok(())
    }
}
