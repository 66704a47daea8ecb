// src/discovery/mod.rs

pub mod client;
pub mod model;

use crate::error::NilaOidcError;
use jsonwebtoken::{Algorithm, DecodingKey};
use model::{JsonWebKey, JsonWebKeySet};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use url::Url;

pub use client::DiscoveryClient;

/// The provider endpoints this relying party needs, as discovered at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    /// Unused by the form_post flow.
    pub token_endpoint: Option<Url>,
    pub jwks_uri: Url,
    pub userinfo_endpoint: Option<Url>,
}

impl ProviderMetadata {
    pub fn with_authorization_endpoint(mut self, endpoint: Url) -> Self {
        self.authorization_endpoint = endpoint;
        self
    }
}

/// A verification key together with the algorithm it is pinned to, if any.
#[derive(Clone)]
pub struct VerificationKey {
    pub key: DecodingKey,
    pub alg: Option<Algorithm>,
}

/// The provider's signing keys, indexed by key identifier.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, VerificationKey>,
}

impl KeySet {
    /// Builds a key set from a decoded JWKS document.
    ///
    /// Encryption keys, keys without a `kid` and unsupported key types are
    /// skipped. A supported key missing one of its components is an error.
    pub fn from_document(document: JsonWebKeySet) -> Result<Self, NilaOidcError> {
        let mut keys = HashMap::with_capacity(document.keys.len());
        for jwk in document.keys {
            if jwk.use_purpose.as_deref() == Some("enc") {
                continue;
            }
            let Some(kid) = jwk.kid.clone() else {
                debug!(kty = %jwk.kty, "Skipping JWK without a kid");
                continue;
            };
            if let Some(key) = decoding_key(&jwk)? {
                keys.insert(kid, key);
            }
        }
        Ok(Self { keys })
    }

    pub fn get(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.get(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn component<'a>(value: &'a Option<String>, kid: &str, name: &str) -> Result<&'a str, NilaOidcError> {
    value
        .as_deref()
        .ok_or_else(|| NilaOidcError::KeySet(format!("key '{kid}' is missing '{name}'")))
}

fn decoding_key(jwk: &JsonWebKey) -> Result<Option<VerificationKey>, NilaOidcError> {
    let kid = jwk.kid.as_deref().unwrap_or_default();
    let key = match jwk.kty.as_str() {
        "RSA" => {
            let n = component(&jwk.n, kid, "n")?;
            let e = component(&jwk.e, kid, "e")?;
            DecodingKey::from_rsa_components(n, e)
        }
        "EC" => {
            match jwk.crv.as_deref() {
                Some("P-256") | Some("P-384") => {}
                other => {
                    debug!(kid, crv = ?other, "Skipping EC key on an unsupported curve");
                    return Ok(None);
                }
            }
            let x = component(&jwk.x, kid, "x")?;
            let y = component(&jwk.y, kid, "y")?;
            DecodingKey::from_ec_components(x, y)
        }
        other => {
            debug!(kid, kty = other, "Skipping JWK of unsupported type");
            return Ok(None);
        }
    }
    .map_err(|e| NilaOidcError::KeySet(format!("key '{kid}' is malformed: {e}")))?;

    let alg = match jwk.alg.as_deref() {
        Some(name) => Some(
            Algorithm::from_str(name)
                .map_err(|_| NilaOidcError::KeySet(format!("key '{kid}' names unknown alg '{name}'")))?,
        ),
        None => None,
    };

    Ok(Some(VerificationKey { key, alg }))
}

/// Holds the currently published key set.
///
/// Readers take a cheap `Arc` snapshot; a reload swaps in a complete new set.
pub struct KeyStore {
    current: RwLock<Arc<KeySet>>,
    last_refresh: Mutex<Instant>,
}

impl KeyStore {
    pub fn new(keys: KeySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(keys)),
            last_refresh: Mutex::new(Instant::now()),
        }
    }

    pub async fn current(&self) -> Arc<KeySet> {
        self.current.read().await.clone()
    }

    /// Reloads the key set unless the last attempt happened less than
    /// `min_interval` ago. Returns whether a new set was published.
    ///
    /// Failed attempts count against the interval too; on failure the
    /// previous set stays published.
    pub async fn refresh(
        &self,
        client: &DiscoveryClient,
        jwks_uri: &Url,
        min_interval: Duration,
    ) -> Result<bool, NilaOidcError> {
        let mut last_refresh = self.last_refresh.lock().await;
        if last_refresh.elapsed() < min_interval {
            debug!("Key set reload attempted {:?} ago, not reloading", last_refresh.elapsed());
            return Ok(false);
        }
        *last_refresh = Instant::now();
        let keys = client.load_keys(jwks_uri).await?;
        *self.current.write().await = Arc::new(keys);
        Ok(true)
    }
}

/// Everything learned about the provider at startup.
pub struct Provider {
    pub metadata: ProviderMetadata,
    pub keys: KeyStore,
}

impl Provider {
    pub fn new(metadata: ProviderMetadata, keys: KeySet) -> Self {
        Self {
            metadata,
            keys: KeyStore::new(keys),
        }
    }
}
