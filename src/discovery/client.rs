// src/discovery/client.rs

use super::model::{JsonWebKeySet, OidcDiscoveryDocument};
use super::{KeySet, Provider, ProviderMetadata};
use crate::config::Settings;
use crate::error::NilaOidcError;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use url::Url;

/// Fetches the provider's discovery document and signing keys.
#[derive(Clone)]
pub struct DiscoveryClient {
    // reqwest::Client is internally ref-counted, so cloning is cheap.
    http_client: reqwest::Client,
}

fn parse_endpoint(name: &str, value: &str) -> Result<Url, NilaOidcError> {
    Url::parse(value).map_err(|e| NilaOidcError::Discovery(format!("{name} '{value}' is not a URL: {e}")))
}

fn parse_optional_endpoint(name: &str, value: Option<&str>) -> Result<Option<Url>, NilaOidcError> {
    value.map(|value| parse_endpoint(name, value)).transpose()
}

/// Turns a discovery document into metadata. A configured authorization
/// endpoint wins over the discovered one and stands in for a missing one.
fn metadata_from(
    document: OidcDiscoveryDocument,
    issuer_base: &Url,
    authorization_override: Option<&Url>,
) -> Result<ProviderMetadata, NilaOidcError> {
    let authorization_endpoint = match authorization_override {
        Some(endpoint) => endpoint.clone(),
        None => {
            let value = document.authorization_endpoint.as_deref().ok_or_else(|| {
                NilaOidcError::Discovery("discovery document has no authorization_endpoint".to_string())
            })?;
            parse_endpoint("authorization_endpoint", value)?
        }
    };

    Ok(ProviderMetadata {
        issuer: document
            .issuer
            .unwrap_or_else(|| issuer_base.as_str().trim_end_matches('/').to_string()),
        authorization_endpoint,
        token_endpoint: parse_optional_endpoint("token_endpoint", document.token_endpoint.as_deref())?,
        jwks_uri: parse_endpoint("jwks_uri", &document.jwks_uri)?,
        userinfo_endpoint: parse_optional_endpoint("userinfo_endpoint", document.userinfo_endpoint.as_deref())?,
    })
}

impl DiscoveryClient {
    /// Creates a new `DiscoveryClient` whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, NilaOidcError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Fetches `{issuer_base}/.well-known/openid-configuration` and decodes it.
    pub async fn fetch(&self, issuer_base: &Url) -> Result<ProviderMetadata, NilaOidcError> {
        let document = self.fetch_document(issuer_base).await?;
        metadata_from(document, issuer_base, None)
    }

    #[instrument(skip(self), fields(issuer_base = %issuer_base), err)]
    async fn fetch_document(&self, issuer_base: &Url) -> Result<OidcDiscoveryDocument, NilaOidcError> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            issuer_base.as_str().trim_end_matches('/')
        );

        debug!("Performing OIDC discovery at: {}", discovery_url);
        let response = self.http_client.get(&discovery_url).send().await?;
        if !response.status().is_success() {
            return Err(NilaOidcError::Discovery(format!(
                "{discovery_url} answered {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| NilaOidcError::Discovery(format!("malformed discovery document: {e}")))
    }

    /// Fetches the JWKS document at `jwks_uri` and builds a [`KeySet`].
    #[instrument(skip(self), fields(jwks_uri = %jwks_uri), err)]
    pub async fn load_keys(&self, jwks_uri: &Url) -> Result<KeySet, NilaOidcError> {
        let response = self.http_client.get(jwks_uri.clone()).send().await?;
        if !response.status().is_success() {
            return Err(NilaOidcError::KeySet(format!(
                "{jwks_uri} answered {}",
                response.status()
            )));
        }
        let document: JsonWebKeySet = response
            .json()
            .await
            .map_err(|e| NilaOidcError::KeySet(format!("malformed JWKS document: {e}")))?;

        let keys = KeySet::from_document(document)?;
        info!("Successfully loaded {} signing keys", keys.len());
        Ok(keys)
    }

    /// Runs the whole startup discovery once: metadata, configured
    /// overrides, keys.
    pub async fn resolve(&self, settings: &Settings) -> Result<Provider, NilaOidcError> {
        let document = self.fetch_document(&settings.issuer_url).await?;
        let metadata = metadata_from(
            document,
            &settings.issuer_url,
            settings.authorization_endpoint.as_ref(),
        )?;
        debug!(
            authorization_endpoint = %metadata.authorization_endpoint,
            jwks_uri = %metadata.jwks_uri,
            "Resolved provider metadata"
        );
        let keys = self.load_keys(&metadata.jwks_uri).await?;
        Ok(Provider::new(metadata, keys))
    }

    /// [`resolve`](Self::resolve) with a bounded number of attempts and
    /// exponential backoff between them.
    pub async fn discover(&self, settings: &Settings) -> Result<Provider, NilaOidcError> {
        let base_retry_delay = Duration::from_secs(1);
        let max_retry_delay = Duration::from_secs(30);
        let mut current_retry_delay = base_retry_delay;
        let mut attempt = 1;

        loop {
            match self.resolve(settings).await {
                Ok(provider) => return Ok(provider),
                Err(e) if attempt >= settings.discovery_attempts => return Err(e),
                Err(e) => {
                    error!(
                        attempt,
                        "OIDC discovery failed: {}. Retrying in {:?}.", e, current_retry_delay
                    );
                    tokio::time::sleep(current_retry_delay).await;
                    // Double the delay for the next attempt, up to the max.
                    current_retry_delay = (current_retry_delay * 2).min(max_retry_delay);
                    attempt += 1;
                }
            }
        }
    }
}
