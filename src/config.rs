// src/config.rs

use crate::authorize::Scopes;
use crate::error::NilaOidcError;
use jsonwebtoken::Algorithm;
use std::fmt;
use std::time::Duration;
use url::Url;

/// Contains the validation settings for an OIDC ID Token.
///
/// This struct configures the checks that are performed on the token's
/// signature and time-based claims.
#[derive(Clone, Debug)]
pub struct ValidationDetails {
    /// The signing algorithms that are permitted for the ID Token.
    /// Tokens signed with any other algorithm will be rejected.
    pub algorithms: Vec<Algorithm>,
    /// The tolerance for clock skew when validating `exp` and `nbf`.
    /// Defaults to 60 seconds.
    pub leeway: Duration,
}

impl Default for ValidationDetails {
    fn default() -> Self {
        Self {
            // Default to RS256, the most common algorithm for OIDC.
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::from_secs(60),
        }
    }
}

/// The settings of a relying party deployment.
///
/// Constructed once at startup with [`SettingsBuilder`] and shared by every
/// component; nothing reads process-wide state.
#[derive(Clone)]
pub struct Settings {
    /// The client ID registered with the provider. Also the expected `aud`.
    pub client_id: String,
    /// Kept for confidential-client variants; the form_post flow never sends it.
    pub client_secret: Option<String>,
    /// The base URL discovery is performed against.
    pub issuer_url: Url,
    /// Overrides the `iss` value tokens must carry.
    pub expected_issuer: Option<String>,
    /// Overrides the discovered authorization endpoint.
    pub authorization_endpoint: Option<Url>,
    /// The public base URL of this application.
    pub public_url: Url,
    /// Where the provider posts the identity token back to.
    pub redirect_uri: Url,
    pub scopes: Scopes,
    /// Whether cookies carry the `Secure` flag (the deployment runs under TLS).
    pub secure_cookies: bool,
    pub validation: ValidationDetails,
    /// How long an issued nonce stays redeemable.
    pub nonce_ttl: Duration,
    /// How long a session cookie stays valid.
    pub session_ttl: Duration,
    /// Where a successful login is redirected to.
    pub landing_path: String,
    /// Timeout applied to every outbound request to the provider.
    pub http_timeout: Duration,
    /// How many times startup discovery is attempted before giving up.
    pub discovery_attempts: u32,
    /// Reload the key set when a token names an unknown `kid`.
    pub refresh_keys_on_unknown_kid: bool,
    /// Minimum spacing between two such reloads.
    pub key_refresh_min_interval: Duration,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("issuer_url", &self.issuer_url.as_str())
            .field("expected_issuer", &self.expected_issuer)
            .field("authorization_endpoint", &self.authorization_endpoint.as_ref().map(Url::as_str))
            .field("public_url", &self.public_url.as_str())
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("scopes", &self.scopes)
            .field("secure_cookies", &self.secure_cookies)
            .field("validation", &self.validation)
            .field("nonce_ttl", &self.nonce_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("landing_path", &self.landing_path)
            .field("http_timeout", &self.http_timeout)
            .field("discovery_attempts", &self.discovery_attempts)
            .field("refresh_keys_on_unknown_kid", &self.refresh_keys_on_unknown_kid)
            .field("key_refresh_min_interval", &self.key_refresh_min_interval)
            .finish()
    }
}

/// A builder for creating a `Settings` instance.
///
/// This builder provides a fluent API to ensure that the settings are
/// constructed correctly and with all required fields.
#[derive(Default)]
pub struct SettingsBuilder {
    client_id: Option<String>,
    client_secret: Option<String>,
    issuer_url: Option<Url>,
    expected_issuer: Option<String>,
    authorization_endpoint: Option<Url>,
    public_url: Option<Url>,
    redirect_uri: Option<Url>,
    scopes: Option<Scopes>,
    secure_cookies: bool,
    validation: ValidationDetails,
    nonce_ttl: Option<Duration>,
    session_ttl: Option<Duration>,
    landing_path: Option<String>,
    http_timeout: Option<Duration>,
    discovery_attempts: Option<u32>,
    refresh_keys_on_unknown_kid: bool,
    key_refresh_min_interval: Option<Duration>,
}

fn parse_url(url: &str) -> Result<Url, NilaOidcError> {
    Url::parse(url).map_err(|e| NilaOidcError::InvalidUrl(format!("{url}: {e}")))
}

impl SettingsBuilder {
    /// Creates a new `SettingsBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the client ID of the application. This is a required field.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Sets the provider base URL used for discovery. This is a required field.
    ///
    /// # Arguments
    ///
    /// * `url` - The issuer URL, e.g., "https://accounts.google.com".
    pub fn issuer_url(mut self, url: &str) -> Result<Self, NilaOidcError> {
        self.issuer_url = Some(parse_url(url)?);
        Ok(self)
    }

    /// Requires tokens to carry this exact `iss` instead of the discovered one.
    pub fn expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Replaces the discovered authorization endpoint. Some enterprise
    /// providers do not publish their browser-facing endpoint in discovery.
    pub fn authorization_endpoint(mut self, url: &str) -> Result<Self, NilaOidcError> {
        self.authorization_endpoint = Some(parse_url(url)?);
        Ok(self)
    }

    /// Sets the public base URL of this application. This is a required field.
    pub fn public_url(mut self, url: &str) -> Result<Self, NilaOidcError> {
        self.public_url = Some(parse_url(url)?);
        Ok(self)
    }

    /// Sets the callback URL. Defaults to `{public_url}/oidc`.
    pub fn redirect_uri(mut self, url: &str) -> Result<Self, NilaOidcError> {
        self.redirect_uri = Some(parse_url(url)?);
        Ok(self)
    }

    pub fn scopes(mut self, scopes: Scopes) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Marks the deployment as running under TLS, adding `Secure` to cookies.
    pub fn secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    /// Sets the allowed signing algorithms.
    /// Defaults to `[Algorithm::RS256]` if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.validation.algorithms = algorithms;
        self
    }

    /// Sets the clock skew tolerance.
    /// Defaults to 60 seconds.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.validation.leeway = leeway;
        self
    }

    pub fn nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce_ttl = Some(ttl);
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = Some(ttl);
        self
    }

    pub fn landing_path(mut self, path: impl Into<String>) -> Self {
        self.landing_path = Some(path.into());
        self
    }

    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = Some(timeout);
        self
    }

    pub fn discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = Some(attempts);
        self
    }

    /// Enables reloading the key set when a token names an unknown `kid`,
    /// at most once per `min_interval`.
    pub fn refresh_keys_on_unknown_kid(mut self, min_interval: Duration) -> Self {
        self.refresh_keys_on_unknown_kid = true;
        self.key_refresh_min_interval = Some(min_interval);
        self
    }

    /// Consumes the builder and returns a `Settings` object.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields (`client_id`, `issuer_url`,
    /// `public_url`) are missing or a value is out of range.
    pub fn build(self) -> Result<Settings, NilaOidcError> {
        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| NilaOidcError::MissingConfiguration("client_id".to_string()))?;
        let issuer_url = self
            .issuer_url
            .ok_or_else(|| NilaOidcError::MissingConfiguration("issuer_url".to_string()))?;
        let public_url = self
            .public_url
            .ok_or_else(|| NilaOidcError::MissingConfiguration("public_url".to_string()))?;

        let redirect_uri = match self.redirect_uri {
            Some(uri) => uri,
            None => {
                let base = public_url.as_str().trim_end_matches('/');
                parse_url(&format!("{base}/oidc"))?
            }
        };

        if self.validation.algorithms.is_empty() {
            return Err(NilaOidcError::InvalidConfiguration(
                "at least one signing algorithm must be allowed".to_string(),
            ));
        }

        let landing_path = self.landing_path.unwrap_or_else(|| "/".to_string());
        if !landing_path.starts_with('/') {
            return Err(NilaOidcError::InvalidConfiguration(format!(
                "landing_path must be an absolute path, got '{landing_path}'"
            )));
        }

        let discovery_attempts = self.discovery_attempts.unwrap_or(3);
        if discovery_attempts == 0 {
            return Err(NilaOidcError::InvalidConfiguration(
                "discovery_attempts must be at least 1".to_string(),
            ));
        }

        Ok(Settings {
            client_id,
            client_secret: self.client_secret,
            issuer_url,
            expected_issuer: self.expected_issuer,
            authorization_endpoint: self.authorization_endpoint,
            public_url,
            redirect_uri,
            scopes: self.scopes.unwrap_or_default(),
            secure_cookies: self.secure_cookies,
            validation: self.validation,
            nonce_ttl: self.nonce_ttl.unwrap_or(Duration::from_secs(10 * 60)),
            session_ttl: self.session_ttl.unwrap_or(Duration::from_secs(7 * 24 * 60 * 60)),
            landing_path,
            http_timeout: self.http_timeout.unwrap_or(Duration::from_secs(10)),
            discovery_attempts,
            refresh_keys_on_unknown_kid: self.refresh_keys_on_unknown_kid,
            key_refresh_min_interval: self
                .key_refresh_min_interval
                .unwrap_or(Duration::from_secs(5 * 60)),
        })
    }
}
