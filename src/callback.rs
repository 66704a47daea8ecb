// src/callback.rs

use crate::authorize::build_authorization_url;
use crate::config::Settings;
use crate::discovery::{DiscoveryClient, Provider};
use crate::error::{NilaOidcError, StoreError, TokenError};
use crate::nonce::NonceIssuer;
use crate::session::{session_token, Session, SessionManager};
use crate::store::{upsert_user, Store, User};
use crate::validator::{Claims, Validator};
use axum::http::{HeaderMap, Method};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// The steps a provider callback moves through. Any step may instead end
/// the request with an error response; nothing is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackStage {
    AwaitingCallback,
    MethodChecked,
    FormParsed,
    ProviderErrorChecked,
    TokenPresent,
    TokenValidated,
    NonceConsumed,
    UserUpserted,
    SessionCreated,
    Redirected,
}

impl fmt::Display for CallbackStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The form the provider posts back with `response_mode=form_post`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackForm {
    pub id_token: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// What a successful callback hands back to the HTTP layer.
#[derive(Debug)]
pub struct CallbackSuccess {
    pub session: Session,
    /// The `Set-Cookie` header value.
    pub cookie: String,
    /// Where to send the browser with a 303.
    pub location: String,
}

/// A request carrying a live session.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub session: Session,
    pub user: User,
}

/// Drives the login flow: authorization redirects, callbacks, and session checks.
///
/// Built once at startup and shared by every request handler.
pub struct Authenticator {
    settings: Settings,
    provider: Provider,
    discovery: DiscoveryClient,
    validator: Validator,
    nonces: NonceIssuer,
    sessions: SessionManager,
    store: Arc<dyn Store>,
}

fn stage(reached: CallbackStage) {
    debug!(stage = %reached, "Callback stage reached");
}

impl Authenticator {
    /// Performs provider discovery and assembles the authenticator.
    ///
    /// # Errors
    ///
    /// Discovery and key-set failures are returned after the configured
    /// number of attempts; they are fatal at startup.
    pub async fn discover(settings: Settings, store: Arc<dyn Store>) -> Result<Self, NilaOidcError> {
        let discovery = DiscoveryClient::new(settings.http_timeout)?;
        let provider = discovery.discover(&settings).await?;
        info!(
            issuer = %provider.metadata.issuer,
            authorization_endpoint = %provider.metadata.authorization_endpoint,
            "OIDC provider ready"
        );
        Ok(Self::new(settings, provider, discovery, store))
    }

    /// Assembles an authenticator around an already resolved provider.
    pub fn new(settings: Settings, provider: Provider, discovery: DiscoveryClient, store: Arc<dyn Store>) -> Self {
        let sessions = SessionManager::new(store.clone(), settings.session_ttl, settings.secure_cookies);
        Self {
            validator: Validator::new(settings.validation.clone()),
            nonces: NonceIssuer::new(settings.nonce_ttl),
            settings,
            provider,
            discovery,
            sessions,
            store,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn nonces(&self) -> &NonceIssuer {
        &self.nonces
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The `iss` value tokens must carry.
    pub fn expected_issuer(&self) -> &str {
        self.settings
            .expected_issuer
            .as_deref()
            .unwrap_or(&self.provider.metadata.issuer)
    }

    /// Issues a nonce/state pair and returns the provider URL to send the browser to.
    pub async fn begin_login(&self) -> Url {
        let (nonce, state) = self.nonces.issue().await;
        debug!("Issued login request");
        build_authorization_url(
            &self.provider.metadata,
            &self.settings.client_id,
            &self.settings.redirect_uri,
            &nonce,
            &state,
            &self.settings.scopes,
        )
    }

    /// Handles the provider's POST-back.
    ///
    /// On success the user record has been upserted and a new session stored;
    /// the caller sets the returned cookie and redirects.
    #[instrument(skip(self, method, body), fields(method = %method), err(level = "warn"))]
    pub async fn handle_callback(&self, method: &Method, body: &[u8]) -> Result<CallbackSuccess, NilaOidcError> {
        stage(CallbackStage::AwaitingCallback);

        if *method != Method::POST {
            return Err(NilaOidcError::MethodNotAllowed(method.clone()));
        }
        stage(CallbackStage::MethodChecked);

        let form: CallbackForm =
            serde_urlencoded::from_bytes(body).map_err(|e| NilaOidcError::MalformedForm(e.to_string()))?;
        stage(CallbackStage::FormParsed);

        if let Some(error) = form.error.filter(|e| !e.is_empty()) {
            warn!(provider_error = %error, "Provider returned an error");
            return Err(NilaOidcError::Provider {
                error,
                description: form.error_description,
            });
        }
        stage(CallbackStage::ProviderErrorChecked);

        let id_token = form
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or(NilaOidcError::MissingIdToken)?;
        stage(CallbackStage::TokenPresent);

        let claims = self.verify(&id_token).await.map_err(|e| {
            warn!("ID token rejected: {}", e);
            e
        })?;
        stage(CallbackStage::TokenValidated);

        self.redeem_nonce(&claims, form.state.as_deref()).await?;
        stage(CallbackStage::NonceConsumed);

        let user = User {
            subject: claims.sub.clone(),
            name: claims.display_name().to_string(),
            email: claims.email_address().to_string(),
        };
        upsert_user(self.store.as_ref(), &user).await.map_err(|e| {
            error!(subject = %user.subject, "Failed to upsert user: {}", e);
            e
        })?;
        stage(CallbackStage::UserUpserted);

        let session = self.sessions.create(&user.subject).await.map_err(|e| {
            error!(subject = %user.subject, "Failed to create session: {}", e);
            e
        })?;
        stage(CallbackStage::SessionCreated);

        let success = CallbackSuccess {
            cookie: self.sessions.cookie(&session),
            location: self.settings.landing_path.clone(),
            session,
        };
        stage(CallbackStage::Redirected);
        info!(subject = %user.subject, "User signed in");
        Ok(success)
    }

    /// Validates `id_token` against the published keys, reloading them once
    /// on an unknown `kid` when that is enabled.
    async fn verify(&self, id_token: &str) -> Result<Claims, NilaOidcError> {
        let keys = self.provider.keys.current().await;
        let first = self.validator.validate(
            id_token,
            &keys,
            self.expected_issuer(),
            &self.settings.client_id,
        );

        match first {
            Err(TokenError::UnknownKey(kid)) if self.settings.refresh_keys_on_unknown_kid => {
                let refreshed = self
                    .provider
                    .keys
                    .refresh(
                        &self.discovery,
                        &self.provider.metadata.jwks_uri,
                        self.settings.key_refresh_min_interval,
                    )
                    .await;
                match refreshed {
                    Ok(true) => {
                        debug!(kid = %kid, "Key set reloaded, validating again");
                        let keys = self.provider.keys.current().await;
                        Ok(self.validator.validate(
                            id_token,
                            &keys,
                            self.expected_issuer(),
                            &self.settings.client_id,
                        )?)
                    }
                    Ok(false) => Err(TokenError::UnknownKey(kid).into()),
                    Err(e) => {
                        error!("Key set reload failed: {}", e);
                        Err(TokenError::UnknownKey(kid).into())
                    }
                }
            }
            other => Ok(other?),
        }
    }

    async fn redeem_nonce(&self, claims: &Claims, form_state: Option<&str>) -> Result<(), NilaOidcError> {
        let nonce = claims
            .nonce
            .as_deref()
            .ok_or_else(|| NilaOidcError::Replay("the token carries no nonce".to_string()))?;
        let pending = self.nonces.take(nonce).await.ok_or_else(|| {
            warn!(subject = %claims.sub, "Unknown, expired or replayed nonce");
            NilaOidcError::Replay("unknown, expired or already used nonce".to_string())
        })?;
        if let Some(state) = form_state {
            if state != pending.state {
                warn!(subject = %claims.sub, "State does not match the login request");
                return Err(NilaOidcError::Replay("state does not match the login request".to_string()));
            }
        }
        Ok(())
    }

    /// Resolves the session cookie in `headers` to a signed-in user.
    ///
    /// Returns `None` when there is no cookie, or it names an unknown or
    /// expired session.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<AuthenticatedUser>, NilaOidcError> {
        let Some(token) = session_token(headers) else {
            return Ok(None);
        };
        let Some(session) = self.sessions.lookup(&token).await? else {
            debug!("Session cookie does not match any session");
            return Ok(None);
        };
        if self.sessions.is_expired(&session) {
            debug!(subject = %session.subject, "Session expired");
            return Ok(None);
        }
        let user = self.store.find_user(&session.subject).await?.ok_or_else(|| {
            StoreError::Integrity(format!("session owner '{}' has no user record", session.subject))
        })?;
        Ok(Some(AuthenticatedUser { session, user }))
    }
}
