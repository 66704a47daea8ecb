// src/session.rs

use crate::error::StoreError;
use crate::nonce::random_token;
use crate::store::Store;
use axum::http::{header, HeaderMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";

/// Bytes of entropy behind a session token.
const SESSION_TOKEN_BYTES: usize = 32;

/// A first-party login, created once per successful callback and never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// The opaque cookie value.
    pub token: String,
    /// The owning user's subject.
    pub subject: String,
    /// Unix timestamp (seconds) after which the session is no longer valid.
    pub expires_at: u64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("subject", &self.subject)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub(crate) fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Maps session cookies to authenticated subjects.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn Store>,
    ttl: Duration,
    secure: bool,
}

impl SessionManager {
    /// `secure` adds the `Secure` attribute to emitted cookies.
    pub fn new(store: Arc<dyn Store>, ttl: Duration, secure: bool) -> Self {
        Self { store, ttl, secure }
    }

    /// Mints and stores a session for `subject`.
    pub async fn create(&self, subject: &str) -> Result<Session, StoreError> {
        let session = Session {
            token: random_token(SESSION_TOKEN_BYTES),
            subject: subject.to_string(),
            expires_at: now_unix().saturating_add(self.ttl.as_secs()),
        };
        self.store.insert_session(&session).await.map_err(|e| match e {
            StoreError::Duplicate(_) => {
                warn!("Session token collision");
                StoreError::Duplicate("Cookie collision! Could you try signing in again?".to_string())
            }
            other => other,
        })?;
        debug!(subject, expires_at = session.expires_at, "Session created");
        Ok(session)
    }

    /// Finds the session for `token`. Expired sessions are returned as well;
    /// check them with [`is_expired`](Self::is_expired).
    pub async fn lookup(&self, token: &str) -> Result<Option<Session>, StoreError> {
        self.store.find_session(token).await
    }

    pub fn is_expired(&self, session: &Session) -> bool {
        is_expired_at(session, now_unix())
    }

    /// The `Set-Cookie` value carrying `session`.
    pub fn cookie(&self, session: &Session) -> String {
        build_set_cookie(SESSION_COOKIE, &session.token, self.ttl.as_secs(), self.secure)
    }
}

pub fn is_expired_at(session: &Session, now: u64) -> bool {
    now >= session.expires_at
}

fn build_set_cookie(name: &str, value: &str, max_age_secs: u64, secure: bool) -> String {
    let mut out = format!("{name}={value}; Path=/; Max-Age={max_age_secs}; HttpOnly; SameSite=Lax");
    if secure {
        out.push_str("; Secure");
    }
    out
}

/// Extracts the session cookie value from request headers, if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            (k.trim() == SESSION_COOKIE && !v.trim().is_empty()).then(|| v.trim().to_string())
        })
}
