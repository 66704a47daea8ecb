// src/nonce.rs

use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use moka::future::Cache;
use rand::RngCore;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bytes of entropy behind every nonce and state value.
const NONCE_BYTES: usize = 24;

/// Upper bound on concurrently pending logins.
const MAX_PENDING: u64 = 100_000;

/// Returns `bytes` bytes from the thread-local CSPRNG, base64url-encoded without padding.
pub(crate) fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// A login attempt that has been sent to the provider and not yet answered.
#[derive(Clone, Debug)]
pub struct PendingAuthRequest {
    pub nonce: String,
    pub state: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl PendingAuthRequest {
    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Issues single-use nonce/state pairs and redeems them at most once.
#[derive(Clone)]
pub struct NonceIssuer {
    ttl: Duration,
    // Keyed by nonce. The cache's TTL evicts abandoned attempts in the background.
    pending: Cache<String, PendingAuthRequest>,
}

impl NonceIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: Cache::builder()
                .max_capacity(MAX_PENDING)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Issues a fresh `(nonce, state)` pair and records it as pending.
    pub async fn issue(&self) -> (String, String) {
        let nonce = random_token(NONCE_BYTES);
        let state = random_token(NONCE_BYTES);
        let request = PendingAuthRequest {
            nonce: nonce.clone(),
            state: state.clone(),
            created_at: Instant::now(),
            ttl: self.ttl,
        };
        self.pending.insert(nonce.clone(), request).await;
        (nonce, state)
    }

    /// Removes and returns the pending request for `nonce`, if it exists and
    /// has not expired. Only one caller can ever receive a given request.
    pub async fn take(&self, nonce: &str) -> Option<PendingAuthRequest> {
        let request = self.pending.remove(nonce).await?;
        if request.is_expired() {
            debug!("Pending login request expired before its callback");
            return None;
        }
        Some(request)
    }

    /// Returns `true` exactly once for an issued, unexpired nonce.
    pub async fn consume(&self, nonce: &str) -> bool {
        self.take(nonce).await.is_some()
    }
}
