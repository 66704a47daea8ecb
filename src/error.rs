// src/error.rs

use axum::http::{Method, StatusCode};
use thiserror::Error;

/// The primary error type for the `nila-oidc-rp` library.
#[derive(Debug, Error)]
pub enum NilaOidcError {
    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The provider's discovery document could not be fetched or decoded.
    #[error("OpenID Connect discovery failed: {0}")]
    Discovery(String),

    /// The provider's key set could not be fetched or contains malformed keys.
    #[error("Key set error: {0}")]
    KeySet(String),

    /// An error occurred during an HTTP request to the provider.
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The callback was reached with something other than POST.
    #[error("Only POST is allowed on the OIDC callback, got {0}.\nPlease return to the login page and retry.")]
    MethodNotAllowed(Method),

    /// The callback body is not valid form data.
    #[error("Malformed form data.\n{0}")]
    MalformedForm(String),

    /// The provider reported an error instead of returning a token.
    #[error("{}", describe_provider_error(.error, .description))]
    Provider {
        error: String,
        description: Option<String>,
    },

    /// The callback form carried no `id_token`.
    #[error("Missing id_token.")]
    MissingIdToken,

    /// The identity token failed verification.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// The nonce or state does not belong to a live login attempt.
    #[error("Login request rejected: {0}.\nPlease return to the login page and retry.")]
    Replay(String),

    /// The user or session store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

fn describe_provider_error(error: &str, description: &Option<String>) -> String {
    match description.as_deref() {
        Some(description) if !description.is_empty() => format!("{error}\n{description}"),
        _ => error.to_string(),
    }
}

impl NilaOidcError {
    /// The HTTP status a request failing with this error is answered with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::MalformedForm(_)
            | Self::Provider { .. }
            | Self::MissingIdToken
            | Self::Token(_)
            | Self::Replay(_) => StatusCode::BAD_REQUEST,
            Self::Discovery(_) | Self::KeySet(_) | Self::HttpError(_) => StatusCode::BAD_GATEWAY,
            Self::MissingConfiguration(_)
            | Self::InvalidConfiguration(_)
            | Self::InvalidUrl(_)
            | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this error must abort the process when raised during startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingConfiguration(_)
                | Self::InvalidConfiguration(_)
                | Self::InvalidUrl(_)
                | Self::Discovery(_)
                | Self::KeySet(_)
                | Self::HttpError(_)
        )
    }
}

/// Reasons an identity token is refused.
///
/// Messages name the failing category only; the underlying cryptographic
/// detail is logged, never returned to the browser.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// The token does not split into header, payload and signature, or a required field is absent.
    #[error("Malformed JWT token: {0}.")]
    Malformed(String),

    /// The token's `kid` is not in the provider's key set.
    #[error("Unknown signing key: {0}.")]
    UnknownKey(String),

    #[error("Invalid JWS signature.")]
    SignatureInvalid,

    #[error("JWT token expired.")]
    Expired,

    #[error("JWT token not yet valid.")]
    NotYetValid,

    #[error("JWT token was issued by an unexpected issuer.")]
    IssuerMismatch,

    #[error("JWT token was issued for a different audience.")]
    AudienceMismatch,
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::MissingRequiredClaim(claim) => {
                Self::Malformed(format!("missing required claim '{claim}'"))
            }
            ErrorKind::InvalidToken => Self::Malformed("not a compact JWS".to_string()),
            ErrorKind::Base64(_) => Self::Malformed("bad base64url segment".to_string()),
            ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                Self::Malformed("undecodable JSON segment".to_string())
            }
            other => Self::Malformed(format!("{other:?}")),
        }
    }
}

/// Failures reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record with the same key already exists.
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// A record that must exist was not found.
    #[error("Data integrity error: {0}")]
    Integrity(String),

    /// Any other backend failure.
    #[error("Database error: {0}")]
    Backend(String),
}
