// src/validator/mod.rs

use crate::config::ValidationDetails;
use crate::discovery::KeySet;
use crate::error::TokenError;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, instrument};

/// The claims decoded from a verified ID Token.
///
/// A `Claims` value only ever comes out of [`Validator::validate`]; the
/// fields of an unverified token are never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Claims {
    /// The provider-assigned subject, used as the user's primary key.
    pub sub: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    pub iss: String,
    #[serde(deserialize_with = "one_or_many")]
    pub aud: Vec<String>,
    pub exp: u64,
    #[serde(default)]
    pub nbf: Option<u64>,
    #[serde(default)]
    pub iat: Option<u64>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl Claims {
    /// The display name, or an empty string when the `profile` scope was not granted.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    /// The email address. Enterprise providers tend to put it in
    /// `preferred_username` rather than `email`.
    pub fn email_address(&self) -> &str {
        self.email
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or_default()
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(aud) => vec![aud],
        OneOrMany::Many(auds) => auds,
    })
}

/// The OIDC ID Token validator.
///
/// Created once from the deployment's [`ValidationDetails`] and reused for
/// every callback. It holds no key material of its own: each call is given
/// the currently published [`KeySet`].
#[derive(Clone, Debug)]
pub struct Validator {
    details: ValidationDetails,
}

impl Validator {
    pub fn new(details: ValidationDetails) -> Self {
        Self { details }
    }

    /// Validates an OIDC ID Token.
    ///
    /// This performs, in order:
    /// 1. Header decoding and key lookup by `kid`.
    /// 2. Signature verification against that key.
    /// 3. Time validity (`exp`, `nbf`) with the configured leeway.
    /// 4. Issuer and audience matching.
    #[instrument(skip(self, token, keys), err(level = "warn"))]
    pub fn validate(
        &self,
        token: &str,
        keys: &KeySet,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<Claims, TokenError> {
        // 1. Decode header to get kid and alg without validation.
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| TokenError::Malformed("the header has no 'kid'".to_string()))?;
        let key = keys
            .get(&kid)
            .ok_or_else(|| TokenError::UnknownKey(kid.clone()))?;

        // 2. Only allowed algorithms, and only the one a key is pinned to.
        if !self.details.algorithms.contains(&header.alg) {
            debug!(alg = ?header.alg, "Token signed with a disallowed algorithm");
            return Err(TokenError::SignatureInvalid);
        }
        if key.alg.is_some_and(|alg| alg != header.alg) {
            debug!(alg = ?header.alg, pinned = ?key.alg, "Token algorithm does not match its key");
            return Err(TokenError::SignatureInvalid);
        }

        // 3. Construct validation options.
        let mut validation = Validation::new(header.alg);
        validation.leeway = self.details.leeway.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[expected_issuer]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);

        // 4. Decode into a generic value first; this checks signature, time, issuer and audience.
        let token_data = decode::<serde_json::Value>(token, &key.key, &validation)?;

        // 5. Only now deserialize into the typed claims.
        let claims: Claims = serde_json::from_value(token_data.claims)
            .map_err(|e| TokenError::Malformed(format!("unexpected claim shape: {e}")))?;

        debug!(sub = %claims.sub, kid = %kid, "ID token verified");
        Ok(claims)
    }
}
