// src/authorize.rs

use crate::discovery::ProviderMetadata;
use std::fmt;
use url::Url;

/// The scopes requested from the provider.
///
/// `openid` is always present and always first; duplicates are dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scopes(Vec<String>);

impl Scopes {
    /// Only `openid`. The provider may then omit `name` and `email`.
    pub fn openid() -> Self {
        Self(vec!["openid".to_string()])
    }

    /// Builds a scope set from a space-separated list, adding `openid` if absent.
    pub fn parse(scopes: &str) -> Self {
        scopes.split_whitespace().fold(Self::openid(), Self::with)
    }

    pub fn with(mut self, scope: &str) -> Self {
        if !scope.is_empty() && !self.0.iter().any(|s| s == scope) {
            self.0.push(scope.to_string());
        }
        self
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.iter().any(|s| s == scope)
    }
}

impl Default for Scopes {
    /// `openid profile email`: a display name and address are needed for the user record.
    fn default() -> Self {
        Self::openid().with("profile").with("email")
    }
}

impl fmt::Display for Scopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Composes the URL the browser is redirected to in order to log in.
///
/// The provider answers with an `id_token` posted as a form to `redirect_uri`.
pub fn build_authorization_url(
    metadata: &ProviderMetadata,
    client_id: &str,
    redirect_uri: &Url,
    nonce: &str,
    state: &str,
    scopes: &Scopes,
) -> Url {
    let mut url = metadata.authorization_endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "id_token")
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("response_mode", "form_post")
        .append_pair("scope", &scopes.to_string())
        .append_pair("nonce", nonce)
        .append_pair("state", state);
    url
}
