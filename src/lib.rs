// src/lib.rs

pub mod authorize;
pub mod callback;
pub mod config;
pub mod discovery;
pub mod error;
pub mod nonce;
pub mod server;
pub mod session;
pub mod store;
pub mod validator;

/// The public prelude for the `nila-oidc-rp` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::authorize::{build_authorization_url, Scopes};
    pub use crate::callback::{AuthenticatedUser, Authenticator, CallbackStage, CallbackSuccess};
    pub use crate::config::{Settings, SettingsBuilder, ValidationDetails};
    pub use crate::discovery::{DiscoveryClient, KeySet, KeyStore, Provider, ProviderMetadata};
    pub use crate::error::{NilaOidcError, StoreError, TokenError};
    pub use crate::nonce::NonceIssuer;
    pub use crate::server::router;
    pub use crate::session::{Session, SessionManager, SESSION_COOKIE};
    pub use crate::store::{MemoryStore, Store, User};
    pub use crate::validator::{Claims, Validator};

    pub use jsonwebtoken::Algorithm;
}
