// src/store.rs

use crate::error::StoreError;
use crate::session::{is_expired_at, now_unix, Session};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A user known to this application, keyed by the provider's subject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct User {
    pub subject: String,
    pub name: String,
    pub email: String,
}

/// The persistence capability the authentication core relies on.
///
/// Any engine can back it; implementations must be safe to call from many
/// requests at once.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a new user. Fails with [`StoreError::Duplicate`] if the subject exists.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Overwrites name and email of an existing user.
    async fn update_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user(&self, subject: &str) -> Result<Option<User>, StoreError>;

    /// Inserts a session. Fails with [`StoreError::Duplicate`] on a token collision.
    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError>;
}

/// Inserts `user`, falling back to an update when the subject already
/// exists (including when a concurrent first login won the insert).
pub async fn upsert_user(store: &dyn Store, user: &User) -> Result<(), StoreError> {
    match store.insert_user(user).await {
        Err(StoreError::Duplicate(_)) => store.update_user(user).await,
        other => other,
    }
}

/// An in-process [`Store`].
///
/// Expired sessions are dropped on the next session insert, or when a lookup
/// finds them.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.subject) {
            return Err(StoreError::Duplicate(format!("user '{}'", user.subject)));
        }
        users.insert(user.subject.clone(), user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), StoreError> {
        match self.users.write().await.get_mut(&user.subject) {
            Some(existing) => {
                existing.name.clone_from(&user.name);
                existing.email.clone_from(&user.email);
                Ok(())
            }
            None => Err(StoreError::Integrity(format!("user '{}' vanished during update", user.subject))),
        }
    }

    async fn find_user(&self, subject: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(subject).cloned())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let now = now_unix();
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| !is_expired_at(s, now));
        if sessions.contains_key(&session.token) {
            return Err(StoreError::Duplicate("session token".to_string()));
        }
        sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let found = self.sessions.read().await.get(token).cloned();
        match found {
            // Still handed back once so the caller sees it as expired rather than unknown.
            Some(session) if is_expired_at(&session, now_unix()) => {
                self.sessions.write().await.remove(token);
                Ok(Some(session))
            }
            other => Ok(other),
        }
    }
}
