//! User storage capability and the in-memory reference store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

use super::{password, Role};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a user with email {0} already exists")]
    Conflict(String),

    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

/// A user to be created. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

/// A stored user.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// What the credential service needs from a user store.
///
/// `create` must be an atomic insert-if-absent: of two concurrent creates for
/// the same email exactly one succeeds.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Checks a login attempt against the stored credential. The default
    /// verifies the Argon2 hash on the blocking pool.
    async fn verify_password(&self, user: &UserRecord, candidate: &str) -> bool {
        let (candidate, stored_hash) = (candidate.to_string(), user.password_hash.clone());
        tokio::task::spawn_blocking(move || password::verify_password(&candidate, &stored_hash))
            .await
            .unwrap_or(false)
    }
}

/// Process-local user table keyed by exact email.
///
/// Data is lost on restart; it stands in for an external store.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|users| users.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StoreError::Unavailable("user table lock poisoned".into()))?;

        // Check and insert under one write lock.
        if users.contains_key(&user.email) {
            return Err(StoreError::Conflict(user.email));
        }

        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        users.insert(record.email.clone(), record.clone());

        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Unavailable("user table lock poisoned".into()))?;
        Ok(users.get(email).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            display_name: None,
            password_hash: "$argon2id$fake".to_string(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = InMemoryUserStore::new();
        let created = store.create(new_user("a@example.com")).await.unwrap();

        let found = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(store.find_by_email("b@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_email_match_is_case_sensitive() {
        let store = InMemoryUserStore::new();
        store.create(new_user("a@example.com")).await.unwrap();

        assert!(store.create(new_user("A@example.com")).await.is_ok());
        assert!(store.find_by_email("A@EXAMPLE.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_conflicts() {
        let store = InMemoryUserStore::new();
        store.create(new_user("a@example.com")).await.unwrap();

        let err = store.create(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_creates_one_winner() {
        let store = Arc::new(InMemoryUserStore::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.create(new_user("race@example.com")).await })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(store.len(), 1);
    }
}
