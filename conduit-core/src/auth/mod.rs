//! Credential & token service.
//!
//! - `token`: signs and verifies session tokens carrying a [`Principal`]
//! - `password`: Argon2 hashing
//! - `store`: the [`UserStore`] capability and its in-memory implementation
//!
//! [`CredentialService`] ties them together for registration and login.

mod password;
mod store;
mod token;

pub use password::{hash_password, verify_password};
pub use store::{InMemoryUserStore, NewUser, StoreError, UserRecord, UserStore};
pub use token::{Claims, IssuedToken, TokenService};

use crate::config::AuthConfig;
use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const MAX_EMAIL_LEN: usize = 254;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;
const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no bearer token provided")]
    MissingToken,

    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("a user with this email already exists")]
    Conflict,

    #[error("{0}")]
    InvalidInput(String),

    #[error("failed to sign token: {0}")]
    Signing(String),

    #[error("failed to hash password: {0}")]
    Hashing(String),

    #[error("user store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(_) => AuthError::Conflict,
            StoreError::Unavailable(msg) => AuthError::Store(msg),
        }
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => {
                GatewayError::unauthenticated("MISSING_TOKEN", "Authentication required")
            }
            AuthError::Expired => GatewayError::unauthenticated("TOKEN_EXPIRED", "Token has expired"),
            AuthError::Malformed(_) => GatewayError::unauthenticated("INVALID_TOKEN", "Invalid token"),
            AuthError::InvalidCredentials => {
                GatewayError::unauthenticated("INVALID_CREDENTIALS", "Invalid email or password")
            }
            AuthError::Conflict => {
                GatewayError::Conflict("A user with this email already exists".into())
            }
            AuthError::InvalidInput(message) => GatewayError::validation(message),
            other => GatewayError::internal(other),
        }
    }
}

/// Role carried by a principal. Fixed for the lifetime of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// The authenticated identity embedded in a session token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&UserRecord> for Principal {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id.clone(),
            email: record.email.clone(),
            display_name: record.display_name.clone(),
            role: record.role,
        }
    }
}

/// Result of a successful registration or login.
#[derive(Debug, Clone)]
pub struct Session {
    pub principal: Principal,
    pub token: IssuedToken,
}

/// Registration, login, and token verification over a [`UserStore`].
#[derive(Clone)]
pub struct CredentialService {
    store: Arc<dyn UserStore>,
    tokens: TokenService,
    admin_emails: Arc<HashSet<String>>,
    /// Verified against when the email is unknown, so both failure paths cost the same
    dummy_hash: Arc<String>,
}

impl CredentialService {
    pub fn new(config: &AuthConfig, store: Arc<dyn UserStore>) -> Result<Self> {
        Ok(Self {
            store,
            tokens: TokenService::new(config),
            admin_emails: Arc::new(config.admin_emails.iter().cloned().collect()),
            dummy_hash: Arc::new(hash_password("conduit-dummy-password")?),
        })
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Creates an account and issues its first token.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        display_name: Option<String>,
    ) -> Result<Session> {
        validate_registration(email, password, display_name.as_deref())?;

        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))??;

        let role = if self.admin_emails.contains(email) {
            Role::Admin
        } else {
            Role::User
        };

        let record = self
            .store
            .create(NewUser {
                email: email.to_string(),
                display_name,
                password_hash,
                role,
            })
            .await?;

        info!(user_id = %record.id, role = ?record.role, "registered user");

        let principal = Principal::from(&record);
        let token = self.tokens.issue(&principal)?;
        Ok(Session { principal, token })
    }

    /// Checks credentials. Unknown email and wrong password are the same error.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Principal> {
        match self.store.find_by_email(email).await? {
            Some(user) => {
                if self.store.verify_password(&user, password).await {
                    return Ok(Principal::from(&user));
                }
            }
            None => {
                // Spend the same hashing time as for a real account.
                let (owned, dummy_hash) = (password.to_string(), Arc::clone(&self.dummy_hash));
                tokio::task::spawn_blocking(move || verify_password(&owned, &dummy_hash))
                    .await
                    .map_err(|e| AuthError::Hashing(e.to_string()))?;
            }
        }

        debug!("rejected login attempt");
        Err(AuthError::InvalidCredentials)
    }

    /// Authenticates and issues a token.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let principal = self.authenticate(email, password).await?;
        let token = self.tokens.issue(&principal)?;
        Ok(Session { principal, token })
    }

    pub fn verify(&self, token: &str) -> Result<Principal> {
        self.tokens.verify(token)
    }
}

fn validate_registration(email: &str, password: &str, display_name: Option<&str>) -> Result<()> {
    if email.len() > MAX_EMAIL_LEN || !looks_like_email(email) {
        return Err(AuthError::InvalidInput("A valid email address is required".into()));
    }

    let password_len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password_len) {
        return Err(AuthError::InvalidInput(format!(
            "Password must be between {MIN_PASSWORD_LEN} and {MAX_PASSWORD_LEN} characters"
        )));
    }

    if let Some(name) = display_name {
        if name.trim().is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::InvalidInput(format!(
                "Name must be between 1 and {MAX_NAME_LEN} characters"
            )));
        }
    }

    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}
