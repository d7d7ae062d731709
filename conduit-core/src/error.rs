//! The closed error taxonomy reported to callers.
//!
//! Every module keeps its own `thiserror` enum for internal detail, but
//! anything that crosses the HTTP boundary is first converted into a
//! [`GatewayError`]. The boundary middleware in [`crate::server`] is the only
//! place that turns one into the wire envelope.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Message returned for every internal failure. Details stay in the logs.
pub const INTERNAL_MESSAGE: &str = "An unexpected error occurred";

/// The fixed set of failure kinds a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Conflict,
    RateLimit,
    Provider,
    NotImplemented,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Provider => StatusCode::BAD_GATEWAY,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `type` field of the envelope.
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::Authorization => "AuthorizationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Conflict => "ConflictError",
            ErrorKind::RateLimit => "RateLimitError",
            ErrorKind::Provider => "ProviderError",
            ErrorKind::NotImplemented => "NotImplementedError",
            ErrorKind::Internal => "InternalError",
        }
    }

    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::Authorization => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RateLimit => "RATE_LIMIT_EXCEEDED",
            ErrorKind::Provider => "PROVIDER_ERROR",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// A failure expressed in the gateway's vocabulary.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("unknown provider '{provider}'")]
    UnknownProvider {
        provider: String,
        available: Vec<String>,
    },

    #[error("{message}")]
    Authentication { code: &'static str, message: String },

    #[error("{0}")]
    Authorization(String),

    #[error("{message}")]
    NotFound {
        message: String,
        details: Option<Value>,
    },

    /// The path exists but not for this method.
    #[error("Method {method} is not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    #[error("{provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        upstream_status: Option<u16>,
        upstream_body: Option<Value>,
    },

    #[error("{0}")]
    NotImplemented(String),

    /// Carries the real cause for logging; callers only see [`INTERNAL_MESSAGE`].
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthenticated(code: &'static str, message: impl Into<String>) -> Self {
        Self::Authentication {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::Internal(cause.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation { .. } | GatewayError::UnknownProvider { .. } => {
                ErrorKind::Validation
            }
            GatewayError::Authentication { .. } => ErrorKind::Authentication,
            GatewayError::Authorization(_) => ErrorKind::Authorization,
            GatewayError::NotFound { .. } | GatewayError::MethodNotAllowed { .. } => {
                ErrorKind::NotFound
            }
            GatewayError::Conflict(_) => ErrorKind::Conflict,
            GatewayError::RateLimited { .. } => ErrorKind::RateLimit,
            GatewayError::Provider { .. } => ErrorKind::Provider,
            GatewayError::NotImplemented(_) => ErrorKind::NotImplemented,
            GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            other => other.kind().status(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::UnknownProvider { .. } => "UNKNOWN_PROVIDER",
            GatewayError::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            GatewayError::Authentication { code, .. } => *code,
            other => other.kind().default_code(),
        }
    }

    /// Message safe to show a caller.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            GatewayError::Validation { details, .. } | GatewayError::NotFound { details, .. } => {
                details.clone()
            }
            GatewayError::UnknownProvider { provider, available } => Some(serde_json::json!({
                "provider": provider,
                "availableProviders": available,
            })),
            GatewayError::RateLimited {
                retry_after_secs, ..
            } => Some(serde_json::json!({ "retryAfter": retry_after_secs })),
            GatewayError::Provider {
                provider,
                upstream_status,
                upstream_body,
                ..
            } => Some(serde_json::json!({
                "provider": provider,
                "upstreamStatus": upstream_status,
                "upstreamBody": upstream_body,
            })),
            _ => None,
        }
    }

    /// Maps a status produced outside the handlers (routing, body limits)
    /// onto the taxonomy.
    pub fn from_status(status: StatusCode, method: &str, path: &str) -> Self {
        match status {
            StatusCode::METHOD_NOT_ALLOWED => Self::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            },
            StatusCode::NOT_FOUND => Self::not_found(format!("Route {method} {path} not found")),
            StatusCode::UNAUTHORIZED => {
                Self::unauthenticated("AUTHENTICATION_ERROR", "Authentication required")
            }
            StatusCode::FORBIDDEN => Self::Authorization("Forbidden".into()),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                message: "Too many requests".into(),
                retry_after_secs: 1,
            },
            s if s.is_client_error() => Self::validation(
                s.canonical_reason()
                    .unwrap_or("Invalid request")
                    .to_string(),
            ),
            s => Self::internal(format!("unhandled response status {s}")),
        }
    }

    /// Builds the wire envelope for this error.
    pub fn envelope(&self, trace_id: impl Into<String>) -> ErrorEnvelope {
        ErrorEnvelope {
            error_type: self.kind().type_name(),
            message: self.public_message(),
            code: self.code(),
            details: self.details(),
            trace_id: trace_id.into(),
        }
    }
}

/// The single wire shape of every failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub trace_id: String,
}
