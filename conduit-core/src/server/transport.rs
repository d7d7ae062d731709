//! HTTP plumbing shared by every route: the error boundary, authentication,
//! rate limiting, and body extraction.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequest, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::auth::{AuthError, CredentialService, Principal};
use crate::dispatch::{Phase, RequestLifecycle};
use crate::error::{ErrorKind, GatewayError};
use crate::ratelimit::{Decision, RateLimiter, RouteClass};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_CLIENT_REQUEST_ID: &str = "x-client-request-id";
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Handlers and middleware return the error; the boundary renders it.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Moves a caller-supplied `x-request-id` to `x-client-request-id`, on the
/// request and echoed on the response, so trace ids are always minted here.
pub async fn isolate_client_request_id(mut request: Request, next: Next) -> Response {
    let client_id = request.headers_mut().remove(X_REQUEST_ID);
    if let Some(value) = &client_id {
        request
            .headers_mut()
            .insert(HeaderName::from_static(X_CLIENT_REQUEST_ID), value.clone());
    }

    let mut response = next.run(request).await;
    if let Some(value) = client_id {
        response
            .headers_mut()
            .insert(HeaderName::from_static(X_CLIENT_REQUEST_ID), value);
    }
    response
}

/// Outermost application middleware.
///
/// Creates the request's [`RequestLifecycle`] and renders any
/// [`GatewayError`] left on the response as the JSON envelope, stamped with
/// the request's trace id.
pub async fn error_boundary(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let lifecycle = RequestLifecycle::new(trace_id.clone());
    request.extensions_mut().insert(lifecycle.clone());

    let mut response = next.run(request).await;

    let err = match response.extensions_mut().remove::<GatewayError>() {
        Some(err) => err,
        None if is_bare_failure(&response) => {
            GatewayError::from_status(response.status(), &method, &path)
        }
        None => {
            if !lifecycle.is_streaming() {
                lifecycle.complete();
            }
            return response;
        }
    };

    lifecycle.fail();
    match err.kind() {
        ErrorKind::Internal => error!(trace_id = %trace_id, error = %err, "request failed"),
        ErrorKind::Provider => warn!(trace_id = %trace_id, error = %err, "upstream failure"),
        _ => debug!(trace_id = %trace_id, code = err.code(), "request rejected"),
    }

    render_error(&err, &trace_id, response.headers())
}

/// A failure status produced by the framework itself, such as a method
/// mismatch, with no body of ours.
fn is_bare_failure(response: &Response) -> bool {
    let status = response.status();
    (status.is_client_error() || status.is_server_error())
        && !response.headers().contains_key(header::CONTENT_TYPE)
}

fn render_error(err: &GatewayError, trace_id: &str, inherited: &HeaderMap) -> Response {
    let mut response = (err.status(), Json(err.envelope(trace_id))).into_response();

    let headers = response.headers_mut();
    for (name, value) in inherited {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            headers.insert(name.clone(), value.clone());
        }
    }
    if let GatewayError::RateLimited {
        retry_after_secs, ..
    } = err
    {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
    }
    response
}

/// Turns a panic inside a handler into an internal error for the boundary.
pub fn panic_response(_panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    GatewayError::internal("handler panicked").into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Requires a valid bearer token and attaches its [`Principal`].
pub async fn require_auth(
    State(credentials): State<CredentialService>,
    mut request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let principal = {
        let token = bearer_token(request.headers()).ok_or(AuthError::MissingToken)?;
        credentials.verify(token)?
    };

    if let Some(lifecycle) = request.extensions().get::<RequestLifecycle>() {
        lifecycle.advance(Phase::Authenticated)?;
    }
    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

/// Admits only admin principals. Runs after [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, GatewayError> {
    match request.extensions().get::<Principal>() {
        Some(principal) if principal.is_admin() => Ok(next.run(request).await),
        Some(_) => Err(GatewayError::Authorization(
            "Administrator role required".into(),
        )),
        None => Err(AuthError::MissingToken.into()),
    }
}

/// Rate-limit middleware state: which quota a group of routes draws from.
#[derive(Clone)]
pub struct RateLimitGuard {
    limiter: Arc<RateLimiter>,
    class: RouteClass,
    trust_forwarded_for: bool,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, class: RouteClass, trust_forwarded_for: bool) -> Self {
        Self {
            limiter,
            class,
            trust_forwarded_for,
        }
    }
}

/// Who a request is counted against.
///
/// The principal when authenticated, else the first forwarded hop (if
/// trusted), else the peer address, else `anonymous`.
pub fn client_identity(request: &Request, trust_forwarded_for: bool) -> String {
    if let Some(principal) = request.extensions().get::<Principal>() {
        return format!("user:{}", principal.id);
    }

    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty());
        if let Some(hop) = forwarded {
            return format!("ip:{hop}");
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return format!("ip:{}", addr.ip());
    }

    "anonymous".to_string()
}

fn apply_rate_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_secs()));
}

pub async fn enforce_rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let identity = client_identity(&request, guard.trust_forwarded_for);
    let decision = guard.limiter.check(guard.class, &identity).await?;

    if let Some(lifecycle) = request.extensions().get::<RequestLifecycle>() {
        lifecycle.advance(Phase::RateChecked)?;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(response.headers_mut(), &decision);
    Ok(response)
}

/// JSON body extractor whose rejections are validation errors.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(GatewayError::validation_with(
                "Invalid request body",
                serde_json::json!({ "reason": rejection.body_text() }),
            )),
        }
    }
}
