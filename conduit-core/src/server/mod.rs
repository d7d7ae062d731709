//! HTTP surface: router, middleware stack, and server lifecycle.

mod handler;
mod state;
mod transport;
mod types;

pub use state::AppState;
pub use transport::{
    client_identity, enforce_rate_limit, error_boundary, isolate_client_request_id, require_admin,
    require_auth, JsonBody, RateLimitGuard, RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET,
    X_CLIENT_REQUEST_ID, X_REQUEST_ID,
};
pub use types::*;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, InMemoryUserStore};
use crate::config::{ConfigError, GatewayConfig, ServerConfig};
use crate::provider::ProviderRegistry;
use crate::ratelimit::{RateLimiter, RouteClass};
use crate::vector::VectorSearch;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("credential service: {0}")]
    Auth(#[from] AuthError),

    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Applies a route class's quota to every route in `router`.
fn rate_limited(router: Router<AppState>, state: &AppState, class: RouteClass) -> Router<AppState> {
    let guard = RateLimitGuard::new(
        state.limiter.clone(),
        class,
        state.config.server.trust_forwarded_for,
    );
    router.route_layer(middleware::from_fn_with_state(guard, enforce_rate_limit))
}

/// Requires a bearer token. Added after the rate limit so it runs first and
/// the quota is counted per principal.
fn authenticated(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    router.route_layer(middleware::from_fn_with_state(
        state.credentials.clone(),
        require_auth,
    ))
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origin = if config.cors_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(%origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(X_REQUEST_ID),
            HeaderName::from_static(X_CLIENT_REQUEST_ID),
            RATELIMIT_LIMIT,
            RATELIMIT_REMAINING,
            RATELIMIT_RESET,
            header::RETRY_AFTER,
        ])
}

/// Builds the full application router.
///
/// Layer order, outermost first: caller request-id isolation, request id,
/// tracing, CORS, security headers, the error boundary, then panic catching. Per-route groups add
/// authentication and their rate-limit class.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = rate_limited(
        Router::new()
            .route("/auth/register", post(handler::register))
            .route("/auth/login", post(handler::login)),
        &state,
        RouteClass::Auth,
    );

    let account_routes = authenticated(
        rate_limited(
            Router::new().route("/auth/me", get(handler::me)),
            &state,
            RouteClass::Default,
        ),
        &state,
    );

    let admin_routes = authenticated(
        rate_limited(
            Router::new()
                .route("/admin/config", get(handler::admin_config))
                .route_layer(middleware::from_fn(require_admin)),
            &state,
            RouteClass::Default,
        ),
        &state,
    );

    let model_routes = authenticated(
        rate_limited(
            Router::new()
                .route("/chat", post(handler::chat))
                .route("/embeddings", post(handler::embeddings)),
            &state,
            RouteClass::Chat,
        ),
        &state,
    );

    let search_routes = authenticated(
        rate_limited(
            Router::new().route("/vector-search", post(handler::vector_search)),
            &state,
            RouteClass::VectorSearch,
        ),
        &state,
    );

    let catalog_routes = rate_limited(
        Router::new()
            .route("/providers", get(handler::list_providers))
            .route("/providers/:id", get(handler::get_provider)),
        &state,
        RouteClass::Default,
    );

    let health_routes = Router::new()
        .route("/health", get(handler::health))
        .route("/health/live", get(handler::live))
        .route("/health/ready", get(handler::ready));

    let cors = cors_layer(&state.config.server);

    Router::new()
        .merge(auth_routes)
        .merge(account_routes)
        .merge(admin_routes)
        .merge(model_routes)
        .merge(search_routes)
        .merge(catalog_routes)
        .merge(health_routes)
        .fallback(handler::not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(isolate_client_request_id))
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        let trace_id = request
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("-");
                        tracing::info_span!(
                            "http",
                            method = %request.method(),
                            path = %request.uri().path(),
                            trace_id = %trace_id,
                        )
                    }),
                )
                .layer(cors)
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(middleware::from_fn(error_boundary))
                .layer(CatchPanicLayer::custom(transport::panic_response)),
        )
}

/// The gateway server.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Validates the configuration and builds every component.
    ///
    /// The rate-limit backend is probed here, once; a failed probe degrades
    /// to local counters rather than failing startup.
    pub async fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = Arc::new(ProviderRegistry::from_config(&config.providers)?);
        let limiter = RateLimiter::connect(config.rate_limit.clone()).await;
        let vector = VectorSearch::supabase(registry.clone(), config.vector_search.clone())?;
        let users = Arc::new(InMemoryUserStore::new());

        let server_config = config.server.clone();
        let state = AppState::new(config, registry, limiter, users, vector)?;
        Ok(Self::with_state(server_config, state))
    }

    /// A server over pre-built state.
    pub fn with_state(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serves until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(shutdown_signal()).await
    }

    /// Serves until `shutdown` resolves, then drains in-flight requests.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        info!(
            %addr,
            providers = ?self.state.dispatcher.registry().ids(),
            rate_limit_backend = ?self.state.limiter.backend(),
            "conduit listening"
        );

        let cancel = CancellationToken::new();
        let sweeper = self.start_sweeper(cancel.clone());

        let router = create_router(self.state);
        let served = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        cancel.cancel();
        if let Err(e) = sweeper.await {
            warn!(error = %e, "rate-limit sweeper ended abnormally");
        }
        info!("conduit stopped");

        served.map_err(ServerError::Io)
    }

    /// Periodically drops elapsed rate-limit windows.
    fn start_sweeper(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = self.state.limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(removed, "swept expired rate-limit windows");
                        }
                    }
                }
            }
        })
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
