use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "conduit.yaml";

/// Minimum length of the token signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the whole gateway.
///
/// Every section falls back to its defaults, so a config file only needs the
/// keys it wants to change. All of it is read-only once the server starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub providers: ProvidersConfig,
    pub vector_search: VectorSearchConfig,
}

/// Listener and HTTP-surface settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Use the first `x-forwarded-for` hop as the client address.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            cors_origins: Vec::new(),
            trust_forwarded_for: false,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Session token and account settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key for session tokens. Must be set; see [`MIN_SECRET_LEN`].
    pub jwt_secret: String,
    pub token_ttl_secs: u64,
    pub issuer: String,
    /// Accounts registered with one of these emails receive the admin role
    pub admin_emails: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_secs: 24 * 60 * 60,
            issuer: "conduit".to_string(),
            admin_emails: Vec::new(),
        }
    }
}

/// Where rate-limit counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Per-process counters
    #[default]
    Local,
    /// Counters in an external Redis REST store shared by all instances
    Shared,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Shared => "shared",
        }
    }
}

/// One quota: at most `max` requests per `window_ms`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteLimit {
    pub window_ms: u64,
    pub max: u32,
    pub message: String,
}

impl RouteLimit {
    pub fn new(window_ms: u64, max: u32, message: impl Into<String>) -> Self {
        Self {
            window_ms,
            max,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: BackendKind,
    pub shared_url: Option<String>,
    pub shared_token: Option<String>,
    pub auth: RouteLimit,
    pub chat: RouteLimit,
    pub default: RouteLimit,
    pub vector_search: RouteLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            shared_url: None,
            shared_token: None,
            auth: RouteLimit::new(
                15 * 60 * 1000,
                5,
                "Too many authentication attempts, please try again later.",
            ),
            chat: RouteLimit::new(
                60 * 1000,
                20,
                "Too many chat requests, please slow down.",
            ),
            default: RouteLimit::new(
                15 * 60 * 1000,
                100,
                "Too many requests, please try again later.",
            ),
            vector_search: RouteLimit::new(
                60 * 1000,
                100,
                "Too many vector search requests, please slow down.",
            ),
        }
    }
}

/// Connection settings for one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub base_url: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Inline key, mostly for tests. Takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_provider_timeout() -> u64 {
    120
}

impl ProviderSettings {
    pub fn new(base_url: impl Into<String>, api_key_env: impl Into<String>) -> Self {
        Self {
            enabled: true,
            base_url: base_url.into(),
            api_key_env: api_key_env.into(),
            api_key: None,
            default_max_tokens: default_max_tokens(),
            timeout_secs: default_provider_timeout(),
        }
    }

    /// Returns the inline key, or the value of `api_key_env` if set.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

/// The fixed set of upstream providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub xai: ProviderSettings,
    pub anthropic: ProviderSettings,
    pub deepseek: ProviderSettings,
    pub openrouter: ProviderSettings,
    pub nvidia: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            xai: ProviderSettings::new("https://api.x.ai/v1", "XAI_API_KEY"),
            anthropic: ProviderSettings::new("https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
            deepseek: ProviderSettings::new("https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
            openrouter: ProviderSettings::new(
                "https://openrouter.ai/api/v1",
                "OPENROUTER_API_KEY",
            ),
            nvidia: ProviderSettings::new(
                "https://integrate.api.nvidia.com/v1",
                "NVIDIA_API_KEY",
            ),
        }
    }
}

/// Embedding + similarity search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorSearchConfig {
    /// Provider id used to embed queries
    pub embedding_provider: String,
    pub embedding_model: String,
    /// Remote procedure invoked on the similarity service
    pub rpc_function: String,
    pub max_query_chars: usize,
    pub max_limit: u32,
    pub default_limit: u32,
    pub default_threshold: f64,
    pub timeout_secs: u64,
}

impl Default for VectorSearchConfig {
    fn default() -> Self {
        Self {
            embedding_provider: "nvidia".to_string(),
            embedding_model: "nvidia/nv-embedqa-e5-v5".to_string(),
            rpc_function: "match_documents".to_string(),
            max_query_chars: 8000,
            max_limit: 100,
            default_limit: 10,
            default_threshold: 0.7,
            timeout_secs: 30,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: GatewayConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from `conduit.yaml` if it exists, otherwise use defaults.
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(DEFAULT_CONFIG_PATH)
    }

    /// Like [`GatewayConfig::load`], but falls back to defaults. A missing
    /// file is silent; an unreadable or malformed one is logged.
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::FileRead(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "ignoring config file, using defaults"
                );
                Self::default()
            }
        }
    }

    /// Applies `CONDUIT_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CONDUIT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CONDUIT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secret) = lookup("CONDUIT_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(url) = lookup("CONDUIT_RATE_LIMIT_URL") {
            self.rate_limit.shared_url = Some(url);
            self.rate_limit.backend = BackendKind::Shared;
        }
        if let Some(token) = lookup("CONDUIT_RATE_LIMIT_TOKEN") {
            self.rate_limit.shared_token = Some(token);
        }
    }

    /// Checks the invariants the server relies on at startup.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "auth.jwt_secret must be at least {} bytes (set CONDUIT_JWT_SECRET)",
                MIN_SECRET_LEN
            )));
        }
        if self.auth.token_ttl_secs == 0 {
            return Err(ConfigError::Invalid("auth.token_ttl_secs must be positive".into()));
        }

        let limits = [
            ("auth", &self.rate_limit.auth),
            ("chat", &self.rate_limit.chat),
            ("default", &self.rate_limit.default),
            ("vector_search", &self.rate_limit.vector_search),
        ];
        for (name, limit) in limits {
            if limit.window_ms == 0 || limit.max == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.{name} needs a positive window_ms and max"
                )));
            }
        }

        if self.rate_limit.backend == BackendKind::Shared && self.rate_limit.shared_url.is_none() {
            return Err(ConfigError::Invalid(
                "rate_limit.backend is shared but rate_limit.shared_url is not set".into(),
            ));
        }

        let vector = &self.vector_search;
        if vector.max_limit == 0 || vector.default_limit == 0 || vector.default_limit > vector.max_limit {
            return Err(ConfigError::Invalid(
                "vector_search.default_limit must be within 1..=max_limit".into(),
            ));
        }
        if !(0.0..=1.0).contains(&vector.default_threshold) {
            return Err(ConfigError::Invalid(
                "vector_search.default_threshold must be within 0..=1".into(),
            ));
        }

        Ok(())
    }
}
