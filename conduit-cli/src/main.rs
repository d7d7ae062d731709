use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use conduit_core::auth::{Principal, Role, TokenService};
use conduit_core::config::{GatewayConfig, ProviderSettings};
use conduit_core::models::ProviderCatalog;
use conduit_core::provider::ProviderId;
use conduit_core::Server;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "conduit_core=info,conduit=info,tower_http=info";

#[derive(Parser)]
#[command(name = "conduit")]
#[command(about = "Authenticated, rate-limited gateway for LLM providers", long_about = None)]
#[command(version)]
struct Cli {
    #[arg(short, long, default_value = "conduit.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the gateway")]
    Serve {
        #[arg(long, help = "Override server.host")]
        host: Option<String>,

        #[arg(short, long, help = "Override server.port")]
        port: Option<u16>,

        #[arg(long, help = "Emit JSON log lines")]
        json: bool,
    },

    #[command(about = "Show the effective configuration with secrets masked")]
    Show,

    #[command(about = "List providers and whether each has an API key")]
    Providers,

    #[command(about = "Issue a session token with the configured secret")]
    Token {
        #[arg(long)]
        email: String,

        #[arg(long, value_enum, default_value_t = RoleArg::User)]
        role: RoleArg,

        #[arg(long)]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RoleArg {
    User,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Admin => Role::Admin,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, json } => serve(&cli.config, host, port, json),
        Commands::Show => show_config(&cli.config),
        Commands::Providers => list_providers(&cli.config),
        Commands::Token { email, role, name } => issue_token(&cli.config, email, role.into(), name),
    }
}

/// File values, then `CONDUIT_*` environment overrides. A missing file means defaults.
fn load_config(path: &Path) -> Result<GatewayConfig> {
    let mut config = if path.exists() {
        GatewayConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        GatewayConfig::default()
    };
    config.apply_env();
    Ok(config)
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn serve(config_path: &Path, host: Option<String>, port: Option<u16>, json: bool) -> Result<()> {
    init_tracing(json);

    let mut config = load_config(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async {
        let server = Server::new(config).await.context("Failed to start gateway")?;
        server.run().await.context("Gateway stopped with an error")
    })
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        "(not set)".dimmed().to_string()
    } else {
        format!("****** ({} bytes)", secret.len())
    }
}

fn key_status(settings: &ProviderSettings) -> String {
    if settings.resolve_api_key().is_some() {
        "set".green().to_string()
    } else {
        format!("missing ({})", settings.api_key_env).yellow().to_string()
    }
}

fn show_config(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;

    println!("{}", "Effective Configuration:".bold().green());
    println!();
    println!("{}", "Server:".bold());
    println!("  Address:           {}", config.server.addr().cyan());
    let origins = if config.server.cors_origins.is_empty() {
        "*".to_string()
    } else {
        config.server.cors_origins.join(", ")
    };
    println!("  CORS Origins:      {}", origins);
    println!("  Trust XFF:         {}", config.server.trust_forwarded_for);
    println!();
    println!("{}", "Auth:".bold());
    println!("  JWT Secret:        {}", mask(&config.auth.jwt_secret));
    println!("  Issuer:            {}", config.auth.issuer);
    println!("  Token TTL:         {}s", config.auth.token_ttl_secs);
    println!("  Admin Emails:      {}", config.auth.admin_emails.len());
    println!();
    println!("{}", "Rate Limit:".bold());
    println!("  Backend:           {}", config.rate_limit.backend.as_str().cyan());
    if let Some(url) = &config.rate_limit.shared_url {
        println!("  Shared URL:        {}", url);
        println!(
            "  Shared Token:      {}",
            mask(config.rate_limit.shared_token.as_deref().unwrap_or_default())
        );
    }
    for (class, limit) in [
        ("auth", &config.rate_limit.auth),
        ("chat", &config.rate_limit.chat),
        ("default", &config.rate_limit.default),
        ("vector_search", &config.rate_limit.vector_search),
    ] {
        println!("  {:<18} {} per {}s", format!("{class}:"), limit.max, limit.window_ms / 1000);
    }
    println!();
    println!("{}", "Providers:".bold());
    for id in ProviderId::ALL {
        let settings = id.settings(&config.providers);
        let state = if settings.enabled { "enabled".green() } else { "disabled".red() };
        println!("  {:<12} {} {} key {}", id.as_str(), state, settings.base_url, key_status(settings));
    }
    println!();
    println!("{}", "Vector Search:".bold());
    println!(
        "  Embedding:         {} / {}",
        config.vector_search.embedding_provider, config.vector_search.embedding_model.cyan()
    );
    println!("  RPC Function:      {}", config.vector_search.rpc_function);

    Ok(())
}

fn list_providers(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let catalog = ProviderCatalog::new(&config.providers);

    println!("{}", "Providers:".bold().green());
    println!();
    for info in catalog.all() {
        let settings = info.id.settings(&config.providers);
        println!("  {} {} ({})", "•".cyan(), info.name.bold(), info.id);
        println!("    Base URL:   {}", info.base_url);
        println!("    Enabled:    {}", settings.enabled);
        println!("    API Key:    {}", key_status(settings));
        println!("    Streaming:  {}", info.supports_streaming);
        println!("    Embeddings: {}", info.supports_embeddings);
        let models: Vec<&str> = info.models.iter().map(|m| m.id()).collect();
        println!("    Models:     {}", models.join(", "));
        println!();
    }

    Ok(())
}

fn issue_token(config_path: &Path, email: String, role: Role, name: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Cannot sign tokens with this configuration")?;

    let principal = Principal {
        id: uuid::Uuid::new_v4().to_string(),
        email,
        display_name: name,
        role,
    };
    let issued = TokenService::new(&config.auth)
        .issue(&principal)
        .context("Failed to sign token")?;

    eprintln!(
        "{} Token for {} expires {}",
        "✓".green().bold(),
        principal.email.cyan(),
        issued.expires_at.to_rfc3339()
    );
    println!("{}", issued.token);

    Ok(())
}
