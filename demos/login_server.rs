use nila_oidc_rp::prelude::*;
use serde::Deserialize;
use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
}

/// Corresponds to the `oidc` section in the YAML
#[derive(Debug, Deserialize)]
struct OidcAppConfig {
    client_id: String,
    client_secret: Option<String>,
    issuer_url: String,
    expected_issuer: Option<String>,
    authorization_endpoint: Option<String>,
    scopes: Option<String>,
    algorithms: Option<Vec<Algorithm>>,
    leeway_seconds: Option<u64>,
    refresh_keys_on_unknown_kid: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct LoginServerConfig {
    oidc: OidcAppConfig,
    public_url: String,
    listen_addr: String,
    session_ttl_seconds: Option<u64>,
    logging: Option<LoggingConfig>,
}

fn settings_from(config: &LoginServerConfig) -> Result<Settings, NilaOidcError> {
    let oidc = &config.oidc;
    let mut builder = SettingsBuilder::new()
        .client_id(&oidc.client_id)
        .issuer_url(&oidc.issuer_url)?
        .public_url(&config.public_url)?
        // Browsers drop Secure cookies on plain http.
        .secure_cookies(config.public_url.starts_with("https://"));

    if let Some(secret) = &oidc.client_secret {
        builder = builder.client_secret(secret);
    }
    if let Some(issuer) = &oidc.expected_issuer {
        builder = builder.expected_issuer(issuer);
    }
    if let Some(endpoint) = &oidc.authorization_endpoint {
        builder = builder.authorization_endpoint(endpoint)?;
    }
    if let Some(scopes) = &oidc.scopes {
        builder = builder.scopes(Scopes::parse(scopes));
    }
    if let Some(algorithms) = &oidc.algorithms {
        builder = builder.algorithms(algorithms.clone());
    }
    if let Some(leeway) = oidc.leeway_seconds {
        builder = builder.leeway(Duration::from_secs(leeway));
    }
    if oidc.refresh_keys_on_unknown_kid.unwrap_or(false) {
        builder = builder.refresh_keys_on_unknown_kid(Duration::from_secs(5 * 60));
    }
    if let Some(ttl) = config.session_ttl_seconds {
        builder = builder.session_ttl(Duration::from_secs(ttl));
    }
    builder.build()
}

fn fail(message: String) -> ! {
    tracing::error!("{}", message);
    eprintln!("{message}");
    process::exit(1);
}

#[tokio::main]
async fn main() {
    // --- Load Configuration from YAML (early, for log level) ---
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "demos/login_config.yaml".to_string());
    let config_str = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| fail(format!("Failed to read config file {config_path}: {e}")));
    let config: LoginServerConfig = serde_yaml::from_str(&config_str)
        .unwrap_or_else(|e| fail(format!("Failed to parse YAML config from {config_path}: {e}")));

    // RUST_LOG wins over the configured level.
    let level = config
        .logging
        .as_ref()
        .and_then(|l| l.level.as_deref())
        .unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = settings_from(&config).unwrap_or_else(|e| fail(format!("Invalid configuration: {e}")));
    tracing::info!(?settings, "Configuration loaded");

    // Discovery failures at startup are fatal.
    let store = Arc::new(MemoryStore::new());
    let authenticator = Authenticator::discover(settings, store)
        .await
        .unwrap_or_else(|e| fail(format!("Unable to start: {e}")));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .unwrap_or_else(|e| fail(format!("Failed to bind {}: {e}", config.listen_addr)));

    tracing::info!("Login server listening on {}", config.listen_addr);
    tracing::info!("Sign in at {}/login", config.public_url.trim_end_matches('/'));

    let app = router(Arc::new(authenticator));
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        fail(format!("Server error: {e}"));
    }
}
