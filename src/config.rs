use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Stripe gateway credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct StripeConfig {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub webhook_secret: String,
    /// Allowed clock skew for webhook timestamps, in seconds.
    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_secs: u64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: String::new(),
            webhook_tolerance_secs: default_webhook_tolerance(),
        }
    }
}

/// Razorpay gateway credentials.
#[derive(Clone, Debug, Deserialize, Default)]
pub struct RazorpayConfig {
    #[serde(default)]
    pub key_id: String,
    #[serde(default)]
    pub key_secret: String,
    #[serde(default)]
    pub webhook_secret: String,
}

/// Shiprocket logistics API credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct ShiprocketConfig {
    #[serde(default = "default_shiprocket_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Optional; webhook signature verification is skipped when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for ShiprocketConfig {
    fn default() -> Self {
        Self {
            base_url: default_shiprocket_base_url(),
            email: String::new(),
            password: String::new(),
            webhook_secret: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// Database connection URL (postgres:// or sqlite::memory:)
    pub database_url: String,

    /// JWT signing secret
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    pub host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// CORS: comma-separated allowed origins; permissive in development when unset
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Sender address for order notification emails
    #[serde(default = "default_email_from")]
    pub email_from: String,

    #[serde(default)]
    pub stripe: StripeConfig,

    #[serde(default)]
    pub razorpay: RazorpayConfig,

    #[serde(default)]
    pub shiprocket: ShiprocketConfig,
}

fn default_jwt_secret() -> String {
    DEV_DEFAULT_JWT_SECRET.to_string()
}
fn default_jwt_expiration() -> u64 {
    86_400
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_true() -> bool {
    true
}
fn default_email_from() -> String {
    "orders@kangan.shop".to_string()
}
fn default_webhook_tolerance() -> u64 {
    300
}
fn default_shiprocket_base_url() -> String {
    "https://apiv2.shiprocket.in".to_string()
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }
}

/// Loads configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP__`-prefixed environment variables (highest precedence),
/// e.g. `APP__RAZORPAY__KEY_SECRET`.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .set_default("database_url", "sqlite::memory:")?;

    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    if default_file.exists() {
        builder = builder.add_source(File::from(default_file));
    }
    let env_file = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_file.exists() {
        builder = builder.add_source(File::from(env_file));
    }

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    if !cfg.is_development() && cfg.jwt_secret == DEV_DEFAULT_JWT_SECRET {
        return Err(ConfigError::Message(
            "refusing to start outside development with the default JWT secret".to_string(),
        ));
    }

    info!(environment = %cfg.environment, port = cfg.port, "Configuration loaded");
    Ok(cfg)
}

/// Initializes the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kangan_api={},tower_http=info", log_level)));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_safe() {
        let cfg: AppConfig = Config::builder()
            .set_default("database_url", "sqlite::memory:")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.is_development());
        assert!(cfg.auto_migrate);
        assert_eq!(cfg.stripe.webhook_tolerance_secs, 300);
        assert_eq!(cfg.shiprocket.base_url, "https://apiv2.shiprocket.in");
    }
}
