use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration structure with validation.
///
/// Values are layered from `config/default.toml`, an environment-specific
/// file and `APP_*` environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the schema on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Maximum number of units across all lines of a single cart
    #[serde(default = "default_max_cart_items")]
    #[validate(range(min = 1))]
    pub max_cart_items: i32,

    /// Hours before a cart in checkout (or an idle active cart) expires
    #[serde(default = "default_cart_expiry_hours")]
    #[validate(range(min = 1))]
    pub cart_expiry_hours: i64,

    /// Minutes before a generated PIX charge expires
    #[serde(default = "default_pix_expiration_minutes")]
    #[validate(range(min = 1))]
    pub pix_expiration_minutes: i64,

    /// Seconds after which the simulated gateway starts auto-approving
    #[serde(default = "default_auto_approval_after_secs")]
    pub auto_approval_after_secs: i64,

    /// Probability of an auto-approval draw succeeding, in [0, 1]
    #[serde(default = "default_auto_approval_probability")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub auto_approval_probability: f64,

    /// GST tokens credited per unit of final amount
    #[serde(default = "default_gst_token_rate")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub gst_token_rate: f64,

    /// Interval between background expiry sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Shared secret for verifying payment webhook signatures
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Allowed clock skew for webhook timestamps, in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,
}

impl AppConfig {
    /// Build a configuration programmatically. Used by tests and tools;
    /// production goes through `load_config`.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            max_cart_items: default_max_cart_items(),
            cart_expiry_hours: default_cart_expiry_hours(),
            pix_expiration_minutes: default_pix_expiration_minutes(),
            auto_approval_after_secs: default_auto_approval_after_secs(),
            auto_approval_probability: default_auto_approval_probability(),
            gst_token_rate: default_gst_token_rate(),
            sweep_interval_secs: default_sweep_interval_secs(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true_bool() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_max_cart_items() -> i32 {
    100
}

fn default_cart_expiry_hours() -> i64 {
    24
}

fn default_pix_expiration_minutes() -> i64 {
    30
}

fn default_auto_approval_after_secs() -> i64 {
    120
}

fn default_auto_approval_probability() -> f64 {
    0.8
}

fn default_gst_token_rate() -> f64 {
    0.10
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_webhook_tolerance_secs() -> u64 {
    300
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Load configuration from files and environment.
///
/// Precedence, lowest to highest: `config/default.toml`, then
/// `config/{environment}.toml`, then `APP_*` environment variables.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    let config_dir = Path::new(CONFIG_DIR);

    let settings = Config::builder()
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(&environment)).required(false))
        .add_source(Environment::with_prefix("APP"))
        .build()?;

    let cfg: AppConfig = settings.try_deserialize()?;
    cfg.validate()?;

    info!(
        environment = %cfg.environment,
        host = %cfg.host,
        port = cfg.port,
        "configuration loaded"
    );
    Ok(cfg)
}

/// Initialize the tracing subscriber for the whole process.
pub fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
