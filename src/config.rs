use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Payment gateway (Paystack) configuration.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaystackConfig {
    /// Secret API key used as bearer token on outbound gateway calls.
    #[validate(length(min = 1))]
    pub secret_key: String,

    /// Shared secret for webhook HMAC verification. Paystack signs with the
    /// account secret key, so this defaults to `secret_key` when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// Gateway API base URL; overridden in tests to point at a mock server.
    #[serde(default = "default_paystack_base_url")]
    pub base_url: String,

    /// Outbound request timeout in seconds.
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,

    /// URL the customer is redirected to after the hosted payment page.
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl PaystackConfig {
    pub fn webhook_secret(&self) -> &str {
        self.webhook_secret.as_deref().unwrap_or(&self.secret_key)
    }
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            base_url: default_paystack_base_url(),
            timeout_secs: default_gateway_timeout_secs(),
            callback_url: None,
        }
    }
}

/// Checkout pricing knobs. Money values deserialize from strings so TOML and
/// environment sources stay exact ("0.08", not a binary float).
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutConfig {
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Tax applied to the subtotal.
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Orders with subtotal at or above this ship free.
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Flat shipping fee below the threshold.
    #[serde(default = "default_flat_shipping_fee")]
    pub flat_shipping_fee: Decimal,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            free_shipping_threshold: default_free_shipping_threshold(),
            flat_shipping_fee: default_flat_shipping_fee(),
        }
    }
}

/// Transactional email settings for the notification worker.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct EmailConfig {
    #[serde(default = "default_email_from")]
    pub from_address: String,

    /// Delivery attempts before a message is logged and dropped.
    #[serde(default = "default_email_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff between attempts, in seconds.
    #[serde(default = "default_email_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from_address: default_email_from(),
            max_attempts: default_email_max_attempts(),
            retry_backoff_secs: default_email_retry_backoff_secs(),
        }
    }
}

/// Application configuration, constructed once at startup and passed by
/// reference into each component; nothing reads the process environment after
/// this is built.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// JWT signing secret for bearer-token auth
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
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

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default)]
    #[validate]
    pub paystack: PaystackConfig,

    #[serde(default)]
    #[validate]
    pub checkout: CheckoutConfig,

    #[serde(default)]
    #[validate]
    pub email: EmailConfig,
}

impl AppConfig {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
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

fn default_paystack_base_url() -> String {
    "https://api.paystack.co".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_tax_rate() -> Decimal {
    dec!(0.08)
}

fn default_free_shipping_threshold() -> Decimal {
    dec!(50000)
}

fn default_flat_shipping_fee() -> Decimal {
    dec!(2500)
}

fn default_email_from() -> String {
    "orders@storefront.example".to_string()
}

fn default_email_max_attempts() -> u32 {
    3
}

fn default_email_retry_backoff_secs() -> u64 {
    5
}

/// Load configuration from `config/default.toml`, an environment-specific
/// overlay, and `APP_`-prefixed environment variables (double underscore as
/// section separator, e.g. `APP_PAYSTACK__SECRET_KEY`).
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{CONFIG_DIR}/default")).required(false))
        .add_source(File::with_name(&format!("{CONFIG_DIR}/{run_env}")).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    Ok(cfg)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("storefront_api={log_level},tower_http=info")));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test_secret_key_that_is_long_enough_for_validation".to_string(),
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: true,
            paystack: PaystackConfig {
                secret_key: "sk_test_xyz".to_string(),
                ..Default::default()
            },
            checkout: CheckoutConfig::default(),
            email: EmailConfig::default(),
        }
    }

    #[test]
    fn checkout_defaults_match_store_policy() {
        let cfg = base_config();
        assert_eq!(cfg.checkout.tax_rate, dec!(0.08));
        assert_eq!(cfg.checkout.free_shipping_threshold, dec!(50000));
        assert_eq!(cfg.checkout.flat_shipping_fee, dec!(2500));
        assert_eq!(cfg.checkout.currency, "NGN");
    }

    #[test]
    fn webhook_secret_falls_back_to_secret_key() {
        let mut cfg = base_config();
        assert_eq!(cfg.paystack.webhook_secret(), "sk_test_xyz");
        cfg.paystack.webhook_secret = Some("whsec_abc".to_string());
        assert_eq!(cfg.paystack.webhook_secret(), "whsec_abc");
    }

    #[test]
    fn short_jwt_secret_rejected() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".to_string();
        assert!(cfg.validate().is_err());
    }
}
