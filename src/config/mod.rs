use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::query::PageLimits;

/// Placeholder in `database.url` replaced by `database.password`.
const PASSWORD_PLACEHOLDER: &str = "<PASSWORD>";

const MAX_COOKIE_DAYS: i64 = 3650;
const MAX_RESET_TOKEN_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub ratings: RatingsConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime mode. Controls error verbosity and cookie security.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("Unknown environment: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served as static assets; uploaded images land under `img/`.
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    /// Externally visible origin used in emails and payment redirects.
    /// When unset, the request's Host header is used.
    pub public_url: Option<String>,
    #[serde(default = "default_json_limit")]
    pub json_limit_bytes: usize,
    #[serde(default = "default_upload_limit")]
    pub upload_limit_bytes: usize,
    /// Take the client address from `X-Forwarded-For`/`X-Real-IP`.
    /// Only enable behind a reverse proxy that overwrites those headers.
    #[serde(default)]
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_dir: default_public_dir(),
            public_url: None,
            json_limit_bytes: default_json_limit(),
            upload_limit_bytes: default_upload_limit(),
            trust_proxy: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("public")
}

fn default_json_limit() -> usize {
    10 * 1024
}

fn default_upload_limit() -> usize {
    5 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    pub password: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            password: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// Connection string with the password placeholder filled in.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => self.url.replace(PASSWORD_PLACEHOLDER, password),
            None => self.url.clone(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite:natours.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    /// Token lifetime such as `90d`, `12h` or `30m`.
    #[serde(default = "default_jwt_expires_in")]
    pub jwt_expires_in: String,
    #[serde(default = "default_cookie_expires_in_days")]
    pub cookie_expires_in_days: i64,
    /// Minutes a password reset token stays valid.
    #[serde(default = "default_reset_token_minutes")]
    pub reset_token_minutes: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_expires_in: default_jwt_expires_in(),
            cookie_expires_in_days: default_cookie_expires_in_days(),
            reset_token_minutes: default_reset_token_minutes(),
        }
    }
}

fn default_jwt_secret() -> String {
    // Tokens will not survive a restart unless a secret is configured
    uuid::Uuid::new_v4().to_string()
}

fn default_jwt_expires_in() -> String {
    "90d".to_string()
}

fn default_cookie_expires_in_days() -> i64 {
    90
}

fn default_reset_token_minutes() -> i64 {
    10
}

/// SMTP settings. Email is skipped (and logged) until host and sender are set.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default)]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_outbound_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: false,
            from_address: None,
            from_name: default_from_name(),
            timeout_seconds: default_outbound_timeout(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_name() -> String {
    "Natours".to_string()
}

fn default_outbound_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    pub stripe_secret_key: Option<String>,
    #[serde(default = "default_stripe_api_base")]
    pub api_base: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_outbound_timeout")]
    pub timeout_seconds: u64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: None,
            api_base: default_stripe_api_base(),
            currency: default_currency(),
            timeout_seconds: default_outbound_timeout(),
        }
    }
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_currency() -> String {
    "usd".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RatingsConfig {
    /// Average assigned to a tour with no reviews.
    #[serde(default = "default_baseline")]
    pub baseline: f64,
}

impl Default for RatingsConfig {
    fn default() -> Self {
        Self {
            baseline: default_baseline(),
        }
    }
}

fn default_baseline() -> f64 {
    4.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_page_size")]
    pub default_limit: u32,
    #[serde(default = "default_max_page_size")]
    pub max_limit: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_page_size(),
            max_limit: default_max_page_size(),
        }
    }
}

impl QueryConfig {
    pub fn limits(&self) -> PageLimits {
        PageLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit.max(1),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_max_page_size() -> u32 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            requests_per_window: default_requests_per_window(),
            window_seconds: default_window_seconds(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_requests_per_window() -> u32 {
    100
}

fn default_window_seconds() -> u64 {
    3600
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load the TOML file (if present) and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would overflow once turned into durations.
    pub fn validate(&self) -> Result<()> {
        crate::crypto::parse_lifetime(&self.auth.jwt_expires_in)
            .map_err(|e| anyhow::anyhow!("Invalid auth.jwt_expires_in: {}", e))?;
        if !(1..=MAX_COOKIE_DAYS).contains(&self.auth.cookie_expires_in_days) {
            anyhow::bail!(
                "auth.cookie_expires_in_days must be between 1 and {}",
                MAX_COOKIE_DAYS
            );
        }
        if !(1..=MAX_RESET_TOKEN_MINUTES).contains(&self.auth.reset_token_minutes) {
            anyhow::bail!(
                "auth.reset_token_minutes must be between 1 and {}",
                MAX_RESET_TOKEN_MINUTES
            );
        }
        Ok(())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(env) = lookup("APP_ENV") {
            self.environment = env.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("Invalid PORT: {}", port))?;
        }
        if let Some(trust) = lookup("TRUST_PROXY") {
            self.server.trust_proxy = trust
                .parse()
                .with_context(|| format!("Invalid TRUST_PROXY: {}", trust))?;
        }
        if let Some(url) = lookup("PUBLIC_URL") {
            self.server.public_url = Some(url);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(password) = lookup("DATABASE_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(expires) = lookup("JWT_EXPIRES_IN") {
            self.auth.jwt_expires_in = expires;
        }
        if let Some(days) = lookup("JWT_COOKIE_EXPIRES_IN") {
            self.auth.cookie_expires_in_days = days
                .parse()
                .with_context(|| format!("Invalid JWT_COOKIE_EXPIRES_IN: {}", days))?;
        }
        if let Some(host) = lookup("EMAIL_HOST") {
            self.email.smtp_host = Some(host);
        }
        if let Some(port) = lookup("EMAIL_PORT") {
            self.email.smtp_port = port
                .parse()
                .with_context(|| format!("Invalid EMAIL_PORT: {}", port))?;
        }
        if let Some(username) = lookup("EMAIL_USERNAME") {
            self.email.smtp_username = Some(username);
        }
        if let Some(password) = lookup("EMAIL_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
        if let Some(from) = lookup("EMAIL_FROM") {
            self.email.from_address = Some(from);
        }
        if let Some(key) = lookup("STRIPE_SECRET_KEY") {
            self.payments.stripe_secret_key = Some(key);
        }
        Ok(())
    }
}
