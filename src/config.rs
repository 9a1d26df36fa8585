//! Service configuration
//!
//! Defaults, then an optional TOML file, then environment variables. CLI flags
//! are applied on top of this by `main`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::auth::jwt::MAX_EXPIRATION_HOURS;
use crate::middleware::RateLimitConfig;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listen address, e.g. `0.0.0.0:3000`
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for the JSON-file store (and anything else written to disk)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// SQLite database file. When unset the JSON-file store is used.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Base URL the service is reachable at; used for QR codes and email links
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub oauth: OAuthConfig,

    /// SMTP relay. When unset, emails are only logged.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    #[serde(default)]
    pub seed_admin: Option<SeedAdmin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
    #[serde(default = "default_jwt_expiration_hours")]
    pub jwt_expiration_hours: i64,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Google OAuth client id; Google sign-in is disabled without it
    #[serde(default)]
    pub google_client_id: Option<String>,
    #[serde(default = "default_google_jwks_url")]
    pub google_jwks_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_rate_limit_max")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
    #[serde(default = "default_rate_limit_burst")]
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
    #[serde(default = "default_admin_name")]
    pub name: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_jwt_secret() -> String {
    DEV_JWT_SECRET.to_string()
}

fn default_jwt_expiration_hours() -> i64 {
    24
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_google_jwks_url() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_rate_limit_max() -> u32 {
    30
}

fn default_rate_limit_window() -> u64 {
    60
}

fn default_rate_limit_burst() -> u32 {
    10
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            database_path: None,
            public_base_url: default_public_base_url(),
            auth: AuthConfig::default(),
            oauth: OAuthConfig::default(),
            smtp: None,
            rate_limit: RateLimitSettings::default(),
            seed_admin: None,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
            jwt_expiration_hours: default_jwt_expiration_hours(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            google_client_id: None,
            google_jwks_url: default_google_jwks_url(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max(),
            window_secs: default_rate_limit_window(),
            burst: default_rate_limit_burst(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_layer_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs.max(1)),
            burst: self.burst,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MEDSCRIPT_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = get("MEDSCRIPT_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("DATABASE_PATH").or_else(|| get("DB_PATH")) {
            self.database_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }

        if let Some(v) = get("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(v) = get("JWT_EXPIRATION_HOURS") {
            let hours: i64 = v
                .parse()
                .with_context(|| format!("Invalid JWT_EXPIRATION_HOURS: {}", v))?;
            if !(1..=MAX_EXPIRATION_HOURS).contains(&hours) {
                bail!(
                    "JWT_EXPIRATION_HOURS must be between 1 and {}, got {}",
                    MAX_EXPIRATION_HOURS,
                    hours
                );
            }
            self.auth.jwt_expiration_hours = hours;
        }
        if let Some(v) = get("BCRYPT_COST") {
            self.auth.bcrypt_cost = v
                .parse()
                .with_context(|| format!("Invalid BCRYPT_COST: {}", v))?;
        }

        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.oauth.google_client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_JWKS_URL") {
            self.oauth.google_jwks_url = v;
        }

        if let Some(host) = get("SMTP_HOST") {
            let port = match get("SMTP_PORT") {
                Some(p) => p
                    .parse()
                    .with_context(|| format!("Invalid SMTP_PORT: {}", p))?,
                None => default_smtp_port(),
            };
            let from = get("SMTP_FROM")
                .context("SMTP_FROM must be set when SMTP_HOST is configured")?;
            self.smtp = Some(SmtpConfig {
                host,
                port,
                username: get("SMTP_USERNAME"),
                password: get("SMTP_PASSWORD"),
                from,
            });
        }

        if let Some(v) = get("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = v
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_MAX_REQUESTS: {}", v))?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = v
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_WINDOW_SECS: {}", v))?;
        }
        if let Some(v) = get("RATE_LIMIT_BURST") {
            self.rate_limit.burst = v
                .parse()
                .with_context(|| format!("Invalid RATE_LIMIT_BURST: {}", v))?;
        }

        if let (Some(email), Some(password)) =
            (get("SEED_ADMIN_EMAIL"), get("SEED_ADMIN_PASSWORD"))
        {
            self.seed_admin = Some(SeedAdmin {
                email,
                password,
                name: get("SEED_ADMIN_NAME").unwrap_or_else(default_admin_name),
            });
        }

        Ok(())
    }

    /// Warn about settings that are fine for development only
    pub fn warn_insecure_defaults(&self) {
        if self.auth.jwt_secret == DEV_JWT_SECRET {
            warn!("⚠️  JWT_SECRET not set, using development secret. CHANGE IN PRODUCTION!");
        }
        if self.smtp.is_none() {
            warn!("SMTP not configured, outgoing emails will only be logged");
        }
    }

    pub fn storage_label(&self) -> &'static str {
        if self.database_path.is_some() {
            "sqlite"
        } else {
            "json"
        }
    }
}
