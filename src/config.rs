use std::env;
use std::fmt;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};

const DEFAULT_CREDENTIALS_PATH: &str = "config/firebase-service-account.json";
const DEFAULT_SITE_URL: &str = "https://www.tce.edu";
const DEFAULT_EMAIL_DOMAIN: &str = "@student.tce.edu";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Development,
    Production,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Production => "production",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(RunMode::Development),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(AppError::ConfigError(format!("Unknown APP_ENV: {}", other))),
        }
    }
}

/// The parts of a Firebase service-account file the gateway relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    #[serde(default)]
    pub client_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub mode: RunMode,
    /// `*` means "any origin"; it is mirrored back so credentials stay valid.
    pub frontend_origin: String,
    pub frontend_build_dir: PathBuf,
    pub service_account: ServiceAccount,
    /// Required by the identity SDK setup upstream; the gateway only records it.
    pub database_url: Option<String>,
    pub allowed_email_domain: String,
    pub site_url: String,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_source<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        // Load server configuration with defaults
        let host = get("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = get("PORT").unwrap_or_else(|| "5000".to_string());
        let port = port.parse::<u16>().map_err(|e| AppError::ConfigError(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host).map_err(|e| AppError::ConfigError(format!("Invalid host address: {}", e)))?;
        let server_addr = SocketAddr::new(ip, port);

        let mode = match get("APP_ENV") {
            Some(value) => value.parse()?,
            None => RunMode::Development,
        };

        let frontend_origin = get("FRONTEND_URL").unwrap_or_else(|| "*".to_string());
        if frontend_origin != "*" {
            HeaderValue::from_str(&frontend_origin)
                .map_err(|e| AppError::ConfigError(format!("Invalid FRONTEND_URL: {}", e)))?;
        }

        let frontend_build_dir = get("FRONTEND_BUILD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("frontend/build"));

        let service_account = load_service_account(
            get("FIREBASE_SERVICE_ACCOUNT"),
            get("FIREBASE_SERVICE_ACCOUNT_PATH"),
        )?;

        let allowed_email_domain = get("ALLOWED_EMAIL_DOMAIN").unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.to_string());

        let site_url = get("PLACEMENT_SITE_URL").unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
        let parsed = Url::parse(&site_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid PLACEMENT_SITE_URL: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::ConfigError(format!(
                "PLACEMENT_SITE_URL must be http or https, got {}",
                parsed.scheme()
            )));
        }
        let site_url = site_url.trim_end_matches('/').to_string();

        Ok(Config {
            server_addr,
            mode,
            frontend_origin,
            frontend_build_dir,
            service_account,
            database_url: get("FIREBASE_DATABASE_URL"),
            allowed_email_domain,
            site_url,
            cache_ttl: Duration::from_secs(seconds(get("CACHE_TTL_SECS"), "CACHE_TTL_SECS", 30 * 60)?),
            fetch_timeout: Duration::from_secs(seconds(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS", 15)?),
        })
    }
}

fn seconds(value: Option<String>, name: &str, default: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| AppError::ConfigError(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

/// Inline JSON wins over the file path.
fn load_service_account(inline: Option<String>, path: Option<String>) -> Result<ServiceAccount> {
    let (json, origin) = match inline {
        Some(json) => (json, "FIREBASE_SERVICE_ACCOUNT".to_string()),
        None => {
            let path = path.unwrap_or_else(|| DEFAULT_CREDENTIALS_PATH.to_string());
            let json = fs::read_to_string(&path).map_err(|e| {
                AppError::ConfigError(format!(
                    "Cannot read identity-provider credentials at {}: {}",
                    path, e
                ))
            })?;
            (json, path)
        }
    };

    let account: ServiceAccount = serde_json::from_str(&json).map_err(|e| {
        AppError::ConfigError(format!("Malformed identity-provider credentials in {}: {}", origin, e))
    })?;

    if account.project_id.trim().is_empty() {
        return Err(AppError::ConfigError(format!(
            "Identity-provider credentials in {} have an empty project_id",
            origin
        )));
    }

    Ok(account)
}
