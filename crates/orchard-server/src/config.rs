use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

use orchard_db::ConnectOptions;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

/// Server configuration loaded from environment variables.
///
/// - `ORCHARD_HOST` / `ORCHARD_PORT` - bind address (default `0.0.0.0:8080`)
/// - `ORCHARD_DB_PATH` - SQLite file (default `orchard.db`)
/// - `ORCHARD_DB_CONNECT_ATTEMPTS` - startup connection attempts (default 30)
/// - `ORCHARD_DB_RETRY_DELAY_SECS` - pause between attempts (default 2)
/// - `ORCHARD_UPLOAD_DIR` - image directory (default `uploads`)
/// - `ORCHARD_JWT_SECRET` - required, placeholders are rejected
/// - `ORCHARD_REQUEST_TIMEOUT_SECS` - per-request timeout (default 30)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub db_connect_attempts: u32,
    pub db_retry_delay: Duration,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = lookup("ORCHARD_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("ORCHARD_JWT_SECRET is unset or still a placeholder");
        }

        Ok(Self {
            host: lookup("ORCHARD_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_or(&lookup, "ORCHARD_PORT", 8080)?,
            db_path: lookup("ORCHARD_DB_PATH")
                .unwrap_or_else(|| "orchard.db".into())
                .into(),
            db_connect_attempts: parse_or(&lookup, "ORCHARD_DB_CONNECT_ATTEMPTS", 30)?,
            db_retry_delay: Duration::from_secs(parse_or(
                &lookup,
                "ORCHARD_DB_RETRY_DELAY_SECS",
                2,
            )?),
            upload_dir: lookup("ORCHARD_UPLOAD_DIR")
                .unwrap_or_else(|| "uploads".into())
                .into(),
            jwt_secret,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "ORCHARD_REQUEST_TIMEOUT_SECS",
                30,
            )?),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn connect_options(&self) -> ConnectOptions {
        let mut opts = ConnectOptions::new(self.db_path.clone());
        opts.max_attempts = self.db_connect_attempts;
        opts.retry_delay = self.db_retry_delay;
        opts
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.parse().with_context(|| format!("{key}={raw} is not valid")),
        None => Ok(default),
    }
}
