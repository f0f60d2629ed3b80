// src/config.rs
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub media_dir: PathBuf,
    pub public_base_url: String,
    pub cors_origin: String,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3030,
            store: StoreBackend::Postgres,
            database_url: None,
            max_connections: 5,
            media_dir: PathBuf::from("./media"),
            public_base_url: "http://localhost:3030".to_string(),
            cors_origin: "*".to_string(),
            // Four 50 MiB files, base64 encoded, plus the rest of the form.
            max_body_bytes: 280 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Reads the environment, `.env` included. Unset keys fall back to defaults.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Config::default();

        let store = try_load("STORE", StoreBackend::Postgres)?;
        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        Ok(Self {
            port: try_load("PORT", defaults.port)?,
            store,
            database_url,
            max_connections: try_load("DATABASE_MAX_CONNECTIONS", defaults.max_connections)?,
            media_dir: var("MEDIA_DIR").map(PathBuf::from).unwrap_or(defaults.media_dir),
            public_base_url: var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            cors_origin: var("CORS_ORIGIN").unwrap_or(defaults.cors_origin),
            max_body_bytes: try_load("MAX_BODY_BYTES", defaults.max_body_bytes)?,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = var(key) else {
        info!("{key} not set, using default: {default}");
        return Ok(default);
    };
    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }
    })
}

impl Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Postgres => f.write_str("postgres"),
            StoreBackend::Memory => f.write_str("memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parses_case_insensitively() {
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("mysql".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 3030);
        assert_eq!(config.max_connections, 5);
        assert!(config.max_body_bytes > 4 * 50 * 1024 * 1024);
    }
}
