//! Service configuration read from the environment (after `.env`, if any).

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceConfig {
    pub port: u16,
    /// No database URL means the in-memory store.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    /// Re-resolutions allowed after a lost commit race.
    pub commit_max_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { port: 8083, database_url: None, database_max_connections: 10, nats_url: None, commit_max_retries: 1 }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            port: parse(&lookup, "PORT", defaults.port)?,
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parse(&lookup, "DATABASE_MAX_CONNECTIONS", defaults.database_max_connections)?,
            nats_url: non_empty("NATS_URL"),
            commit_max_retries: parse(&lookup, "COMMIT_MAX_RETRIES", defaults.commit_max_retries)?,
        })
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}
