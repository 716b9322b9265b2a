//! Configuration loading and representation.
//!
//! Everything is read from environment variables (optionally seeded from a
//! `.env` file by the binary). `AppConfig::from_lookup` takes any key lookup so
//! tests never have to mutate the process environment.

use std::net::SocketAddr;

use thiserror::Error;

use hsync_observability::LogFormat;
use hsync_prescriptions::{AccessCodePolicy, CodeAlphabet};

pub const BIND_ADDR: &str = "HSYNC_BIND_ADDR";
pub const USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const ACCESS_CODE_LENGTH: &str = "HSYNC_ACCESS_CODE_LENGTH";
pub const ACCESS_CODE_ALPHABET: &str = "HSYNC_ACCESS_CODE_ALPHABET";
pub const ACCESS_CODE_MAX_ATTEMPTS: &str = "HSYNC_ACCESS_CODE_MAX_ATTEMPTS";
pub const LOG_FORMAT: &str = "HSYNC_LOG_FORMAT";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl ConfigError {
    fn invalid(key: &'static str, message: impl ToString) -> Self {
        ConfigError::Invalid {
            key,
            message: message.to_string(),
        }
    }
}

/// Which backend holds prescriptions and inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCodeConfig {
    pub policy: AccessCodePolicy,
    /// Generation attempts before giving up on a collision streak.
    pub max_attempts: u32,
}

impl Default for AccessCodeConfig {
    fn default() -> Self {
        Self {
            policy: AccessCodePolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub access_codes: AccessCodeConfig,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            storage: StorageConfig::InMemory,
            access_codes: AccessCodeConfig::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_addr = get(BIND_ADDR)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid(BIND_ADDR, e))?;

        let persistent = match get(USE_PERSISTENT_STORES) {
            None => false,
            Some(v) => parse_bool(&v).ok_or_else(|| {
                ConfigError::invalid(USE_PERSISTENT_STORES, format!("expected a boolean, got {v:?}"))
            })?,
        };

        let storage = if persistent {
            let database_url = get(DATABASE_URL).ok_or(ConfigError::Missing(DATABASE_URL))?;
            let max_connections = parse_number(&get, DATABASE_MAX_CONNECTIONS, DEFAULT_MAX_CONNECTIONS)?;
            if max_connections == 0 {
                return Err(ConfigError::invalid(DATABASE_MAX_CONNECTIONS, "must be at least 1"));
            }
            StorageConfig::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StorageConfig::InMemory
        };

        let defaults = AccessCodePolicy::default();
        let length = parse_number(&get, ACCESS_CODE_LENGTH, defaults.length())?;
        let alphabet = match get(ACCESS_CODE_ALPHABET) {
            None => defaults.alphabet(),
            Some(v) => v
                .parse::<CodeAlphabet>()
                .map_err(|e| ConfigError::invalid(ACCESS_CODE_ALPHABET, e))?,
        };
        let policy = AccessCodePolicy::new(length, alphabet)
            .map_err(|e| ConfigError::invalid(ACCESS_CODE_LENGTH, e))?;
        let max_attempts = parse_number(&get, ACCESS_CODE_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(ConfigError::invalid(ACCESS_CODE_MAX_ATTEMPTS, "must be at least 1"));
        }

        let log_format = match get(LOG_FORMAT) {
            None => LogFormat::default(),
            Some(v) => v.parse().map_err(|e| ConfigError::invalid(LOG_FORMAT, e))?,
        };

        Ok(Self {
            bind_addr,
            storage,
            access_codes: AccessCodeConfig {
                policy,
                max_attempts,
            },
            log_format,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(v) => v.parse::<T>().map_err(|e| ConfigError::invalid(key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(config(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn persistent_stores_require_database_url() {
        assert_eq!(
            config(&[(USE_PERSISTENT_STORES, "true")]).unwrap_err(),
            ConfigError::Missing(DATABASE_URL)
        );

        let cfg = config(&[
            (USE_PERSISTENT_STORES, "true"),
            (DATABASE_URL, "postgres://localhost/hsync"),
            (DATABASE_MAX_CONNECTIONS, "4"),
        ])
        .unwrap();
        assert_eq!(
            cfg.storage,
            StorageConfig::Postgres {
                database_url: "postgres://localhost/hsync".to_string(),
                max_connections: 4,
            }
        );
    }

    #[test]
    fn access_code_policy_is_configurable() {
        let cfg = config(&[
            (ACCESS_CODE_LENGTH, "10"),
            (ACCESS_CODE_ALPHABET, "base36"),
            (ACCESS_CODE_MAX_ATTEMPTS, "3"),
        ])
        .unwrap();
        assert_eq!(cfg.access_codes.policy.length(), 10);
        assert_eq!(cfg.access_codes.policy.alphabet(), CodeAlphabet::Base36);
        assert_eq!(cfg.access_codes.max_attempts, 3);
    }

    #[test]
    fn out_of_range_code_length_is_rejected() {
        let err = config(&[(ACCESS_CODE_LENGTH, "2")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ACCESS_CODE_LENGTH, .. }));
    }

    #[test]
    fn malformed_values_name_their_key() {
        let err = config(&[(BIND_ADDR, "not-an-addr")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: BIND_ADDR, .. }));

        let err = config(&[(USE_PERSISTENT_STORES, "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: USE_PERSISTENT_STORES, .. }));

        let err = config(&[(LOG_FORMAT, "xml")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: LOG_FORMAT, .. }));
    }
}
