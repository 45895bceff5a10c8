//! Process-wide configuration.
//!
//! SYSTEM CONTEXT
//! ==============
//! Startup reads everything once from the environment (after `dotenvy`)
//! and hands an immutable `Config` to the rest of the process. Queue
//! depths and the store deadline are policy knobs; the signing key and
//! database URL are the only required values.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_INBOUND_QUEUE_DEPTH: usize = 256;
const DEFAULT_OUTBOUND_QUEUE_DEPTH: usize = 64;
const DEFAULT_STORE_DEADLINE_MS: u64 = 5000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} required")]
    Missing(&'static str),
    #[error("invalid {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HMAC key the account surface signs bearer tokens with.
    pub token_key: String,
    /// Per-session inbound command queue depth.
    pub inbound_queue_depth: usize,
    /// Per-connection outbound frame queue depth.
    pub outbound_queue_depth: usize,
    /// Deadline applied to every element-store operation.
    pub store_deadline: Duration,
    pub db_max_connections: u32,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `Missing` for absent required values and `Invalid` for
    /// unparseable numeric overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary lookup. Split out from
    /// `from_env` so parsing is testable without touching process state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            database_url: get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            token_key: get("TOKEN_KEY").ok_or(ConfigError::Missing("TOKEN_KEY"))?,
            inbound_queue_depth: parse_or(&get, "INBOUND_QUEUE_DEPTH", DEFAULT_INBOUND_QUEUE_DEPTH)?,
            outbound_queue_depth: parse_or(&get, "OUTBOUND_QUEUE_DEPTH", DEFAULT_OUTBOUND_QUEUE_DEPTH)?,
            store_deadline: Duration::from_millis(parse_or(
                &get,
                "STORE_DEADLINE_MS",
                DEFAULT_STORE_DEADLINE_MS,
            )?),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid(name, e.to_string())),
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
impl Config {
    pub(crate) fn test_default() -> Self {
        Self {
            port: 0,
            database_url: String::new(),
            token_key: "test-signing-key".into(),
            inbound_queue_depth: DEFAULT_INBOUND_QUEUE_DEPTH,
            outbound_queue_depth: DEFAULT_OUTBOUND_QUEUE_DEPTH,
            store_deadline: Duration::from_secs(1),
            db_max_connections: 2,
        }
    }
}
