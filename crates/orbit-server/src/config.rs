//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use orbit_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_QUEUE, DEFAULT_RING_TIMEOUT_SECS,
};

use crate::realtime::RealtimeOptions;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8000`
    pub http_addr: SocketAddr,

    /// SQLite file holding community rosters.
    /// Env: `DATABASE_PATH`
    /// Default: `./orbit.db`
    pub database_path: PathBuf,

    /// Events buffered per connection before new ones are dropped.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: `256`
    pub outbound_queue_capacity: usize,

    /// Seconds an unanswered call rings before the server ends it.
    /// Env: `CALL_RING_TIMEOUT_SECS` (`0` disables)
    /// Default: `45`
    pub ring_timeout_secs: u64,

    /// Bearer token for the `/internal/*` delivery endpoints.
    /// Env: `INTERNAL_TOKEN`
    /// Default: empty (internal API disabled).
    pub internal_token: Option<String>,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// HTTP requests per second per client IP, and the burst allowance.
    /// Env: `RATE_LIMIT_PER_SEC`, `RATE_LIMIT_BURST`
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,

    /// Inbound WebSocket events per second per connection, and the burst.
    /// Env: `EVENT_RATE_PER_SEC`, `EVENT_RATE_BURST`
    pub event_rate_per_sec: f64,
    pub event_rate_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./orbit.db"),
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            ring_timeout_secs: DEFAULT_RING_TIMEOUT_SECS,
            internal_token: None,
            instance_name: "Orbit Realtime".to_string(),
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 30.0,
            event_rate_per_sec: 20.0,
            event_rate_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&var, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        parse_into(&var, "OUTBOUND_QUEUE_CAPACITY", &mut config.outbound_queue_capacity);
        parse_into(&var, "CALL_RING_TIMEOUT_SECS", &mut config.ring_timeout_secs);

        if let Some(token) = var("INTERNAL_TOKEN") {
            if !token.is_empty() {
                config.internal_token = Some(token);
            }
        }

        if let Some(name) = var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_into(&var, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        parse_into(&var, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);
        parse_into(&var, "EVENT_RATE_PER_SEC", &mut config.event_rate_per_sec);
        parse_into(&var, "EVENT_RATE_BURST", &mut config.event_rate_burst);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn ring_timeout(&self) -> Option<Duration> {
        (self.ring_timeout_secs > 0).then(|| Duration::from_secs(self.ring_timeout_secs))
    }

    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            outbound_queue: self.outbound_queue_capacity.max(1),
            ring_timeout: self.ring_timeout(),
        }
    }
}

/// Overwrite `slot` when `key` is set and parses; warn and keep the default
/// otherwise.
fn parse_into<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };

    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8000).into());
        assert_eq!(config.ring_timeout(), Some(Duration::from_secs(45)));
        assert!(config.internal_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "127.0.0.1:9100"),
            ("DATABASE_PATH", "/var/lib/orbit/rosters.db"),
            ("OUTBOUND_QUEUE_CAPACITY", "32"),
            ("INTERNAL_TOKEN", "s3cret"),
            ("EVENT_RATE_BURST", "5"),
        ]));

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9100).into());
        assert_eq!(config.database_path, PathBuf::from("/var/lib/orbit/rosters.db"));
        assert_eq!(config.realtime_options().outbound_queue, 32);
        assert_eq!(config.internal_token.as_deref(), Some("s3cret"));
        assert_eq!(config.event_rate_burst, 5.0);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("OUTBOUND_QUEUE_CAPACITY", "-3"),
            ("INTERNAL_TOKEN", ""),
        ]));

        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8000).into());
        assert_eq!(config.outbound_queue_capacity, 256);
        assert!(config.internal_token.is_none());
    }

    #[test]
    fn test_zero_ring_timeout_disables() {
        let config = ServerConfig::from_lookup(lookup(&[("CALL_RING_TIMEOUT_SECS", "0")]));
        assert_eq!(config.ring_timeout(), None);
        assert_eq!(config.realtime_options().ring_timeout, None);
    }
}
