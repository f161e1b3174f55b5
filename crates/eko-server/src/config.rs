//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. Only the TLS certificate and key
//! have to exist on disk.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use eko_shared::constants::DEFAULT_PORT;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TLS listener for the packet protocol.
    /// Env: `EKO_LISTEN_ADDR`
    /// Default: `0.0.0.0:7223`
    pub listen_addr: SocketAddr,

    /// Informational and admin HTTP API.
    /// Env: `EKO_HTTP_ADDR`
    /// Default: `0.0.0.0:7280`
    pub http_addr: SocketAddr,

    /// Prometheus scrape endpoint.
    /// Env: `EKO_METRICS_ADDR`
    /// Default: `0.0.0.0:7281`
    pub metrics_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `EKO_DB_PATH`
    /// Default: `./eko.db`
    pub db_path: PathBuf,

    /// PEM certificate chain presented to clients.
    /// Env: `EKO_TLS_CERT`
    /// Default: `./cert.pem`
    pub tls_cert: PathBuf,

    /// PEM private key matching `tls_cert`.
    /// Env: `EKO_TLS_KEY`
    /// Default: `./key.pem`
    pub tls_key: PathBuf,

    /// Node number embedded in generated ids (10 bits).
    /// Env: `EKO_NODE_ID`
    /// Default: `0`
    pub node_id: u16,

    /// Deadline from accept to a verified handshake.
    /// Env: `EKO_AUTH_TIMEOUT_MS`
    pub auth_timeout: Duration,

    /// How long an enqueue to a full session queue may wait before the
    /// session is evicted.
    /// Env: `EKO_WRITE_TIMEOUT_MS`
    pub write_timeout: Duration,

    /// Soft deadline for one request handler.
    /// Env: `EKO_HANDLER_TIMEOUT_MS`
    pub handler_timeout: Duration,

    /// A nonce older than this is reissued.
    pub nonce_lifetime: Duration,

    /// Sustained mutating requests per second per user.
    /// Env: `EKO_REQUEST_RATE`
    pub request_rate: f64,

    /// Burst size of the per-user bucket.
    /// Env: `EKO_REQUEST_BURST`
    pub request_burst: f64,

    /// Consecutive rate-limited requests after which the connection is
    /// closed.
    /// Env: `EKO_RATE_LIMIT_STRIKES`
    pub rate_limit_strikes: u32,

    /// Connects per second from one IP that get logged.
    /// Env: `EKO_SUSPICIOUS_CONNECTS`
    pub suspicious_connects: usize,

    /// Connects per second from one IP that trigger a cool-down.
    /// Env: `EKO_MALICIOUS_CONNECTS`
    pub malicious_connects: usize,

    /// Env: `EKO_CONNECT_COOLDOWN_SECS`
    pub connect_cooldown: Duration,

    /// Maximum concurrent connections (0 = unlimited).
    /// Env: `EKO_MAX_CONNECTIONS`
    pub max_connections: usize,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `EKO_ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Human-readable name for this server instance.
    /// Env: `EKO_INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            http_addr: ([0, 0, 0, 0], 7280).into(),
            metrics_addr: ([0, 0, 0, 0], 7281).into(),
            db_path: PathBuf::from("./eko.db"),
            tls_cert: PathBuf::from("./cert.pem"),
            tls_key: PathBuf::from("./key.pem"),
            node_id: 0,
            auth_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_millis(100),
            handler_timeout: Duration::from_secs(2),
            nonce_lifetime: Duration::from_secs(eko_shared::constants::NONCE_LIFETIME_SECS),
            request_rate: 5.0,
            request_burst: 20.0,
            rate_limit_strikes: 20,
            suspicious_connects: 5,
            malicious_connects: 15,
            connect_cooldown: Duration::from_secs(60),
            max_connections: 10_000,
            admin_token: None,
            instance_name: "Eko".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values
    /// are logged and the default is kept.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = Env { lookup: &lookup };

        env.parse("EKO_LISTEN_ADDR", &mut config.listen_addr);
        env.parse("EKO_HTTP_ADDR", &mut config.http_addr);
        env.parse("EKO_METRICS_ADDR", &mut config.metrics_addr);
        env.parse("EKO_DB_PATH", &mut config.db_path);
        env.parse("EKO_TLS_CERT", &mut config.tls_cert);
        env.parse("EKO_TLS_KEY", &mut config.tls_key);

        env.parse("EKO_NODE_ID", &mut config.node_id);
        if config.node_id > 0x3FF {
            tracing::warn!(value = config.node_id, "EKO_NODE_ID exceeds 10 bits, using 0");
            config.node_id = 0;
        }

        env.millis("EKO_AUTH_TIMEOUT_MS", &mut config.auth_timeout);
        env.millis("EKO_WRITE_TIMEOUT_MS", &mut config.write_timeout);
        env.millis("EKO_HANDLER_TIMEOUT_MS", &mut config.handler_timeout);

        env.parse("EKO_REQUEST_RATE", &mut config.request_rate);
        env.parse("EKO_REQUEST_BURST", &mut config.request_burst);
        env.parse("EKO_RATE_LIMIT_STRIKES", &mut config.rate_limit_strikes);
        env.parse("EKO_SUSPICIOUS_CONNECTS", &mut config.suspicious_connects);
        env.parse("EKO_MALICIOUS_CONNECTS", &mut config.malicious_connects);

        let mut cooldown_secs = config.connect_cooldown.as_secs();
        env.parse("EKO_CONNECT_COOLDOWN_SECS", &mut cooldown_secs);
        config.connect_cooldown = Duration::from_secs(cooldown_secs);

        env.parse("EKO_MAX_CONNECTIONS", &mut config.max_connections);

        if let Some(token) = lookup("EKO_ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(name) = lookup("EKO_INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn parse<T: FromStr>(&self, key: &str, slot: &mut T) {
        let Some(raw) = (self.lookup)(key) else {
            return;
        };
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
        }
    }

    fn millis(&self, key: &str, slot: &mut Duration) {
        let mut ms = slot.as_millis() as u64;
        self.parse(key, &mut ms);
        *slot = Duration::from_millis(ms);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

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
        assert_eq!(config.listen_addr, ([0, 0, 0, 0], 7223).into());
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_millis(100));
        assert_eq!(config.handler_timeout, Duration::from_secs(2));
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("EKO_LISTEN_ADDR", "127.0.0.1:9000"),
            ("EKO_AUTH_TIMEOUT_MS", "250"),
            ("EKO_MALICIOUS_CONNECTS", "3"),
            ("EKO_CONNECT_COOLDOWN_SECS", "7"),
            ("EKO_ADMIN_TOKEN", "secret"),
            ("EKO_NODE_ID", "12"),
        ]));
        assert_eq!(config.listen_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.auth_timeout, Duration::from_millis(250));
        assert_eq!(config.malicious_connects, 3);
        assert_eq!(config.connect_cooldown, Duration::from_secs(7));
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.node_id, 12);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("EKO_HTTP_ADDR", "not an address"),
            ("EKO_REQUEST_RATE", "fast"),
            ("EKO_NODE_ID", "5000"),
            ("EKO_ADMIN_TOKEN", ""),
        ]));
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.request_rate, defaults.request_rate);
        assert_eq!(config.node_id, 0);
        assert!(config.admin_token.is_none());
    }
}
