//! Process configuration, read once from `INNKEEPER_*` environment variables.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub http_port: u16,
    pub pg_port: u16,
    pub data_dir: PathBuf,
    /// Console password shared by every SQL login.
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub sweep_interval: Duration,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Registered as ADMIN on first start when no user has this email.
    pub admin_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value for {}: {:?}", self.var, self.value)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take defaults; set but
    /// unparsable keys are errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let sweep_secs: u64 = parse(&lookup, "INNKEEPER_SWEEP_INTERVAL_SECS")?.unwrap_or(60);
        if sweep_secs == 0 {
            return Err(ConfigError {
                var: "INNKEEPER_SWEEP_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            bind: string("INNKEEPER_BIND", "0.0.0.0"),
            http_port: parse(&lookup, "INNKEEPER_HTTP_PORT")?.unwrap_or(8080),
            pg_port: parse(&lookup, "INNKEEPER_PG_PORT")?.unwrap_or(5433),
            data_dir: PathBuf::from(string("INNKEEPER_DATA_DIR", "./data")),
            password: string("INNKEEPER_PASSWORD", "innkeeper"),
            max_connections: parse(&lookup, "INNKEEPER_MAX_CONNECTIONS")?.unwrap_or(256),
            compact_threshold: parse(&lookup, "INNKEEPER_COMPACT_THRESHOLD")?.unwrap_or(1000),
            sweep_interval: Duration::from_secs(sweep_secs),
            metrics_port: parse(&lookup, "INNKEEPER_METRICS_PORT")?,
            tls_cert: lookup("INNKEEPER_TLS_CERT"),
            tls_key: lookup("INNKEEPER_TLS_KEY"),
            admin_email: lookup("INNKEEPER_ADMIN_EMAIL").filter(|e| !e.trim().is_empty()),
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("hotel.wal")
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.bind, self.http_port)
    }

    pub fn pg_addr(&self) -> String {
        format!("{}:{}", self.bind, self.pg_port)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { var, value }),
    }
}
