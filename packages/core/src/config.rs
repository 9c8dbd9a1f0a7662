use std::env;
use std::time::Duration;

use crate::cli::Cli;

/// Runtime configuration, read once at start-up and passed into
/// constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP listener bind address.
    pub host: String,
    /// HTTP listener port.
    pub port: u16,
    /// Lifetime of a cached metric.
    pub cache_ttl: Duration,
    /// Maximum cached metrics per cache before LRU eviction.
    pub cache_capacity: usize,
    /// Trailing window used when a metrics request names none.
    pub default_window: chrono::Duration,
    /// Period of the expired-entry sweep.
    pub cache_sweep_interval: Duration,
    /// SQLite URL; `None` keeps everything in memory.
    pub database_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 1024,
            default_window: chrono::Duration::days(30),
            cache_sweep_interval: Duration::from_secs(60),
            database_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from any variable source. Unset variables take their
    /// defaults; set but malformed ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("MASTERBUS_HOST").unwrap_or(defaults.host);
        if host.trim().is_empty() {
            return Err("MASTERBUS_HOST must not be empty".to_string());
        }

        let port = match lookup("MASTERBUS_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("MASTERBUS_PORT must be a valid port, got '{}'", raw))?,
            None => defaults.port,
        };

        let cache_ttl = match lookup("CACHE_TTL_SECONDS") {
            Some(raw) => Duration::from_secs(positive(&raw, "CACHE_TTL_SECONDS")?),
            None => defaults.cache_ttl,
        };

        let cache_capacity = match lookup("CACHE_CAPACITY") {
            Some(raw) => positive(&raw, "CACHE_CAPACITY")? as usize,
            None => defaults.cache_capacity,
        };

        let default_window = match lookup("DEFAULT_WINDOW_DAYS") {
            Some(raw) => window_days(positive(&raw, "DEFAULT_WINDOW_DAYS")?)?,
            None => defaults.default_window,
        };

        let cache_sweep_interval = match lookup("CACHE_SWEEP_INTERVAL_SECONDS") {
            Some(raw) => Duration::from_secs(positive(&raw, "CACHE_SWEEP_INTERVAL_SECONDS")?),
            None => defaults.cache_sweep_interval,
        };

        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            host,
            port,
            cache_ttl,
            cache_capacity,
            default_window,
            cache_sweep_interval,
            database_url,
        })
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(host) = &cli.host {
            self.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(ttl) = cli.cache_ttl {
            if ttl == 0 {
                return Err("--cache-ttl must be greater than zero".to_string());
            }
            self.cache_ttl = Duration::from_secs(ttl);
        }
        if let Some(capacity) = cli.cache_capacity {
            if capacity == 0 {
                return Err("--cache-capacity must be greater than zero".to_string());
            }
            self.cache_capacity = capacity;
        }
        if let Some(days) = cli.default_window_days {
            if days == 0 {
                return Err("--default-window-days must be greater than zero".to_string());
            }
            self.default_window = window_days(days)?;
        }
        if let Some(url) = &cli.database_url {
            self.database_url = Some(url.clone());
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn positive(raw: &str, name: &str) -> Result<u64, String> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(format!("{} must be greater than zero", name)),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("{} must be a valid number, got '{}'", name, raw)),
    }
}

fn window_days(days: u64) -> Result<chrono::Duration, String> {
    i64::try_from(days)
        .ok()
        .and_then(chrono::Duration::try_days)
        .ok_or_else(|| format!("default window of {} days is out of range", days))
}
