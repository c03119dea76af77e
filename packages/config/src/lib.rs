// ABOUTME: Configuration loading for the Replinet orchestration services
// ABOUTME: Reads pool limits, instance template and connection settings from the environment

pub mod constants;

use constants::*;
use std::env;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    MustBePositive { var: &'static str },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const DEFAULT_REDIS_HOST: &str = "redis";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_DATABASE_URL: &str = "sqlite://replinet.db?mode=rwc";
pub const DEFAULT_STATE_TTL_SECS: u64 = 3600;
pub const DEFAULT_MAX_BROWSER_INSTANCES: usize = 10;
pub const DEFAULT_BROWSER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_THREADS_PER_AGENT: usize = 5;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_BROWSER_IMAGE: &str = "browseruse/browser-use:latest";
pub const DEFAULT_BROWSER_NETWORK: &str = "replinet_network";
pub const DEFAULT_BROWSER_MEMORY_MB: u64 = 1024;
/// One full CPU at the default 100ms CFS period
pub const DEFAULT_BROWSER_CPU_QUOTA: i64 = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub redis_url: String,
    pub database_url: String,
    pub state_default_ttl_secs: u64,
    pub max_browser_instances: usize,
    pub browser_timeout_secs: u64,
    pub max_threads_per_agent: usize,
    pub sweep_interval_secs: u64,
    pub browser_image: String,
    pub browser_network: Option<String>,
    pub browser_memory_mb: u64,
    pub browser_cpu_quota: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: format!("redis://{}:{}/0", DEFAULT_REDIS_HOST, DEFAULT_REDIS_PORT),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            state_default_ttl_secs: DEFAULT_STATE_TTL_SECS,
            max_browser_instances: DEFAULT_MAX_BROWSER_INSTANCES,
            browser_timeout_secs: DEFAULT_BROWSER_TIMEOUT_SECS,
            max_threads_per_agent: DEFAULT_MAX_THREADS_PER_AGENT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            browser_image: DEFAULT_BROWSER_IMAGE.to_string(),
            browser_network: Some(DEFAULT_BROWSER_NETWORK.to_string()),
            browser_memory_mb: DEFAULT_BROWSER_MEMORY_MB,
            browser_cpu_quota: DEFAULT_BROWSER_CPU_QUOTA,
        }
    }
}

impl Settings {
    /// Load `.env` (if present) and then read settings from the environment
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("Loaded environment from {}", path.display()),
            Err(e) => debug!("No .env file loaded: {}", e),
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        let redis_url = match env::var(REDIS_URL) {
            Ok(url) if !url.trim().is_empty() => url,
            _ => {
                let host = env::var(REDIS_HOST).unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
                let port: u16 = parse_var(REDIS_PORT, DEFAULT_REDIS_PORT)?;
                format!("redis://{}:{}/0", host, port)
            }
        };

        let database_url =
            env::var(DATABASE_URL).unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        // An empty network name means "use the runtime's default network"
        let browser_network = match env::var(BROWSER_NETWORK) {
            Ok(name) if name.trim().is_empty() => None,
            Ok(name) => Some(name),
            Err(_) => Some(DEFAULT_BROWSER_NETWORK.to_string()),
        };

        Ok(Self {
            redis_url,
            database_url,
            state_default_ttl_secs: positive(
                STATE_DEFAULT_TTL_SECS,
                parse_var(STATE_DEFAULT_TTL_SECS, DEFAULT_STATE_TTL_SECS)?,
            )?,
            max_browser_instances: positive(
                MAX_BROWSER_INSTANCES,
                parse_var(MAX_BROWSER_INSTANCES, DEFAULT_MAX_BROWSER_INSTANCES)?,
            )?,
            browser_timeout_secs: parse_var(BROWSER_TIMEOUT, DEFAULT_BROWSER_TIMEOUT_SECS)?,
            max_threads_per_agent: positive(
                MAX_THREADS_PER_AGENT,
                parse_var(MAX_THREADS_PER_AGENT, DEFAULT_MAX_THREADS_PER_AGENT)?,
            )?,
            sweep_interval_secs: positive(
                SWEEP_INTERVAL_SECS,
                parse_var(SWEEP_INTERVAL_SECS, DEFAULT_SWEEP_INTERVAL_SECS)?,
            )?,
            browser_image: env::var(BROWSER_IMAGE)
                .unwrap_or_else(|_| DEFAULT_BROWSER_IMAGE.to_string()),
            browser_network,
            browser_memory_mb: positive(
                BROWSER_MEMORY_MB,
                parse_var(BROWSER_MEMORY_MB, DEFAULT_BROWSER_MEMORY_MB)?,
            )?,
            browser_cpu_quota: parse_var(BROWSER_CPU_QUOTA, DEFAULT_BROWSER_CPU_QUOTA)?,
        })
    }
}

fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(default),
    }
}

fn positive<T: PartialEq + Default>(var: &'static str, value: T) -> Result<T> {
    if value == T::default() {
        return Err(ConfigError::MustBePositive { var });
    }
    Ok(value)
}
