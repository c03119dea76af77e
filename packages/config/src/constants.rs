// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Replinet

// State Store Configuration
pub const REDIS_URL: &str = "REDIS_URL";
pub const REDIS_HOST: &str = "REDIS_HOST";
pub const REDIS_PORT: &str = "REDIS_PORT";
pub const STATE_DEFAULT_TTL_SECS: &str = "STATE_DEFAULT_TTL_SECS";

// Persistence
pub const DATABASE_URL: &str = "DATABASE_URL";

// Sandbox Pool
pub const MAX_BROWSER_INSTANCES: &str = "MAX_BROWSER_INSTANCES";
pub const BROWSER_TIMEOUT: &str = "BROWSER_TIMEOUT";
pub const MAX_THREADS_PER_AGENT: &str = "MAX_THREADS_PER_AGENT";
pub const SWEEP_INTERVAL_SECS: &str = "SWEEP_INTERVAL_SECS";

// Sandbox Instance Template
pub const BROWSER_IMAGE: &str = "BROWSER_IMAGE";
pub const BROWSER_NETWORK: &str = "BROWSER_NETWORK";
pub const BROWSER_MEMORY_MB: &str = "BROWSER_MEMORY_MB";
pub const BROWSER_CPU_QUOTA: &str = "BROWSER_CPU_QUOTA";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
