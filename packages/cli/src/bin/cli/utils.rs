// ABOUTME: Shared helpers for replinet subcommands
// ABOUTME: Opens the state store and parses JSON arguments

use anyhow::{Context, Result};
use replinet_config::Settings;
use replinet_state::{RedisBackend, StateStore};
use serde_json::Value;
use std::sync::Arc;

/// Connect to the configured Redis state store
pub async fn connect_state(settings: &Settings) -> Result<StateStore> {
    let backend = RedisBackend::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to state store at {}", settings.redis_url))?;
    Ok(StateStore::with_default_ttl(
        Arc::new(backend),
        settings.state_default_ttl_secs,
    ))
}

/// Parse a JSON argument, treating non-JSON input as a plain string
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub fn render(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
