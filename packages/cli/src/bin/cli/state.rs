// ABOUTME: CLI commands for inspecting the shared state store
// ABOUTME: Read, write and delete JSON values by key

use super::utils::{connect_state, parse_value, render};
use anyhow::{bail, Result};
use clap::Subcommand;
use colored::*;
use replinet_config::Settings;
use serde_json::Value;

#[derive(Subcommand)]
pub enum StateCommands {
    /// Print the value stored under a key
    Get {
        key: String,
    },

    /// Store a JSON value under a key
    Set {
        key: String,

        /// Value as JSON (plain text is stored as a string)
        value: String,

        /// Time-to-live in seconds (default: store TTL)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Delete a key
    Delete {
        key: String,
    },
}

impl StateCommands {
    pub async fn execute(&self, settings: &Settings) -> Result<()> {
        let state = connect_state(settings).await?;

        match self {
            StateCommands::Get { key } => match state.get::<Value>(key).await {
                Some(value) => println!("{}", render(&value)),
                None => println!("{}", format!("No value for {}", key).yellow()),
            },
            StateCommands::Set { key, value, ttl } => {
                if !state.set(key, &parse_value(value), *ttl).await {
                    bail!("Failed to store value for {}", key);
                }
                println!("{} {}", "Stored".green().bold(), key);
            }
            StateCommands::Delete { key } => {
                if state.delete(key).await {
                    println!("{} {}", "Deleted".green().bold(), key);
                } else {
                    println!("{}", format!("No value for {}", key).yellow());
                }
            }
        }

        Ok(())
    }
}
