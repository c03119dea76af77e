// ABOUTME: CLI commands for the Redis-backed task queues
// ABOUTME: Push JSON payloads, pop the oldest task and report queue lengths

use super::utils::{connect_state, parse_value, render};
use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use replinet_config::Settings;
use replinet_state::TaskQueue;
use serde_json::Value;

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Enqueue a task payload
    Push {
        /// Queue name
        queue: String,

        /// Payload as JSON (plain text is stored as a string)
        payload: String,

        /// Payload time-to-live in seconds (default: store TTL)
        #[arg(long)]
        ttl: Option<u64>,
    },

    /// Dequeue the oldest task
    Pop {
        /// Queue name
        queue: String,
    },

    /// Show the number of queued tasks
    Len {
        /// Queue name
        queue: String,
    },
}

impl QueueCommands {
    pub async fn execute(&self, settings: &Settings) -> Result<()> {
        let queue = TaskQueue::new(connect_state(settings).await?);

        match self {
            QueueCommands::Push {
                queue: name,
                payload,
                ttl,
            } => {
                let task_id = queue
                    .enqueue(name, &parse_value(payload), *ttl)
                    .await
                    .with_context(|| format!("Failed to enqueue task on {}", name))?;
                println!("{} {}", "Enqueued".green().bold(), task_id);
            }
            QueueCommands::Pop { queue: name } => match queue.dequeue::<Value>(name).await {
                Some(task) => println!("{}", render(&task)),
                None => println!("{}", format!("Queue {} is empty", name).yellow()),
            },
            QueueCommands::Len { queue: name } => {
                println!("{}", queue.length(name).await);
            }
        }

        Ok(())
    }
}
