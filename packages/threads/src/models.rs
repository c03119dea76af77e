// ABOUTME: Agent and thread records persisted by the thread store
// ABOUTME: Status enums map to the text columns of the agents and threads tables

use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Created,
    Running,
    Completed,
    Error,
    Stopped,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }

    /// Completed and errored threads have already been rolled into agent statistics
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub id: i64,
    pub user_id: i64,
    pub preset_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub status: String,

    // Run statistics
    pub total_runs: i64,
    pub successful_runs: i64,
    pub error_runs: i64,
    /// Seconds
    pub total_runtime: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub user_id: i64,
    pub preset_id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    pub id: i64,
    pub agent_id: i64,
    pub status: ThreadStatus,
    pub error_message: Option<String>,

    /// Id of the sandbox serving the thread while it runs
    pub browser_id: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Seconds between start and end
    pub execution_time: Option<i64>,

    pub logs: JsonValue,
    pub results: JsonValue,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome written when a thread finishes
#[derive(Debug, Clone)]
pub struct ThreadCompletion {
    pub status: ThreadStatus,
    pub error_message: Option<String>,
    pub results: JsonValue,
    pub end_time: DateTime<Utc>,
    pub execution_time: Option<i64>,
}

impl ThreadCompletion {
    pub fn new(
        thread: &Thread,
        success: bool,
        error_message: Option<String>,
        results: Option<JsonValue>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let execution_time = thread
            .start_time
            .map(|start| end_time.signed_duration_since(start).num_seconds().max(0));

        Self {
            status: if success {
                ThreadStatus::Completed
            } else {
                ThreadStatus::Error
            },
            error_message,
            results: results.unwrap_or_else(|| JsonValue::Object(Default::default())),
            end_time,
            execution_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("created", ThreadStatus::Created)]
    #[case("running", ThreadStatus::Running)]
    #[case("completed", ThreadStatus::Completed)]
    #[case("error", ThreadStatus::Error)]
    #[case("stopped", ThreadStatus::Stopped)]
    fn test_thread_status_text(#[case] text: &str, #[case] status: ThreadStatus) {
        assert_eq!(ThreadStatus::from_str(text).unwrap(), status);
        assert_eq!(status.as_str(), text);
    }

    #[test]
    fn test_unknown_thread_status_rejected() {
        assert!(matches!(
            ThreadStatus::from_str("paused"),
            Err(StorageError::InvalidStatus(_))
        ));
    }

    fn thread_started(start_time: Option<DateTime<Utc>>) -> Thread {
        let now = Utc::now();
        Thread {
            id: 1,
            agent_id: 1,
            status: ThreadStatus::Running,
            error_message: None,
            browser_id: Some("c1".to_string()),
            start_time,
            end_time: None,
            execution_time: None,
            logs: json!([]),
            results: json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_completion_computes_execution_time() {
        let end = Utc::now();
        let thread = thread_started(Some(end - chrono::Duration::seconds(42)));

        let completion = ThreadCompletion::new(&thread, true, None, None, end);
        assert_eq!(completion.status, ThreadStatus::Completed);
        assert_eq!(completion.execution_time, Some(42));
        assert_eq!(completion.results, json!({}));
    }

    #[test]
    fn test_completion_without_start_time() {
        let thread = thread_started(None);
        let completion = ThreadCompletion::new(
            &thread,
            false,
            Some("boom".to_string()),
            Some(json!({"partial": true})),
            Utc::now(),
        );
        assert_eq!(completion.status, ThreadStatus::Error);
        assert_eq!(completion.execution_time, None);
        assert_eq!(completion.results, json!({"partial": true}));
    }
}
