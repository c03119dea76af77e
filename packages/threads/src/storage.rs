// ABOUTME: Persistence seam for agents and threads with a SQLite implementation
// ABOUTME: Status transitions are conditional updates so concurrent writers cannot clobber each other

use crate::error::{Result, StorageError};
use crate::models::{Agent, NewAgent, Thread, ThreadCompletion, ThreadStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

const THREAD_COLUMNS: &str = "id, agent_id, status, error_message, browser_id, start_time, \
     end_time, execution_time, logs, results, created_at, updated_at";

const AGENT_COLUMNS: &str = "id, user_id, preset_id, name, description, is_active, status, \
     total_runs, successful_runs, error_runs, total_runtime, created_at, updated_at";

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn create_agent(&self, agent: NewAgent) -> Result<Agent>;

    async fn get_agent(&self, agent_id: i64) -> Result<Agent>;

    /// Remove an agent together with all of its threads
    async fn delete_agent(&self, agent_id: i64) -> Result<()>;

    /// Add run statistics for one finished thread
    async fn record_run(&self, agent_id: i64, success: bool, runtime_secs: i64) -> Result<()>;

    async fn create_thread(&self, agent_id: i64) -> Result<Thread>;

    async fn get_thread(&self, thread_id: i64) -> Result<Thread>;

    async fn threads_for_agent(&self, agent_id: i64) -> Result<Vec<Thread>>;

    async fn count_running_threads(&self, agent_id: i64) -> Result<i64>;

    /// Every `running` thread across all agents
    async fn running_threads(&self) -> Result<Vec<Thread>>;

    /// `created → running`, recording the serving sandbox. Fails with
    /// `Conflict` when the thread is no longer `created`.
    async fn mark_running(
        &self,
        thread_id: i64,
        browser_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Thread>;

    /// `running → stopped`, clearing the sandbox id. The thread must still
    /// hold `browser_id`. Returns whether a row changed.
    async fn mark_stopped_if_running(&self, thread_id: i64, browser_id: &str) -> Result<bool>;

    /// Write the terminal outcome, release the sandbox reference and add the
    /// run to the agent's statistics in one transaction. Fails with `Conflict`
    /// when the thread is already `completed` or `error`.
    async fn complete(&self, thread_id: i64, completion: &ThreadCompletion) -> Result<Thread>;
}

/// SQLite-backed thread store
pub struct SqliteThreadStore {
    pool: SqlitePool,
}

impl SqliteThreadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url` and apply migrations
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, mainly for tests
    pub async fn in_memory() -> Result<Self> {
        // A single connection that never recycles keeps the database alive
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Thread store migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
        Ok(Agent {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            preset_id: row.try_get("preset_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            is_active: row.try_get("is_active")?,
            status: row.try_get("status")?,
            total_runs: row.try_get("total_runs")?,
            successful_runs: row.try_get("successful_runs")?,
            error_runs: row.try_get("error_runs")?,
            total_runtime: row.try_get("total_runtime")?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    fn row_to_thread(row: &SqliteRow) -> Result<Thread> {
        Ok(Thread {
            id: row.try_get("id")?,
            agent_id: row.try_get("agent_id")?,
            status: ThreadStatus::from_str(&row.try_get::<String, _>("status")?)?,
            error_message: row.try_get("error_message")?,
            browser_id: row.try_get("browser_id")?,
            start_time: parse_optional_timestamp(row.try_get("start_time")?)?,
            end_time: parse_optional_timestamp(row.try_get("end_time")?)?,
            execution_time: row.try_get("execution_time")?,
            logs: serde_json::from_str(&row.try_get::<String, _>("logs")?)?,
            results: serde_json::from_str(&row.try_get::<String, _>("results")?)?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", value, e)))
}

/// Add one finished run to an agent's counters
async fn apply_run(
    conn: &mut SqliteConnection,
    agent_id: i64,
    success: bool,
    runtime_secs: i64,
) -> Result<()> {
    let (successful, failed) = if success { (1, 0) } else { (0, 1) };

    let result = sqlx::query(
        r#"
        UPDATE agents
        SET total_runs = total_runs + 1,
            successful_runs = successful_runs + ?1,
            error_runs = error_runs + ?2,
            total_runtime = total_runtime + ?3,
            updated_at = ?4
        WHERE id = ?5
        "#,
    )
    .bind(successful)
    .bind(failed)
    .bind(runtime_secs.max(0))
    .bind(Utc::now().to_rfc3339())
    .bind(agent_id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!("agent {}", agent_id)));
    }
    Ok(())
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn create_agent(&self, agent: NewAgent) -> Result<Agent> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO agents (user_id, preset_id, name, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(agent.user_id)
        .bind(agent.preset_id)
        .bind(&agent.name)
        .bind(&agent.description)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_agent(result.last_insert_rowid()).await
    }

    async fn get_agent(&self, agent_id: i64) -> Result<Agent> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS))
            .bind(agent_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_agent(&row),
            None => Err(StorageError::NotFound(format!("agent {}", agent_id))),
        }
    }

    async fn delete_agent(&self, agent_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM threads WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM agents WHERE id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("agent {}", agent_id)));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_run(&self, agent_id: i64, success: bool, runtime_secs: i64) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        apply_run(&mut conn, agent_id, success, runtime_secs).await
    }

    async fn create_thread(&self, agent_id: i64) -> Result<Thread> {
        // Surface a missing agent as NotFound rather than a constraint error
        self.get_agent(agent_id).await?;

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO threads (agent_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            "#,
        )
        .bind(agent_id)
        .bind(ThreadStatus::Created.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_thread(result.last_insert_rowid()).await
    }

    async fn get_thread(&self, thread_id: i64) -> Result<Thread> {
        let row = sqlx::query(&format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS))
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_thread(&row),
            None => Err(StorageError::NotFound(format!("thread {}", thread_id))),
        }
    }

    async fn threads_for_agent(&self, agent_id: i64) -> Result<Vec<Thread>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM threads WHERE agent_id = ?1 ORDER BY id",
            THREAD_COLUMNS
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_thread).collect()
    }

    async fn count_running_threads(&self, agent_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) FROM threads WHERE agent_id = ?1 AND status = ?2")
                .bind(agent_id)
                .bind(ThreadStatus::Running.as_str())
                .fetch_one(&self.pool)
                .await?
                .try_get(0)?;
        Ok(count)
    }

    async fn running_threads(&self) -> Result<Vec<Thread>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM threads WHERE status = ?1 ORDER BY id",
            THREAD_COLUMNS
        ))
        .bind(ThreadStatus::Running.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_thread).collect()
    }

    async fn mark_running(
        &self,
        thread_id: i64,
        browser_id: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Thread> {
        let result = sqlx::query(
            r#"
            UPDATE threads
            SET status = ?1, browser_id = ?2, start_time = ?3, updated_at = ?4
            WHERE id = ?5 AND status = ?6
            "#,
        )
        .bind(ThreadStatus::Running.as_str())
        .bind(browser_id)
        .bind(start_time.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(thread_id)
        .bind(ThreadStatus::Created.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing thread from one that already moved on
            let thread = self.get_thread(thread_id).await?;
            return Err(StorageError::Conflict(format!(
                "thread {} is {}, not created",
                thread_id, thread.status
            )));
        }

        self.get_thread(thread_id).await
    }

    async fn mark_stopped_if_running(&self, thread_id: i64, browser_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE threads
            SET status = ?1, browser_id = NULL, updated_at = ?2
            WHERE id = ?3 AND status = ?4 AND browser_id = ?5
            "#,
        )
        .bind(ThreadStatus::Stopped.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(thread_id)
        .bind(ThreadStatus::Running.as_str())
        .bind(browser_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, thread_id: i64, completion: &ThreadCompletion) -> Result<Thread> {
        let results = serde_json::to_string(&completion.results)?;
        let mut tx = self.pool.begin().await?;

        let finished = sqlx::query(
            r#"
            UPDATE threads
            SET status = ?1, error_message = ?2, results = ?3, end_time = ?4,
                execution_time = ?5, browser_id = NULL, updated_at = ?6
            WHERE id = ?7 AND status NOT IN (?8, ?9)
            RETURNING agent_id
            "#,
        )
        .bind(completion.status.as_str())
        .bind(&completion.error_message)
        .bind(results)
        .bind(completion.end_time.to_rfc3339())
        .bind(completion.execution_time)
        .bind(Utc::now().to_rfc3339())
        .bind(thread_id)
        .bind(ThreadStatus::Completed.as_str())
        .bind(ThreadStatus::Error.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = finished else {
            tx.rollback().await?;
            let thread = self.get_thread(thread_id).await?;
            return Err(StorageError::Conflict(format!(
                "thread {} is already {}",
                thread_id, thread.status
            )));
        };

        let agent_id: i64 = row.try_get("agent_id")?;
        apply_run(
            &mut tx,
            agent_id,
            completion.status == ThreadStatus::Completed,
            completion.execution_time.unwrap_or(0),
        )
        .await?;
        tx.commit().await?;

        self.get_thread(thread_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn store_with_agent() -> (SqliteThreadStore, Agent) {
        let store = SqliteThreadStore::in_memory()
            .await
            .expect("Failed to create in-memory store");
        let agent = store
            .create_agent(NewAgent {
                user_id: 1,
                preset_id: 1,
                name: "researcher".to_string(),
                description: None,
            })
            .await
            .unwrap();
        (store, agent)
    }

    #[tokio::test]
    async fn test_new_agent_has_zeroed_statistics() {
        let (_store, agent) = store_with_agent().await;

        assert_eq!(agent.name, "researcher");
        assert_eq!(agent.status, "idle");
        assert!(agent.is_active);
        assert_eq!(agent.total_runs, 0);
        assert_eq!(agent.total_runtime, 0);
    }

    #[tokio::test]
    async fn test_new_thread_starts_created() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();

        assert_eq!(thread.agent_id, agent.id);
        assert_eq!(thread.status, ThreadStatus::Created);
        assert_eq!(thread.browser_id, None);
        assert_eq!(thread.logs, json!([]));
        assert_eq!(thread.results, json!({}));
    }

    #[tokio::test]
    async fn test_create_thread_for_missing_agent() {
        let (store, _agent) = store_with_agent().await;
        let err = store.create_thread(999).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_running_only_from_created() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();
        let started = Utc::now();

        let running = store.mark_running(thread.id, "c1", started).await.unwrap();
        assert_eq!(running.status, ThreadStatus::Running);
        assert_eq!(running.browser_id.as_deref(), Some("c1"));
        assert_eq!(
            running.start_time.map(|t| t.timestamp()),
            Some(started.timestamp())
        );
        assert_eq!(store.count_running_threads(agent.id).await.unwrap(), 1);

        let err = store.mark_running(thread.id, "c2", started).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_mark_stopped_requires_matching_sandbox() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();
        store.mark_running(thread.id, "c1", Utc::now()).await.unwrap();

        assert!(!store
            .mark_stopped_if_running(thread.id, "other")
            .await
            .unwrap());
        assert!(store
            .mark_stopped_if_running(thread.id, "c1")
            .await
            .unwrap());

        let stopped = store.get_thread(thread.id).await.unwrap();
        assert_eq!(stopped.status, ThreadStatus::Stopped);
        assert_eq!(stopped.browser_id, None);

        // Already stopped
        assert!(!store.mark_stopped_if_running(thread.id, "c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_record_run_accumulates() {
        let (store, agent) = store_with_agent().await;

        store.record_run(agent.id, true, 30).await.unwrap();
        store.record_run(agent.id, false, 12).await.unwrap();
        store.record_run(agent.id, true, 0).await.unwrap();

        let agent = store.get_agent(agent.id).await.unwrap();
        assert_eq!(agent.total_runs, 3);
        assert_eq!(agent.successful_runs, 2);
        assert_eq!(agent.error_runs, 1);
        assert_eq!(agent.total_runtime, 42);
    }

    #[tokio::test]
    async fn test_complete_writes_outcome() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();
        let thread = store.mark_running(thread.id, "c1", Utc::now()).await.unwrap();

        let completion = ThreadCompletion::new(
            &thread,
            false,
            Some("navigation failed".to_string()),
            Some(json!({"pages": 3})),
            Utc::now(),
        );
        let done = store.complete(thread.id, &completion).await.unwrap();

        assert_eq!(done.status, ThreadStatus::Error);
        assert_eq!(done.error_message.as_deref(), Some("navigation failed"));
        assert_eq!(done.results, json!({"pages": 3}));
        assert_eq!(done.browser_id, None);
        assert!(done.end_time.is_some());
        assert_eq!(done.execution_time, completion.execution_time);

        let agent = store.get_agent(agent.id).await.unwrap();
        assert_eq!(agent.total_runs, 1);
        assert_eq!(agent.error_runs, 1);
    }

    #[tokio::test]
    async fn test_complete_rejects_finished_thread() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();
        let completion = ThreadCompletion::new(&thread, true, None, None, Utc::now());

        store.complete(thread.id, &completion).await.unwrap();
        let err = store.complete(thread.id, &completion).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // The rejected write left the statistics alone
        let agent = store.get_agent(agent.id).await.unwrap();
        assert_eq!(agent.total_runs, 1);
        assert_eq!(agent.successful_runs, 1);

        let err = store.complete(999, &completion).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_running_threads_spans_agents() {
        let (store, first) = store_with_agent().await;
        let second = store
            .create_agent(NewAgent {
                user_id: 2,
                preset_id: 1,
                name: "crawler".to_string(),
                description: None,
            })
            .await
            .unwrap();

        let a = store.create_thread(first.id).await.unwrap();
        let b = store.create_thread(second.id).await.unwrap();
        store.create_thread(second.id).await.unwrap();
        store.mark_running(a.id, "c1", Utc::now()).await.unwrap();
        store.mark_running(b.id, "c2", Utc::now()).await.unwrap();

        let ids: Vec<i64> = store
            .running_threads()
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![a.id, b.id]);
    }

    #[tokio::test]
    async fn test_delete_agent_removes_threads() {
        let (store, agent) = store_with_agent().await;
        let thread = store.create_thread(agent.id).await.unwrap();

        store.delete_agent(agent.id).await.unwrap();

        assert!(matches!(
            store.get_agent(agent.id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.get_thread(thread.id).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_agent(agent.id).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("threads.db").display());

        let agent_id = {
            let store = SqliteThreadStore::connect(&url).await.unwrap();
            let agent = store
                .create_agent(NewAgent {
                    user_id: 7,
                    preset_id: 2,
                    name: "crawler".to_string(),
                    description: Some("nightly crawl".to_string()),
                })
                .await
                .unwrap();
            store.pool().close().await;
            agent.id
        };

        let reopened = SqliteThreadStore::connect(&url).await.unwrap();
        let agent = reopened.get_agent(agent_id).await.unwrap();
        assert_eq!(agent.user_id, 7);
        assert_eq!(agent.description.as_deref(), Some("nightly crawl"));
    }
}
