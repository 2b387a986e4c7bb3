//! Offline-first command queue persisted in SQLite.
//!
//! Commands issued while disconnected are parked here, one row per
//! idempotency key, and flushed in local creation order when connectivity
//! returns. The queue survives restarts: an optimistically applied command
//! is durable on the device even if the process dies before the flush.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use uuid::Uuid;

use navalha_core::DeviceId;

use crate::types::{CaixaCommand, CommandStatus, QueuedCommand};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("queue codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("queue path: {0}")]
    Path(String),

    #[error("corrupt queue row: {0}")]
    Corrupt(String),

    #[error("queued command not found: {0}")]
    Missing(Uuid),
}

/// SQLite-backed command queue.
///
/// Cheap to clone; safe to share across tasks.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    pool: SqlitePool,
}

impl CommandQueue {
    /// Open (or create) the queue database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| QueueError::Path(format!("{}: {e}", parent.display())))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS command_queue (
                id         TEXT PRIMARY KEY,
                device_id  TEXT NOT NULL,
                kind       TEXT NOT NULL,
                payload    TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL,
                synced_at  TEXT NULL,
                error      TEXT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Open the queue at the per-user default location
    /// (`{data_dir}/navalha/queue.db`).
    pub async fn open_default() -> Result<Self, QueueError> {
        Self::open(default_queue_path()?).await
    }

    /// Park a command. Keyed by the command's idempotency id, so a retried
    /// enqueue is a no-op that returns the already-stored row.
    pub async fn enqueue(
        &self,
        device_id: DeviceId,
        command: &CaixaCommand,
    ) -> Result<QueuedCommand, QueueError> {
        let id = command.idempotency_key();
        let payload = serde_json::to_value(command)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO command_queue
                (id, device_id, kind, payload, status, created_at, synced_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL)
            "#,
        )
        .bind(id.to_string())
        .bind(device_id.to_string())
        .bind(command.kind())
        .bind(payload.to_string())
        .bind(CommandStatus::Pending.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get(id).await?.ok_or(QueueError::Missing(id))
    }

    /// Fetch one queued command by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<QueuedCommand>, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT id, device_id, kind, payload, status, created_at, synced_at, error
            FROM command_queue
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_command).transpose()
    }

    /// Commands awaiting a flush for this device, in local creation order.
    ///
    /// Includes `syncing` rows: a crash mid-flush leaves them behind, and
    /// the idempotency keys make re-sending safe.
    pub async fn list_pending(&self, device_id: DeviceId) -> Result<Vec<QueuedCommand>, QueueError> {
        let rows = sqlx::query(
            r#"
            SELECT id, device_id, kind, payload, status, created_at, synced_at, error
            FROM command_queue
            WHERE device_id = ?1
              AND status IN ('pending', 'syncing')
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(device_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_command).collect()
    }

    pub async fn pending_count(&self, device_id: DeviceId) -> Result<usize, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM command_queue
            WHERE device_id = ?1
              AND status IN ('pending', 'syncing')
            "#,
        )
        .bind(device_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as usize)
    }

    pub async fn mark_syncing(&self, id: Uuid) -> Result<(), QueueError> {
        self.update_status(id, CommandStatus::Syncing, None, None)
            .await
    }

    pub async fn mark_synced(&self, id: Uuid) -> Result<(), QueueError> {
        self.update_status(id, CommandStatus::Synced, Some(Utc::now()), None)
            .await
    }

    /// Deterministic remote rejection: park the command as failed with the
    /// reason. Failed commands are never retried automatically; the
    /// correction is a compensating entry.
    pub async fn mark_failed(&self, id: Uuid, error: String) -> Result<(), QueueError> {
        self.update_status(id, CommandStatus::Failed, None, Some(error))
            .await
    }

    /// Transient transport failure: put the command back in line.
    pub async fn requeue(&self, id: Uuid) -> Result<(), QueueError> {
        self.update_status(id, CommandStatus::Pending, None, None)
            .await
    }

    /// Drop synced rows older than `age`. Returns how many were removed.
    pub async fn clear_synced_older_than(&self, age: Duration) -> Result<u64, QueueError> {
        let cutoff = (Utc::now() - age).to_rfc3339();

        let result = sqlx::query(
            r#"
            DELETE FROM command_queue
            WHERE status = 'synced'
              AND synced_at IS NOT NULL
              AND synced_at < ?1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: CommandStatus,
        synced_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE command_queue
            SET status = ?2,
                synced_at = ?3,
                error = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(synced_at.map(|dt| dt.to_rfc3339()))
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_command(row: sqlx::sqlite::SqliteRow) -> Result<QueuedCommand, QueueError> {
    let id_str: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| QueueError::Corrupt(format!("command_queue.id: {e}")))?;

    let device_str: String = row.try_get("device_id")?;
    let device_id = Uuid::parse_str(&device_str)
        .map(DeviceId::from_uuid)
        .map_err(|e| QueueError::Corrupt(format!("command_queue.device_id: {e}")))?;

    let kind: String = row.try_get("kind")?;

    let payload_str: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload_str)?;

    let status_str: String = row.try_get("status")?;
    let status = CommandStatus::parse(&status_str)
        .ok_or_else(|| QueueError::Corrupt(format!("unknown status '{status_str}'")))?;

    let created_at_str: String = row.try_get("created_at")?;
    let created_at = parse_rfc3339(&created_at_str, "created_at")?;

    let synced_at = row
        .try_get::<Option<String>, _>("synced_at")?
        .map(|s| parse_rfc3339(&s, "synced_at"))
        .transpose()?;

    let error: Option<String> = row.try_get("error")?;

    Ok(QueuedCommand {
        id,
        device_id,
        kind,
        payload,
        status,
        created_at,
        synced_at,
        error,
    })
}

fn parse_rfc3339(s: &str, column: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Corrupt(format!("command_queue.{column}: {e}")))
}

/// Resolve the per-user queue database location.
fn default_queue_path() -> Result<PathBuf, QueueError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or_else(|| QueueError::Path("no OS data directory".to_string()))?;

    Ok(base.join("navalha").join("queue.db"))
}
