use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pc_common::{NewQueueItem, QueueFilter, QueueItem, QueueStats, QueueStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::repository::QueueRepository;

/// Schema version recorded in `PRAGMA user_version`. Bump when the table changes.
pub const SCHEMA_VERSION: i64 = 1;

/// Ordered migrations; entry N upgrades the schema from version N to N + 1.
const MIGRATIONS: &[&[&str]] = &[&[
    r#"
    CREATE TABLE IF NOT EXISTS autos_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        endpoint TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        priority INTEGER NOT NULL DEFAULT 0,
        metadata TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_autos_queue_status ON autos_queue(status)",
    "CREATE INDEX IF NOT EXISTS idx_autos_queue_endpoint ON autos_queue(endpoint)",
]];

const COLUMNS: &str = "id, endpoint, payload, status, created_at, updated_at, retry_count, last_error, priority, metadata";

pub struct SqliteQueueRepository {
    pool: SqlitePool,
    max_items: Option<u64>,
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, max_items: None }
    }

    /// Open (creating if needed) a file-backed queue and bring its schema up to date.
    pub async fn open(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let repo = Self::new(pool);
        repo.init_schema().await?;
        info!("Opened offline queue store at {}", url);
        Ok(repo)
    }

    /// Private in-memory queue. A single connection that never expires keeps the data alive.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let repo = Self::new(pool);
        repo.init_schema().await?;
        Ok(repo)
    }

    /// Reject inserts once the queue holds `max_items` rows.
    pub fn with_max_items(mut self, max_items: Option<u64>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn schema_version(&self) -> StoreResult<i64> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version)
    }

    pub async fn init_schema(&self) -> StoreResult<()> {
        let current = self.schema_version().await?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        for (index, statements) in MIGRATIONS.iter().enumerate().skip(current as usize) {
            let version = index as i64 + 1;
            let mut tx = self.pool.begin().await?;
            for statement in statements.iter() {
                sqlx::query(statement).execute(&mut *tx).await?;
            }
            let pragma = format!("PRAGMA user_version = {}", version);
            sqlx::query(&pragma).execute(&mut *tx).await?;
            tx.commit().await?;
            debug!("Migrated offline queue schema to version {}", version);
        }
        Ok(())
    }
}

fn row_to_item(row: &SqliteRow) -> StoreResult<QueueItem> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |message: String| StoreError::Corrupt { id, message };

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<QueueStatus>()
        .map_err(|e| corrupt(e.to_string()))?;

    let payload: String = row.try_get("payload")?;
    let payload = serde_json::from_str(&payload).map_err(|e| corrupt(e.to_string()))?;

    let metadata: Option<String> = row.try_get("metadata")?;
    let metadata = metadata
        .map(|m| serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&m))
        .transpose()
        .map_err(|e| corrupt(e.to_string()))?;

    let created_at = millis_to_datetime(row.try_get("created_at")?)
        .ok_or_else(|| corrupt("invalid created_at".to_string()))?;
    let updated_at = millis_to_datetime(row.try_get("updated_at")?)
        .ok_or_else(|| corrupt("invalid updated_at".to_string()))?;

    let retry_count: i64 = row.try_get("retry_count")?;
    let priority: i64 = row.try_get("priority")?;

    Ok(QueueItem {
        id,
        endpoint: row.try_get("endpoint")?,
        payload,
        status,
        created_at,
        updated_at,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        last_error: row.try_get("last_error")?,
        priority: i32::try_from(priority).unwrap_or_default(),
        metadata,
    })
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn insert(&self, item: NewQueueItem) -> StoreResult<i64> {
        if let Some(max) = self.max_items {
            let count = self.count().await?;
            if count >= max {
                return Err(StoreError::QuotaExceeded(format!(
                    "queue holds {} items (limit {})",
                    count, max
                )));
            }
        }

        let payload = serde_json::to_string(&item.payload)?;
        let metadata = item.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let now = now_millis();

        let result = sqlx::query(
            "INSERT INTO autos_queue (endpoint, payload, status, created_at, updated_at, retry_count, last_error, priority, metadata) VALUES (?, ?, 'pending', ?, ?, 0, NULL, ?, ?)"
        )
        .bind(&item.endpoint)
        .bind(payload)
        .bind(now)
        .bind(now)
        .bind(item.priority)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn get(&self, id: i64) -> StoreResult<Option<QueueItem>> {
        let query = format!("SELECT {} FROM autos_queue WHERE id = ?", COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_item).transpose()
    }

    async fn fetch_eligible(&self, max_attempts: u32) -> StoreResult<Vec<QueueItem>> {
        let query = format!(
            "SELECT {} FROM autos_queue WHERE status IN ('pending', 'failed') AND retry_count < ? ORDER BY created_at, id",
            COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(i64::from(max_attempts))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn claim(&self, id: i64, max_attempts: u32) -> StoreResult<Option<u32>> {
        let retry_count: Option<i64> = sqlx::query_scalar(
            "UPDATE autos_queue SET status = 'processing', updated_at = ? WHERE id = ? AND status IN ('pending', 'failed') AND retry_count < ? RETURNING retry_count"
        )
        .bind(now_millis())
        .bind(id)
        .bind(i64::from(max_attempts))
        .fetch_optional(&self.pool)
        .await?;
        Ok(retry_count.map(|count| u32::try_from(count).unwrap_or(u32::MAX)))
    }

    async fn touch(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE autos_queue SET updated_at = ? WHERE id = ? AND status = 'processing'"
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, id: i64, error: &str) -> StoreResult<u32> {
        let retry_count: Option<i64> = sqlx::query_scalar(
            "UPDATE autos_queue SET retry_count = retry_count + 1, last_error = ?, updated_at = ? WHERE id = ? RETURNING retry_count"
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let retry_count = retry_count.ok_or(StoreError::NotFound(id))?;
        Ok(u32::try_from(retry_count).unwrap_or(u32::MAX))
    }

    async fn mark_completed(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE autos_queue SET status = 'completed', last_error = NULL, updated_at = ? WHERE id = ?"
        )
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE autos_queue SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?"
        )
        .bind(error)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn recover_stuck(&self, older_than: Duration) -> StoreResult<u64> {
        let cutoff = now_millis() - i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            r#"
            UPDATE autos_queue
            SET status = CASE WHEN retry_count > 0 THEN 'failed' ELSE 'pending' END,
                updated_at = ?
            WHERE status = 'processing'
            AND updated_at < ?
            "#
        )
        .bind(now_millis())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!("Recovered {} stuck offline queue items", recovered);
        }
        Ok(recovered)
    }

    async fn requeue(&self, id: i64) -> StoreResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO autos_queue (endpoint, payload, status, created_at, updated_at, retry_count, last_error, priority, metadata)
            SELECT endpoint, payload, 'pending', created_at, ?, 0, NULL, priority, metadata
            FROM autos_queue
            WHERE id = ? AND status = 'failed'
            "#
        )
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let new_id = inserted.last_insert_rowid();

        sqlx::query("DELETE FROM autos_queue WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(new_id))
    }

    async fn list(&self, filter: &QueueFilter) -> StoreResult<Vec<QueueItem>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM autos_queue WHERE 1 = 1", COLUMNS));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(endpoint) = &filter.endpoint {
            builder.push(" AND endpoint = ").push_bind(endpoint.clone());
        }
        builder.push(" ORDER BY created_at, id");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn stats(&self, max_attempts: u32) -> StoreResult<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM autos_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = u64::try_from(count).unwrap_or_default();
            match status.parse::<QueueStatus>() {
                Ok(QueueStatus::Pending) => stats.pending = count,
                Ok(QueueStatus::Processing) => stats.processing = count,
                Ok(QueueStatus::Failed) => stats.failed = count,
                Ok(QueueStatus::Completed) => stats.completed = count,
                Err(_) => debug!("Ignoring unknown queue status '{}' in stats", status),
            }
            stats.total += count;
        }

        let exhausted: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM autos_queue WHERE status = 'failed' AND retry_count >= ?"
        )
        .bind(i64::from(max_attempts))
        .fetch_one(&self.pool)
        .await?;
        stats.exhausted = u64::try_from(exhausted).unwrap_or_default();

        let oldest: Option<i64> = sqlx::query_scalar(
            "SELECT MIN(created_at) FROM autos_queue WHERE status = 'pending'"
        )
        .fetch_one(&self.pool)
        .await?;
        stats.oldest_pending_date = oldest.and_then(millis_to_datetime);

        Ok(stats)
    }

    async fn delete_completed_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM autos_queue WHERE status = 'completed' AND updated_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear(&self, status: Option<QueueStatus>) -> StoreResult<u64> {
        let result = match status {
            Some(status) => {
                sqlx::query("DELETE FROM autos_queue WHERE status = ?")
                    .bind(status.as_str())
                    .execute(&self.pool)
                    .await?
            }
            None => sqlx::query("DELETE FROM autos_queue").execute(&self.pool).await?,
        };
        Ok(result.rows_affected())
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM autos_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
