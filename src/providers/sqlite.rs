use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::Mutex;
use tracing::debug;

use super::{InstanceInfo, InstanceStatus, Provider, ProviderError, filter_duplicates};
use crate::Event;

/// SQLite-backed provider with transactional appends.
///
/// Writes go through a single in-process lock so concurrent appends never
/// race to upgrade a read transaction; reads use the pool directly.
pub struct SqliteProvider {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteProvider {
    /// Convert sqlx error to ProviderError with appropriate retry classification
    fn sqlx_to_provider_error(operation: &str, e: sqlx::Error) -> ProviderError {
        let error_msg = e.to_string();

        if error_msg.contains("database is locked") || error_msg.contains("SQLITE_BUSY") {
            return ProviderError::retryable(operation, format!("Database locked: {error_msg}"));
        }

        if error_msg.contains("UNIQUE constraint") || error_msg.contains("PRIMARY KEY") {
            return ProviderError::permanent(operation, format!("Constraint violation: {error_msg}"));
        }

        if error_msg.contains("connection") || error_msg.contains("timeout") {
            return ProviderError::retryable(operation, format!("Connection error: {error_msg}"));
        }

        // Default: treat as retryable (conservative approach)
        ProviderError::retryable(operation, error_msg)
    }

    /// Open (or create) a database.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:data.db?mode=rwc" or "sqlite::memory:")
    ///
    /// # Errors
    ///
    /// Returns an error if database connection or schema initialization fails.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let mut options = SqlitePoolOptions::new();
        if is_memory {
            // A private in-memory database lives and dies with its one connection
            options = options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.max_connections(5);
        }
        let pool = options
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = OFF").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    }
                    sqlx::query("PRAGMA busy_timeout = 60000").execute(&mut *conn).await?;
                    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Self::create_schema(&pool).await?;
        debug!(target: "durable_fanout::providers", url = %database_url, "sqlite provider ready");

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    /// Convenience: a private in-memory store for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        Self::new("sqlite::memory:").await
    }

    async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                instance_id TEXT PRIMARY KEY,
                orchestration_name TEXT NOT NULL,
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                created_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history (
                instance_id TEXT NOT NULL REFERENCES instances(instance_id),
                event_index INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                PRIMARY KEY (instance_id, event_index)
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn read_history_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        instance: &str,
    ) -> Result<Vec<Event>, ProviderError> {
        let rows = sqlx::query("SELECT event_data FROM history WHERE instance_id = ? ORDER BY event_index")
            .bind(instance)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("append", e))?;
        Self::decode_rows(instance, rows)
    }

    fn decode_rows(instance: &str, rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Event>, ProviderError> {
        let mut events = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            let event_data: String = row
                .try_get("event_data")
                .map_err(|e| ProviderError::permanent("read", format!("Failed to get event_data: {e}")))?;
            let event: Event = serde_json::from_str(&event_data).map_err(|e| {
                ProviderError::permanent(
                    "read",
                    format!("Failed to deserialize history event at position {idx} for instance '{instance}': {e}"),
                )
            })?;
            events.push(event);
        }
        Ok(events)
    }

    fn row_to_info(row: &sqlx::sqlite::SqliteRow) -> Result<InstanceInfo, ProviderError> {
        let get_err = |e: sqlx::Error| ProviderError::permanent("get_instance", e.to_string());
        let status: String = row.try_get("status").map_err(get_err)?;
        let created: i64 = row.try_get("created_at_ms").map_err(get_err)?;
        Ok(InstanceInfo {
            instance_id: row.try_get("instance_id").map_err(get_err)?,
            orchestration: row.try_get("orchestration_name").map_err(get_err)?,
            status: InstanceStatus::parse(&status)
                .ok_or_else(|| ProviderError::permanent("get_instance", format!("unknown status '{status}'")))?,
            input: row.try_get("input").map_err(get_err)?,
            output: row.try_get("output").map_err(get_err)?,
            created_at_ms: created.max(0) as u64,
        })
    }
}

#[async_trait::async_trait]
impl Provider for SqliteProvider {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_instance(&self, info: InstanceInfo) -> Result<(), ProviderError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO instances (instance_id, orchestration_name, status, input, output, created_at_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&info.instance_id)
        .bind(&info.orchestration)
        .bind(info.status.as_str())
        .bind(&info.input)
        .bind(&info.output)
        .bind(info.created_at_ms as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Self::sqlx_to_provider_error("create_instance", e);
                if err.message.contains("UNIQUE constraint") || err.message.contains("PRIMARY KEY") {
                    Err(ProviderError::already_exists("create_instance", &info.instance_id))
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn get_instance(&self, instance: &str) -> Result<Option<InstanceInfo>, ProviderError> {
        let row = sqlx::query(
            r#"
            SELECT instance_id, orchestration_name, status, input, output, created_at_ms
            FROM instances WHERE instance_id = ?
            "#,
        )
        .bind(instance)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::sqlx_to_provider_error("get_instance", e))?;
        row.as_ref().map(Self::row_to_info).transpose()
    }

    async fn update_instance_status(
        &self,
        instance: &str,
        status: InstanceStatus,
        output: Option<String>,
    ) -> Result<(), ProviderError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE instances SET status = ?, output = ? WHERE instance_id = ?")
            .bind(status.as_str())
            .bind(output)
            .bind(instance)
            .execute(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("update_instance_status", e))?;
        if result.rows_affected() == 0 {
            return Err(ProviderError::not_found("update_instance_status", instance));
        }
        Ok(())
    }

    async fn list_instances(&self) -> Result<Vec<String>, ProviderError> {
        let rows = sqlx::query("SELECT instance_id FROM instances ORDER BY created_at_ms, rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("list_instances", e))?;
        rows.iter()
            .map(|r| {
                r.try_get::<String, _>("instance_id")
                    .map_err(|e| ProviderError::permanent("list_instances", e.to_string()))
            })
            .collect()
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>, ProviderError> {
        let rows = sqlx::query("SELECT event_data FROM history WHERE instance_id = ? ORDER BY event_index")
            .bind(instance)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("read", e))?;
        Self::decode_rows(instance, rows)
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), ProviderError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Self::sqlx_to_provider_error("append", e))?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM instances WHERE instance_id = ?")
            .bind(instance)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("append", e))?;
        if exists.is_none() {
            return Err(ProviderError::not_found("append", instance));
        }

        let existing = Self::read_history_in_tx(&mut tx, instance).await?;
        let kept = filter_duplicates(&existing, new_events);
        let mut next_index = existing.len() as i64;
        for event in &kept {
            let event_data =
                serde_json::to_string(event).map_err(|e| ProviderError::permanent("append", e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO history (instance_id, event_index, event_type, event_data)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(instance)
            .bind(next_index)
            .bind(event.kind_name())
            .bind(event_data)
            .execute(&mut *tx)
            .await
            .map_err(|e| Self::sqlx_to_provider_error("append", e))?;
            next_index += 1;
        }

        tx.commit()
            .await
            .map_err(|e| Self::sqlx_to_provider_error("append", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let td = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}?mode=rwc", td.path().join("hist.db").display());
        {
            let p = SqliteProvider::new(&url).await.unwrap();
            p.create_instance(InstanceInfo::new("i1", "O", "x")).await.unwrap();
            p.append(
                "i1",
                vec![Event::OrchestrationStarted {
                    name: "O".into(),
                    input: "x".into(),
                }],
            )
            .await
            .unwrap();
            p.get_pool().close().await;
        }
        let p = SqliteProvider::new(&url).await.unwrap();
        assert_eq!(p.read("i1").await.unwrap().len(), 1);
        assert_eq!(p.list_instances().await.unwrap(), vec!["i1".to_string()]);
    }

    #[tokio::test]
    async fn event_type_column_matches_tag() {
        let p = SqliteProvider::new_in_memory().await.unwrap();
        p.create_instance(InstanceInfo::new("i1", "O", "")).await.unwrap();
        p.append("i1", vec![Event::OrchestrationCompleted { output: "ok".into() }])
            .await
            .unwrap();
        let t: String = sqlx::query_scalar("SELECT event_type FROM history WHERE instance_id = 'i1'")
            .fetch_one(p.get_pool())
            .await
            .unwrap();
        assert_eq!(t, "OrchestrationCompleted");
    }

    #[tokio::test]
    async fn in_memory_stores_are_isolated() {
        let a = SqliteProvider::new_in_memory().await.unwrap();
        let b = SqliteProvider::new_in_memory().await.unwrap();
        a.create_instance(InstanceInfo::new("i1", "O", "")).await.unwrap();
        assert!(b.get_instance("i1").await.unwrap().is_none());
    }
}
