//! SQLite workspace state (feature-gated).

use agent_dispatch_core::{StorageError, WorkspaceStore};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

fn db_error(e: sqlx::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// SQLite storage implementation.
#[derive(Debug, Clone)]
pub struct SqliteWorkspaceStore {
    pool: SqlitePool,
}

impl SqliteWorkspaceStore {
    /// Connect to `database_url`, creating the database and schema if needed.
    ///
    /// # Errors
    /// Returns error if database connection or schema creation fails.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_error)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_error)?;
        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    ///
    /// # Errors
    /// Returns error if schema creation fails.
    pub async fn new(pool: SqlitePool) -> Result<Self, StorageError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workspace_state (
                workspace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (workspace, key)
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_error)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl WorkspaceStore for SqliteWorkspaceStore {
    async fn get(&self, workspace: &str, key: &str) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar::<_, String>(
            "SELECT value FROM workspace_state WHERE workspace = ? AND key = ?",
        )
        .bind(workspace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn set(&self, workspace: &str, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO workspace_state (workspace, key, value) VALUES (?, ?, ?)
             ON CONFLICT (workspace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(workspace)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn remove(&self, workspace: &str, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM workspace_state WHERE workspace = ? AND key = ?")
            .bind(workspace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_remove() {
        let store = SqliteWorkspaceStore::connect("sqlite::memory:").await.unwrap();
        store.set("ws", "session_id", "s-1").await.unwrap();
        store.set("ws", "session_id", "s-2").await.unwrap();
        assert_eq!(store.get("ws", "session_id").await.unwrap().as_deref(), Some("s-2"));

        store.remove("ws", "session_id").await.unwrap();
        assert_eq!(store.get("ws", "session_id").await.unwrap(), None);
    }
}
