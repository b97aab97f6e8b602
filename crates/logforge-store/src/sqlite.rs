//! SQLite checkpoint persistence.
//!
//! Persists one `ChainState` row per chain to a single SQLite file. Uses
//! `sqlx` with WAL mode; the save is an `INSERT OR REPLACE`, making it an
//! atomic upsert.
//!
//! # Usage
//! ```rust,no_run
//! use logforge_store::sqlite::SqliteCheckpointStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCheckpointStore::open("./logforge.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCheckpointStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use logforge_core::checkpoint::{ChainState, CheckpointStore};
use logforge_core::store::StoreError;

/// SQLite-backed checkpoint store.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./logforge.db"`) or a full
    /// SQLite URL (`"sqlite:./logforge.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database. All data is lost when the pool is
    /// dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chain_states (
                chain_id     INTEGER PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_hash   TEXT    NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, chain_id: u64) -> Result<Option<ChainState>, StoreError> {
        let row = sqlx::query(
            "SELECT chain_id, block_number, block_hash, updated_at
             FROM chain_states WHERE chain_id = ?",
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(|r| ChainState {
            chain_id: r.get::<i64, _>("chain_id") as u64,
            block_number: r.get::<i64, _>("block_number") as u64,
            block_hash: r.get("block_hash"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, state: ChainState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO chain_states
             (chain_id, block_number, block_hash, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(state.chain_id as i64)
        .bind(state.block_number as i64)
        .bind(&state.block_hash)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        debug!(
            chain_id = state.chain_id,
            block = state.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM chain_states WHERE chain_id = ?")
            .bind(chain_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_roundtrip() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();

        let state = ChainState {
            chain_id: 137,
            block_number: 1_000,
            block_hash: "0xabcdef".into(),
            updated_at: 1_700_000_000,
        };
        store.save(state).await.unwrap();

        let loaded = store.load(137).await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 1_000);
        assert_eq!(loaded.block_hash, "0xabcdef");
        assert_eq!(loaded.updated_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();

        store.save(ChainState::new(1, 100, "0xold")).await.unwrap();
        store.save(ChainState::new(1, 200, "0xnew")).await.unwrap();

        let loaded = store.load(1).await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);
        assert_eq!(loaded.block_hash, "0xnew");
    }

    #[tokio::test]
    async fn missing_chain_returns_none() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();
        assert!(store.load(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_resets_chain() {
        let store = SqliteCheckpointStore::in_memory().await.unwrap();

        store.save(ChainState::new(1, 500, "0xdef")).await.unwrap();
        store.save(ChainState::new(137, 900, "0xpol")).await.unwrap();

        store.delete(1).await.unwrap();
        assert!(store.load(1).await.unwrap().is_none());
        assert!(store.load(137).await.unwrap().is_some());
    }
}
