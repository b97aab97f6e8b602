//! Transactional data store exposed to handlers.
//!
//! Handlers never touch the backing store directly: all writes go through a
//! [`StoreTransaction`] scoped to the block range being dispatched. Writes
//! become visible to later reads in the same transaction (read-your-writes)
//! and hit the backing [`RowStore`] in a single atomic `apply` on commit —
//! a handler failing mid-range therefore leaves no partial state behind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the data store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key in '{table}': {id}")]
    DuplicateKey { table: String, id: String },

    #[error("row not found in '{table}': {id}")]
    NotFound { table: String, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Duplicate-key and not-found abort the range transaction, and the
    /// range retry is safe because handlers are upsert-idempotent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::NotFound { .. })
    }
}

/// A single staged write: the final state of one row.
#[derive(Debug, Clone)]
pub struct RowWrite {
    pub table: String,
    pub id: String,
    pub row: Value,
}

/// The backing-store seam. Backends (memory, …) live in `logforge-store`.
///
/// `apply` must be atomic: either every write in the batch lands or none do.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// All rows of a table as (id, row) pairs, ordered by id.
    async fn scan(&self, table: &str) -> Result<Vec<(String, Value)>, StoreError>;

    async fn apply(&self, writes: Vec<RowWrite>) -> Result<(), StoreError>;
}

/// A write overlay over a [`RowStore`], scoped to one block range.
pub struct StoreTransaction {
    base: Arc<dyn RowStore>,
    staged: HashMap<String, BTreeMap<String, Value>>,
}

impl StoreTransaction {
    pub fn new(base: Arc<dyn RowStore>) -> Self {
        Self {
            base,
            staged: HashMap::new(),
        }
    }

    fn staged_get(&self, table: &str, id: &str) -> Option<&Value> {
        self.staged.get(table).and_then(|t| t.get(id))
    }

    fn stage(&mut self, table: &str, id: &str, row: Value) {
        self.staged
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), row);
    }

    async fn exists(&self, table: &str, id: &str) -> Result<bool, StoreError> {
        if self.staged_get(table, id).is_some() {
            return Ok(true);
        }
        Ok(self.base.get(table, id).await?.is_some())
    }

    /// Insert a new row. Fails with [`StoreError::DuplicateKey`] if `id`
    /// already exists.
    pub async fn create(&mut self, table: &str, id: &str, data: Value) -> Result<(), StoreError> {
        if self.exists(table, id).await? {
            return Err(StoreError::DuplicateKey {
                table: table.into(),
                id: id.into(),
            });
        }
        self.stage(table, id, data);
        Ok(())
    }

    /// Merge `data` into an existing row. Fails with [`StoreError::NotFound`]
    /// if absent.
    pub async fn update(&mut self, table: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let current = match self.find_unique(table, id).await? {
            Some(row) => row,
            None => {
                return Err(StoreError::NotFound {
                    table: table.into(),
                    id: id.into(),
                })
            }
        };
        self.stage(table, id, merge(current, data));
        Ok(())
    }

    /// Create the row if absent, otherwise merge `update` into it. Never
    /// fails on existence — the idempotent-replay primitive.
    pub async fn upsert(
        &mut self,
        table: &str,
        id: &str,
        create: Value,
        update: Value,
    ) -> Result<(), StoreError> {
        match self.find_unique(table, id).await? {
            Some(current) => self.stage(table, id, merge(current, update)),
            None => self.stage(table, id, create),
        }
        Ok(())
    }

    /// Read one row, seeing this transaction's own staged writes.
    pub async fn find_unique(&self, table: &str, id: &str) -> Result<Option<Value>, StoreError> {
        if let Some(row) = self.staged_get(table, id) {
            return Ok(Some(row.clone()));
        }
        self.base.get(table, id).await
    }

    /// All rows of a table whose fields equal every (field, value) pair in
    /// `where_eq`, ordered by id. Staged writes shadow backing rows.
    pub async fn find_many(
        &self,
        table: &str,
        where_eq: &[(&str, Value)],
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let mut rows: BTreeMap<String, Value> =
            self.base.scan(table).await?.into_iter().collect();
        if let Some(staged) = self.staged.get(table) {
            for (id, row) in staged {
                rows.insert(id.clone(), row.clone());
            }
        }
        Ok(rows
            .into_iter()
            .filter(|(_, row)| {
                where_eq
                    .iter()
                    .all(|(field, value)| row.get(*field) == Some(value))
            })
            .collect())
    }

    /// Number of staged row writes.
    pub fn pending_writes(&self) -> usize {
        self.staged.values().map(BTreeMap::len).sum()
    }

    /// Apply every staged write to the backing store atomically.
    pub async fn commit(self) -> Result<(), StoreError> {
        let mut writes = Vec::with_capacity(self.pending_writes());
        for (table, rows) in self.staged {
            for (id, row) in rows {
                writes.push(RowWrite {
                    table: table.clone(),
                    id,
                    row,
                });
            }
        }
        self.base.apply(writes).await
    }

    /// Discard every staged write.
    pub fn rollback(self) {
        tracing::debug!(discarded = self.pending_writes(), "transaction rolled back");
    }
}

/// Shallow JSON-object merge; non-object updates replace the row wholesale.
fn merge(current: Value, update: Value) -> Value {
    match (current, update) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (k, v) in patch {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (_, update) => update,
    }
}
