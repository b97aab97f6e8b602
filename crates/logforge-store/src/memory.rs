//! In-memory storage backend.
//!
//! Holds business tables as id-keyed JSON documents in RAM. The `apply`
//! batch lands under a single lock, which is what makes a committed range
//! all-or-nothing. Useful for tests and short-lived indexers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use logforge_core::store::{RowStore, RowWrite, StoreError};

/// In-memory row store. All data is lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// A full copy of the store's contents, for snapshot comparison in tests.
    pub fn dump(&self) -> HashMap<String, BTreeMap<String, Value>> {
        self.tables.lock().unwrap().clone()
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn get(&self, table: &str, id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|t| t.get(id))
            .cloned())
    }

    async fn scan(&self, table: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn apply(&self, writes: Vec<RowWrite>) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        for w in writes {
            tables.entry(w.table).or_default().insert(w.id, w.row);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(table: &str, id: &str, row: Value) -> RowWrite {
        RowWrite {
            table: table.into(),
            id: id.into(),
            row,
        }
    }

    #[tokio::test]
    async fn apply_and_get() {
        let store = MemoryStore::new();
        store
            .apply(vec![
                write("polls", "p1", json!({"q": "?"})),
                write("polls", "p2", json!({"q": "!"})),
            ])
            .await
            .unwrap();

        assert_eq!(store.row_count("polls"), 2);
        assert_eq!(
            store.get("polls", "p1").await.unwrap().unwrap(),
            json!({"q": "?"})
        );
        assert!(store.get("polls", "missing").await.unwrap().is_none());
        assert!(store.get("markets", "p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_ordered_by_id() {
        let store = MemoryStore::new();
        store
            .apply(vec![
                write("trades", "z", json!(1)),
                write("trades", "a", json!(2)),
            ])
            .await
            .unwrap();
        let rows = store.scan("trades").await.unwrap();
        let ids: Vec<_> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z"]);
    }

    #[tokio::test]
    async fn apply_overwrites_rows() {
        let store = MemoryStore::new();
        store
            .apply(vec![write("users", "u1", json!({"n": 1}))])
            .await
            .unwrap();
        store
            .apply(vec![write("users", "u1", json!({"n": 2}))])
            .await
            .unwrap();
        assert_eq!(
            store.get("users", "u1").await.unwrap().unwrap(),
            json!({"n": 2})
        );
        assert_eq!(store.row_count("users"), 1);
    }
}
