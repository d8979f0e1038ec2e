use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::row::{Filter, OrderBy, Row, StoreError};

/// CRUD over logical "tables" keyed by name with opaque row maps. The core
/// depends on this trait, never on a concrete database crate, so Account
/// Pool / Route Table / Proxy Engine unit tests can run against
/// [`InMemoryRowStore`] without a running database.
///
/// Concrete production adapters (sea-orm against Postgres/SQLite, etc.) are
/// out of scope; [`InMemoryRowStore`] is the reference implementation this
/// workspace ships and runs against.
#[async_trait]
pub trait RowStore: Send + Sync {
    async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, StoreError>;

    async fn find_many(
        &self,
        table: &str,
        filter: &Filter,
        order: &[OrderBy],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Row>, StoreError>;

    async fn create(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Returns the number of rows patched.
    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, StoreError>;

    /// Returns the true number of rows deleted; implementers must not
    /// silently return 0 for unverified driver affected-row counts.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError>;

    async fn exists(&self, table: &str, filter: &Filter) -> Result<bool, StoreError> {
        Ok(self.count(table, filter).await? > 0)
    }
}

/// Single-process reference [`RowStore`]. Tables are created on first use;
/// rows are keyed by an autoincrementing `id` column unless the caller
/// already supplied one.
#[derive(Default)]
pub struct InMemoryRowStore {
    tables: Mutex<BTreeMap<String, Table>>,
}

#[derive(Default, Clone)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl InMemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `body` against a private copy of the store's tables and
    /// commits the copy back only if `body` succeeds, giving the
    /// all-or-nothing semantics a `transaction(fn)` call needs.
    pub async fn transaction<F, Fut, T>(&self, body: F) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<InMemoryRowStore>) -> Fut,
        Fut: std::future::Future<Output = Result<T, StoreError>>,
    {
        let snapshot = {
            let guard = self.tables.lock().await;
            guard.clone()
        };
        let scratch = Arc::new(InMemoryRowStore {
            tables: Mutex::new(snapshot),
        });
        match body(scratch.clone()).await {
            Ok(value) => {
                let committed = scratch.tables.lock().await.clone();
                *self.tables.lock().await = committed;
                Ok(value)
            }
            Err(err) => Err(StoreError::RolledBack(err.to_string())),
        }
    }
}

#[async_trait]
impl RowStore for InMemoryRowStore {
    async fn find_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, StoreError> {
        let guard = self.tables.lock().await;
        Ok(guard
            .get(table)
            .and_then(|t| t.rows.iter().find(|row| filter.matches(row)).cloned()))
    }

    async fn find_many(
        &self,
        table: &str,
        filter: &Filter,
        order: &[OrderBy],
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let guard = self.tables.lock().await;
        let Some(t) = guard.get(table) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<Row> = t.rows.iter().filter(|row| filter.matches(row)).cloned().collect();
        for clause in order.iter().rev() {
            matched.sort_by(|a, b| {
                let av = a.get(&clause.field);
                let bv = b.get(&clause.field);
                let ord = compare_values(av, bv);
                if clause.descending { ord.reverse() } else { ord }
            });
        }
        let start = offset.unwrap_or(0).min(matched.len());
        let mut slice = matched.split_off(start);
        if let Some(limit) = limit {
            slice.truncate(limit);
        }
        Ok(slice)
    }

    async fn create(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        let mut guard = self.tables.lock().await;
        let t = guard.entry(table.to_string()).or_default();
        if !row.contains_key("id") {
            t.next_id += 1;
            row.insert("id".to_string(), serde_json::json!(t.next_id));
        } else if let Some(id) = row.get("id").and_then(|v| v.as_i64())
            && id >= t.next_id
        {
            t.next_id = id + 1;
        }
        t.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, filter: &Filter, patch: Row) -> Result<u64, StoreError> {
        let mut guard = self.tables.lock().await;
        let Some(t) = guard.get_mut(table) else {
            return Ok(0);
        };
        let mut updated = 0u64;
        for row in t.rows.iter_mut() {
            if filter.matches(row) {
                for (k, v) in &patch {
                    row.insert(k.clone(), v.clone());
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let mut guard = self.tables.lock().await;
        let Some(t) = guard.get_mut(table) else {
            return Ok(0);
        };
        let before = t.rows.len();
        t.rows.retain(|row| !filter.matches(row));
        Ok((before - t.rows.len()) as u64)
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        let guard = self.tables.lock().await;
        Ok(guard
            .get(table)
            .map(|t| t.rows.iter().filter(|row| filter.matches(row)).count() as u64)
            .unwrap_or(0))
    }
}

fn compare_values(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> std::cmp::Ordering {
    match (a.and_then(|v| v.as_f64()), b.and_then(|v| v.as_f64())) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => match (a.and_then(|v| v.as_str()), b.and_then(|v| v.as_str())) {
            (Some(a), Some(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_assigns_autoincrementing_ids() {
        let store = InMemoryRowStore::new();
        let a = store.create("t", Row::new()).await.unwrap();
        let b = store.create("t", Row::new()).await.unwrap();
        assert_eq!(a["id"], serde_json::json!(1));
        assert_eq!(b["id"], serde_json::json!(2));
    }

    #[tokio::test]
    async fn delete_returns_true_affected_count() {
        let store = InMemoryRowStore::new();
        for _ in 0..3 {
            let mut row = Row::new();
            row.insert("owner".into(), serde_json::json!("a"));
            store.create("t", row).await.unwrap();
        }
        let mut row = Row::new();
        row.insert("owner".into(), serde_json::json!("b"));
        store.create("t", row).await.unwrap();

        let deleted = store
            .delete("t", &Filter::new().eq("owner", "a"))
            .await
            .unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.count("t", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_failure() {
        let store = InMemoryRowStore::new();
        store.create("t", Row::new()).await.unwrap();

        let result: Result<(), StoreError> = store
            .transaction(|scoped| async move {
                scoped.create("t", Row::new()).await?;
                Err(StoreError::Backend("boom".into()))
            })
            .await
            .map(|_| ());
        assert!(result.is_err());
        assert_eq!(store.count("t", &Filter::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let store = InMemoryRowStore::new();
        store
            .transaction(|scoped| async move {
                scoped.create("t", Row::new()).await?;
                scoped.create("t", Row::new()).await?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(store.count("t", &Filter::new()).await.unwrap(), 2);
    }
}
