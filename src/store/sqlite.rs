//! SQLite-backed [`DocumentStore`].
//!
//! Every collection shares one table. A row is identified by its
//! collection plus the canonical JSON of the upsert filter, and holds the
//! merged document as JSON text:
//!
//! ```sql
//! records(collection TEXT, natural_key TEXT, document TEXT,
//!         updated_at INTEGER, PRIMARY KEY (collection, natural_key))
//! ```
//!
//! An upsert is a single `INSERT ... ON CONFLICT DO UPDATE` that applies
//! the `$set` payload over the stored document with `json_set`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::DocumentStore;
use super::memory::canonical_key;
use crate::error::ExtractError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection  TEXT NOT NULL,
    natural_key TEXT NOT NULL,
    document    TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,
    PRIMARY KEY (collection, natural_key)
)
"#;

fn db_error(collection: &str, e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Persistence {
        collection: collection.to_string(),
        detail: e.to_string(),
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`, in WAL mode.
    pub async fn connect(path: &Path) -> Result<Self, ExtractError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ExtractError::io(parent, e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| db_error("records", e))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| db_error("records", e))?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the table if missing.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self, ExtractError> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| db_error("records", e))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Every document of `collection`, ordered by natural key.
    pub async fn records(&self, collection: &str) -> Result<Vec<Value>, ExtractError> {
        let rows = sqlx::query(
            "SELECT document FROM records WHERE collection = ? ORDER BY natural_key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(collection, e))?;

        rows.iter()
            .map(|row| {
                let text: String = row.get("document");
                serde_json::from_str(&text).map_err(|e| db_error(collection, e))
            })
            .collect()
    }

    /// The document stored under exactly `filter`, if any.
    pub async fn find(
        &self,
        collection: &str,
        filter: &Map<String, Value>,
    ) -> Result<Option<Value>, ExtractError> {
        let row = sqlx::query(
            "SELECT document FROM records WHERE collection = ? AND natural_key = ?",
        )
        .bind(collection)
        .bind(canonical_key(filter))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(collection, e))?;

        match row {
            Some(row) => {
                let text: String = row.get("document");
                serde_json::from_str(&text)
                    .map(Some)
                    .map_err(|e| db_error(collection, e))
            }
            None => Ok(None),
        }
    }
}

/// Conflict clause merging the `$set` payload over the stored document.
///
/// Each payload field becomes one `json_set` path/value pair, so top-level
/// fields are replaced wholesale and null values are kept, as in
/// [`super::MemoryStore`].
fn merge_clause(fields: usize) -> String {
    if fields == 0 {
        return "document = records.document".to_string();
    }
    let pairs = vec!["?, json(?)"; fields].join(", ");
    format!("document = json_set(records.document, {pairs})")
}

fn json_path(field: &str) -> String {
    format!("$.\"{field}\"")
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn upsert(
        &self,
        collection: &str,
        filter: Map<String, Value>,
        values: Map<String, Value>,
    ) -> Result<(), ExtractError> {
        let key = canonical_key(&filter);
        let mut document = filter;
        document.extend(values.clone());
        let text = Value::Object(document).to_string();

        // Single statement: the write lock is held before the stored row is
        // read, so concurrent writers wait on the busy timeout.
        let sql = format!(
            "INSERT INTO records (collection, natural_key, document, updated_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(collection, natural_key) DO UPDATE SET {}, \
             updated_at = excluded.updated_at",
            merge_clause(values.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(collection)
            .bind(&key)
            .bind(text)
            .bind(now_secs());
        for (field, value) in &values {
            query = query.bind(json_path(field)).bind(value.to_string());
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(collection, e))?;

        debug!("Upserted into {}", collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn upsert_merges_into_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("db/records.sqlite"))
            .await
            .unwrap();
        let filter = obj(json!({"zipcode": "78701"}));

        store
            .upsert("zipcodes", filter.clone(), obj(json!({"zipcode": "78701", "market": "Austin"})))
            .await
            .unwrap();
        store
            .upsert("zipcodes", filter.clone(), obj(json!({"submarket": "Downtown"})))
            .await
            .unwrap();

        let doc = store.find("zipcodes", &filter).await.unwrap().unwrap();
        assert_eq!(
            doc,
            json!({"zipcode": "78701", "market": "Austin", "submarket": "Downtown"})
        );
        assert_eq!(store.records("zipcodes").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upsert_keeps_null_fields_and_replaces_nested_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("records.sqlite"))
            .await
            .unwrap();
        let filter = obj(json!({"market": "Austin"}));
        let values = obj(json!({"rent": {"monthly": null, "change": "-1%"}, "text": null}));

        store.upsert("report", filter.clone(), values.clone()).await.unwrap();
        store.upsert("report", filter.clone(), values).await.unwrap();
        store
            .upsert("report", filter.clone(), obj(json!({"rent": {"monthly": "$1,650"}})))
            .await
            .unwrap();

        assert_eq!(
            store.find("report", &filter).await.unwrap().unwrap(),
            json!({"market": "Austin", "rent": {"monthly": "$1,650"}, "text": null})
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(
            SqliteStore::connect(&dir.path().join("records.sqlite"))
                .await
                .unwrap(),
        );

        let mut tasks = tokio::task::JoinSet::new();
        for writer in 0..4 {
            let store = Arc::clone(&store);
            tasks.spawn(async move {
                for round in 0..25 {
                    store
                        .upsert(
                            "zipcodes",
                            obj(json!({"zipcode": "78701"})),
                            obj(json!({"writer": writer, "round": round})),
                        )
                        .await?;
                    store
                        .upsert(
                            "zipcodes",
                            obj(json!({"zipcode": format!("9{writer}{round:03}")})),
                            obj(json!({"writer": writer})),
                        )
                        .await?;
                }
                Ok::<_, ExtractError>(())
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap().unwrap();
        }

        assert_eq!(store.records("zipcodes").await.unwrap().len(), 1 + 4 * 25);
        let shared = store
            .find("zipcodes", &obj(json!({"zipcode": "78701"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(shared["round"], json!(24));
    }

    #[tokio::test]
    async fn rows_survive_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.sqlite");
        {
            let store = SqliteStore::connect(&path).await.unwrap();
            store
                .upsert("report", obj(json!({"market": "Austin"})), obj(json!({"x": 1})))
                .await
                .unwrap();
            store.pool().close().await;
        }
        let store = SqliteStore::connect(&path).await.unwrap();
        assert_eq!(
            store.records("report").await.unwrap(),
            vec![json!({"market": "Austin", "x": 1})]
        );
        assert!(store.records("snapshots").await.unwrap().is_empty());
    }
}
