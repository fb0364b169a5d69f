//! SQLite-backed document store
//!
//! Durable local adapter for the [`DocumentStore`] contract. Documents are
//! stored as JSON rows keyed by (collection, id). Uses WAL mode for better
//! concurrency and crash safety. Change notification is in-process: every
//! committed write fans the collection contents out to live subscriptions.

use super::{
    resolve_timestamps, DocId, Document, DocumentStore, Fields, Filter, SubscriberSet,
    Subscription,
};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// SQLite-backed [`DocumentStore`].
pub struct SqliteStore {
    pool: SqlitePool,
    subs: SubscriberSet,
}

impl SqliteStore {
    /// Open (creating if missing) a database file and initialize the schema.
    pub async fn connect(db_path: &Path) -> Result<Self, StoreError> {
        tracing::info!("Opening document store at: {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Terminal(format!("failed to create data dir: {}", e)))?;
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))
                .map_err(map_sqlx)?
                .create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_sqlx)?;

        initialize_schema(&pool).await?;

        Ok(Self {
            pool,
            subs: SubscriberSet::new(),
        })
    }

    /// Ephemeral in-memory database, used by tests and the demo binary.
    ///
    /// A single connection is mandatory here: every SQLite `:memory:`
    /// connection gets its own private database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(map_sqlx)?;

        initialize_schema(&pool).await?;

        Ok(Self {
            pool,
            subs: SubscriberSet::new(),
        })
    }

    async fn snapshot(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query("SELECT id, fields FROM documents WHERE collection = ?")
            .bind(collection)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| {
                let id: String = row.get(0);
                let raw: String = row.get(1);
                Ok(Document {
                    id,
                    fields: parse_fields(&raw)?,
                })
            })
            .collect()
    }

    async fn notify(&self, collection: &str) -> Result<(), StoreError> {
        let docs = self.snapshot(collection).await?;
        self.subs.notify(collection, &docs);
        Ok(())
    }
}

async fn initialize_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            fields TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(map_sqlx)?;

    tracing::debug!("Document store schema initialized");
    Ok(())
}

fn parse_fields(raw: &str) -> Result<Fields, StoreError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Terminal("corrupt document: not an object".to_string())),
        Err(e) => Err(StoreError::Terminal(format!("corrupt document: {}", e))),
    }
}

/// Map driver errors onto the transient/terminal classification.
/// I/O and pool exhaustion are worth retrying; everything else is not.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => StoreError::Transient(err.to_string()),
        _ => StoreError::classify(err.to_string()),
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<DocId, StoreError> {
        resolve_timestamps(&mut fields);

        let id = Uuid::new_v4().to_string();
        let raw = serde_json::to_string(&fields)
            .map_err(|e| StoreError::Terminal(format!("unserializable fields: {}", e)))?;

        sqlx::query("INSERT INTO documents (collection, id, fields) VALUES (?, ?, ?)")
            .bind(collection)
            .bind(&id)
            .bind(&raw)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        self.notify(collection).await?;
        tracing::debug!(collection, id = %id, "sqlite store: created document");
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT fields FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        match row {
            Some(row) => {
                let raw: String = row.get(0);
                Ok(Some(Document {
                    id: id.to_string(),
                    fields: parse_fields(&raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, collection: &str, id: &str, mut partial: Fields) -> Result<(), StoreError> {
        resolve_timestamps(&mut partial);

        // Read-merge-write in one transaction so a concurrent update cannot
        // interleave between the read and the write.
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        let row = sqlx::query("SELECT fields FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let raw: String = match row {
            Some(row) => row.get(0),
            None => return Err(StoreError::Missing(id.to_string())),
        };

        let mut fields = parse_fields(&raw)?;
        fields.extend(partial);

        let merged = serde_json::to_string(&fields)
            .map_err(|e| StoreError::Terminal(format!("unserializable fields: {}", e)))?;

        sqlx::query("UPDATE documents SET fields = ? WHERE collection = ? AND id = ?")
            .bind(&merged)
            .bind(collection)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;

        self.notify(collection).await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        self.notify(collection).await?;
        tracing::debug!(collection, id, "sqlite store: deleted document");
        Ok(())
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, StoreError> {
        let docs = self.snapshot(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(doc)))
            .collect())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Subscription, StoreError> {
        let initial = self.snapshot(collection).await?;
        Ok(self.subs.register(collection, filters, &initial))
    }
}
