//! Embedded bucket store backed by SQLite.
//!
//! Every durable record in the server lives in a named bucket as an opaque
//! `key -> value` byte pair. SQLite in WAL mode gives us what we need from a
//! storage engine: a single serialized writer, consistent snapshot reads and
//! durable commits, all inside the server process.

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, Sqlite, Transaction};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, KvError>;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS buckets (
        name TEXT NOT NULL PRIMARY KEY
    )",
    "CREATE TABLE IF NOT EXISTS kv (
        bucket TEXT NOT NULL,
        key    BLOB NOT NULL,
        value  BLOB NOT NULL,
        PRIMARY KEY (bucket, key)
    )",
];

/// Handle to the embedded store. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct KvStore {
    pool: SqlitePool,
}

impl KvStore {
    /// Open (or create) the store at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        debug!(path = %path.display(), "opened kv store");
        Ok(Self { pool })
    }

    /// Register a bucket name. Idempotent; reads and writes do not require
    /// prior registration, the table exists so an operator can enumerate the
    /// buckets a database contains.
    pub async fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<()> {
        sqlx::query("INSERT INTO buckets (name) VALUES (?1) ON CONFLICT (name) DO NOTHING")
            .bind(bucket)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv WHERE bucket = ?1 AND key = ?2")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    pub async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete(&self, bucket: &str, key: &[u8]) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE bucket = ?1 AND key = ?2")
            .bind(bucket)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All pairs in a bucket, ordered by key bytes (cursor iteration order).
    pub async fn list(&self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key")
            .bind(bucket)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    /// Pairs whose key starts with `prefix`, ordered by key bytes.
    pub async fn scan_prefix(&self, bucket: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        // range scan on the primary key: prefix <= key < prefix+1
        let mut upper = prefix.to_vec();
        for i in (0..upper.len()).rev() {
            if upper[i] < 0xff {
                upper[i] += 1;
                upper.truncate(i + 1);
                break;
            }
            upper.truncate(i);
        }
        let rows = if upper.is_empty() {
            sqlx::query("SELECT key, value FROM kv WHERE bucket = ?1 AND key >= ?2 ORDER BY key")
                .bind(bucket)
                .bind(prefix)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query(
                "SELECT key, value FROM kv WHERE bucket = ?1 AND key >= ?2 AND key < ?3 ORDER BY key",
            )
            .bind(bucket)
            .bind(prefix)
            .bind(&upper)
            .fetch_all(&self.pool)
            .await?
        };
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    /// Begin an exclusive read-modify-write transaction. Dropping the value
    /// without `commit` rolls back.
    pub async fn begin(&self) -> Result<KvTransaction<'_>> {
        let tx = self.pool.begin().await?;
        Ok(KvTransaction { tx })
    }
}

/// A serializable write transaction over the store.
pub struct KvTransaction<'a> {
    tx: Transaction<'a, Sqlite>,
}

impl<'a> KvTransaction<'a> {
    pub async fn get(&mut self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM kv WHERE bucket = ?1 AND key = ?2")
            .bind(bucket)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>("value")))
    }

    pub async fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<()> {
        sqlx::query(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (bucket, key) DO UPDATE SET value = excluded.value",
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Insert only if the key is absent. Returns false when the key exists.
    pub async fn put_if_absent(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO kv (bucket, key, value) VALUES (?1, ?2, ?3) \
             ON CONFLICT (bucket, key) DO NOTHING",
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE bucket = ?1 AND key = ?2")
            .bind(bucket)
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn list(&mut self, bucket: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let rows = sqlx::query("SELECT key, value FROM kv WHERE bucket = ?1 ORDER BY key")
            .bind(bucket)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<Vec<u8>, _>("key"), r.get::<Vec<u8>, _>("value")))
            .collect())
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (KvStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open(&dir.path().join("kv.db")).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn put_get_delete_roundtrip() {
        let (store, _dir) = open_temp().await;
        store.create_bucket_if_not_exists("test").await.unwrap();

        assert!(store.get("test", b"k").await.unwrap().is_none());
        store.put("test", b"k", b"v1").await.unwrap();
        assert_eq!(store.get("test", b"k").await.unwrap().unwrap(), b"v1");

        store.put("test", b"k", b"v2").await.unwrap();
        assert_eq!(store.get("test", b"k").await.unwrap().unwrap(), b"v2");

        store.delete("test", b"k").await.unwrap();
        assert!(store.get("test", b"k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn buckets_are_isolated() {
        let (store, _dir) = open_temp().await;
        store.put("a", b"k", b"in-a").await.unwrap();
        store.put("b", b"k", b"in-b").await.unwrap();
        assert_eq!(store.get("a", b"k").await.unwrap().unwrap(), b"in-a");
        assert_eq!(store.get("b", b"k").await.unwrap().unwrap(), b"in-b");
    }

    #[tokio::test]
    async fn list_orders_by_key() {
        let (store, _dir) = open_temp().await;
        store.put("t", b"b", b"2").await.unwrap();
        store.put("t", b"a", b"1").await.unwrap();
        store.put("t", b"c", b"3").await.unwrap();
        let keys: Vec<Vec<u8>> = store.list("t").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn scan_prefix_bounds() {
        let (store, _dir) = open_temp().await;
        store.put("t", b"CK_one", b"1").await.unwrap();
        store.put("t", b"CK_two", b"2").await.unwrap();
        store.put("t", b"key", b"3").await.unwrap();
        let hits = store.scan_prefix("t", b"CK_").await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let (store, _dir) = open_temp().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.put("t", b"k", b"v").await.unwrap();
            // dropped without commit
        }
        assert!(store.get("t", b"k").await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        tx.put("t", b"k", b"v").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.get("t", b"k").await.unwrap().unwrap(), b"v");
    }

    #[tokio::test]
    async fn put_if_absent_detects_collisions() {
        let (store, _dir) = open_temp().await;
        let mut tx = store.begin().await.unwrap();
        assert!(tx.put_if_absent("t", b"k", b"v").await.unwrap());
        assert!(!tx.put_if_absent("t", b"k", b"other").await.unwrap());
        tx.commit().await.unwrap();
        assert_eq!(store.get("t", b"k").await.unwrap().unwrap(), b"v");
    }
}
