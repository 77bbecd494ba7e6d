//! L2 persistent translation cache backed by SQLite.
//! Same key as L1; every entry carries its own expiry.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::cache::{compute_key, CacheError, TranslationCache};
use crate::model::now_unix;

pub struct SqliteTranslationCache {
    conn: Mutex<Connection>,
}

impl SqliteTranslationCache {
    /// Open (or create) the SQLite cache database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let cache = Self::init(conn)?;
        info!(path = %db_path.display(), "SQLite L2 cache opened");
        Ok(cache)
    }

    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translation_cache (
                cache_key BLOB PRIMARY KEY,
                translated_text TEXT NOT NULL,
                word_id INTEGER NOT NULL,
                tgt_lang TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cache_expires
                ON translation_cache(expires_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Remove expired entries.
    pub fn cleanup_expired(&self) -> usize {
        let conn = self.conn.lock();
        match conn.execute(
            "DELETE FROM translation_cache WHERE expires_at <= ?1",
            params![now_unix()],
        ) {
            Ok(count) => {
                if count > 0 {
                    info!(removed = count, "L2 cache cleanup");
                }
                count
            }
            Err(e) => {
                warn!(error = %e, "L2 cache cleanup failed");
                0
            }
        }
    }

    /// Start a background cleanup loop on the current Tokio runtime.
    pub fn start_cleanup_loop(cache: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let cache = Arc::clone(&cache);
                if let Err(e) = tokio::task::spawn_blocking(move || cache.cleanup_expired()).await {
                    warn!(error = %e, "L2 cache cleanup task failed");
                }
            }
        })
    }
}

impl TranslationCache for SqliteTranslationCache {
    fn get(&self, word_id: i64, language: &str) -> Result<Option<String>, CacheError> {
        let key = compute_key(word_id, language);
        let conn = self.conn.lock();
        let result: Option<String> = conn
            .query_row(
                "SELECT translated_text FROM translation_cache
                 WHERE cache_key = ?1 AND expires_at > ?2",
                params![key.as_slice(), now_unix()],
                |row| row.get(0),
            )
            .optional()?;
        if result.is_some() {
            debug!(word_id, "L2 cache hit");
        }
        Ok(result)
    }

    fn put(&self, word_id: i64, language: &str, text: &str, ttl: Duration) -> Result<(), CacheError> {
        let key = compute_key(word_id, language);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO translation_cache
             (cache_key, translated_text, word_id, tgt_lang, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key.as_slice(),
                text,
                word_id,
                language.to_lowercase(),
                now_unix() + ttl.as_secs() as i64,
            ],
        )?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
