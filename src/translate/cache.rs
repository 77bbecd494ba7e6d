//! Translation caches.
//! Key: blake3 hash of `translation:{word_id}:{lowercase target language}`.
//! L1 is an in-memory LRU with per-entry TTL; L2 (see `sqlite_cache`) survives restarts.
//! All caches are best-effort: callers treat any [`CacheError`] as a miss.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait TranslationCache: Send + Sync {
    fn get(&self, word_id: i64, language: &str) -> Result<Option<String>, CacheError>;

    fn put(&self, word_id: i64, language: &str, text: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}

/// Compute the cache key for a (word, target language) pair.
pub fn compute_key(word_id: i64, language: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"translation:");
    hasher.update(word_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(language.to_lowercase().as_bytes());
    *hasher.finalize().as_bytes()
}

struct CacheEntry {
    translated_text: String,
    expires_at: Instant,
}

pub struct LruTranslationCache {
    inner: Mutex<LruCache<[u8; 32], CacheEntry>>,
}

impl LruTranslationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TranslationCache for LruTranslationCache {
    /// Returns None if absent or expired.
    fn get(&self, word_id: i64, language: &str) -> Result<Option<String>, CacheError> {
        let key = compute_key(word_id, language);
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get(&key) {
            if Instant::now() < entry.expires_at {
                return Ok(Some(entry.translated_text.clone()));
            }
            // Expired
            cache.pop(&key);
        }
        Ok(None)
    }

    fn put(&self, word_id: i64, language: &str, text: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut cache = self.inner.lock();
        cache.put(
            compute_key(word_id, language),
            CacheEntry {
                translated_text: text.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "lru"
    }
}

/// L1 in front of a slower shared L2. L2 hits are promoted into L1.
pub struct TieredCache {
    l1: LruTranslationCache,
    l2: Arc<dyn TranslationCache>,
    promote_ttl: Duration,
}

impl TieredCache {
    /// `promote_ttl` is the L1 lifetime given to entries found only in L2.
    pub fn new(l1: LruTranslationCache, l2: Arc<dyn TranslationCache>, promote_ttl: Duration) -> Self {
        Self { l1, l2, promote_ttl }
    }
}

impl TranslationCache for TieredCache {
    fn get(&self, word_id: i64, language: &str) -> Result<Option<String>, CacheError> {
        if let Some(hit) = self.l1.get(word_id, language)? {
            return Ok(Some(hit));
        }
        let hit = self.l2.get(word_id, language)?;
        if let Some(ref text) = hit {
            debug!(word_id, language, "L2 hit promoted to L1");
            self.l1.put(word_id, language, text, self.promote_ttl)?;
        }
        Ok(hit)
    }

    fn put(&self, word_id: i64, language: &str, text: &str, ttl: Duration) -> Result<(), CacheError> {
        self.l1.put(word_id, language, text, ttl)?;
        self.l2.put(word_id, language, text, ttl)
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}
