//! Translation: provider adapters, caches, and the cache-aside resolver.

pub mod cache;
pub mod deepl;
pub mod resolver;
pub mod sqlite_cache;

use async_trait::async_trait;
use serde::Serialize;

pub use cache::{CacheError, LruTranslationCache, TieredCache, TranslationCache};
pub use deepl::DeepLProvider;
pub use resolver::TranslationResolver;
pub use sqlite_cache::SqliteTranslationCache;

/// One word to translate.
#[derive(Debug, Clone, Serialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("translation timeout")]
    Timeout,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("provider returned no translation")]
    Empty,
}

/// Adapter for an external translation backend.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError>;

    /// Name used in logs.
    fn name(&self) -> &'static str;
}
