//! Cache-aside resolution of a word's meaning in another language.
//!
//! Order: cache → sibling rows of the same concept → external provider (persisted as a
//! new primary row). Cache trouble is logged and treated as a miss; provider trouble
//! propagates unchanged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::{TranslateError, TranslateRequest, TranslationCache, TranslationProvider};
use crate::cancellation::RequestContext;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::model::NewWord;
use crate::store::{StoreError, WordStore};

/// Default lifetime of a cached translation.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

type InflightKey = (i64, String);

/// Per-(word, language) async locks so one process asks the provider at most once for a
/// missing pair. Entries are dropped once nobody holds them.
#[derive(Default)]
struct Inflight {
    locks: Mutex<HashMap<InflightKey, Arc<AsyncMutex<()>>>>,
}

struct InflightSlot<'a> {
    owner: &'a Inflight,
    key: InflightKey,
    handle: Arc<AsyncMutex<()>>,
}

impl Inflight {
    fn slot(&self, word_id: i64, language: &str) -> InflightSlot<'_> {
        let key = (word_id, language.to_string());
        let handle = Arc::clone(self.locks.lock().entry(key.clone()).or_default());
        InflightSlot {
            owner: self,
            key,
            handle,
        }
    }
}

impl Drop for InflightSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.locks.lock();
        // Only the map and this slot still reference the lock.
        if Arc::strong_count(&self.handle) <= 2 {
            locks.remove(&self.key);
        }
    }
}

pub struct TranslationResolver {
    words: Arc<dyn WordStore>,
    cache: Arc<dyn TranslationCache>,
    provider: Arc<dyn TranslationProvider>,
    metrics: Arc<MetricsRegistry>,
    cache_ttl: Duration,
    inflight: Inflight,
}

impl TranslationResolver {
    pub fn new(
        words: Arc<dyn WordStore>,
        cache: Arc<dyn TranslationCache>,
        provider: Arc<dyn TranslationProvider>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            words,
            cache,
            provider,
            metrics,
            cache_ttl: DEFAULT_CACHE_TTL,
            inflight: Inflight::default(),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Meaning of `word_id` in `target_language`.
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        word_id: i64,
        target_language: &str,
    ) -> QuizResult<String> {
        let language = target_language.trim().to_lowercase();
        if language.is_empty() {
            return Err(QuizError::Validation("target language is required".into()));
        }

        let span = self.metrics.span(metric_names::RESOLVE);
        let result = self.resolve_inner(ctx, word_id, &language).await;
        span.finish();
        result
    }

    async fn resolve_inner(
        &self,
        ctx: &RequestContext,
        word_id: i64,
        language: &str,
    ) -> QuizResult<String> {
        if let Some(text) = self.lookup_local(ctx, word_id, language)? {
            return Ok(text);
        }

        let slot = self.inflight.slot(word_id, language);
        let handle = Arc::clone(&slot.handle);
        let _turn = ctx.run(async move { Ok(handle.lock_owned().await) }).await?;

        // Whoever held the lock before us may have filled the gap.
        if let Some(text) = self.lookup_local(ctx, word_id, language)? {
            return Ok(text);
        }

        self.translate_and_store(ctx, word_id, language).await
    }

    /// Steps 1 and 2: cache, then sibling rows of the same concept.
    fn lookup_local(
        &self,
        ctx: &RequestContext,
        word_id: i64,
        language: &str,
    ) -> QuizResult<Option<String>> {
        if let Some(text) = self.cache_get(word_id, language) {
            self.metrics.incr(metric_names::CACHE_HIT);
            return Ok(Some(text));
        }
        self.metrics.incr(metric_names::CACHE_MISS);

        ctx.ensure_active()?;
        match self.words.sibling_text(word_id, language)? {
            Some(text) if !text.is_empty() => {
                self.metrics.incr(metric_names::STORE_HIT);
                self.cache_put(word_id, language, &text);
                Ok(Some(text))
            }
            _ => Ok(None),
        }
    }

    /// Step 3: ask the provider and persist the answer as a new primary row.
    async fn translate_and_store(
        &self,
        ctx: &RequestContext,
        word_id: i64,
        language: &str,
    ) -> QuizResult<String> {
        ctx.ensure_active()?;
        let source = self
            .words
            .word(word_id)?
            .ok_or(QuizError::SourceWordNotFound(word_id))?;

        let request = TranslateRequest {
            text: source.text.clone(),
            source_lang: source.language_code.clone(),
            target_lang: language.to_string(),
        };
        let span = self.metrics.span(metric_names::PROVIDER_CALL);
        let provider = Arc::clone(&self.provider);
        let translated = ctx
            .run(async move {
                provider
                    .translate(&request)
                    .await
                    .map_err(QuizError::Provider)
            })
            .await;
        span.finish();
        let translated = match translated {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(word_id, language, provider = self.provider.name(), error = %e, "translation failed");
                return Err(e);
            }
        };
        if translated.is_empty() {
            return Err(QuizError::Provider(TranslateError::Empty));
        }

        ctx.ensure_active()?;
        let new_word = NewWord {
            concept_id: source.concept_id,
            language_code: language.to_string(),
            text: translated.clone(),
            difficulty: source.difficulty.clone(),
            is_primary: true,
        };
        let text = match self.words.insert_word(&new_word) {
            Ok(new_id) => {
                info!(word_id, new_id, language, "stored provider translation");
                translated
            }
            Err(StoreError::Conflict) => {
                // Someone else stored this exact row first; use what is there now.
                self.metrics.incr(metric_names::PROVIDER_INSERT_CONFLICT);
                debug!(word_id, language, "translation insert raced, re-reading");
                self.words
                    .concept_text(source.concept_id, language)?
                    .ok_or(StoreError::Conflict)?
            }
            Err(e) => return Err(e.into()),
        };

        self.cache_put(word_id, language, &text);
        Ok(text)
    }

    fn cache_get(&self, word_id: i64, language: &str) -> Option<String> {
        match self.cache.get(word_id, language) {
            Ok(hit) => hit,
            Err(e) => {
                self.metrics.incr(metric_names::CACHE_ERROR);
                warn!(cache = self.cache.name(), error = %e, "cache read failed, using store");
                None
            }
        }
    }

    fn cache_put(&self, word_id: i64, language: &str, text: &str) {
        if let Err(e) = self.cache.put(word_id, language, text, self.cache_ttl) {
            self.metrics.incr(metric_names::CACHE_ERROR);
            warn!(cache = self.cache.name(), error = %e, "cache write failed");
        }
    }
}
