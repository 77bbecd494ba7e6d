//! Random word pages over a (language, difficulty) universe.
//!
//! The cursor carries a seed and an offset into the seeded permutation of ranks, so paging
//! forward walks the whole universe once, without repeats, before the cycle starts again.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::cancellation::RequestContext;
use crate::cursor::{CursorCodec, CursorState};
use crate::error::{QuizError, QuizResult};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::model::Word;
use crate::sampler::PermutationSampler;
use crate::store::CatalogStore;

pub const DEFAULT_MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub count: usize,
    pub language: String,
    pub difficulty: String,
    /// Token from the previous page, if any.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WordPage {
    pub words: Vec<Word>,
    pub next_cursor: String,
}

pub struct WordCatalog {
    store: Arc<dyn CatalogStore>,
    cursors: CursorCodec,
    max_page_size: usize,
    metrics: Arc<MetricsRegistry>,
}

impl WordCatalog {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        cursors: CursorCodec,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            cursors,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            metrics,
        }
    }

    pub fn with_max_page_size(mut self, max: usize) -> Self {
        self.max_page_size = max.max(1);
        self
    }

    pub async fn random_page(&self, ctx: &RequestContext, req: PageRequest) -> QuizResult<WordPage> {
        let span = self.metrics.span(metric_names::PAGE_FETCH);
        let result = self.page(ctx, req);
        span.finish();
        result
    }

    fn page(&self, ctx: &RequestContext, req: PageRequest) -> QuizResult<WordPage> {
        if req.count == 0 || req.count > self.max_page_size {
            return Err(QuizError::Validation(format!(
                "count must be between 1 and {}",
                self.max_page_size
            )));
        }
        let language = req.language.trim().to_lowercase();
        let difficulty = req.difficulty.trim().to_string();
        if language.is_empty() || difficulty.is_empty() {
            return Err(QuizError::Validation(
                "language and difficulty are required".into(),
            ));
        }
        let no_words = || QuizError::NoWordsAvailable {
            language: language.clone(),
            difficulty: difficulty.clone(),
        };

        ctx.ensure_active()?;
        let n = self.store.partition_size(&language, &difficulty)?;
        let state = self.cursors.decode(req.cursor.as_deref());
        let sampler = PermutationSampler::new(state.seed, n).map_err(|_| no_words())?;
        // A page stops at the end of the current cycle; the next page starts the repeat.
        let left_in_cycle = n - state.offset % n;
        let take = usize::try_from(left_in_cycle).map_or(req.count, |left| req.count.min(left));
        let ranks = sampler.range(state.offset, take);

        ctx.ensure_active()?;
        let mut found = self.store.words_at_ranks(&language, &difficulty, &ranks)?;
        // Restore permutation order; ranks are distinct within a page.
        found.sort_by_key(|(rank, _)| ranks.iter().position(|r| r == rank));
        let words: Vec<Word> = found.into_iter().map(|(_, word)| word).collect();

        if words.is_empty() {
            info!(%language, %difficulty, offset = state.offset, "no resolvable ranks for page");
            return Err(no_words());
        }
        if words.len() < ranks.len() {
            self.metrics.incr(metric_names::CURSOR_PARTIAL_PAGE);
            debug!(
                requested = ranks.len(),
                found = words.len(),
                "partial page, universe index is stale"
            );
        }

        let next = CursorState {
            seed: state.seed,
            offset: state.offset.saturating_add(words.len() as u64),
        };
        let next_cursor = self.cursors.encode(next)?;
        Ok(WordPage { words, next_cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::SeedSource;
    use crate::error::ErrorKind;
    use crate::model::NewWord;
    use crate::store::{MemoryStore, WordStore};
    use std::collections::HashSet;
    use std::time::Duration;
    use uuid::Uuid;

    fn seeded_store(words: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for text in words {
            store
                .insert_word(&NewWord {
                    concept_id: Uuid::new_v4(),
                    language_code: "en".into(),
                    text: text.to_string(),
                    difficulty: "easy".into(),
                    is_primary: true,
                })
                .unwrap();
        }
        store.rebuild_universe_index();
        store
    }

    fn catalog(store: Arc<MemoryStore>) -> WordCatalog {
        WordCatalog::new(
            store,
            CursorCodec::new("catalog-test").with_seed_source(SeedSource::Fixed(0x0000_0003_0000_0007)),
            Arc::new(MetricsRegistry::new()),
        )
        .with_max_page_size(10)
    }

    fn request(count: usize, cursor: Option<String>) -> PageRequest {
        PageRequest {
            count,
            language: "EN".into(),
            difficulty: "easy".into(),
            cursor,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::with_timeout(Duration::from_secs(5))
    }

    fn texts(page: &WordPage) -> Vec<String> {
        page.words.iter().map(|w| w.text.clone()).collect()
    }

    #[tokio::test]
    async fn pages_walk_the_universe_then_repeat() {
        let catalog = catalog(seeded_store(&["a", "b", "c", "d", "e"]));

        let first = catalog.random_page(&ctx(), request(3, None)).await.unwrap();
        let first_texts = texts(&first);
        assert_eq!(first_texts.iter().collect::<HashSet<_>>().len(), 3);
        assert!(!first.next_cursor.is_empty());

        let second = catalog
            .random_page(&ctx(), request(2, Some(first.next_cursor.clone())))
            .await
            .unwrap();
        let second_texts = texts(&second);
        assert_eq!(second_texts.len(), 2);
        assert!(second_texts.iter().all(|t| !first_texts.contains(t)));

        // Offset 5 starts the same cycle again.
        let third = catalog
            .random_page(&ctx(), request(3, Some(second.next_cursor)))
            .await
            .unwrap();
        assert_eq!(texts(&third), first_texts);
    }

    #[tokio::test]
    async fn page_stops_at_cycle_boundary() {
        let catalog = catalog(seeded_store(&["a", "b", "c", "d", "e"]));

        let first = catalog.random_page(&ctx(), request(3, None)).await.unwrap();
        let first_texts = texts(&first);

        let second = catalog
            .random_page(&ctx(), request(3, Some(first.next_cursor.clone())))
            .await
            .unwrap();
        let second_texts = texts(&second);
        assert_eq!(second_texts.len(), 2);
        assert!(second_texts.iter().all(|t| !first_texts.contains(t)));

        let mut seen: HashSet<String> = first_texts.iter().cloned().collect();
        seen.extend(second_texts);
        assert_eq!(seen.len(), 5);

        let third = catalog
            .random_page(&ctx(), request(3, Some(second.next_cursor)))
            .await
            .unwrap();
        assert_eq!(texts(&third), first_texts);
    }

    #[tokio::test]
    async fn bad_cursor_starts_fresh() {
        let catalog = catalog(seeded_store(&["a", "b", "c", "d", "e"]));
        let fresh = catalog.random_page(&ctx(), request(3, None)).await.unwrap();
        let tampered = catalog
            .random_page(&ctx(), request(3, Some("garbage.token".into())))
            .await
            .unwrap();
        assert_eq!(texts(&fresh), texts(&tampered));
    }

    #[tokio::test]
    async fn count_is_validated_before_store_access() {
        let catalog = catalog(Arc::new(MemoryStore::new()));
        for count in [0, 11] {
            let err = catalog.random_page(&ctx(), request(count, None)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        let mut blank = request(1, None);
        blank.language = " ".into();
        assert!(matches!(
            catalog.random_page(&ctx(), blank).await,
            Err(QuizError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn empty_universe() {
        let catalog = catalog(seeded_store(&[]));
        let err = catalog.random_page(&ctx(), request(3, None)).await.unwrap_err();
        assert!(matches!(err, QuizError::NoWordsAvailable { .. }));
    }

    #[tokio::test]
    async fn stale_index_gives_partial_page() {
        let store = seeded_store(&["a", "b", "c", "d", "e"]);
        let victim = store.words_at_ranks("en", "easy", &[2]).unwrap()[0].1.id;
        store.delete_word(victim);

        let catalog = catalog(store);
        let page = catalog.random_page(&ctx(), request(5, None)).await.unwrap();
        assert_eq!(page.words.len(), 4);
        assert!(page.words.iter().all(|w| w.id != victim));
        assert_eq!(catalog.metrics.counter(metric_names::CURSOR_PARTIAL_PAGE), 1);
    }

    #[tokio::test]
    async fn page_larger_than_universe_has_no_duplicates() {
        let catalog = catalog(seeded_store(&["a", "b"]));
        let page = catalog.random_page(&ctx(), request(5, None)).await.unwrap();
        assert_eq!(page.words.len(), 2);
        assert_ne!(page.words[0].id, page.words[1].id);
    }

    #[tokio::test]
    async fn cancelled_request_does_not_touch_store() {
        let catalog = catalog(seeded_store(&["a"]));
        let ctx = ctx();
        ctx.cancel();
        let err = catalog.random_page(&ctx, request(1, None)).await.unwrap_err();
        assert!(matches!(err, QuizError::Cancelled));
    }
}
