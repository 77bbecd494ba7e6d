//! Lexiquiz: vocabulary quiz core.
//! Random word pages over a seeded permutation, cache-aside translation with a DeepL
//! fallback, and a transactional score ledger. [`QuizCore`] wires it all together.

pub mod answer;
pub mod cancellation;
pub mod catalog;
pub mod config;
pub mod cursor;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod sampler;
pub mod scoring;
pub mod store;
pub mod telemetry;
pub mod translate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use answer::AnswerService;
use cancellation::RequestContext;
use catalog::WordCatalog;
use config::{Config, ConfigError, ENV_DEEPL_API_KEY};
use cursor::CursorCodec;
use ledger::SessionLedger;
use metrics::{MetricSummary, MetricsRegistry};
use store::{SqliteStore, StoreError};
use translate::{
    CacheError, DeepLProvider, LruTranslationCache, SqliteTranslationCache, TieredCache,
    TranslateError, TranslationCache, TranslationProvider, TranslationResolver,
};

pub use error::{ErrorKind, QuizError, QuizResult};

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database: {0}")]
    Store(#[from] StoreError),
    #[error("translation cache: {0}")]
    Cache(#[from] CacheError),
    #[error("translation provider: {0}")]
    Provider(#[from] TranslateError),
}

/// Shared services, built once and handed to whatever transport sits in front.
pub struct QuizCore {
    pub store: Arc<SqliteStore>,
    pub metrics: Arc<MetricsRegistry>,
    pub catalog: Arc<WordCatalog>,
    pub resolver: Arc<TranslationResolver>,
    pub ledger: Arc<SessionLedger>,
    pub answers: Arc<AnswerService>,
    request_timeout: Duration,
}

impl QuizCore {
    /// Open the database and caches and build a DeepL-backed core.
    pub fn open(config: &Config) -> Result<Self, OpenError> {
        let timeout = Duration::from_millis(config.translator.timeout_ms);
        // `DEEPL_API_KEY` is already folded into the config by `Config::from_env`.
        let key = config.translator.api_key.as_deref().ok_or_else(|| {
            ConfigError::Invalid(format!("translator.api_key is required (or set {ENV_DEEPL_API_KEY})"))
        })?;
        let provider = DeepLProvider::new(key, config.translator.base_url.clone(), timeout)?;
        info!(base_url = ?config.translator.base_url, "DeepL client initialized");
        Self::open_with_provider(config, Arc::new(provider))
    }

    /// Same as [`QuizCore::open`] with a caller-chosen translation provider.
    pub fn open_with_provider(
        config: &Config,
        provider: Arc<dyn TranslationProvider>,
    ) -> Result<Self, OpenError> {
        config.validate()?;
        info!(db = %config.database.path.display(), "lexiquiz core starting");

        let store = Arc::new(SqliteStore::open(
            &config.database.path,
            Duration::from_millis(config.database.busy_timeout_ms),
        )?);
        let metrics = Arc::new(MetricsRegistry::new());
        let cache_ttl = Duration::from_secs(config.cache.ttl_secs);

        let l1 = LruTranslationCache::new(config.cache.capacity);
        let cache: Arc<dyn TranslationCache> = match &config.cache.l2_path {
            Some(path) => {
                let l2 = Arc::new(SqliteTranslationCache::open(path)?);
                spawn_cleanup(&l2, Duration::from_secs(config.cache.cleanup_interval_secs));
                Arc::new(TieredCache::new(l1, l2, cache_ttl))
            }
            None => Arc::new(l1),
        };

        let mut cursors = CursorCodec::new(&config.cursor.secret);
        if let Some(ttl) = config.cursor.ttl_secs {
            cursors = cursors.with_ttl(Duration::from_secs(ttl));
        }

        let catalog = Arc::new(
            WordCatalog::new(store.clone(), cursors, Arc::clone(&metrics))
                .with_max_page_size(config.catalog.max_page_size),
        );
        let resolver = Arc::new(
            TranslationResolver::new(store.clone(), cache, provider, Arc::clone(&metrics))
                .with_cache_ttl(cache_ttl),
        );
        let ledger = Arc::new(SessionLedger::new(store.clone(), Arc::clone(&metrics)));
        let answers = Arc::new(AnswerService::new(
            Arc::clone(&resolver),
            Arc::clone(&ledger),
        ));

        info!("lexiquiz core ready");
        Ok(Self {
            store,
            metrics,
            catalog,
            resolver,
            ledger,
            answers,
            request_timeout: config.request_timeout(),
        })
    }

    /// Fresh context bounded by the configured request timeout.
    pub fn request_context(&self) -> RequestContext {
        RequestContext::with_timeout(self.request_timeout)
    }

    pub fn metrics_summary(&self) -> HashMap<String, MetricSummary> {
        self.metrics.summary()
    }
}

/// Expired L2 rows are purged in the background when a runtime is available.
fn spawn_cleanup(l2: &Arc<SqliteTranslationCache>, every: Duration) {
    if every.is_zero() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(_) => {
            SqliteTranslationCache::start_cleanup_loop(Arc::clone(l2), every);
        }
        Err(_) => warn!("no tokio runtime, L2 cache cleanup loop not started"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> Config {
        let mut config = Config::default();
        config.database.path = dir.path().join("quiz.db");
        config.cursor.secret = "core-test-secret-value".into();
        config
    }

    #[test]
    fn open_without_api_key_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = QuizCore::open(&config(&dir));
        assert!(matches!(result, Err(OpenError::Config(ConfigError::Invalid(_)))));
    }

    #[test]
    fn open_with_api_key_and_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.translator.api_key = Some("test-key:fx".into());
        config.translator.base_url = Some("http://127.0.0.1:9".into());
        let core = QuizCore::open(&config).unwrap();
        assert!(core.metrics_summary().is_empty());
    }

    #[test]
    fn blank_api_key_is_refused_by_the_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.translator.api_key = Some("  ".into());
        assert!(matches!(QuizCore::open(&config), Err(OpenError::Provider(_))));
    }
}
