//! Runtime configuration.
//! Loaded from a JSON file where every field has a default, then overridden from the
//! environment. Secrets normally come from the environment only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub const ENV_CURSOR_SECRET: &str = "LEXIQUIZ_CURSOR_SECRET";
pub const ENV_DB_PATH: &str = "LEXIQUIZ_DB_PATH";
pub const ENV_DEEPL_API_KEY: &str = "DEEPL_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub cursor: CursorConfig,
    pub cache: CacheConfig,
    pub catalog: CatalogConfig,
    pub translator: TranslatorConfig,
    /// Deadline given to each request context built by [`crate::QuizCore`].
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    pub secret: String,
    /// Tokens older than this decode to a fresh page. `None` means no expiry.
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
    /// Persistent second-level cache; in-memory only when absent.
    pub l2_path: Option<PathBuf>,
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cursor: CursorConfig::default(),
            cache: CacheConfig::default(),
            catalog: CatalogConfig::default(),
            translator: TranslatorConfig::default(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("lexiquiz.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            ttl_secs: 600,
            l2_path: None,
            cleanup_interval_secs: 300,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self { max_page_size: 50 }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: 5_000,
        }
    }
}

impl Config {
    /// Parse a config file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overrides from any key/value source; empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(secret) = get(ENV_CURSOR_SECRET) {
            self.cursor.secret = secret;
        }
        if let Some(path) = get(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(key) = get(ENV_DEEPL_API_KEY) {
            self.translator.api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cursor.secret.len() < 16 {
            return Err(ConfigError::Invalid(format!(
                "cursor secret must be at least 16 bytes (set {ENV_CURSOR_SECRET})"
            )));
        }
        if self.catalog.max_page_size == 0 {
            return Err(ConfigError::Invalid("catalog.max_page_size must be positive".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be positive".into()));
        }
        if self.translator.timeout_ms == 0 {
            return Err(ConfigError::Invalid("translator.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"catalog": {"max_page_size": 20}, "cache": {"l2_path": "/tmp/l2.db"}}"#,
        )
        .unwrap();
        assert_eq!(config.catalog.max_page_size, 20);
        assert_eq!(config.cache.capacity, 4096);
        assert_eq!(config.cache.l2_path.as_deref(), Some(Path::new("/tmp/l2.db")));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            (ENV_CURSOR_SECRET, "0123456789abcdef-secret"),
            (ENV_DB_PATH, "/var/lib/lexiquiz/words.db"),
            (ENV_DEEPL_API_KEY, ""),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        config.translator.api_key = Some("from-file".into());
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.cursor.secret, "0123456789abcdef-secret");
        assert_eq!(config.database.path, PathBuf::from("/var/lib/lexiquiz/words.db"));
        assert_eq!(config.translator.api_key.as_deref(), Some("from-file"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validation_failures() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.cursor.secret = "a-long-enough-secret".into();
        config.catalog.max_page_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexiquiz.json");
        std::fs::write(
            &path,
            r#"{"cursor": {"secret": "file-secret-of-length", "ttl_secs": 3600}}"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.cursor.ttl_secs, Some(3600));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }
}
