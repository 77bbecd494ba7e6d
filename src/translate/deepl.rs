//! DeepL REST translation client.
//! Connection pooling via reqwest. One attempt per call: failures surface to the
//! resolver as-is, and filling gaps later is the backfill job's concern.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{TranslateError, TranslateRequest, TranslationProvider};

const FREE_API_URL: &str = "https://api-free.deepl.com";
const PRO_API_URL: &str = "https://api.deepl.com";

pub struct DeepLProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DeepLProvider {
    /// Build a client. Free-tier keys (suffix `:fx`) default to the free endpoint.
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TranslateError::InvalidInput("DeepL API key is required".into()));
        }
        let base_url = base_url.unwrap_or_else(|| {
            if api_key.ends_with(":fx") {
                FREE_API_URL.to_string()
            } else {
                PRO_API_URL.to_string()
            }
        });

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::ApiError(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TranslationProvider for DeepLProvider {
    async fn translate(&self, request: &TranslateRequest) -> Result<String, TranslateError> {
        if request.text.trim().is_empty() {
            return Err(TranslateError::InvalidInput("text cannot be empty".into()));
        }

        let source = deepl_lang_code(&request.source_lang);
        let body = TranslateBody {
            text: [request.text.as_str()],
            target_lang: deepl_lang_code(&request.target_lang),
            source_lang: (!source.is_empty() && source != "AUTO").then_some(source),
        };

        let start = Instant::now();
        let result = self
            .http
            .post(format!("{}/v2/translate", self.base_url))
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&body)
            .send()
            .await;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => return Err(TranslateError::Timeout),
            Err(e) => return Err(TranslateError::ApiError(e.to_string())),
        };

        let status = resp.status();
        if status.as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map_or(0, |secs| secs * 1000);
            warn!(retry_after_ms, "DeepL rate limited");
            return Err(TranslateError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(TranslateError::ApiError(format!(
                "unexpected status {}: {}",
                status,
                body_text.chars().take(200).collect::<String>()
            )));
        }

        let parsed: TranslateResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                TranslateError::Timeout
            } else {
                TranslateError::ApiError(format!("bad response body: {e}"))
            }
        })?;

        let text = parsed
            .translations
            .into_iter()
            .next()
            .map(|t| t.text.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(TranslateError::Empty)?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            target = %request.target_lang,
            "DeepL translation done"
        );
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "deepl"
    }
}

/// DeepL wants upper-case codes ("EN", "VI", "PT-BR").
fn deepl_lang_code(lang: &str) -> String {
    lang.trim().to_uppercase()
}

#[derive(Serialize)]
struct TranslateBody<'a> {
    text: [&'a str; 1],
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    text: String,
}
