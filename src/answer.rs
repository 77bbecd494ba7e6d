//! Answer checking: resolve the expected meaning, compare, record the play.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancellation::RequestContext;
use crate::error::{QuizError, QuizResult};
use crate::ledger::{PlayInput, SessionLedger};
use crate::model::SessionContext;
use crate::translate::TranslationResolver;

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerSubmission {
    pub word_id: i64,
    /// Language the user answered in.
    pub language_code: String,
    pub user_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerOutcome {
    pub correct_answer: String,
    pub is_correct: bool,
    pub score: i64,
    pub target: i64,
    pub total_score: i64,
}

pub struct AnswerService {
    resolver: Arc<TranslationResolver>,
    ledger: Arc<SessionLedger>,
}

impl AnswerService {
    pub fn new(resolver: Arc<TranslationResolver>, ledger: Arc<SessionLedger>) -> Self {
        Self { resolver, ledger }
    }

    pub async fn submit(
        &self,
        ctx: &RequestContext,
        session: &SessionContext,
        submission: AnswerSubmission,
    ) -> QuizResult<AnswerOutcome> {
        if submission.language_code.trim().is_empty() {
            return Err(QuizError::Validation("language_code is required".into()));
        }

        // Refuse closed or foreign sessions before the provider is asked anything.
        self.ledger.open_session(ctx, session).await?;
        let meaning = self
            .resolver
            .resolve(ctx, submission.word_id, &submission.language_code)
            .await?;
        let is_correct = answer_matches(&submission.user_answer, &meaning);
        debug!(word_id = submission.word_id, is_correct, "answer checked");

        let outcome = self
            .ledger
            .record_play(
                ctx,
                session,
                PlayInput {
                    word_id: submission.word_id,
                    user_answer: submission.user_answer,
                    is_correct,
                },
            )
            .await?;

        Ok(AnswerOutcome {
            correct_answer: meaning,
            is_correct,
            score: outcome.play.score,
            target: outcome.play.target,
            total_score: outcome.total_score,
        })
    }
}

/// Blank answers never match; otherwise a trimmed, case-insensitive comparison.
pub fn answer_matches(answer: &str, meaning: &str) -> bool {
    let answer = answer.trim();
    !answer.is_empty() && answer.to_lowercase() == meaning.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;
    use crate::model::NewWord;
    use crate::scoring::ScoringConfig;
    use crate::store::{MemoryStore, WordStore};
    use crate::translate::{LruTranslationCache, TranslateError, TranslateRequest, TranslationProvider};
    use async_trait::async_trait;
    use std::time::Duration;
    use uuid::Uuid;

    struct Unreachable;

    #[async_trait]
    impl TranslationProvider for Unreachable {
        async fn translate(&self, _: &TranslateRequest) -> Result<String, TranslateError> {
            Err(TranslateError::ApiError("offline".into()))
        }
        fn name(&self) -> &'static str {
            "unreachable"
        }
    }

    #[test]
    fn matching_rules() {
        assert!(answer_matches("Mèo", "mèo"));
        assert!(answer_matches("  MEO ", "meo"));
        assert!(!answer_matches("", ""));
        assert!(!answer_matches("   ", "meo"));
        assert!(!answer_matches("cho", "meo"));
    }

    async fn service() -> (AnswerService, SessionContext, i64) {
        let store = Arc::new(MemoryStore::new());
        let concept = Uuid::new_v4();
        let mut ids = Vec::new();
        for (lang, text) in [("en", "cat"), ("vi", "Mèo")] {
            ids.push(
                store
                    .insert_word(&NewWord {
                        concept_id: concept,
                        language_code: lang.into(),
                        text: text.into(),
                        difficulty: "easy".into(),
                        is_primary: true,
                    })
                    .unwrap(),
            );
        }
        let level = store.insert_level(
            "a1",
            "Beginner",
            "easy",
            &ScoringConfig::from_json(
                r#"{"score_rules":{"correct_points":10,"wrong_penalty":-3},
                    "target_rules":{"correct_bonus":1,"mode":"number","wrong_penalty":-1}}"#,
            )
            .unwrap(),
        );
        let metrics = Arc::new(MetricsRegistry::new());
        let resolver = Arc::new(TranslationResolver::new(
            store.clone(),
            Arc::new(LruTranslationCache::new(8)),
            Arc::new(Unreachable),
            metrics.clone(),
        ));
        let ledger = Arc::new(SessionLedger::new(store, metrics));
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let tag = ledger.create_session(&ctx, 1, level).await.unwrap();
        (
            AnswerService::new(resolver, ledger),
            SessionContext::new(tag, 1),
            ids[0],
        )
    }

    #[tokio::test]
    async fn scores_right_and_wrong_answers() {
        let (service, session, cat) = service().await;
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let submit = |answer: &str| AnswerSubmission {
            word_id: cat,
            language_code: "vi".into(),
            user_answer: answer.into(),
        };

        let right = service.submit(&ctx, &session, submit(" mèo ")).await.unwrap();
        assert_eq!(
            right,
            AnswerOutcome {
                correct_answer: "Mèo".into(),
                is_correct: true,
                score: 10,
                target: 1,
                total_score: 10,
            }
        );

        let wrong = service.submit(&ctx, &session, submit("")).await.unwrap();
        assert!(!wrong.is_correct);
        assert_eq!((wrong.score, wrong.target, wrong.total_score), (-3, -1, 7));
    }

    #[tokio::test]
    async fn provider_failure_records_nothing() {
        let (service, session, cat) = service().await;
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        let err = service
            .submit(
                &ctx,
                &session,
                AnswerSubmission {
                    word_id: cat,
                    language_code: "fr".into(),
                    user_answer: "chat".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuizError::Provider(_)));
        let summary = service.ledger.session_summary(&ctx, session.tag).await.unwrap();
        assert_eq!(summary.play_count, 0);
    }

    #[tokio::test]
    async fn closed_or_foreign_session_skips_translation() {
        let (service, session, cat) = service().await;
        let ctx = RequestContext::with_timeout(Duration::from_secs(5));
        // "fr" has no stored row, so reaching the provider would surface as a provider error.
        let submit = || AnswerSubmission {
            word_id: cat,
            language_code: "fr".into(),
            user_answer: "chat".into(),
        };

        let stranger = SessionContext::new(session.tag, 2);
        let err = service.submit(&ctx, &stranger, submit()).await.unwrap_err();
        assert!(matches!(err, QuizError::SessionNotFound(_)));

        service.ledger.finish_session(&ctx, &session).await.unwrap();
        let err = service.submit(&ctx, &session, submit()).await.unwrap_err();
        assert!(matches!(err, QuizError::SessionFinished(_)));
        let summary = service.ledger.session_summary(&ctx, session.tag).await.unwrap();
        assert_eq!(summary.play_count, 0);
    }
}
