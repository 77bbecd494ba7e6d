//! Game sessions and their append-only play ledger.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cancellation::RequestContext;
use crate::error::{QuizError, QuizResult};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::model::{now_unix, GameSession, HistoryEntry, Level, Play, SessionContext, SessionSummary, SessionTag};
use crate::scoring;
use crate::store::{LedgerStore, NewPlay, SessionSnapshot};

pub const MAX_HISTORY: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct PlayInput {
    pub word_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayOutcome {
    pub play: Play,
    pub total_score: i64,
    pub target_total: i64,
}

pub struct SessionLedger {
    store: Arc<dyn LedgerStore>,
    metrics: Arc<MetricsRegistry>,
}

impl SessionLedger {
    pub fn new(store: Arc<dyn LedgerStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { store, metrics }
    }

    /// Start a session for `user_id` on an existing level.
    pub async fn create_session(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        level_id: i64,
    ) -> QuizResult<SessionTag> {
        ctx.ensure_active()?;
        if self.store.level(level_id)?.is_none() {
            return Err(QuizError::LevelNotFound(level_id));
        }

        let session = GameSession {
            tag: SessionTag::new(),
            user_id,
            level_id,
            total_score: 0,
            started_at: now_unix(),
            finished_at: None,
        };
        ctx.ensure_active()?;
        self.store.insert_session(&session)?;
        info!(tag = %session.tag, user_id, level_id, "session started");
        Ok(session.tag)
    }

    /// The caller's session, if it exists, belongs to them, and still takes plays.
    pub async fn open_session(
        &self,
        ctx: &RequestContext,
        session: &SessionContext,
    ) -> QuizResult<GameSession> {
        ctx.ensure_active()?;
        match self.store.session(session.tag)? {
            Some(found) if found.user_id == session.user_id => {
                if found.finished_at.is_some() {
                    return Err(QuizError::SessionFinished(found.tag));
                }
                Ok(found)
            }
            _ => Err(QuizError::SessionNotFound(session.tag)),
        }
    }

    /// Score and append one play. Snapshot, scoring, insert and total update happen in one
    /// store transaction; plays on a finished session are refused.
    pub async fn record_play(
        &self,
        ctx: &RequestContext,
        session: &SessionContext,
        input: PlayInput,
    ) -> QuizResult<PlayOutcome> {
        let new_play = NewPlay {
            word_id: input.word_id,
            user_answer: input.user_answer,
            is_correct: input.is_correct,
            played_at: now_unix(),
        };
        let expected_user = session.user_id;

        ctx.ensure_active()?;
        let span = self.metrics.span(metric_names::RECORD_PLAY);
        let result = self.store.record_play(session.tag, &new_play, &|snap: &SessionSnapshot| {
            if snap.session.user_id != expected_user {
                // Someone else's tag is indistinguishable from an unknown one.
                return Err(QuizError::SessionNotFound(snap.session.tag));
            }
            if snap.session.finished_at.is_some() {
                return Err(QuizError::SessionFinished(snap.session.tag));
            }
            Ok(scoring::score(
                new_play.is_correct,
                &snap.scoring,
                snap.wrong_count,
                snap.target_total,
            ))
        });
        span.finish();

        let recorded = result?;
        debug!(
            tag = %session.tag,
            word_id = recorded.play.word_id,
            correct = recorded.play.is_correct,
            score = recorded.play.score,
            total = recorded.total_score,
            "play recorded"
        );
        Ok(PlayOutcome {
            play: recorded.play,
            total_score: recorded.total_score,
            target_total: recorded.target_total,
        })
    }

    /// Mark the session finished. Repeat calls keep the first finish time.
    pub async fn finish_session(
        &self,
        ctx: &RequestContext,
        session: &SessionContext,
    ) -> QuizResult<GameSession> {
        ctx.ensure_active()?;
        match self.store.finish_session(session.tag, now_unix())? {
            Some(finished) if finished.user_id == session.user_id => {
                info!(tag = %finished.tag, total = finished.total_score, "session finished");
                Ok(finished)
            }
            _ => Err(QuizError::SessionNotFound(session.tag)),
        }
    }

    pub async fn session_summary(
        &self,
        ctx: &RequestContext,
        tag: SessionTag,
    ) -> QuizResult<SessionSummary> {
        ctx.ensure_active()?;
        self.store
            .session_summary(tag)?
            .ok_or(QuizError::SessionNotFound(tag))
    }

    /// Newest plays first, capped at [`MAX_HISTORY`].
    pub async fn history(
        &self,
        ctx: &RequestContext,
        user_id: i64,
        limit: usize,
    ) -> QuizResult<Vec<HistoryEntry>> {
        ctx.ensure_active()?;
        Ok(self.store.history(user_id, limit.min(MAX_HISTORY))?)
    }

    pub async fn list_levels(&self, ctx: &RequestContext) -> QuizResult<Vec<Level>> {
        ctx.ensure_active()?;
        Ok(self.store.active_levels()?)
    }
}
