//! Storage backends.
//!
//! Services talk to storage only through the traits below, so production wiring uses
//! [`SqliteStore`] and tests can swap in [`MemoryStore`]. All calls are blocking and
//! short; callers check their [`RequestContext`](crate::cancellation::RequestContext)
//! before each one.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use uuid::Uuid;

use crate::error::{QuizError, QuizResult};
use crate::model::{GameSession, HistoryEntry, Level, NewWord, Play, SessionSummary, SessionTag, Word};
use crate::scoring::{ScoreDelta, ScoringConfig};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A uniqueness constraint rejected the write.
    #[error("unique constraint violated")]
    Conflict,
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl From<rusqlite::Error> for QuizError {
    fn from(e: rusqlite::Error) -> Self {
        QuizError::Store(StoreError::Sqlite(e))
    }
}

/// Read side of the ranked word universe.
pub trait CatalogStore: Send + Sync {
    /// Number of ranks in the (language, difficulty) partition.
    fn partition_size(&self, language: &str, difficulty: &str) -> Result<u64, StoreError>;

    /// One batched lookup of `ranks` joined to their words. Ranks whose word no longer
    /// exists are simply absent from the result; order is unspecified.
    fn words_at_ranks(
        &self,
        language: &str,
        difficulty: &str,
        ranks: &[u64],
    ) -> Result<Vec<(u64, Word)>, StoreError>;
}

/// Word rows as used by translation resolution.
pub trait WordStore: Send + Sync {
    fn word(&self, word_id: i64) -> Result<Option<Word>, StoreError>;

    /// Best text for `word_id`'s concept in `language` (case-insensitive), preferring the
    /// primary row, then the lowest id.
    fn sibling_text(&self, word_id: i64, language: &str) -> Result<Option<String>, StoreError>;

    /// Same ordering as [`WordStore::sibling_text`], keyed by concept.
    fn concept_text(&self, concept_id: Uuid, language: &str) -> Result<Option<String>, StoreError>;

    /// Insert a word with its language code lowercased; [`StoreError::Conflict`] when
    /// (concept, language, text) already exists.
    fn insert_word(&self, word: &NewWord) -> Result<i64, StoreError>;
}

/// Session state visible to the scoring decision inside a play transaction.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: GameSession,
    pub scoring: ScoringConfig,
    pub wrong_count: u64,
    pub target_total: i64,
}

#[derive(Debug, Clone)]
pub struct NewPlay {
    pub word_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
    pub played_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPlay {
    pub play: Play,
    pub total_score: i64,
    pub target_total: i64,
}

/// Persistence for levels, sessions, and plays.
pub trait LedgerStore: Send + Sync {
    fn level(&self, level_id: i64) -> Result<Option<Level>, StoreError>;

    fn active_levels(&self) -> Result<Vec<Level>, StoreError>;

    fn insert_session(&self, session: &GameSession) -> Result<(), StoreError>;

    fn session(&self, tag: SessionTag) -> Result<Option<GameSession>, StoreError>;

    /// Set `finished_at` unless already set. Returns the row after the update.
    fn finish_session(&self, tag: SessionTag, at: i64) -> Result<Option<GameSession>, StoreError>;

    /// Atomically: snapshot the session, let `decide` compute the deltas (or refuse), insert
    /// the play, and add the score delta to the session total. Nothing is written unless
    /// every step succeeds, and concurrent calls on one session are serialized.
    fn record_play(
        &self,
        tag: SessionTag,
        play: &NewPlay,
        decide: &dyn Fn(&SessionSnapshot) -> QuizResult<ScoreDelta>,
    ) -> QuizResult<RecordedPlay>;

    fn session_summary(&self, tag: SessionTag) -> Result<Option<SessionSummary>, StoreError>;

    /// A user's plays, newest first.
    fn history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;
}
