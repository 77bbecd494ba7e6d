//! Persisted record shapes and the small value types passed between services.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::ScoringConfig;

/// Opaque identifier correlating a sequence of plays to one game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTag(Uuid);

impl SessionTag {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionTag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single word in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: i64,
    pub concept_id: Uuid,
    pub language_code: String,
    pub text: String,
    pub difficulty: String,
    pub is_primary: bool,
}

/// Fields of a word row before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWord {
    pub concept_id: Uuid,
    pub language_code: String,
    pub text: String,
    pub difficulty: String,
    pub is_primary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Level {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub difficulty: String,
    pub scoring: ScoringConfig,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSession {
    pub tag: SessionTag,
    pub user_id: i64,
    pub level_id: i64,
    pub total_score: i64,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// One answer attempt. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Play {
    pub id: i64,
    pub session_tag: SessionTag,
    pub word_id: i64,
    pub user_answer: String,
    pub is_correct: bool,
    pub score: i64,
    pub target: i64,
    pub played_at: i64,
}

/// A play joined with its word and session start, for history views.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub play: Play,
    pub word: Word,
    pub session_started_at: i64,
}

/// Aggregate view of a session's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub session: GameSession,
    pub target_total: i64,
    pub play_count: u64,
    pub wrong_count: u64,
}

/// Explicit session value handed to the ledger by whatever transport owns the session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionContext {
    pub tag: SessionTag,
    pub user_id: i64,
}

impl SessionContext {
    pub fn new(tag: SessionTag, user_id: i64) -> Self {
        Self { tag, user_id }
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
