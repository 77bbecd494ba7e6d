//! In-memory store. One lock over all tables, so every operation is trivially atomic.
//! Used by tests and for running the services without a database.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    CatalogStore, LedgerStore, NewPlay, RecordedPlay, SessionSnapshot, StoreError, WordStore,
};
use crate::error::{QuizError, QuizResult};
use crate::model::{
    GameSession, HistoryEntry, Level, NewWord, Play, SessionSummary, SessionTag, Word,
};
use crate::scoring::{ScoreDelta, ScoringConfig};

#[derive(Default)]
struct Tables {
    words: BTreeMap<i64, Word>,
    next_word_id: i64,
    /// (language, difficulty) -> word id per rank.
    universe: HashMap<(String, String), Vec<i64>>,
    levels: BTreeMap<i64, Level>,
    next_level_id: i64,
    sessions: HashMap<SessionTag, GameSession>,
    plays: Vec<Play>,
}

impl Tables {
    /// Same ordering rule as the SQL store: primary first, then lowest id.
    fn best_text(&self, concept_id: Uuid, language: &str) -> Option<String> {
        self.words
            .values()
            .filter(|w| w.concept_id == concept_id && w.language_code.eq_ignore_ascii_case(language))
            .min_by_key(|w| (!w.is_primary, w.id))
            .map(|w| w.text.clone())
    }

    fn session_plays(&self, tag: SessionTag) -> impl Iterator<Item = &Play> {
        self.plays.iter().filter(move |p| p.session_tag == tag)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_level(&self, code: &str, name: &str, difficulty: &str, scoring: &ScoringConfig) -> i64 {
        let mut t = self.tables.lock();
        t.next_level_id += 1;
        let id = t.next_level_id;
        let level = Level {
            id,
            code: code.to_string(),
            name: name.to_string(),
            difficulty: difficulty.to_string(),
            scoring: *scoring,
            is_active: true,
        };
        t.levels.insert(id, level);
        id
    }

    pub fn set_level_active(&self, level_id: i64, active: bool) {
        if let Some(level) = self.tables.lock().levels.get_mut(&level_id) {
            level.is_active = active;
        }
    }

    /// Ranks words `0..N-1` per (language, difficulty) in id order.
    pub fn rebuild_universe_index(&self) -> usize {
        let mut t = self.tables.lock();
        let mut universe: HashMap<(String, String), Vec<i64>> = HashMap::new();
        for w in t.words.values() {
            universe
                .entry((w.language_code.clone(), w.difficulty.clone()))
                .or_default()
                .push(w.id);
        }
        let count = t.words.len();
        t.universe = universe;
        count
    }

    pub fn delete_word(&self, word_id: i64) -> bool {
        self.tables.lock().words.remove(&word_id).is_some()
    }

    pub fn concept_word_count(&self, concept_id: Uuid, language: &str) -> u64 {
        self.tables
            .lock()
            .words
            .values()
            .filter(|w| w.concept_id == concept_id && w.language_code.eq_ignore_ascii_case(language))
            .count() as u64
    }
}

impl CatalogStore for MemoryStore {
    fn partition_size(&self, language: &str, difficulty: &str) -> Result<u64, StoreError> {
        let t = self.tables.lock();
        Ok(t.universe
            .get(&(language.to_string(), difficulty.to_string()))
            .map_or(0, |ranks| ranks.len() as u64))
    }

    fn words_at_ranks(
        &self,
        language: &str,
        difficulty: &str,
        ranks: &[u64],
    ) -> Result<Vec<(u64, Word)>, StoreError> {
        let t = self.tables.lock();
        let Some(partition) = t.universe.get(&(language.to_string(), difficulty.to_string())) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::with_capacity(ranks.len());
        for &rank in ranks {
            let word = usize::try_from(rank)
                .ok()
                .and_then(|r| partition.get(r))
                .and_then(|id| t.words.get(id));
            if let Some(word) = word {
                out.push((rank, word.clone()));
            }
        }
        Ok(out)
    }
}

impl WordStore for MemoryStore {
    fn word(&self, word_id: i64) -> Result<Option<Word>, StoreError> {
        Ok(self.tables.lock().words.get(&word_id).cloned())
    }

    fn sibling_text(&self, word_id: i64, language: &str) -> Result<Option<String>, StoreError> {
        let t = self.tables.lock();
        Ok(t.words
            .get(&word_id)
            .and_then(|w| t.best_text(w.concept_id, language)))
    }

    fn concept_text(&self, concept_id: Uuid, language: &str) -> Result<Option<String>, StoreError> {
        Ok(self.tables.lock().best_text(concept_id, language))
    }

    fn insert_word(&self, word: &NewWord) -> Result<i64, StoreError> {
        let language = word.language_code.trim().to_lowercase();
        let mut t = self.tables.lock();
        let duplicate = t.words.values().any(|w| {
            w.concept_id == word.concept_id
                && w.language_code == language
                && w.text == word.text
        });
        if duplicate {
            return Err(StoreError::Conflict);
        }
        t.next_word_id += 1;
        let id = t.next_word_id;
        t.words.insert(
            id,
            Word {
                id,
                concept_id: word.concept_id,
                language_code: language,
                text: word.text.clone(),
                difficulty: word.difficulty.clone(),
                is_primary: word.is_primary,
            },
        );
        Ok(id)
    }
}

impl LedgerStore for MemoryStore {
    fn level(&self, level_id: i64) -> Result<Option<Level>, StoreError> {
        Ok(self
            .tables
            .lock()
            .levels
            .get(&level_id)
            .cloned())
    }

    fn active_levels(&self) -> Result<Vec<Level>, StoreError> {
        Ok(self
            .tables
            .lock()
            .levels
            .values()
            .filter(|level| level.is_active)
            .cloned()
            .collect())
    }

    fn insert_session(&self, session: &GameSession) -> Result<(), StoreError> {
        let mut t = self.tables.lock();
        if t.sessions.contains_key(&session.tag) {
            return Err(StoreError::Conflict);
        }
        t.sessions.insert(session.tag, session.clone());
        Ok(())
    }

    fn session(&self, tag: SessionTag) -> Result<Option<GameSession>, StoreError> {
        Ok(self.tables.lock().sessions.get(&tag).cloned())
    }

    fn finish_session(&self, tag: SessionTag, at: i64) -> Result<Option<GameSession>, StoreError> {
        let mut t = self.tables.lock();
        Ok(t.sessions.get_mut(&tag).map(|s| {
            s.finished_at.get_or_insert(at);
            s.clone()
        }))
    }

    fn record_play(
        &self,
        tag: SessionTag,
        play: &NewPlay,
        decide: &dyn Fn(&SessionSnapshot) -> QuizResult<ScoreDelta>,
    ) -> QuizResult<RecordedPlay> {
        let mut t = self.tables.lock();
        let session = t
            .sessions
            .get(&tag)
            .cloned()
            .ok_or(QuizError::SessionNotFound(tag))?;
        let scoring = t
            .levels
            .get(&session.level_id)
            .map(|level| level.scoring)
            .ok_or_else(|| {
                StoreError::Corrupt(format!("session {tag} references missing level {}", session.level_id))
            })?;
        let (wrong_count, target_total) = t
            .session_plays(tag)
            .fold((0u64, 0i64), |(wrong, target), p| {
                (wrong + u64::from(!p.is_correct), target.saturating_add(p.target))
            });

        let snapshot = SessionSnapshot {
            session,
            scoring,
            wrong_count,
            target_total,
        };
        let delta = decide(&snapshot)?;

        let id = t.plays.len() as i64 + 1;
        let recorded = Play {
            id,
            session_tag: tag,
            word_id: play.word_id,
            user_answer: play.user_answer.clone(),
            is_correct: play.is_correct,
            score: delta.score,
            target: delta.target,
            played_at: play.played_at,
        };
        t.plays.push(recorded.clone());
        let total_score = match t.sessions.get_mut(&tag) {
            Some(s) => {
                s.total_score = s.total_score.saturating_add(delta.score);
                s.total_score
            }
            None => return Err(QuizError::SessionNotFound(tag)),
        };

        Ok(RecordedPlay {
            play: recorded,
            total_score,
            target_total: target_total.saturating_add(delta.target),
        })
    }

    fn session_summary(&self, tag: SessionTag) -> Result<Option<SessionSummary>, StoreError> {
        let t = self.tables.lock();
        let Some(session) = t.sessions.get(&tag).cloned() else {
            return Ok(None);
        };
        let (play_count, wrong_count, target_total) =
            t.session_plays(tag).fold((0u64, 0u64, 0i64), |(n, wrong, target), p| {
                (n + 1, wrong + u64::from(!p.is_correct), target.saturating_add(p.target))
            });
        Ok(Some(SessionSummary {
            session,
            target_total,
            play_count,
            wrong_count,
        }))
    }

    fn history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let t = self.tables.lock();
        let mut entries: Vec<HistoryEntry> = t
            .plays
            .iter()
            .filter_map(|p| {
                let session = t.sessions.get(&p.session_tag)?;
                if session.user_id != user_id {
                    return None;
                }
                let word = t.words.get(&p.word_id)?;
                Some(HistoryEntry {
                    play: p.clone(),
                    word: word.clone(),
                    session_started_at: session.started_at,
                })
            })
            .collect();
        entries.sort_by(|a, b| {
            (b.play.played_at, b.play.id).cmp(&(a.play.played_at, a.play.id))
        });
        entries.truncate(limit);
        Ok(entries)
    }
}
