//! SQLite-backed store for words, the ranked universe index, levels, sessions, and plays.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::{Type, Value};
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row,
    TransactionBehavior,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    CatalogStore, LedgerStore, NewPlay, RecordedPlay, SessionSnapshot, StoreError, WordStore,
};
use crate::error::{QuizError, QuizResult};
use crate::model::{
    GameSession, HistoryEntry, Level, NewWord, Play, SessionSummary, SessionTag, Word,
};
use crate::scoring::{ScoreDelta, ScoringConfig};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS words (
        word_id INTEGER PRIMARY KEY AUTOINCREMENT,
        concept_id TEXT NOT NULL,
        language_code TEXT NOT NULL,
        word_text TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        is_primary INTEGER NOT NULL DEFAULT 0,
        UNIQUE (concept_id, language_code, word_text)
    );
    CREATE INDEX IF NOT EXISTS idx_words_concept
        ON words(concept_id, language_code);

    CREATE TABLE IF NOT EXISTS universe_index (
        language_code TEXT NOT NULL,
        difficulty TEXT NOT NULL,
        rank INTEGER NOT NULL,
        word_id INTEGER NOT NULL,
        PRIMARY KEY (language_code, difficulty, rank)
    );

    CREATE TABLE IF NOT EXISTS levels (
        level_id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        difficulty TEXT NOT NULL DEFAULT '',
        is_active INTEGER NOT NULL DEFAULT 1,
        scoring_config TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS game_sessions (
        session_tag TEXT PRIMARY KEY,
        user_id INTEGER NOT NULL,
        level_id INTEGER NOT NULL REFERENCES levels(level_id),
        total_score INTEGER NOT NULL DEFAULT 0,
        started_at INTEGER NOT NULL,
        finished_at INTEGER
    );

    CREATE TABLE IF NOT EXISTS plays (
        play_id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_tag TEXT NOT NULL REFERENCES game_sessions(session_tag),
        word_id INTEGER NOT NULL,
        user_answer TEXT NOT NULL,
        is_correct INTEGER NOT NULL,
        score INTEGER NOT NULL,
        target INTEGER NOT NULL,
        played_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_plays_session
        ON plays(session_tag);";

const WORD_COLUMNS: &str = "w.word_id, w.concept_id, w.language_code, w.word_text, w.difficulty, w.is_primary";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`. `busy_timeout` bounds how long a call
    /// waits on another writer.
    pub fn open(db_path: &Path, busy_timeout: Duration) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn, busy_timeout)?;
        info!(path = %db_path.display(), "sqlite store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5))
    }

    fn init(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Register a level. The config is validated by construction.
    pub fn insert_level(
        &self,
        code: &str,
        name: &str,
        difficulty: &str,
        scoring: &ScoringConfig,
    ) -> Result<i64, StoreError> {
        let json = scoring
            .to_json()
            .map_err(|e| StoreError::Corrupt(format!("scoring config: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO levels (code, name, difficulty, scoring_config) VALUES (?1, ?2, ?3, ?4)",
            params![code, name, difficulty, json],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_level_active(&self, level_id: i64, active: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE levels SET is_active = ?2 WHERE level_id = ?1",
            params![level_id, active],
        )?;
        Ok(())
    }

    /// Rebuild ranks `0..N-1` per (language, difficulty), ordered by word id. Normally the
    /// batch job's work; exposed for seeding and maintenance.
    pub fn rebuild_universe_index(&self) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM universe_index", [])?;
        let count = tx.execute(
            "INSERT INTO universe_index (language_code, difficulty, rank, word_id)
             SELECT language_code, difficulty,
                    ROW_NUMBER() OVER (PARTITION BY language_code, difficulty ORDER BY word_id) - 1,
                    word_id
             FROM words",
            [],
        )?;
        tx.commit()?;
        info!(ranked = count, "universe index rebuilt");
        Ok(count)
    }

    /// Remove a word row without touching the index, leaving its rank dangling until the
    /// next rebuild.
    pub fn delete_word(&self, word_id: i64) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM words WHERE word_id = ?1", params![word_id])?;
        Ok(n > 0)
    }

    /// Number of word rows for a concept in one language.
    pub fn concept_word_count(&self, concept_id: Uuid, language: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM words WHERE concept_id = ?1 AND LOWER(language_code) = LOWER(?2)",
            params![concept_id.to_string(), language],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e))
}

fn tag_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<SessionTag> {
    let s: String = row.get(idx)?;
    SessionTag::parse(&s).ok_or_else(|| {
        conversion_error(idx, std::io::Error::new(std::io::ErrorKind::InvalidData, s))
    })
}

/// Reads the six [`WORD_COLUMNS`] starting at `base`.
fn word_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Word> {
    Ok(Word {
        id: row.get(base)?,
        concept_id: uuid_at(row, base + 1)?,
        language_code: row.get(base + 2)?,
        text: row.get(base + 3)?,
        difficulty: row.get(base + 4)?,
        is_primary: row.get(base + 5)?,
    })
}

fn session_at(row: &Row<'_>, base: usize) -> rusqlite::Result<GameSession> {
    Ok(GameSession {
        tag: tag_at(row, base)?,
        user_id: row.get(base + 1)?,
        level_id: row.get(base + 2)?,
        total_score: row.get(base + 3)?,
        started_at: row.get(base + 4)?,
        finished_at: row.get(base + 5)?,
    })
}

const SESSION_COLUMNS: &str =
    "g.session_tag, g.user_id, g.level_id, g.total_score, g.started_at, g.finished_at";

const LEVEL_COLUMNS: &str = "level_id, code, name, difficulty, scoring_config, is_active";

struct LevelRow {
    id: i64,
    code: String,
    name: String,
    difficulty: String,
    config: String,
    is_active: bool,
}

impl LevelRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            code: row.get(1)?,
            name: row.get(2)?,
            difficulty: row.get(3)?,
            config: row.get(4)?,
            is_active: row.get(5)?,
        })
    }

    fn decode(self) -> Result<Level, StoreError> {
        let scoring = ScoringConfig::from_json(&self.config)
            .map_err(|e| StoreError::Corrupt(format!("level {} scoring_config: {e}", self.id)))?;
        Ok(Level {
            id: self.id,
            code: self.code,
            name: self.name,
            difficulty: self.difficulty,
            scoring,
            is_active: self.is_active,
        })
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::ConstraintViolation
                && (f.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
                    || f.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

impl CatalogStore for SqliteStore {
    fn partition_size(&self, language: &str, difficulty: &str) -> Result<u64, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM universe_index WHERE language_code = ?1 AND difficulty = ?2",
            params![language, difficulty],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as u64)
    }

    fn words_at_ranks(
        &self,
        language: &str,
        difficulty: &str,
        ranks: &[u64],
    ) -> Result<Vec<(u64, Word)>, StoreError> {
        if ranks.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ranks.len()].join(", ");
        let sql = format!(
            "SELECT ui.rank, {WORD_COLUMNS}
             FROM universe_index ui
             JOIN words w ON ui.word_id = w.word_id
             WHERE ui.language_code = ? AND ui.difficulty = ? AND ui.rank IN ({placeholders})"
        );
        let mut args: Vec<Value> = Vec::with_capacity(ranks.len() + 2);
        args.push(Value::Text(language.to_string()));
        args.push(Value::Text(difficulty.to_string()));
        args.extend(ranks.iter().map(|&r| Value::Integer(r as i64)));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            let rank: i64 = row.get(0)?;
            Ok((rank as u64, word_at(row, 1)?))
        })?;
        let out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(requested = ranks.len(), resolved = out.len(), "rank lookup");
        Ok(out)
    }
}

impl WordStore for SqliteStore {
    fn word(&self, word_id: i64) -> Result<Option<Word>, StoreError> {
        let conn = self.conn.lock();
        let word = conn
            .query_row(
                &format!("SELECT {WORD_COLUMNS} FROM words w WHERE w.word_id = ?1"),
                params![word_id],
                |row| word_at(row, 0),
            )
            .optional()?;
        Ok(word)
    }

    fn sibling_text(&self, word_id: i64, language: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT w2.word_text
                 FROM words w1
                 JOIN words w2
                   ON w1.concept_id = w2.concept_id
                  AND LOWER(w2.language_code) = LOWER(?2)
                 WHERE w1.word_id = ?1
                 ORDER BY w2.is_primary DESC, w2.word_id ASC
                 LIMIT 1",
                params![word_id, language],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    fn concept_text(&self, concept_id: Uuid, language: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        let text = conn
            .query_row(
                "SELECT word_text FROM words
                 WHERE concept_id = ?1 AND LOWER(language_code) = LOWER(?2)
                 ORDER BY is_primary DESC, word_id ASC
                 LIMIT 1",
                params![concept_id.to_string(), language],
                |row| row.get(0),
            )
            .optional()?;
        Ok(text)
    }

    fn insert_word(&self, word: &NewWord) -> Result<i64, StoreError> {
        let language = word.language_code.trim().to_lowercase();
        let conn = self.conn.lock();
        match conn.execute(
            "INSERT INTO words (concept_id, language_code, word_text, difficulty, is_primary)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                word.concept_id.to_string(),
                language,
                word.text,
                word.difficulty,
                word.is_primary,
            ],
        ) {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict),
            Err(e) => Err(e.into()),
        }
    }
}

impl LedgerStore for SqliteStore {
    fn level(&self, level_id: i64) -> Result<Option<Level>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {LEVEL_COLUMNS} FROM levels WHERE level_id = ?1"),
                params![level_id],
                LevelRow::read,
            )
            .optional()?;
        row.map(LevelRow::decode).transpose()
    }

    fn active_levels(&self) -> Result<Vec<Level>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LEVEL_COLUMNS} FROM levels WHERE is_active = 1 ORDER BY level_id"
        ))?;
        let rows = stmt
            .query_map([], LevelRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(LevelRow::decode).collect()
    }

    fn insert_session(&self, session: &GameSession) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO game_sessions (session_tag, user_id, level_id, total_score, started_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.tag.to_string(),
                session.user_id,
                session.level_id,
                session.total_score,
                session.started_at,
                session.finished_at,
            ],
        )?;
        Ok(())
    }

    fn session(&self, tag: SessionTag) -> Result<Option<GameSession>, StoreError> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM game_sessions g WHERE g.session_tag = ?1"),
                params![tag.to_string()],
                |row| session_at(row, 0),
            )
            .optional()?;
        Ok(session)
    }

    fn finish_session(&self, tag: SessionTag, at: i64) -> Result<Option<GameSession>, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE game_sessions SET finished_at = COALESCE(finished_at, ?2) WHERE session_tag = ?1",
            params![tag.to_string(), at],
        )?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM game_sessions g WHERE g.session_tag = ?1"),
                params![tag.to_string()],
                |row| session_at(row, 0),
            )
            .optional()?;
        Ok(session)
    }

    fn record_play(
        &self,
        tag: SessionTag,
        play: &NewPlay,
        decide: &dyn Fn(&SessionSnapshot) -> QuizResult<ScoreDelta>,
    ) -> QuizResult<RecordedPlay> {
        let mut conn = self.conn.lock();
        // IMMEDIATE takes the write lock up front so concurrent plays cannot interleave
        // their read-modify-write of the session total. Dropping `tx` rolls back.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let tag_text = tag.to_string();

        let row = tx
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS}, l.scoring_config
                     FROM game_sessions g JOIN levels l ON g.level_id = l.level_id
                     WHERE g.session_tag = ?1"
                ),
                params![tag_text],
                |row| Ok((session_at(row, 0)?, row.get::<_, String>(6)?)),
            )
            .optional()?;
        let (session, config) = row.ok_or(QuizError::SessionNotFound(tag))?;
        let scoring = ScoringConfig::from_json(&config).map_err(|e| {
            StoreError::Corrupt(format!("level {} scoring_config: {e}", session.level_id))
        })?;

        let (wrong_count, target_total): (i64, i64) = tx.query_row(
            "SELECT COALESCE(SUM(CASE WHEN is_correct = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(target), 0)
             FROM plays WHERE session_tag = ?1",
            params![tag_text],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let snapshot = SessionSnapshot {
            session,
            scoring,
            wrong_count: wrong_count.max(0) as u64,
            target_total,
        };
        let delta = decide(&snapshot)?;

        tx.execute(
            "INSERT INTO plays (session_tag, word_id, user_answer, is_correct, score, target, played_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tag_text,
                play.word_id,
                play.user_answer,
                play.is_correct,
                delta.score,
                delta.target,
                play.played_at,
            ],
        )?;
        let play_id = tx.last_insert_rowid();

        let total_score: i64 = tx.query_row(
            "UPDATE game_sessions SET total_score = total_score + ?1
             WHERE session_tag = ?2 RETURNING total_score",
            params![delta.score, tag_text],
            |row| row.get(0),
        )?;
        tx.commit()?;

        Ok(RecordedPlay {
            play: Play {
                id: play_id,
                session_tag: tag,
                word_id: play.word_id,
                user_answer: play.user_answer.clone(),
                is_correct: play.is_correct,
                score: delta.score,
                target: delta.target,
                played_at: play.played_at,
            },
            total_score,
            target_total: snapshot.target_total.saturating_add(delta.target),
        })
    }

    fn session_summary(&self, tag: SessionTag) -> Result<Option<SessionSummary>, StoreError> {
        let conn = self.conn.lock();
        let summary = conn
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS},
                            COALESCE(SUM(p.target), 0),
                            COUNT(p.play_id),
                            COALESCE(SUM(CASE WHEN p.is_correct = 0 THEN 1 ELSE 0 END), 0)
                     FROM game_sessions g
                     LEFT JOIN plays p ON p.session_tag = g.session_tag
                     WHERE g.session_tag = ?1
                     GROUP BY g.session_tag"
                ),
                params![tag.to_string()],
                |row| {
                    Ok(SessionSummary {
                        session: session_at(row, 0)?,
                        target_total: row.get(6)?,
                        play_count: row.get::<_, i64>(7)?.max(0) as u64,
                        wrong_count: row.get::<_, i64>(8)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(summary)
    }

    fn history(&self, user_id: i64, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT p.play_id, p.session_tag, p.word_id, p.user_answer, p.is_correct,
                    p.score, p.target, p.played_at, g.started_at, {WORD_COLUMNS}
             FROM plays p
             JOIN game_sessions g ON p.session_tag = g.session_tag
             JOIN words w ON p.word_id = w.word_id
             WHERE g.user_id = ?1
             ORDER BY p.played_at DESC, p.play_id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(HistoryEntry {
                play: Play {
                    id: row.get(0)?,
                    session_tag: tag_at(row, 1)?,
                    word_id: row.get(2)?,
                    user_answer: row.get(3)?,
                    is_correct: row.get(4)?,
                    score: row.get(5)?,
                    target: row.get(6)?,
                    played_at: row.get(7)?,
                },
                session_started_at: row.get(8)?,
                word: word_at(row, 9)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
