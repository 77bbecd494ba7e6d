//! Error taxonomy shared by every service in the crate.

use crate::cursor::CursorEncodeError;
use crate::model::SessionTag;
use crate::store::StoreError;
use crate::translate::TranslateError;

/// Coarse classification used by transport layers to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Provider,
    Internal,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("no words available for {language}/{difficulty}")]
    NoWordsAvailable { language: String, difficulty: String },

    #[error("source word {0} not found")]
    SourceWordNotFound(i64),

    #[error("session {0} not found")]
    SessionNotFound(SessionTag),

    #[error("level {0} not found")]
    LevelNotFound(i64),

    #[error("session {0} is already finished")]
    SessionFinished(SessionTag),

    #[error("translation provider error: {0}")]
    Provider(#[from] TranslateError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cursor(#[from] CursorEncodeError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,
}

impl QuizError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            QuizError::Validation(_) | QuizError::SessionFinished(_) => ErrorKind::Validation,
            QuizError::NoWordsAvailable { .. }
            | QuizError::SourceWordNotFound(_)
            | QuizError::SessionNotFound(_)
            | QuizError::LevelNotFound(_) => ErrorKind::NotFound,
            QuizError::Provider(_) => ErrorKind::Provider,
            QuizError::Store(_) | QuizError::Cursor(_) => ErrorKind::Internal,
            QuizError::Cancelled | QuizError::DeadlineExceeded => ErrorKind::Cancelled,
        }
    }
}

pub type QuizResult<T> = Result<T, QuizError>;
