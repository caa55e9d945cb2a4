pub mod engine;
pub mod progress;
pub mod session;
pub mod store;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RankError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("progress format error: {0}")]
    Format(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no comparison is pending for this session")]
    NotComparing,
    #[error("ranking is not complete")]
    NotComplete,
}
