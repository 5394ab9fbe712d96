//! Error types for boundaries where callers need to match on a variant.
//!
//! Internal orchestration (engine, session server) uses `anyhow::Result`
//! throughout, per the ambient error-handling convention; this module only
//! covers the few seams — signing and the journal's query guard — where a
//! caller needs a typed error rather than a rendered message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("missing private key material for {venue}")]
    MissingKey { venue: &'static str },
    #[error("failed to parse private key: {0}")]
    KeyParse(String),
    #[error("signing operation failed: {0}")]
    Sign(String),
}

#[derive(Debug, Error)]
pub enum QueryGuardError {
    #[error("only SELECT/WITH statements are permitted, got: {0}")]
    NotReadOnly(String),
    #[error("empty query")]
    Empty,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("group {0} not found")]
    GroupNotFound(i64),
    #[error("leg {0} not found")]
    LegNotFound(i64),
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error(transparent)]
    Query(#[from] QueryGuardError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
