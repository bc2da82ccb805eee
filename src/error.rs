use thiserror::Error;

/// Error taxonomy for the trie engine. All errors are surfaced to the
/// caller of the top-level operation; the engine never retries adapter
/// calls.
#[derive(Debug, Error)]
pub enum Error {
    #[error("key not found")]
    NotFound,

    #[error("malformed node bytes: {0}")]
    Decode(String),

    #[error("corrupt storage: {0}")]
    CorruptStorage(String),

    #[error("storage adapter failure: {0}")]
    Io(String),

    #[error("invalid operation: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;
