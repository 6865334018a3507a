use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoveError {
    #[error("Key not found")]
    KeyNotFound,
    #[error("Value not matching")]
    ValueNotMatching,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplaceError {
    #[error("Key not found")]
    KeyNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError<T: std::error::Error + Debug + 'static> {
    #[error("Key not found")]
    KeyNotFound,
    #[error("Value callback returned error: {0}")]
    ValueCallbackError(#[from] T),
}
