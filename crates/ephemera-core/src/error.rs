use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no identity is connected")]
    NotAuthenticated,

    #[error("message content is empty")]
    EmptyContent,

    #[error("address must not be empty")]
    InvalidAddress,

    #[error("contact {0} already exists")]
    DuplicateContact(String),

    #[error("content codec failure: {0}")]
    Codec(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    pub(crate) fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
