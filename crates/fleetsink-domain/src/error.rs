use crate::reading::DecodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("payload decode error: {0}")]
    PayloadDecode(#[from] DecodeError),

    #[error("repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;
