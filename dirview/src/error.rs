use thiserror::Error;

use crate::path::PathError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("session token was rejected")]
    Unauthorized,
    #[error("transient failure: {0}")]
    Transient(String),
}

#[derive(Debug, Error)]
pub enum ViewError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("path error: {0}")]
    Path(#[from] PathError),
    #[error("file {0} was deleted")]
    Deleted(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("another task is already waiting for {0}")]
    WaiterBusy(String),
    #[error("the root folder can not be {0}")]
    RootFolder(&'static str),
    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl ViewError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ViewError::Fetch(FetchError::NotFound(_)))
    }
}
