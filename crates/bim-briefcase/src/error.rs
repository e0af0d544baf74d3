use bim_core::{DgnCode, LockLevel, LockableId, RepositoryError};
use bim_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BriefcaseError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("local resource store error: {0}")]
    Storage(#[from] StorageError),
    #[error("malformed lockable id: {0}")]
    MalformedLockable(LockableId),
    #[error("invalid code: {0}")]
    InvalidCode(DgnCode),
    #[error("cannot demote {id} from {held:?} to {requested:?}")]
    InvalidDemotion {
        id: LockableId,
        held: LockLevel,
        requested: LockLevel,
    },
    #[error("local resource cache is invalid")]
    CacheInvalid,
    #[error("no bulk operation in progress")]
    NoBulkOperation,
}

impl BriefcaseError {
    pub fn repository_error(&self) -> Option<&RepositoryError> {
        match self {
            BriefcaseError::Repository(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_server_unavailable(&self) -> bool {
        self.repository_error()
            .map(RepositoryError::allows_offline)
            .unwrap_or(false)
    }
}
