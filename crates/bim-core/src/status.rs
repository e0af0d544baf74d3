use thiserror::Error;

/// Failures reported by (or on behalf of) the repository authority.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("repository server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("local state out of sync with repository: {0}")]
    SyncError(String),
    #[error("lock already held by another briefcase")]
    LockAlreadyHeld,
    #[error("lock not held")]
    LockNotHeld,
    #[error("lock is required by local changes")]
    LockUsed,
    #[error("code reserved by another briefcase")]
    CodeUnavailable,
    #[error("code not reserved")]
    CodeNotReserved,
    #[error("code is used by local changes")]
    CodeUsed,
    #[error("briefcase has pending transactions")]
    PendingTransactions,
    #[error("a newer revision must be merged first")]
    RevisionRequired,
    #[error("repository is locked")]
    RepositoryIsLocked,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RepositoryError {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryError::ServerUnavailable(_) => "server_unavailable",
            RepositoryError::SyncError(_) => "sync_error",
            RepositoryError::LockAlreadyHeld => "lock_already_held",
            RepositoryError::LockNotHeld => "lock_not_held",
            RepositoryError::LockUsed => "lock_used",
            RepositoryError::CodeUnavailable => "code_unavailable",
            RepositoryError::CodeNotReserved => "code_not_reserved",
            RepositoryError::CodeUsed => "code_used",
            RepositoryError::PendingTransactions => "pending_transactions",
            RepositoryError::RevisionRequired => "revision_required",
            RepositoryError::RepositoryIsLocked => "repository_is_locked",
            RepositoryError::InvalidRequest(_) => "invalid_request",
            RepositoryError::InvalidResponse(_) => "invalid_response",
        }
    }

    /// Callers may continue offline on whatever the local cache holds.
    pub fn allows_offline(&self) -> bool {
        matches!(self, RepositoryError::ServerUnavailable(_))
    }
}
