use crate::codes::{DgnCode, DgnCodeInfo};
use crate::locks::{DgnLock, LockRequest};
use crate::status::RepositoryError;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseOptions {
    pub lock_state: bool,
    pub code_state: bool,
}

impl ResponseOptions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn lock_state() -> Self {
        Self {
            lock_state: true,
            code_state: false,
        }
    }

    pub fn code_state() -> Self {
        Self {
            lock_state: false,
            code_state: true,
        }
    }

    pub fn all() -> Self {
        Self {
            lock_state: true,
            code_state: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    Acquire,
    Query,
    FastQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resources {
    Locks,
    Codes,
    All,
}

impl Resources {
    pub fn includes_locks(&self) -> bool {
        matches!(self, Resources::Locks | Resources::All)
    }

    pub fn includes_codes(&self) -> bool {
        matches!(self, Resources::Codes | Resources::All)
    }
}

/// The locks and codes an operation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub locks: LockRequest,
    pub codes: BTreeSet<DgnCode>,
    pub options: ResponseOptions,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ResponseOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn insert_code(&mut self, code: DgnCode) {
        self.codes.insert(code);
    }

    pub fn merge(&mut self, other: &Request) {
        self.locks.merge(&other.locks);
        self.codes.extend(other.codes.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.codes.is_empty()
    }

    pub fn reset(&mut self) {
        self.locks.clear();
        self.codes.clear();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub purpose: RequestPurpose,
    pub options: ResponseOptions,
    pub denied_locks: Vec<DgnLock>,
    pub denied_codes: Vec<DgnCodeInfo>,
    error: Option<RepositoryError>,
}

impl Response {
    pub fn success(purpose: RequestPurpose, options: ResponseOptions) -> Self {
        Self {
            purpose,
            options,
            denied_locks: Vec::new(),
            denied_codes: Vec::new(),
            error: None,
        }
    }

    pub fn failure(
        purpose: RequestPurpose,
        options: ResponseOptions,
        error: RepositoryError,
    ) -> Self {
        Self {
            error: Some(error),
            ..Self::success(purpose, options)
        }
    }

    pub fn set_error(&mut self, error: RepositoryError) {
        self.error = Some(error);
    }

    pub fn error(&self) -> Option<&RepositoryError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn result(&self) -> Result<(), RepositoryError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Snapshot of everything the authority knows about a briefcase's resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeldResources {
    pub locks: Vec<DgnLock>,
    pub codes: Vec<DgnCode>,
    pub unavailable_locks: Vec<DgnLock>,
    pub unavailable_codes: Vec<DgnCodeInfo>,
}
