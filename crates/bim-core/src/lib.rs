use serde::{Deserialize, Serialize};
use std::fmt;

pub mod codes;
pub mod locks;
pub mod request;
pub mod status;

pub use codes::{CodeState, DgnCode, DgnCodeInfo};
pub use locks::{DgnLock, LockLevel, LockRequest, LockableId, LockableType};
pub use request::{HeldResources, Request, RequestPurpose, Resources, Response, ResponseOptions};
pub use status::RepositoryError;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl ElementId {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModelId(pub u64);

impl ModelId {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CodeSpecId(pub u64);

impl CodeSpecId {
    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for CodeSpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifies one working copy of a repository. Id 0 is the master copy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BriefcaseId(pub u32);

impl BriefcaseId {
    pub const MASTER: BriefcaseId = BriefcaseId(0);

    pub fn is_master(&self) -> bool {
        *self == Self::MASTER
    }
}

impl fmt::Display for BriefcaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
