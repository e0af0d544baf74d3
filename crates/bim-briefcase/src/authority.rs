use crate::catalog::BriefcaseIdentity;
use bim_core::{DgnCode, DgnLock, HeldResources, RepositoryError, Request, Resources, Response};

/// The remote service that grants locks and reserves codes.
///
/// Transport failures come back as `Err` (`ServerUnavailable`, `SyncError`).
/// A request the authority refuses is still `Ok`: the returned [`Response`]
/// carries the error together with the denied locks and codes.
pub trait RepositoryAuthority: Send + Sync {
    fn query_held_resources(
        &self,
        identity: &BriefcaseIdentity,
    ) -> Result<HeldResources, RepositoryError>;

    fn acquire(
        &self,
        request: &Request,
        identity: &BriefcaseIdentity,
    ) -> Result<Response, RepositoryError>;

    fn demote(
        &self,
        locks: &[DgnLock],
        codes: &[DgnCode],
        identity: &BriefcaseIdentity,
    ) -> Result<(), RepositoryError>;

    fn relinquish(
        &self,
        which: Resources,
        identity: &BriefcaseIdentity,
    ) -> Result<(), RepositoryError>;
}
