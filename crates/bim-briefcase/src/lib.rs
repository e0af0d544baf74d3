use bim_core::{
    DgnCode, DgnCodeInfo, DgnLock, ElementId, LockLevel, LockableId, ModelId, Request, Resources,
    Response,
};
use std::sync::Arc;

pub mod authority;
pub mod bulk;
pub mod catalog;
pub mod config;
pub mod error;
pub mod manager;
pub mod master;

pub use authority::RepositoryAuthority;
pub use bulk::BulkUpdateBriefcaseManager;
pub use catalog::{BriefcaseCatalog, BriefcaseIdentity, ElementRecord, ModelRecord};
pub use config::BriefcaseConfig;
pub use error::BriefcaseError;
pub use manager::BriefcaseManagerBase;
pub use master::MasterBriefcaseManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalDbState {
    New,
    Ready,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementOpcode {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareAction {
    /// Fail unless the local cache already holds everything.
    Verify,
    /// Ask the repository for whatever is missing.
    Acquire,
}

/// Operations an editing session runs before and after mutating elements
/// and models. All methods are client-thread only.
pub trait BriefcaseManager {
    fn state(&self) -> LocalDbState;

    fn prepare_for_element_operation(
        &mut self,
        request: &mut Request,
        element: &ElementRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError>;

    fn prepare_for_model_operation(
        &mut self,
        request: &mut Request,
        model: &ModelRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError>;

    /// Acquires or verifies a request built by one of the `prepare_*` calls.
    fn apply_prepare_action(
        &mut self,
        request: &Request,
        action: PrepareAction,
    ) -> Result<(), BriefcaseError>;

    fn acquire(&mut self, request: &Request, cull: bool) -> Result<Response, BriefcaseError>;

    /// Objects created in this session are exclusively locked locally,
    /// without a round-trip to the repository.
    fn on_element_inserted(&mut self, element: ElementId) -> Result<(), BriefcaseError>;

    fn on_model_inserted(&mut self, model: ModelId) -> Result<(), BriefcaseError>;

    fn are_resources_held(&mut self, request: &Request) -> Result<bool, BriefcaseError>;

    fn are_resources_available(&mut self, request: &Request) -> Result<Response, BriefcaseError>;

    fn query_lock_level(&mut self, id: &LockableId) -> Result<LockLevel, BriefcaseError>;

    fn query_lock_levels(&mut self, ids: &[LockableId]) -> Result<Vec<DgnLock>, BriefcaseError>;

    fn query_code_states(&mut self, codes: &[DgnCode])
        -> Result<Vec<DgnCodeInfo>, BriefcaseError>;

    fn demote(&mut self, locks: &[DgnLock], codes: &[DgnCode]) -> Result<(), BriefcaseError>;

    fn relinquish(&mut self, which: Resources) -> Result<(), BriefcaseError>;

    fn refresh_from_repository(&mut self) -> Result<(), BriefcaseError>;

    fn clear_user_held_codes_locks(&mut self) -> Result<(), BriefcaseError>;

    fn start_bulk_operation(&mut self);

    fn end_bulk_operation(&mut self) -> Result<Response, BriefcaseError>;

    fn is_bulk_operation(&self) -> bool;

    fn on_commit(&mut self) -> Result<(), BriefcaseError>;

    fn on_applied_changes(&mut self) -> Result<(), BriefcaseError>;

    fn on_undo_redo(&mut self) -> Result<(), BriefcaseError>;

    fn prepare_for_element(
        &mut self,
        element: &ElementRecord,
        opcode: ElementOpcode,
        action: PrepareAction,
    ) -> Result<(), BriefcaseError> {
        let mut request = Request::new();
        self.prepare_for_element_operation(&mut request, element, opcode)?;
        self.apply_prepare_action(&request, action)
    }

    fn prepare_for_model(
        &mut self,
        model: &ModelRecord,
        opcode: ElementOpcode,
        action: PrepareAction,
    ) -> Result<(), BriefcaseError> {
        let mut request = Request::new();
        self.prepare_for_model_operation(&mut request, model, opcode)?;
        self.apply_prepare_action(&request, action)
    }
}

/// Picks the manager flavor once, when the briefcase is opened. The master
/// copy owns everything and never talks to the repository.
pub fn open_briefcase_manager(
    catalog: Arc<dyn BriefcaseCatalog>,
    authority: Arc<dyn RepositoryAuthority>,
    config: BriefcaseConfig,
) -> Box<dyn BriefcaseManager> {
    if catalog.identity().is_master() {
        Box::new(MasterBriefcaseManager::new())
    } else {
        Box::new(BulkUpdateBriefcaseManager::new(BriefcaseManagerBase::new(
            catalog, authority, config,
        )))
    }
}
