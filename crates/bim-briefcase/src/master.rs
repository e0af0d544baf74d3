use crate::catalog::{ElementRecord, ModelRecord};
use crate::error::BriefcaseError;
use crate::{BriefcaseManager, ElementOpcode, LocalDbState, PrepareAction};
use bim_core::{
    BriefcaseId, CodeState, DgnCode, DgnCodeInfo, DgnLock, ElementId, LockLevel, LockableId,
    ModelId, Request, RequestPurpose, Resources, Response, ResponseOptions,
};

/// The master copy holds every lock and code implicitly.
#[derive(Debug, Default)]
pub struct MasterBriefcaseManager {
    bulk_depth: u32,
}

impl MasterBriefcaseManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BriefcaseManager for MasterBriefcaseManager {
    fn state(&self) -> LocalDbState {
        LocalDbState::Ready
    }

    fn prepare_for_element_operation(
        &mut self,
        _request: &mut Request,
        _element: &ElementRecord,
        _opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn prepare_for_model_operation(
        &mut self,
        _request: &mut Request,
        _model: &ModelRecord,
        _opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn apply_prepare_action(
        &mut self,
        _request: &Request,
        _action: PrepareAction,
    ) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn acquire(&mut self, request: &Request, _cull: bool) -> Result<Response, BriefcaseError> {
        Ok(Response::success(RequestPurpose::Acquire, request.options))
    }

    fn on_element_inserted(&mut self, _element: ElementId) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn on_model_inserted(&mut self, _model: ModelId) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn are_resources_held(&mut self, _request: &Request) -> Result<bool, BriefcaseError> {
        Ok(true)
    }

    fn are_resources_available(&mut self, request: &Request) -> Result<Response, BriefcaseError> {
        Ok(Response::success(RequestPurpose::FastQuery, request.options))
    }

    fn query_lock_level(&mut self, id: &LockableId) -> Result<LockLevel, BriefcaseError> {
        if !id.is_valid() {
            return Err(BriefcaseError::MalformedLockable(*id));
        }
        Ok(LockLevel::Exclusive)
    }

    fn query_lock_levels(&mut self, ids: &[LockableId]) -> Result<Vec<DgnLock>, BriefcaseError> {
        let mut levels = Vec::with_capacity(ids.len());
        for id in ids {
            levels.push(DgnLock::new(*id, self.query_lock_level(id)?));
        }
        Ok(levels)
    }

    fn query_code_states(
        &mut self,
        codes: &[DgnCode],
    ) -> Result<Vec<DgnCodeInfo>, BriefcaseError> {
        Ok(codes
            .iter()
            .map(|code| DgnCodeInfo::new(code.clone(), CodeState::Reserved(BriefcaseId::MASTER)))
            .collect())
    }

    fn demote(&mut self, _locks: &[DgnLock], _codes: &[DgnCode]) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn relinquish(&mut self, _which: Resources) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn refresh_from_repository(&mut self) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn clear_user_held_codes_locks(&mut self) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn start_bulk_operation(&mut self) {
        self.bulk_depth += 1;
    }

    fn end_bulk_operation(&mut self) -> Result<Response, BriefcaseError> {
        if self.bulk_depth == 0 {
            return Err(BriefcaseError::NoBulkOperation);
        }
        self.bulk_depth -= 1;
        Ok(Response::success(
            RequestPurpose::Acquire,
            ResponseOptions::none(),
        ))
    }

    fn is_bulk_operation(&self) -> bool {
        self.bulk_depth > 0
    }

    fn on_commit(&mut self) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn on_applied_changes(&mut self) -> Result<(), BriefcaseError> {
        Ok(())
    }

    fn on_undo_redo(&mut self) -> Result<(), BriefcaseError> {
        Ok(())
    }
}
