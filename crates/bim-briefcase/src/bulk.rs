use crate::catalog::{ElementRecord, ModelRecord};
use crate::error::BriefcaseError;
use crate::manager::BriefcaseManagerBase;
use crate::{BriefcaseManager, ElementOpcode, LocalDbState, PrepareAction};
use bim_core::{
    DgnCode, DgnCodeInfo, DgnLock, ElementId, LockLevel, LockableId, ModelId, Request,
    RequestPurpose, Resources, Response, ResponseOptions,
};
use tracing::debug;

/// Defers lock and code acquisition while a bulk operation is open and sends
/// everything it collected in one request when the outermost one ends.
pub struct BulkUpdateBriefcaseManager {
    base: BriefcaseManagerBase,
    bulk_depth: u32,
    pending: Request,
}

impl BulkUpdateBriefcaseManager {
    pub fn new(base: BriefcaseManagerBase) -> Self {
        Self {
            base,
            bulk_depth: 0,
            pending: Request::new(),
        }
    }

    pub fn base(&self) -> &BriefcaseManagerBase {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut BriefcaseManagerBase {
        &mut self.base
    }

    pub fn pending_request(&self) -> &Request {
        &self.pending
    }

    pub fn into_base(self) -> BriefcaseManagerBase {
        self.base
    }

    fn accumulate(&mut self, request: &Request) {
        if !self.is_bulk_operation() {
            return;
        }
        let config = self.base.config();
        self.pending.locks.merge(&request.locks);
        let codes = request
            .codes
            .iter()
            .filter(|code| !config.is_bulk_filtered(code.spec))
            .cloned()
            .collect::<Vec<_>>();
        self.pending.codes.extend(codes);
    }

    /// Sends the pending request. It is only cleared once the repository
    /// grants it; a refusal or an outage keeps it for the next flush.
    fn flush(&mut self) -> Result<Response, BriefcaseError> {
        if self.pending.is_empty() {
            return Ok(Response::success(
                RequestPurpose::Acquire,
                ResponseOptions::none(),
            ));
        }
        debug!(
            locks = self.pending.locks.len(),
            codes = self.pending.codes.len(),
            "flushing bulk request"
        );
        let response = self.base.acquire(&self.pending, true)?;
        if response.is_success() {
            self.pending = Request::new();
        } else {
            debug!("bulk request refused, keeping it pending");
        }
        Ok(response)
    }

    /// Sends the pending request at a revision boundary without closing the
    /// bulk operation.
    pub fn on_revision_boundary(&mut self) -> Result<Response, BriefcaseError> {
        let response = self.flush()?;
        self.base.save()?;
        Ok(response)
    }
}

impl BriefcaseManager for BulkUpdateBriefcaseManager {
    fn state(&self) -> LocalDbState {
        self.base.state()
    }

    fn prepare_for_element_operation(
        &mut self,
        request: &mut Request,
        element: &ElementRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        let mut needed = Request::new();
        self.base
            .prepare_for_element_operation(&mut needed, element, opcode)?;
        self.accumulate(&needed);
        request.merge(&needed);
        Ok(())
    }

    fn prepare_for_model_operation(
        &mut self,
        request: &mut Request,
        model: &ModelRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        let mut needed = Request::new();
        self.base
            .prepare_for_model_operation(&mut needed, model, opcode)?;
        self.accumulate(&needed);
        request.merge(&needed);
        Ok(())
    }

    fn apply_prepare_action(
        &mut self,
        request: &Request,
        action: PrepareAction,
    ) -> Result<(), BriefcaseError> {
        if self.is_bulk_operation() {
            self.accumulate(request);
            return Ok(());
        }
        self.base.apply_prepare_action(request, action)
    }

    fn acquire(&mut self, request: &Request, cull: bool) -> Result<Response, BriefcaseError> {
        self.base.acquire(request, cull)
    }

    fn on_element_inserted(&mut self, element: ElementId) -> Result<(), BriefcaseError> {
        self.base.on_element_inserted(element)
    }

    fn on_model_inserted(&mut self, model: ModelId) -> Result<(), BriefcaseError> {
        self.base.on_model_inserted(model)
    }

    fn are_resources_held(&mut self, request: &Request) -> Result<bool, BriefcaseError> {
        if self.is_bulk_operation() && !self.pending.is_empty() {
            return Ok(true);
        }
        self.base.are_resources_held(request)
    }

    fn are_resources_available(&mut self, request: &Request) -> Result<Response, BriefcaseError> {
        self.base.are_resources_available(request)
    }

    fn query_lock_level(&mut self, id: &LockableId) -> Result<LockLevel, BriefcaseError> {
        self.base.query_lock_level(id)
    }

    fn query_lock_levels(&mut self, ids: &[LockableId]) -> Result<Vec<DgnLock>, BriefcaseError> {
        self.base.query_lock_levels(ids)
    }

    fn query_code_states(
        &mut self,
        codes: &[DgnCode],
    ) -> Result<Vec<DgnCodeInfo>, BriefcaseError> {
        self.base.query_code_states(codes)
    }

    fn demote(&mut self, locks: &[DgnLock], codes: &[DgnCode]) -> Result<(), BriefcaseError> {
        self.base.demote(locks, codes)
    }

    fn relinquish(&mut self, which: Resources) -> Result<(), BriefcaseError> {
        self.base.relinquish(which)
    }

    fn refresh_from_repository(&mut self) -> Result<(), BriefcaseError> {
        self.base.refresh_from_repository()
    }

    fn clear_user_held_codes_locks(&mut self) -> Result<(), BriefcaseError> {
        self.base.clear_user_held_codes_locks()
    }

    fn start_bulk_operation(&mut self) {
        self.bulk_depth += 1;
    }

    fn end_bulk_operation(&mut self) -> Result<Response, BriefcaseError> {
        if self.bulk_depth == 0 {
            return Err(BriefcaseError::NoBulkOperation);
        }
        self.bulk_depth -= 1;
        if self.bulk_depth > 0 {
            return Ok(Response::success(
                RequestPurpose::Acquire,
                ResponseOptions::none(),
            ));
        }
        self.flush()
    }

    fn is_bulk_operation(&self) -> bool {
        self.bulk_depth > 0
    }

    fn on_commit(&mut self) -> Result<(), BriefcaseError> {
        self.base.save()
    }

    fn on_applied_changes(&mut self) -> Result<(), BriefcaseError> {
        self.base.save()
    }

    fn on_undo_redo(&mut self) -> Result<(), BriefcaseError> {
        self.base.save()
    }
}
