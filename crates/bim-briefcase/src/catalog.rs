use bim_core::{BriefcaseId, DgnCode, ElementId, LockableId, ModelId};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BriefcaseIdentity {
    pub db_path: PathBuf,
    pub briefcase_id: BriefcaseId,
    pub creation_date: DateTime<Utc>,
}

impl BriefcaseIdentity {
    pub fn is_master(&self) -> bool {
        self.briefcase_id.is_master()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRecord {
    /// Zero until the element has been inserted.
    pub id: ElementId,
    pub model: ModelId,
    pub code: DgnCode,
}

impl ElementRecord {
    pub fn new(id: ElementId, model: ModelId, code: DgnCode) -> Self {
        Self { id, model, code }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRecord {
    pub id: ModelId,
    pub code: DgnCode,
}

impl ModelRecord {
    pub fn new(id: ModelId, code: DgnCode) -> Self {
        Self { id, code }
    }
}

/// Read access to the briefcase document the resources protect.
pub trait BriefcaseCatalog: Send + Sync {
    fn identity(&self) -> BriefcaseIdentity;

    fn model_ids(&self) -> Vec<ModelId>;

    fn elements_in_model(&self, model: ModelId) -> Vec<ElementId>;

    /// The persisted state of an element, if it exists.
    fn element(&self, id: ElementId) -> Option<ElementRecord>;

    /// Whether uncommitted or unpushed local changes depend on the lock.
    fn is_lock_used(&self, id: &LockableId) -> bool;

    fn is_code_used(&self, code: &DgnCode) -> bool;

    fn has_pending_changes(&self) -> bool;
}
