#![allow(dead_code)]

use bim_briefcase::{
    BriefcaseCatalog, BriefcaseConfig, BriefcaseIdentity, BriefcaseManagerBase, ElementRecord,
    RepositoryAuthority,
};
use bim_core::{
    BriefcaseId, CodeSpecId, DgnCode, DgnLock, ElementId, HeldResources, LockLevel, LockableId,
    ModelId, RepositoryError, Request, RequestPurpose, Resources, Response,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0)
        .single()
        .expect("valid timestamp")
}

pub fn code(value: &str) -> DgnCode {
    DgnCode::new(CodeSpecId(7), "site", value)
}

pub fn lock(id: LockableId, level: LockLevel) -> DgnLock {
    DgnLock::new(id, level)
}

/// Authority stub with a mutable snapshot of held resources.
#[derive(Default)]
pub struct ScriptedAuthority {
    held: Mutex<HeldResources>,
    acquire_calls: AtomicUsize,
    query_calls: AtomicUsize,
    unreachable: AtomicBool,
    forbid_acquire: AtomicBool,
    deny: Mutex<Option<RepositoryError>>,
    demoted: Mutex<Vec<DgnLock>>,
    relinquished: Mutex<Vec<Resources>>,
}

impl ScriptedAuthority {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_held(held: HeldResources) -> Arc<Self> {
        let authority = Self::default();
        *authority.held.lock().expect("held lock") = held;
        Arc::new(authority)
    }

    pub fn set_held(&self, held: HeldResources) {
        *self.held.lock().expect("held lock") = held;
    }

    pub fn held(&self) -> HeldResources {
        self.held.lock().expect("held lock").clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Any later `acquire` call panics the test.
    pub fn forbid_acquire(&self) {
        self.forbid_acquire.store(true, Ordering::SeqCst);
    }

    pub fn deny_with(&self, error: RepositoryError) {
        *self.deny.lock().expect("deny lock") = Some(error);
    }

    pub fn allow(&self) {
        *self.deny.lock().expect("deny lock") = None;
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn demoted(&self) -> Vec<DgnLock> {
        self.demoted.lock().expect("demoted lock").clone()
    }

    pub fn relinquished(&self) -> Vec<Resources> {
        self.relinquished.lock().expect("relinquished lock").clone()
    }

    fn check_reachable(&self) -> Result<(), RepositoryError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RepositoryError::ServerUnavailable(
                "scripted outage".to_string(),
            ));
        }
        Ok(())
    }
}

impl RepositoryAuthority for ScriptedAuthority {
    fn query_held_resources(
        &self,
        _identity: &BriefcaseIdentity,
    ) -> Result<HeldResources, RepositoryError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        Ok(self.held())
    }

    fn acquire(
        &self,
        request: &Request,
        _identity: &BriefcaseIdentity,
    ) -> Result<Response, RepositoryError> {
        if self.forbid_acquire.load(Ordering::SeqCst) {
            panic!("authority contacted for {request:?}");
        }
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;

        if let Some(error) = self.deny.lock().expect("deny lock").clone() {
            let mut response = Response::failure(RequestPurpose::Acquire, request.options, error);
            if request.options.lock_state {
                response.denied_locks = request.locks.to_vec();
            }
            return Ok(response);
        }

        let mut held = self.held.lock().expect("held lock");
        let mut locks = held.locks.iter().copied().collect::<bim_core::LockRequest>();
        locks.merge(&request.locks);
        held.locks = locks.to_vec();
        for code in &request.codes {
            if !held.codes.contains(code) {
                held.codes.push(code.clone());
            }
        }
        Ok(Response::success(RequestPurpose::Acquire, request.options))
    }

    fn demote(
        &self,
        locks: &[DgnLock],
        codes: &[DgnCode],
        _identity: &BriefcaseIdentity,
    ) -> Result<(), RepositoryError> {
        self.check_reachable()?;
        let mut held = self.held.lock().expect("held lock");
        for change in locks {
            held.locks.retain(|existing| existing.id != change.id);
            if change.level != LockLevel::None {
                held.locks.push(*change);
            }
        }
        held.codes.retain(|existing| !codes.contains(existing));
        self.demoted
            .lock()
            .expect("demoted lock")
            .extend_from_slice(locks);
        Ok(())
    }

    fn relinquish(
        &self,
        which: Resources,
        _identity: &BriefcaseIdentity,
    ) -> Result<(), RepositoryError> {
        self.check_reachable()?;
        let mut held = self.held.lock().expect("held lock");
        if which.includes_locks() {
            held.locks.clear();
        }
        if which.includes_codes() {
            held.codes.clear();
        }
        self.relinquished
            .lock()
            .expect("relinquished lock")
            .push(which);
        Ok(())
    }
}

/// In-memory briefcase document living in its own temp directory.
pub struct MemoryCatalog {
    _dir: TempDir,
    identity: BriefcaseIdentity,
    models: Mutex<BTreeMap<ModelId, Vec<ElementId>>>,
    elements: Mutex<BTreeMap<ElementId, ElementRecord>>,
    used_locks: Mutex<BTreeSet<LockableId>>,
    used_codes: Mutex<BTreeSet<DgnCode>>,
    pending_changes: AtomicBool,
}

impl MemoryCatalog {
    pub fn new(briefcase_id: BriefcaseId) -> Arc<Self> {
        let dir = TempDir::new().expect("tempdir");
        let identity = BriefcaseIdentity {
            db_path: dir.path().join("project.bim"),
            briefcase_id,
            creation_date: created_at(),
        };
        Arc::new(Self {
            _dir: dir,
            identity,
            models: Mutex::new(BTreeMap::new()),
            elements: Mutex::new(BTreeMap::new()),
            used_locks: Mutex::new(BTreeSet::new()),
            used_codes: Mutex::new(BTreeSet::new()),
            pending_changes: AtomicBool::new(false),
        })
    }

    /// Two models: model 10 with elements 100..=102, model 20 with 200..=201.
    pub fn populated() -> Arc<Self> {
        let catalog = Self::new(BriefcaseId(3));
        catalog.add_model(ModelId(10), &[100, 101, 102]);
        catalog.add_model(ModelId(20), &[200, 201]);
        catalog
    }

    pub fn add_model(&self, model: ModelId, elements: &[u64]) {
        let mut models = self.models.lock().expect("models lock");
        let mut records = self.elements.lock().expect("elements lock");
        let ids = models.entry(model).or_default();
        for raw in elements {
            let id = ElementId(*raw);
            ids.push(id);
            records.insert(
                id,
                ElementRecord::new(id, model, code(&format!("element-{raw}"))),
            );
        }
    }

    pub fn mark_lock_used(&self, id: LockableId) {
        self.used_locks.lock().expect("used lock").insert(id);
    }

    pub fn mark_code_used(&self, code: DgnCode) {
        self.used_codes.lock().expect("used codes lock").insert(code);
    }

    pub fn set_pending_changes(&self, pending: bool) {
        self.pending_changes.store(pending, Ordering::SeqCst);
    }
}

impl BriefcaseCatalog for MemoryCatalog {
    fn identity(&self) -> BriefcaseIdentity {
        self.identity.clone()
    }

    fn model_ids(&self) -> Vec<ModelId> {
        self.models
            .lock()
            .expect("models lock")
            .keys()
            .copied()
            .collect()
    }

    fn elements_in_model(&self, model: ModelId) -> Vec<ElementId> {
        self.models
            .lock()
            .expect("models lock")
            .get(&model)
            .cloned()
            .unwrap_or_default()
    }

    fn element(&self, id: ElementId) -> Option<ElementRecord> {
        self.elements.lock().expect("elements lock").get(&id).cloned()
    }

    fn is_lock_used(&self, id: &LockableId) -> bool {
        self.used_locks.lock().expect("used lock").contains(id)
    }

    fn is_code_used(&self, code: &DgnCode) -> bool {
        self.used_codes.lock().expect("used codes lock").contains(code)
    }

    fn has_pending_changes(&self) -> bool {
        self.pending_changes.load(Ordering::SeqCst)
    }
}

pub fn open_base(
    catalog: &Arc<MemoryCatalog>,
    authority: &Arc<ScriptedAuthority>,
) -> BriefcaseManagerBase {
    open_base_with(catalog, authority, BriefcaseConfig::default())
}

pub fn open_base_with(
    catalog: &Arc<MemoryCatalog>,
    authority: &Arc<ScriptedAuthority>,
    config: BriefcaseConfig,
) -> BriefcaseManagerBase {
    let catalog: Arc<dyn BriefcaseCatalog> = catalog.clone();
    let authority: Arc<dyn RepositoryAuthority> = authority.clone();
    BriefcaseManagerBase::new(catalog, authority, config)
}
