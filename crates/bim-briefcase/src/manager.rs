use crate::authority::RepositoryAuthority;
use crate::catalog::{BriefcaseCatalog, BriefcaseIdentity, ElementRecord, ModelRecord};
use crate::config::BriefcaseConfig;
use crate::error::BriefcaseError;
use crate::{ElementOpcode, LocalDbState, PrepareAction};
use bim_core::{
    CodeState, DgnCode, DgnCodeInfo, DgnLock, ElementId, HeldResources, LockLevel, LockRequest,
    LockableId, LockableType, ModelId, RepositoryError, Request, RequestPurpose, Resources,
    Response,
};
use bim_storage::{
    local_db_path, remove_local_file, Holder, LocalResourceStore, LocalStamp, StorageError,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Local cache of the locks and codes this briefcase holds, backed by the
/// `<dbfile>.local` store and reconciled against the repository authority.
pub struct BriefcaseManagerBase {
    catalog: Arc<dyn BriefcaseCatalog>,
    authority: Arc<dyn RepositoryAuthority>,
    config: BriefcaseConfig,
    identity: BriefcaseIdentity,
    local_path: PathBuf,
    store: Option<LocalResourceStore>,
    state: LocalDbState,
    exclusive_models: BTreeSet<ModelId>,
    db_exclusive: bool,
}

impl BriefcaseManagerBase {
    pub fn new(
        catalog: Arc<dyn BriefcaseCatalog>,
        authority: Arc<dyn RepositoryAuthority>,
        config: BriefcaseConfig,
    ) -> Self {
        let identity = catalog.identity();
        let local_path = local_db_path(&identity.db_path);
        Self {
            catalog,
            authority,
            config,
            identity,
            local_path,
            store: None,
            state: LocalDbState::New,
            exclusive_models: BTreeSet::new(),
            db_exclusive: false,
        }
    }

    pub fn state(&self) -> LocalDbState {
        self.state
    }

    pub fn config(&self) -> &BriefcaseConfig {
        &self.config
    }

    pub fn identity(&self) -> &BriefcaseIdentity {
        &self.identity
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Reuses a verified local file when allowed, otherwise rebuilds it from
    /// the repository. An `Invalid` cache is always rebuilt. Any failure
    /// leaves the cache `Invalid`.
    pub fn initialize(&mut self) -> Result<(), BriefcaseError> {
        if self.state == LocalDbState::Ready {
            return Ok(());
        }
        self.store = None;
        self.exclusive_models.clear();
        self.db_exclusive = false;

        if self.config.reuse_local_db && self.state == LocalDbState::New {
            if let Some(store) = self.use_existing_local_db() {
                self.store = Some(store);
                if let Err(err) = self.rebuild_exclusive_models() {
                    return Err(self.invalidate(err));
                }
                self.state = LocalDbState::Ready;
                info!(path = %self.local_path.display(), "reusing local resource cache");
                return Ok(());
            }
        }

        self.rebuild_from_repository()?;
        info!(
            path = %self.local_path.display(),
            models = self.exclusive_models.len(),
            "initialized local resource cache"
        );
        Ok(())
    }

    /// Discards whatever file is on disk, creates an empty stamped store and
    /// pulls the authority's snapshot into it.
    fn rebuild_from_repository(&mut self) -> Result<(), BriefcaseError> {
        self.store = None;
        self.exclusive_models.clear();
        self.db_exclusive = false;

        let store = match LocalResourceStore::create(&self.local_path) {
            Ok(store) => store,
            Err(err) => {
                self.state = LocalDbState::Invalid;
                warn!(error = %err, "failed to create local resource cache");
                return Err(err.into());
            }
        };
        if let Err(err) = store.write_stamp(&LocalStamp::current(self.identity.creation_date)) {
            self.state = LocalDbState::Invalid;
            return Err(err.into());
        }
        self.store = Some(store);

        if let Err(err) = self.pull() {
            self.state = LocalDbState::Invalid;
            warn!(error = %err, "pull from repository failed");
            return Err(err);
        }
        self.state = LocalDbState::Ready;
        self.save()
    }

    /// A pre-existing file is reused only when both stamps still match.
    fn use_existing_local_db(&self) -> Option<LocalResourceStore> {
        if !self.local_path.exists() {
            return None;
        }
        let store = match LocalResourceStore::open(&self.local_path) {
            Ok(store) => store,
            Err(err) => {
                debug!(error = %err, "existing local cache unreadable");
                return None;
            }
        };
        match store.read_stamp() {
            Ok(Some(stamp)) if stamp == LocalStamp::current(self.identity.creation_date) => {
                Some(store)
            }
            Ok(stamp) => {
                debug!(?stamp, "existing local cache stamp mismatch");
                None
            }
            Err(err) => {
                debug!(error = %err, "existing local cache stamp unreadable");
                None
            }
        }
    }

    fn ensure_ready(&mut self) -> Result<(), BriefcaseError> {
        match self.state {
            LocalDbState::Ready => Ok(()),
            LocalDbState::New => self.initialize(),
            LocalDbState::Invalid => Err(BriefcaseError::CacheInvalid),
        }
    }

    fn store(&self) -> Result<&LocalResourceStore, BriefcaseError> {
        self.store.as_ref().ok_or(BriefcaseError::CacheInvalid)
    }

    fn invalidate(&mut self, err: StorageError) -> BriefcaseError {
        warn!(error = %err, "local resource cache failed, marking invalid");
        self.state = LocalDbState::Invalid;
        RepositoryError::SyncError(err.to_string()).into()
    }

    /// Fills the tables from the authority's snapshot.
    pub fn pull(&mut self) -> Result<(), BriefcaseError> {
        let held = self.authority.query_held_resources(&self.identity)?;
        self.apply_held_resources(&held)?;
        debug!(
            locks = held.locks.len(),
            codes = held.codes.len(),
            unavailable_locks = held.unavailable_locks.len(),
            unavailable_codes = held.unavailable_codes.len(),
            "pulled held resources"
        );
        Ok(())
    }

    fn apply_held_resources(&mut self, held: &HeldResources) -> Result<(), BriefcaseError> {
        for lock in held.locks.iter().chain(held.unavailable_locks.iter()) {
            if !lock.id.is_valid() {
                return Err(RepositoryError::InvalidResponse(format!(
                    "malformed lockable id {}",
                    lock.id
                ))
                .into());
            }
        }

        let written = (|| -> Result<(), StorageError> {
            let store = opened(&self.store)?;
            store.insert_locks(Holder::Unavailable, &held.unavailable_locks)?;
            for info in &held.unavailable_codes {
                if info.code.is_valid() {
                    store.insert_unavailable_code(info)?;
                }
            }
            Ok(())
        })();
        written.map_err(|err| self.invalidate(err))?;

        self.insert_locks(held.locks.iter().copied())?;
        self.insert_codes(held.codes.iter())?;
        Ok(())
    }

    fn rebuild_exclusive_models(&mut self) -> Result<(), StorageError> {
        let store = opened(&self.store)?;
        self.db_exclusive =
            store.lock_level(Holder::Owned, &LockableId::db())? == Some(LockLevel::Exclusive);
        self.exclusive_models = store
            .exclusive_ids(Holder::Owned, LockableType::Model)?
            .into_iter()
            .map(ModelId)
            .collect();
        Ok(())
    }

    pub fn is_model_exclusively_locked(&self, model: ModelId) -> bool {
        self.db_exclusive || self.exclusive_models.contains(&model)
    }

    /// False when element locks in `model` are implied by a held exclusive lock.
    pub fn is_element_lock_required(&self, model: ModelId) -> bool {
        !self.is_model_exclusively_locked(model)
    }

    pub fn exclusively_locked_models(&self) -> &BTreeSet<ModelId> {
        &self.exclusive_models
    }

    /// Merges locks into the owned table, keeping the higher level, and
    /// expands exclusive db/model locks to everything they imply.
    pub fn insert_locks(
        &mut self,
        locks: impl IntoIterator<Item = DgnLock>,
    ) -> Result<(), BriefcaseError> {
        let locks = locks.into_iter().collect::<Vec<_>>();
        if let Some(bad) = locks.iter().find(|lock| !lock.id.is_valid()) {
            return Err(BriefcaseError::MalformedLockable(bad.id));
        }

        let written = self.write_locks(&locks);
        let newly_exclusive = written.map_err(|err| self.invalidate(err))?;
        if !newly_exclusive.is_empty() {
            debug!(models = newly_exclusive.len(), "expanded exclusive locks");
        }
        Ok(())
    }

    pub fn insert_lock(&mut self, lock: DgnLock) -> Result<(), BriefcaseError> {
        self.insert_locks([lock])
    }

    fn write_locks(&mut self, locks: &[DgnLock]) -> Result<Vec<ModelId>, StorageError> {
        let store = opened(&self.store)?;

        let mut db_now_exclusive = false;
        let mut models = Vec::new();
        for lock in locks {
            store.insert_lock(Holder::Owned, lock)?;
            if lock.level != LockLevel::Exclusive {
                continue;
            }
            match lock.id.kind() {
                LockableType::Db => db_now_exclusive = true,
                LockableType::Model => models.push(ModelId(lock.id.id())),
                LockableType::Element | LockableType::Schemas => {}
            }
        }

        if db_now_exclusive && !self.db_exclusive {
            self.db_exclusive = true;
            models.extend(self.catalog.model_ids());
        }

        let mut expanded = Vec::new();
        for model in models {
            if !self.exclusive_models.insert(model) {
                continue;
            }
            store.insert_lock(
                Holder::Owned,
                &DgnLock::new(LockableId::model(model), LockLevel::Exclusive),
            )?;
            for element in self.catalog.elements_in_model(model) {
                store.insert_lock(
                    Holder::Owned,
                    &DgnLock::new(LockableId::element(element), LockLevel::Exclusive),
                )?;
            }
            expanded.push(model);
        }
        Ok(expanded)
    }

    pub fn insert_codes<'a>(
        &mut self,
        codes: impl IntoIterator<Item = &'a DgnCode>,
    ) -> Result<(), BriefcaseError> {
        let written = (|| -> Result<(), StorageError> {
            let store = opened(&self.store)?;
            for code in codes {
                if code.is_valid() {
                    store.insert_code(code)?;
                }
            }
            Ok(())
        })();
        written.map_err(|err| self.invalidate(err))
    }

    fn cached_level(&self, id: &LockableId) -> Result<LockLevel, BriefcaseError> {
        let stored = self
            .store()?
            .lock_level(Holder::Owned, id)?
            .unwrap_or_default();
        if stored == LockLevel::Exclusive {
            return Ok(stored);
        }

        let implied = match id.kind() {
            LockableType::Model if self.is_model_exclusively_locked(ModelId(id.id())) => {
                LockLevel::Exclusive
            }
            LockableType::Element => match self.catalog.element(ElementId(id.id())) {
                Some(element) if self.is_model_exclusively_locked(element.model) => {
                    LockLevel::Exclusive
                }
                _ => LockLevel::None,
            },
            _ => LockLevel::None,
        };
        Ok(stored.max(implied))
    }

    fn wants_code(&self, code: &DgnCode) -> bool {
        code.is_valid() && self.config.is_code_managed(code.spec)
    }

    /// Drops everything the repository does not need to hear about: empty,
    /// invalid or unmanaged codes, and locks/codes already held locally.
    pub fn cull(&mut self, request: &mut Request) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;

        let mut held_codes = Vec::new();
        for code in &request.codes {
            if !self.wants_code(code) || self.store()?.contains_code(code)? {
                held_codes.push(code.clone());
            }
        }
        for code in held_codes {
            request.codes.remove(&code);
        }

        let mut held_locks = Vec::new();
        for lock in request.locks.iter() {
            if self.cached_level(&lock.id)? >= lock.level {
                held_locks.push(lock.id);
            }
        }
        for id in held_locks {
            request.locks.remove(&id);
        }
        Ok(())
    }

    /// Asks the authority for whatever `request` needs beyond the local cache.
    /// A refusal comes back as a `Response` carrying the error.
    pub fn acquire(&mut self, request: &Request, cull: bool) -> Result<Response, BriefcaseError> {
        self.ensure_ready()?;
        if let Some(bad) = request.locks.iter().find(|lock| !lock.id.is_valid()) {
            return Err(BriefcaseError::MalformedLockable(bad.id));
        }

        let mut outgoing = request.clone();
        if cull {
            self.cull(&mut outgoing)?;
        } else {
            outgoing.codes.retain(|code| code.is_valid());
        }
        if outgoing.is_empty() {
            return Ok(Response::success(RequestPurpose::Acquire, request.options));
        }

        let response = self.authority.acquire(&outgoing, &self.identity)?;
        if !response.is_success() {
            debug!(
                denied_locks = response.denied_locks.len(),
                denied_codes = response.denied_codes.len(),
                "repository refused request"
            );
            return Ok(response);
        }

        self.insert_locks(request.locks.iter())?;
        let codes = request
            .codes
            .iter()
            .filter(|code| self.wants_code(code))
            .cloned()
            .collect::<Vec<_>>();
        self.insert_codes(codes.iter())?;
        Ok(response)
    }

    pub fn acquire_locks(&mut self, locks: LockRequest) -> Result<(), BriefcaseError> {
        let request = Request {
            locks,
            ..Request::default()
        };
        self.acquire(&request, true)?.result()?;
        Ok(())
    }

    pub fn reserve_codes(
        &mut self,
        codes: impl IntoIterator<Item = DgnCode>,
    ) -> Result<(), BriefcaseError> {
        let mut request = Request::new();
        for code in codes {
            if !code.is_valid() {
                return Err(BriefcaseError::InvalidCode(code));
            }
            request.insert_code(code);
        }
        self.acquire(&request, true)?.result()?;
        Ok(())
    }

    /// Checks the local cache only.
    pub fn check_resources_held(&mut self, request: &Request) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        for lock in request.locks.iter() {
            if self.cached_level(&lock.id)? < lock.level {
                return Err(RepositoryError::LockNotHeld.into());
            }
        }
        for code in request.codes.iter().filter(|code| self.wants_code(code)) {
            if !self.store()?.contains_code(code)? {
                return Err(RepositoryError::CodeNotReserved.into());
            }
        }
        Ok(())
    }

    pub fn are_resources_held(&mut self, request: &Request) -> Result<bool, BriefcaseError> {
        match self.check_resources_held(request) {
            Ok(()) => Ok(true),
            Err(BriefcaseError::Repository(
                RepositoryError::LockNotHeld | RepositoryError::CodeNotReserved,
            )) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Answers from the cached view of other briefcases' holdings, without
    /// contacting the repository.
    pub fn are_resources_available(
        &mut self,
        request: &Request,
    ) -> Result<Response, BriefcaseError> {
        self.ensure_ready()?;
        let mut response = Response::success(RequestPurpose::FastQuery, request.options);
        let mut locks_denied = false;
        let mut codes_denied = false;

        for lock in request.locks.iter() {
            if let Some(element) = lock.id.as_element() {
                let in_owned_model = self
                    .catalog
                    .element(element)
                    .map(|record| self.is_model_exclusively_locked(record.model))
                    .unwrap_or(false);
                if in_owned_model {
                    continue;
                }
            }
            let Some(held) = self.store()?.lock_level(Holder::Unavailable, &lock.id)? else {
                continue;
            };
            if held.conflicts_with(lock.level) {
                locks_denied = true;
                if request.options.lock_state {
                    response.denied_locks.push(DgnLock::new(lock.id, held));
                }
            }
        }

        for code in request.codes.iter().filter(|code| self.wants_code(code)) {
            if self.store()?.contains_code(code)? {
                continue;
            }
            if let Some(state) = self.store()?.unavailable_code_state(code)? {
                codes_denied = true;
                if request.options.code_state {
                    response
                        .denied_codes
                        .push(DgnCodeInfo::new(code.clone(), state));
                }
            }
        }

        if locks_denied {
            response.set_error(RepositoryError::LockAlreadyHeld);
        } else if codes_denied {
            response.set_error(RepositoryError::CodeUnavailable);
        }
        Ok(response)
    }

    pub fn query_lock_level(&mut self, id: &LockableId) -> Result<LockLevel, BriefcaseError> {
        if !id.is_valid() {
            return Err(BriefcaseError::MalformedLockable(*id));
        }
        self.ensure_ready()?;
        self.cached_level(id)
    }

    pub fn query_lock_levels(
        &mut self,
        ids: &[LockableId],
    ) -> Result<Vec<DgnLock>, BriefcaseError> {
        let mut levels = Vec::with_capacity(ids.len());
        for id in ids {
            levels.push(DgnLock::new(*id, self.query_lock_level(id)?));
        }
        Ok(levels)
    }

    pub fn query_code_states(
        &mut self,
        codes: &[DgnCode],
    ) -> Result<Vec<DgnCodeInfo>, BriefcaseError> {
        self.ensure_ready()?;
        let mut states = Vec::with_capacity(codes.len());
        for code in codes {
            let store = self.store()?;
            let state = if store.contains_code(code)? {
                CodeState::Reserved(self.identity.briefcase_id)
            } else {
                store.unavailable_code_state(code)?.unwrap_or_default()
            };
            states.push(DgnCodeInfo::new(code.clone(), state));
        }
        Ok(states)
    }

    pub fn owned_locks(&mut self) -> Result<Vec<DgnLock>, BriefcaseError> {
        self.ensure_ready()?;
        Ok(self.store()?.locks(Holder::Owned)?)
    }

    pub fn owned_codes(&mut self) -> Result<Vec<DgnCode>, BriefcaseError> {
        self.ensure_ready()?;
        Ok(self.store()?.codes()?)
    }

    /// Lowers lock levels and releases codes. Demoting an exclusive db or
    /// model lock also releases the locks it implied.
    pub fn demote(&mut self, locks: &[DgnLock], codes: &[DgnCode]) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;

        let mut demotions = LockRequest::new();
        let mut releases = Vec::new();
        for lock in locks {
            if !lock.id.is_valid() {
                return Err(BriefcaseError::MalformedLockable(lock.id));
            }
            let held = self
                .store()?
                .lock_level(Holder::Owned, &lock.id)?
                .unwrap_or_default();
            if lock.level > held {
                return Err(BriefcaseError::InvalidDemotion {
                    id: lock.id,
                    held,
                    requested: lock.level,
                });
            }
            if lock.level == held {
                continue;
            }
            if lock.level == LockLevel::None {
                releases.push(lock.id);
            } else {
                demotions.insert(lock.id, lock.level);
            }
            if held == LockLevel::Exclusive {
                releases.extend(self.implied_by(&lock.id)?);
            }
        }

        let mut changes = demotions.to_vec();
        for id in releases {
            if !demotions.contains(&id) {
                changes.push(DgnLock::new(id, LockLevel::None));
            }
        }
        changes.sort();
        changes.dedup_by_key(|lock| lock.id);

        if let Some(used) = changes.iter().find(|lock| self.catalog.is_lock_used(&lock.id)) {
            debug!(lock = %used.id, "lock still required by local changes");
            return Err(RepositoryError::LockUsed.into());
        }
        let mut released_codes = Vec::new();
        for code in codes {
            if self.catalog.is_code_used(code) {
                return Err(RepositoryError::CodeUsed.into());
            }
            if self.store()?.contains_code(code)? {
                released_codes.push(code.clone());
            }
        }
        if changes.is_empty() && released_codes.is_empty() {
            return Ok(());
        }

        self.authority
            .demote(&changes, &released_codes, &self.identity)?;

        let written = (|| -> Result<(), StorageError> {
            let store = opened(&self.store)?;
            for lock in &changes {
                store.set_lock_level(Holder::Owned, lock)?;
            }
            for code in &released_codes {
                store.remove_code(Holder::Owned, code)?;
            }
            Ok(())
        })();
        written.map_err(|err| self.invalidate(err))?;
        self.rebuild_exclusive_models()
            .map_err(|err| self.invalidate(err))?;
        Ok(())
    }

    /// Owned locks an exclusive lock on `id` stands in for.
    fn implied_by(&self, id: &LockableId) -> Result<Vec<LockableId>, BriefcaseError> {
        let models = match id.kind() {
            LockableType::Db => self.catalog.model_ids(),
            LockableType::Model => vec![ModelId(id.id())],
            LockableType::Element | LockableType::Schemas => return Ok(Vec::new()),
        };

        let store = self.store()?;
        let mut implied = Vec::new();
        for model in models {
            let model_id = LockableId::model(model);
            if id.kind() == LockableType::Db
                && store.lock_level(Holder::Owned, &model_id)?.is_some()
            {
                implied.push(model_id);
            }
            for element in self.catalog.elements_in_model(model) {
                let element_id = LockableId::element(element);
                if store.lock_level(Holder::Owned, &element_id)?.is_some() {
                    implied.push(element_id);
                }
            }
        }
        Ok(implied)
    }

    pub fn relinquish(&mut self, which: Resources) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        if self.catalog.has_pending_changes() {
            return Err(RepositoryError::PendingTransactions.into());
        }
        self.authority.relinquish(which, &self.identity)?;

        let written = (|| -> Result<(), StorageError> {
            let store = opened(&self.store)?;
            if which.includes_locks() {
                store.clear_locks(Holder::Owned)?;
            }
            if which.includes_codes() {
                store.clear_codes(Holder::Owned)?;
            }
            Ok(())
        })();
        written.map_err(|err| self.invalidate(err))?;
        self.rebuild_exclusive_models()
            .map_err(|err| self.invalidate(err))?;
        info!(?which, "relinquished resources");
        Ok(())
    }

    /// Replaces the whole cache with a fresh snapshot. A ready cache keeps its
    /// previous contents on failure. Any other cache is rebuilt from scratch,
    /// never reused from disk.
    pub fn refresh_from_repository(&mut self) -> Result<(), BriefcaseError> {
        if self.state != LocalDbState::Ready {
            self.rebuild_from_repository()?;
            info!(path = %self.local_path.display(), "rebuilt local resource cache");
            return Ok(());
        }
        self.save()?;

        let cleared = self.store()?.clear_all();
        cleared.map_err(|err| self.invalidate(err))?;
        self.exclusive_models.clear();
        self.db_exclusive = false;

        if let Err(err) = self.pull() {
            warn!(error = %err, "refresh failed, keeping previous cache");
            let discarded = self.store()?.discard_changes();
            let restored = discarded.and_then(|_| self.rebuild_exclusive_models());
            restored.map_err(|restore_err| self.invalidate(restore_err))?;
            return Err(err);
        }
        self.save()
    }

    /// Forgets what this session owns without telling the repository.
    pub fn clear_user_held_codes_locks(&mut self) -> Result<(), BriefcaseError> {
        if let Some(store) = self.store.as_ref() {
            let cleared = store.clear(Holder::Owned);
            cleared.map_err(|err| self.invalidate(err))?;
        }
        self.exclusive_models.clear();
        self.db_exclusive = false;
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), BriefcaseError> {
        if self.state != LocalDbState::Ready {
            return Ok(());
        }
        let saved = self.store()?.save();
        saved.map_err(|err| self.invalidate(err))
    }

    pub fn prepare_for_element_operation(
        &mut self,
        request: &mut Request,
        element: &ElementRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        match opcode {
            ElementOpcode::Insert => {
                request.locks.insert_model(element.model, LockLevel::Shared);
                self.add_code(request, &element.code);
            }
            ElementOpcode::Update => {
                self.add_element_lock(request, element.id, element.model);
                match self.catalog.element(element.id) {
                    Some(persisted) => {
                        if persisted.model != element.model {
                            request
                                .locks
                                .insert_model(persisted.model, LockLevel::Shared);
                        }
                        if persisted.code != element.code {
                            self.add_code(request, &element.code);
                        }
                    }
                    None => self.add_code(request, &element.code),
                }
            }
            ElementOpcode::Delete => {
                self.add_element_lock(request, element.id, element.model);
            }
        }
        Ok(())
    }

    fn add_element_lock(&self, request: &mut Request, element: ElementId, model: ModelId) {
        if self.is_element_lock_required(model) {
            request
                .locks
                .insert_element(element, model, LockLevel::Exclusive);
        } else {
            request.locks.insert_model(model, LockLevel::Shared);
        }
    }

    fn add_code(&self, request: &mut Request, code: &DgnCode) {
        if self.wants_code(code) {
            request.insert_code(code.clone());
        }
    }

    pub fn prepare_for_model_operation(
        &mut self,
        request: &mut Request,
        model: &ModelRecord,
        opcode: ElementOpcode,
    ) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        match opcode {
            ElementOpcode::Insert => {
                request.locks.insert(LockableId::db(), LockLevel::Shared);
                self.add_code(request, &model.code);
            }
            ElementOpcode::Update | ElementOpcode::Delete => {
                request.locks.insert_model(model.id, LockLevel::Exclusive);
            }
        }
        Ok(())
    }

    pub fn apply_prepare_action(
        &mut self,
        request: &Request,
        action: PrepareAction,
    ) -> Result<(), BriefcaseError> {
        match action {
            PrepareAction::Verify => self.check_resources_held(request),
            PrepareAction::Acquire => {
                self.acquire(request, true)?.result()?;
                Ok(())
            }
        }
    }

    /// Records the exclusive lock this briefcase implicitly holds on an
    /// element it just created. The repository is not contacted.
    pub fn on_element_inserted(&mut self, element: ElementId) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        self.insert_lock(DgnLock::new(
            LockableId::element(element),
            LockLevel::Exclusive,
        ))?;
        debug!(%element, "locked locally created element");
        Ok(())
    }

    /// Same as [`Self::on_element_inserted`] for a new model. Elements later
    /// created in it are covered by the model lock.
    pub fn on_model_inserted(&mut self, model: ModelId) -> Result<(), BriefcaseError> {
        self.ensure_ready()?;
        self.insert_lock(DgnLock::new(LockableId::model(model), LockLevel::Exclusive))?;
        debug!(%model, "locked locally created model");
        Ok(())
    }

    /// Saves a ready cache; deletes the file of an invalid one.
    pub fn close(mut self) -> Result<(), BriefcaseError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), BriefcaseError> {
        let Some(store) = self.store.take() else {
            if self.state == LocalDbState::Invalid {
                remove_local_file(&self.local_path)?;
            }
            return Ok(());
        };
        match self.state {
            LocalDbState::Ready => {
                store.save()?;
                Ok(())
            }
            LocalDbState::Invalid => {
                drop(store);
                remove_local_file(&self.local_path)?;
                info!(path = %self.local_path.display(), "discarded invalid local cache");
                Ok(())
            }
            LocalDbState::New => Ok(()),
        }
    }
}

fn opened(store: &Option<LocalResourceStore>) -> Result<&LocalResourceStore, StorageError> {
    store
        .as_ref()
        .ok_or_else(|| StorageError::Io(std::io::Error::other("local resource store not open")))
}

impl Drop for BriefcaseManagerBase {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!(error = %err, "failed to tear down local resource cache");
        }
    }
}
