use crate::{ElementId, ModelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed id used by the singleton lockables (the whole db, its schemas).
pub const SINGLETON_LOCKABLE_ID: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockableType {
    Db,
    Model,
    Element,
    Schemas,
}

impl LockableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockableType::Db => "db",
            LockableType::Model => "model",
            LockableType::Element => "element",
            LockableType::Schemas => "schemas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LockableId {
    kind: LockableType,
    id: u64,
}

impl LockableId {
    pub fn new(kind: LockableType, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn db() -> Self {
        Self::new(LockableType::Db, SINGLETON_LOCKABLE_ID)
    }

    pub fn schemas() -> Self {
        Self::new(LockableType::Schemas, SINGLETON_LOCKABLE_ID)
    }

    pub fn model(model: ModelId) -> Self {
        Self::new(LockableType::Model, model.0)
    }

    pub fn element(element: ElementId) -> Self {
        Self::new(LockableType::Element, element.0)
    }

    pub fn kind(&self) -> LockableType {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Singletons must carry the fixed id; models and elements any non-zero id.
    pub fn is_valid(&self) -> bool {
        match self.kind {
            LockableType::Db | LockableType::Schemas => self.id == SINGLETON_LOCKABLE_ID,
            LockableType::Model | LockableType::Element => self.id != 0,
        }
    }

    pub fn as_model(&self) -> Option<ModelId> {
        (self.kind == LockableType::Model).then_some(ModelId(self.id))
    }

    pub fn as_element(&self) -> Option<ElementId> {
        (self.kind == LockableType::Element).then_some(ElementId(self.id))
    }
}

impl fmt::Display for LockableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:#x}", self.kind.as_str(), self.id)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LockLevel {
    #[default]
    None,
    Shared,
    Exclusive,
}

impl LockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockLevel::None => "none",
            LockLevel::Shared => "shared",
            LockLevel::Exclusive => "exclusive",
        }
    }

    /// Whether a lock held at `self` by someone else blocks a request for `requested`.
    pub fn conflicts_with(&self, requested: LockLevel) -> bool {
        match (self, requested) {
            (LockLevel::None, _) | (_, LockLevel::None) => false,
            (LockLevel::Shared, LockLevel::Shared) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DgnLock {
    pub id: LockableId,
    pub level: LockLevel,
}

impl DgnLock {
    pub fn new(id: LockableId, level: LockLevel) -> Self {
        Self { id, level }
    }
}

/// A set of lock requirements keyed by lockable. Inserting the same lockable
/// twice keeps the higher level.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    locks: BTreeMap<LockableId, LockLevel>,
}

impl LockRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: LockableId, level: LockLevel) {
        if level == LockLevel::None {
            return;
        }
        let entry = self.locks.entry(id).or_insert(level);
        if level > *entry {
            *entry = level;
        }
    }

    /// A model lock also needs the db held shared.
    pub fn insert_model(&mut self, model: ModelId, level: LockLevel) {
        if level == LockLevel::None {
            return;
        }
        self.insert(LockableId::model(model), level);
        self.insert(LockableId::db(), LockLevel::Shared);
    }

    /// An element lock also needs its model (and so the db) held shared.
    pub fn insert_element(&mut self, element: ElementId, model: ModelId, level: LockLevel) {
        if level == LockLevel::None {
            return;
        }
        self.insert(LockableId::element(element), level);
        self.insert_model(model, LockLevel::Shared);
    }

    pub fn level(&self, id: &LockableId) -> LockLevel {
        self.locks.get(id).copied().unwrap_or_default()
    }

    pub fn contains(&self, id: &LockableId) -> bool {
        self.locks.contains_key(id)
    }

    pub fn remove(&mut self, id: &LockableId) -> Option<LockLevel> {
        self.locks.remove(id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&DgnLock) -> bool) {
        self.locks
            .retain(|id, level| keep(&DgnLock::new(*id, *level)));
    }

    pub fn merge(&mut self, other: &LockRequest) {
        for lock in other.iter() {
            self.insert(lock.id, lock.level);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = DgnLock> + '_ {
        self.locks
            .iter()
            .map(|(id, level)| DgnLock::new(*id, *level))
    }

    pub fn to_vec(&self) -> Vec<DgnLock> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn clear(&mut self) {
        self.locks.clear();
    }
}

impl FromIterator<DgnLock> for LockRequest {
    fn from_iter<T: IntoIterator<Item = DgnLock>>(iter: T) -> Self {
        let mut request = LockRequest::new();
        for lock in iter {
            request.insert(lock.id, lock.level);
        }
        request
    }
}
