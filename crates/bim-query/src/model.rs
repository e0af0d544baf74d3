use crate::filter::Frustum;
use crate::range::RangeIndex;
use bim_core::{ElementId, ModelId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// What the next query for a model should look for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub frustum: Frustum,
    /// Close-range volume with its own hit set.
    #[serde(default)]
    pub secondary: Option<Frustum>,
    #[serde(default)]
    pub always_draw: BTreeSet<ElementId>,
    #[serde(default)]
    pub exclude: BTreeSet<ElementId>,
    #[serde(default)]
    pub hit_limit: Option<usize>,
    /// Only the always-draw ids matter; skip the tree walk.
    #[serde(default)]
    pub always_draw_only: bool,
}

impl QueryPlan {
    pub fn new(frustum: Frustum) -> Self {
        Self {
            frustum,
            secondary: None,
            always_draw: BTreeSet::new(),
            exclude: BTreeSet::new(),
            hit_limit: None,
            always_draw_only: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    /// Always-draw ids first, then hits from best to worst.
    pub primary: Vec<ElementId>,
    pub secondary: Vec<ElementId>,
    pub elapsed: Duration,
    pub reached_max: bool,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }
}

/// Element store the worker loads hits through.
pub trait ElementLoader: Send + Sync {
    /// Makes the element resident; false if it does not exist.
    fn load(&self, id: ElementId) -> bool;

    /// Whether the element is already resident, without loading it.
    fn find(&self, id: ElementId) -> bool;

    fn total_allocated(&self) -> u64;

    fn purge(&self, target_bytes: u64);
}

/// A model whose visible contents are computed on the query worker.
///
/// The plan is written by the client and read once when a query starts.
/// Results are built on the worker and moved into the hand-off slot; the
/// client takes them out with [`QueryModel::take_updated_results`].
pub struct QueryModel {
    id: ModelId,
    index: Arc<dyn RangeIndex>,
    loader: Arc<dyn ElementLoader>,
    plan: Mutex<QueryPlan>,
    abort: Arc<AtomicBool>,
    updated: Mutex<Option<QueryResults>>,
}

impl QueryModel {
    pub fn new(
        id: ModelId,
        index: Arc<dyn RangeIndex>,
        loader: Arc<dyn ElementLoader>,
        plan: QueryPlan,
    ) -> Self {
        Self {
            id,
            index,
            loader,
            plan: Mutex::new(plan),
            abort: Arc::new(AtomicBool::new(false)),
            updated: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn index(&self) -> &dyn RangeIndex {
        self.index.as_ref()
    }

    pub fn loader(&self) -> &dyn ElementLoader {
        self.loader.as_ref()
    }

    pub fn plan(&self) -> QueryPlan {
        self.plan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_plan(&self, plan: QueryPlan) {
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = plan;
    }

    /// Shared cancellation flag checked on every range callback.
    pub fn abort_token(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub(crate) fn abort_flag(&self) -> &AtomicBool {
        &self.abort
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub(crate) fn raise_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    pub(crate) fn clear_abort(&self) {
        self.abort.store(false, Ordering::Release);
    }

    /// Worker side of the hand-off. Replaces results the client never took.
    pub fn set_updated_results(&self, results: QueryResults) {
        *self.updated.lock().unwrap_or_else(PoisonError::into_inner) = Some(results);
    }

    /// Client side of the hand-off.
    pub fn take_updated_results(&self) -> Option<QueryResults> {
        self.updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn has_updated_results(&self) -> bool {
        self.updated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for QueryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryModel")
            .field("id", &self.id)
            .field("entries", &self.index.len())
            .field("abort", &self.is_abort_requested())
            .finish()
    }
}
