#![allow(dead_code)]

use bim_core::{ElementId, ModelId};
use bim_query::{
    ElementLoader, Frustum, GraphicsPriority, MemoryRangeIndex, QueryError, QueryModel, QueryPlan,
    Range3d, RangeIndex, RangeTestInfo, RangeVisitor, WalkControl, WalkStatus,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

pub fn view() -> Frustum {
    Frustum::orthographic(&Range3d::new([0.0, 0.0, -10.0], [100.0, 100.0, 10.0]))
}

/// `count` boxes on a diagonal inside [`view`]; element `n` has side `n`,
/// so larger ids occlude more.
pub fn diagonal(count: u64) -> Vec<(ElementId, Range3d)> {
    (1..=count)
        .map(|raw| {
            let side = raw as f64;
            let origin = (raw as f64 * 2.0).min(100.0 - side);
            (
                ElementId(raw),
                Range3d::new([origin, origin, 0.0], [origin + side, origin + side, 1.0]),
            )
        })
        .collect()
}

pub fn index(count: u64) -> Arc<MemoryRangeIndex> {
    Arc::new(MemoryRangeIndex::with_fanout(diagonal(count), 4))
}

pub fn query_model(
    raw: u64,
    index: Arc<dyn RangeIndex>,
    loader: Arc<dyn ElementLoader>,
) -> Arc<QueryModel> {
    Arc::new(QueryModel::new(
        ModelId(raw),
        index,
        loader,
        QueryPlan::new(view()),
    ))
}

/// Every element exists; each resident element costs `element_bytes`.
pub struct CountingLoader {
    element_bytes: u64,
    resident: Mutex<HashSet<ElementId>>,
    loads: AtomicUsize,
    finds: AtomicUsize,
    purges: Mutex<Vec<u64>>,
}

impl CountingLoader {
    pub fn new(element_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            element_bytes,
            resident: Mutex::new(HashSet::new()),
            loads: AtomicUsize::new(0),
            finds: AtomicUsize::new(0),
            purges: Mutex::new(Vec::new()),
        })
    }

    pub fn preload(&self, ids: impl IntoIterator<Item = u64>) {
        let mut resident = self.resident.lock().unwrap_or_else(PoisonError::into_inner);
        resident.extend(ids.into_iter().map(ElementId));
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    pub fn purges(&self) -> Vec<u64> {
        self.purges.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_resident(&self, id: u64) -> bool {
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&ElementId(id))
    }
}

impl ElementLoader for CountingLoader {
    fn load(&self, id: ElementId) -> bool {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        true
    }

    fn find(&self, id: ElementId) -> bool {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    fn total_allocated(&self) -> u64 {
        let resident = self.resident.lock().unwrap_or_else(PoisonError::into_inner);
        resident.len() as u64 * self.element_bytes
    }

    fn purge(&self, target_bytes: u64) {
        self.purges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target_bytes);
        let mut resident = self.resident.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids = resident.iter().copied().collect::<Vec<_>>();
        ids.sort();
        for id in ids {
            if resident.len() as u64 * self.element_bytes <= target_bytes {
                break;
            }
            resident.remove(&id);
        }
    }
}

/// Blocks every walk until the test releases it, so the worker can be held
/// in `Processing`.
pub struct GateIndex {
    inner: MemoryRangeIndex,
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct Gate {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl Gate {
    pub fn wait_entered(&self) {
        self.entered.recv().expect("walk entered");
    }

    pub fn open(&self) {
        self.release.send(()).expect("release walk");
    }
}

impl GateIndex {
    pub fn new(count: u64) -> (Arc<Self>, Gate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let index = Arc::new(Self {
            inner: MemoryRangeIndex::with_fanout(diagonal(count), 4),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        (
            index,
            Gate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl RangeIndex for GateIndex {
    fn walk(&self, visitor: &mut dyn RangeVisitor) -> Result<WalkStatus, QueryError> {
        let _ = self
            .entered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(());
        let _ = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        self.inner.walk(visitor)
    }

    fn contains(&self, id: ElementId) -> bool {
        self.inner.contains(id)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Raises the model's abort token after `after` range callbacks, the way a
/// client thread would mid-walk.
pub struct TrippingIndex {
    inner: MemoryRangeIndex,
    after: usize,
    token: OnceLock<Arc<AtomicBool>>,
}

impl TrippingIndex {
    pub fn new(count: u64, after: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryRangeIndex::with_fanout(diagonal(count), 4),
            after,
            token: OnceLock::new(),
        })
    }

    pub fn arm(&self, model: &QueryModel) {
        let _ = self.token.set(model.abort_token());
    }
}

struct Tripping<'v, 't> {
    inner: &'v mut (dyn RangeVisitor + 't),
    remaining: usize,
    token: Option<&'v AtomicBool>,
}

impl RangeVisitor for Tripping<'_, '_> {
    fn test_range(&mut self, info: &mut RangeTestInfo) -> WalkControl {
        if self.remaining == 0 {
            if let Some(token) = self.token {
                token.store(true, Ordering::Release);
            }
        } else {
            self.remaining -= 1;
        }
        self.inner.test_range(info)
    }
}

impl RangeIndex for TrippingIndex {
    fn walk(&self, visitor: &mut dyn RangeVisitor) -> Result<WalkStatus, QueryError> {
        let mut tripping = Tripping {
            inner: visitor,
            remaining: self.after,
            token: self.token.get().map(|token| token.as_ref()),
        };
        self.inner.walk(&mut tripping)
    }

    fn contains(&self, id: ElementId) -> bool {
        self.inner.contains(id)
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Reports pending graphics work for the first `busy` checks.
pub struct BusyFor {
    remaining: AtomicUsize,
    checks: AtomicUsize,
}

impl BusyFor {
    pub fn new(busy: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicUsize::new(busy),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl GraphicsPriority for BusyFor {
    fn is_pending(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}
