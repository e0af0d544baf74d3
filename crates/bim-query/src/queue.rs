use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::model::QueryModel;
use crate::processor::Processor;
use crate::{GraphicsPriority, NoGraphicsPriority};
use bim_core::ModelId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Idle,
    Pending,
    Processing,
    AbortRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Active,
    TerminateRequested,
    Terminated,
}

struct QueueInner {
    state: QueueState,
    pending: VecDeque<Arc<QueryModel>>,
    states: HashMap<ModelId, QueryState>,
    processing: Option<Arc<QueryModel>>,
}

impl QueueInner {
    fn state_of(&self, model: ModelId) -> QueryState {
        self.states.get(&model).copied().unwrap_or(QueryState::Idle)
    }

    fn set_state(&mut self, model: ModelId, state: QueryState) {
        if state == QueryState::Idle {
            self.states.remove(&model);
        } else {
            self.states.insert(model, state);
        }
    }

    fn remove_pending(&mut self, model: ModelId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|queued| queued.id() != model);
        self.pending.len() != before
    }

    fn is_processing(&self, model: ModelId) -> bool {
        self.processing
            .as_ref()
            .is_some_and(|running| running.id() == model)
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.processing.is_none()
    }
}

struct Shared {
    inner: Mutex<QueueInner>,
    signal: Condvar,
    /// Held by the worker for the whole of each query and by clients doing
    /// their own progressive walk of the range index.
    index_access: Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, QueueInner>) -> MutexGuard<'a, QueueInner> {
        self.signal
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the worker thread needs, passed in at spawn.
struct WorkerContext {
    shared: Arc<Shared>,
    config: QueryConfig,
    priority: Arc<dyn GraphicsPriority>,
}

/// Exclusive access to the range index for a client-side walk. Released on drop.
///
/// While the guard is alive the worker cannot run a query, so the thread
/// holding it must not call [`QueryQueue::wait_until_idle`],
/// [`QueryQueue::terminate`] or a waiting [`QueryQueue::request_abort`], and
/// must not drop the queue. Each of those blocks on the worker and never
/// returns.
pub struct ProgressiveAccess<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// One background thread answering range queries for the models of a
/// database, in request order.
pub struct QueryQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueryQueue {
    pub fn start(config: QueryConfig) -> Result<Self, QueryError> {
        Self::with_priority(config, Arc::new(NoGraphicsPriority))
    }

    pub fn with_priority(
        config: QueryConfig,
        priority: Arc<dyn GraphicsPriority>,
    ) -> Result<Self, QueryError> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(QueueInner {
                state: QueueState::Active,
                pending: VecDeque::new(),
                states: HashMap::new(),
                processing: None,
            }),
            signal: Condvar::new(),
            index_access: Mutex::new(()),
        });
        let name = config.worker_name.clone();
        let context = WorkerContext {
            shared: shared.clone(),
            config,
            priority,
        };
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(context))?;
        info!(worker = %name, "range query worker started");

        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queues a query for `model`, replacing any request for it that has not
    /// started yet.
    pub fn request_processing(&self, model: Arc<QueryModel>) -> Result<(), QueryError> {
        let mut inner = self.shared.lock();
        if inner.state != QueueState::Active {
            return Err(QueryError::QueueTerminated);
        }
        let id = model.id();
        if inner.remove_pending(id) {
            debug!(model = %id, "replaced pending range query");
        }
        inner.pending.push_back(model);
        inner.set_state(id, QueryState::Pending);
        self.shared.signal.notify_all();
        Ok(())
    }

    /// Cancels a queued or running query. With `wait`, blocks until the model
    /// is idle.
    pub fn request_abort(&self, model: &QueryModel, wait: bool) {
        let id = model.id();
        let mut inner = self.shared.lock();
        match inner.state_of(id) {
            QueryState::Idle => return,
            QueryState::Pending => {
                inner.remove_pending(id);
                if inner.is_processing(id) {
                    model.raise_abort();
                    inner.set_state(id, QueryState::AbortRequested);
                } else {
                    inner.set_state(id, QueryState::Idle);
                }
            }
            QueryState::Processing => {
                model.raise_abort();
                inner.set_state(id, QueryState::AbortRequested);
            }
            QueryState::AbortRequested => {}
        }
        self.shared.signal.notify_all();
        debug!(model = %id, wait, "range query abort requested");

        if wait {
            while inner.state_of(id) != QueryState::Idle {
                inner = self.shared.wait(inner);
            }
        }
    }

    pub fn state(&self, model: ModelId) -> QueryState {
        self.shared.lock().state_of(model)
    }

    pub fn queue_state(&self) -> QueueState {
        self.shared.lock().state
    }

    /// Nothing queued and nothing running.
    pub fn is_idle(&self) -> bool {
        self.shared.lock().is_idle()
    }

    /// Queued models in the order they will run.
    pub fn pending_models(&self) -> Vec<ModelId> {
        self.shared
            .lock()
            .pending
            .iter()
            .map(|model| model.id())
            .collect()
    }

    /// Blocks until the queue is idle or terminated.
    pub fn wait_until_idle(&self) {
        let mut inner = self.shared.lock();
        while !inner.is_idle() && inner.state != QueueState::Terminated {
            inner = self.shared.wait(inner);
        }
    }

    /// Lets the client walk the range index itself. Succeeds only while the
    /// queue is idle and no query holds the index. Drop the guard before
    /// waiting on the queue from the same thread.
    pub fn try_progressive_access(&self) -> Option<ProgressiveAccess<'_>> {
        if !self.is_idle() {
            return None;
        }
        let guard = self.shared.index_access.try_lock().ok()?;
        Some(ProgressiveAccess { _guard: guard })
    }

    /// Drops queued work, aborts the running query and joins the worker.
    pub fn terminate(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.state == QueueState::Active {
                let dropped = inner.pending.drain(..).collect::<Vec<_>>();
                for model in &dropped {
                    if !inner.is_processing(model.id()) {
                        inner.set_state(model.id(), QueryState::Idle);
                    }
                }
                if let Some(running) = inner.processing.clone() {
                    running.raise_abort();
                    inner.set_state(running.id(), QueryState::AbortRequested);
                }
                debug!(dropped = dropped.len(), "range query queue terminating");
                inner.state = QueueState::TerminateRequested;
                self.shared.signal.notify_all();
            }
            while inner.state != QueueState::Terminated {
                inner = self.shared.wait(inner);
            }
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("range query worker panicked");
            }
            info!("range query worker stopped");
        }
    }
}

impl Drop for QueryQueue {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Leaves the queue terminated and every model idle if the worker unwinds out
/// of a collaborator, so nothing waits on a thread that is gone.
struct WorkerExit<'a> {
    shared: &'a Shared,
}

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        let mut inner = self.shared.lock();
        if let Some(running) = inner.processing.take() {
            error!(model = %running.id(), "range query worker panicked mid-query");
            inner.set_state(running.id(), QueryState::Idle);
        }
        let dropped = inner.pending.drain(..).collect::<Vec<_>>();
        for model in &dropped {
            inner.set_state(model.id(), QueryState::Idle);
        }
        inner.state = QueueState::Terminated;
        self.shared.signal.notify_all();
    }
}

fn worker_loop(context: WorkerContext) {
    let shared = context.shared.as_ref();
    let _exit = WorkerExit { shared };
    while let Some(model) = next_request(shared) {
        let outcome = {
            let _index = shared
                .index_access
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Processor::new(&model, &context.config, context.priority.as_ref()).query()
        };
        if let Err(err) = outcome {
            warn!(model = %model.id(), error = %err, "range query failed");
        }

        let mut inner = shared.lock();
        inner.processing = None;
        let id = model.id();
        if inner.state_of(id) != QueryState::Pending {
            inner.set_state(id, QueryState::Idle);
        }
        shared.signal.notify_all();
    }
}

/// Blocks until there is work; `None` once termination was requested.
fn next_request(shared: &Shared) -> Option<Arc<QueryModel>> {
    let mut inner = shared.lock();
    loop {
        if inner.state != QueueState::Active {
            if let Some(running) = inner.processing.take() {
                inner.set_state(running.id(), QueryState::Idle);
            }
            inner.state = QueueState::Terminated;
            shared.signal.notify_all();
            return None;
        }
        if let Some(model) = inner.pending.pop_front() {
            let id = model.id();
            model.clear_abort();
            inner.processing = Some(model.clone());
            inner.set_state(id, QueryState::Processing);
            return Some(model);
        }
        inner = shared.wait(inner);
    }
}
