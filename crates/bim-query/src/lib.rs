pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod processor;
pub mod queue;
pub mod range;
pub mod scores;

pub use config::QueryConfig;
pub use error::QueryError;
pub use filter::{Frustum, QueryFilter, StopReason};
pub use model::{ElementLoader, QueryModel, QueryPlan, QueryResults};
pub use processor::{Processor, QueryOutcome};
pub use queue::{ProgressiveAccess, QueryQueue, QueryState, QueueState};
pub use range::{
    MemoryRangeIndex, Range3d, RangeIndex, RangeTestInfo, RangeVisitor, WalkControl, WalkStatus,
    Within,
};
pub use scores::OcclusionScores;

/// Lets interactive graphics work preempt a running range query. A query
/// that sees a pending operation stops and restarts its walk from scratch.
pub trait GraphicsPriority: Send + Sync {
    fn is_pending(&self) -> bool;
}

/// Never preempts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGraphicsPriority;

impl GraphicsPriority for NoGraphicsPriority {
    fn is_pending(&self) -> bool {
        false
    }
}
