use crate::config::QueryConfig;
use crate::error::QueryError;
use crate::filter::{QueryFilter, StopReason};
use crate::model::{QueryModel, QueryPlan, QueryResults};
use crate::range::WalkStatus;
use crate::GraphicsPriority;
use bim_core::ElementId;
use std::time::Instant;
use tracing::debug;

/// How a query ended. Aborted queries carry whatever was found before the
/// abort and are never handed to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Completed(QueryResults),
    Aborted(QueryResults),
}

impl QueryOutcome {
    pub fn results(&self) -> &QueryResults {
        match self {
            QueryOutcome::Completed(results) | QueryOutcome::Aborted(results) => results,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, QueryOutcome::Completed(_))
    }
}

struct Hits {
    primary: Vec<ElementId>,
    secondary: Vec<ElementId>,
    reached_max: bool,
    aborted: bool,
}

/// Runs one query for a model on the calling thread.
pub struct Processor<'a> {
    model: &'a QueryModel,
    config: &'a QueryConfig,
    priority: &'a dyn GraphicsPriority,
}

impl<'a> Processor<'a> {
    pub fn new(
        model: &'a QueryModel,
        config: &'a QueryConfig,
        priority: &'a dyn GraphicsPriority,
    ) -> Self {
        Self {
            model,
            config,
            priority,
        }
    }

    /// Runs the query and hands completed results to the model.
    pub fn query(&self) -> Result<WalkStatus, QueryError> {
        match self.run()? {
            QueryOutcome::Completed(results) => {
                self.model.set_updated_results(results);
                Ok(WalkStatus::Completed)
            }
            QueryOutcome::Aborted(_) => Ok(WalkStatus::Stopped),
        }
    }

    pub fn run(&self) -> Result<QueryOutcome, QueryError> {
        let started = Instant::now();
        let plan = self.model.plan();
        let index = self.model.index();
        let always_draw = plan
            .always_draw
            .iter()
            .copied()
            .filter(|id| !plan.exclude.contains(id) && index.contains(*id))
            .collect::<Vec<_>>();

        let hits = if plan.always_draw_only {
            Hits {
                primary: Vec::new(),
                secondary: Vec::new(),
                reached_max: false,
                aborted: self.model.is_abort_requested(),
            }
        } else {
            self.search_range_tree(&plan)?
        };

        let mut aborted = hits.aborted;
        let mut primary = always_draw;
        primary.extend(hits.primary);
        let mut secondary = hits.secondary;
        if !aborted {
            self.make_room();
            let (loaded, complete) = self.load(&primary);
            primary = loaded;
            if complete {
                let (loaded, complete) = self.load(&secondary);
                secondary = loaded;
                aborted = !complete;
            } else {
                secondary.clear();
                aborted = true;
            }
        }

        let results = QueryResults {
            primary,
            secondary,
            elapsed: started.elapsed(),
            reached_max: hits.reached_max,
        };
        debug!(
            model = %self.model.id(),
            primary = results.primary.len(),
            secondary = results.secondary.len(),
            reached_max = results.reached_max,
            aborted,
            elapsed_ms = results.elapsed.as_millis() as u64,
            "range query finished"
        );
        if aborted {
            Ok(QueryOutcome::Aborted(results))
        } else {
            Ok(QueryOutcome::Completed(results))
        }
    }

    fn search_range_tree(&self, plan: &QueryPlan) -> Result<Hits, QueryError> {
        let hit_limit = plan.hit_limit.unwrap_or(self.config.hit_limit);
        let mut restarts = 0;
        loop {
            let mut filter = QueryFilter::new(
                plan,
                hit_limit,
                self.config.secondary_hit_limit,
                self.model.abort_flag(),
            );
            if restarts < self.config.max_restarts {
                filter = filter.with_priority(self.priority);
            }
            self.model.index().walk(&mut filter)?;

            match filter.stop_reason() {
                Some(StopReason::Restart) => {
                    restarts += 1;
                    debug!(model = %self.model.id(), restarts, "range query preempted, restarting");
                }
                reason => {
                    let reached_max = filter.reached_max();
                    let (primary, secondary) = filter.into_hits();
                    return Ok(Hits {
                        primary,
                        secondary,
                        reached_max,
                        aborted: reason == Some(StopReason::Aborted),
                    });
                }
            }
        }
    }

    fn make_room(&self) {
        let loader = self.model.loader();
        if loader.total_allocated() > self.config.max_memory_bytes {
            loader.purge(self.config.purge_target_bytes);
        }
    }

    /// Keeps the ids that end up resident: loaded below the memory cap,
    /// found-if-resident above it. The flag is false when aborted midway.
    fn load(&self, ids: &[ElementId]) -> (Vec<ElementId>, bool) {
        let loader = self.model.loader();
        let mut resident = Vec::with_capacity(ids.len());
        for &id in ids {
            if self.model.is_abort_requested() {
                return (resident, false);
            }
            let kept = if loader.total_allocated() < self.config.max_memory_bytes {
                loader.load(id)
            } else {
                loader.find(id)
            };
            if kept {
                resident.push(id);
            }
        }
        (resident, true)
    }
}
