use crate::model::QueryPlan;
use crate::range::{Range3d, RangeTestInfo, RangeVisitor, WalkControl, Within};
use crate::scores::OcclusionScores;
use crate::GraphicsPriority;
use bim_core::ElementId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

const MIN_W: f64 = 1.0e-12;

/// Maps world coordinates to normalized plot coordinates, where the visible
/// volume is the unit cube.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frustum {
    pub world_to_npc: [[f64; 4]; 4],
}

impl Frustum {
    pub fn from_matrix(world_to_npc: [[f64; 4]; 4]) -> Self {
        Self { world_to_npc }
    }

    /// Parallel projection of `volume` onto the unit cube.
    pub fn orthographic(volume: &Range3d) -> Self {
        let mut m = [[0.0; 4]; 4];
        for axis in 0..3 {
            let extent = volume.high[axis] - volume.low[axis];
            let scale = if extent.abs() > MIN_W { 1.0 / extent } else { 0.0 };
            m[axis][axis] = scale;
            m[axis][3] = -volume.low[axis] * scale;
        }
        m[3][3] = 1.0;
        Self::from_matrix(m)
    }

    /// Camera at `eye` looking down +z. `half_width`/`half_height` are the
    /// half extents of the view at the `near` plane.
    pub fn perspective(
        eye: [f64; 3],
        half_width: f64,
        half_height: f64,
        near: f64,
        far: f64,
    ) -> Self {
        let a = near / (2.0 * half_width);
        let b = near / (2.0 * half_height);
        let c = far / (far - near);
        let d = -far * near / (far - near);
        Self::from_matrix([
            [a, 0.0, 0.5, -(a * eye[0] + 0.5 * eye[2])],
            [0.0, b, 0.5, -(b * eye[1] + 0.5 * eye[2])],
            [0.0, 0.0, c, d - c * eye[2]],
            [0.0, 0.0, 1.0, -eye[2]],
        ])
    }

    /// `None` when the point is at or behind the eye.
    pub fn project(&self, point: [f64; 3]) -> Option<[f64; 3]> {
        let m = &self.world_to_npc;
        let row = |r: usize| m[r][0] * point[0] + m[r][1] * point[1] + m[r][2] * point[2] + m[r][3];
        let w = row(3);
        if w <= MIN_W {
            return None;
        }
        Some([row(0) / w, row(1) / w, row(2) / w])
    }

    /// Containment of `range` and its occlusion score: the projected area in
    /// the unit square, or 1.0 when part of the box is behind the eye.
    pub fn classify(&self, range: &Range3d) -> (Within, f64) {
        let mut low = [f64::INFINITY; 3];
        let mut high = [f64::NEG_INFINITY; 3];
        let mut behind = 0;
        for corner in range.corners() {
            match self.project(corner) {
                Some(npc) => {
                    for axis in 0..3 {
                        low[axis] = low[axis].min(npc[axis]);
                        high[axis] = high[axis].max(npc[axis]);
                    }
                }
                None => behind += 1,
            }
        }
        if behind == 8 {
            return (Within::Outside, 0.0);
        }
        if behind > 0 {
            return (Within::Partly, 1.0);
        }

        if (0..3).any(|axis| high[axis] < 0.0 || low[axis] > 1.0) {
            return (Within::Outside, 0.0);
        }
        let inside = (0..3).all(|axis| low[axis] >= 0.0 && high[axis] <= 1.0);
        let width = (high[0].min(1.0) - low[0].max(0.0)).max(0.0);
        let height = (high[1].min(1.0) - low[1].max(0.0)).max(0.0);
        let occlusion = (width * height).clamp(0.0, 1.0);
        let within = if inside { Within::Inside } else { Within::Partly };
        (within, occlusion)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The owning model asked for cancellation.
    Aborted,
    /// Higher-priority graphics work is waiting; the walk starts over.
    Restart,
}

#[derive(Debug, Clone)]
struct ViewFilter {
    frustum: Frustum,
    scores: OcclusionScores,
}

impl ViewFilter {
    fn new(frustum: Frustum, limit: usize) -> Self {
        Self {
            frustum,
            scores: OcclusionScores::new(limit),
        }
    }

    /// `None` when nothing under the node can make it into the hit set.
    fn test_node(&self, range: &Range3d) -> Option<(Within, f64)> {
        let (within, occlusion) = self.frustum.classify(range);
        if within == Within::Outside || !self.scores.could_accept(occlusion) {
            return None;
        }
        Some((within, occlusion))
    }

    fn test_entry(&mut self, id: ElementId, range: &Range3d) -> Option<(Within, f64)> {
        let (within, occlusion) = self.frustum.classify(range);
        if within == Within::Outside {
            return None;
        }
        self.scores.insert(id, occlusion);
        Some((within, occlusion))
    }
}

/// Occlusion-priority acceptance test driven by the range index walk.
pub struct QueryFilter<'a> {
    primary: ViewFilter,
    secondary: Option<ViewFilter>,
    always_draw: &'a BTreeSet<ElementId>,
    exclude: &'a BTreeSet<ElementId>,
    abort: &'a AtomicBool,
    priority: Option<&'a dyn GraphicsPriority>,
    stop: Option<StopReason>,
    tested: usize,
}

impl<'a> QueryFilter<'a> {
    pub fn new(
        plan: &'a QueryPlan,
        hit_limit: usize,
        secondary_hit_limit: usize,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            primary: ViewFilter::new(plan.frustum, hit_limit),
            secondary: plan
                .secondary
                .map(|frustum| ViewFilter::new(frustum, secondary_hit_limit)),
            always_draw: &plan.always_draw,
            exclude: &plan.exclude,
            abort,
            priority: None,
            stop: None,
            tested: 0,
        }
    }

    pub fn with_priority(mut self, priority: &'a dyn GraphicsPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop
    }

    /// Nodes and entries tested so far.
    pub fn tested(&self) -> usize {
        self.tested
    }

    pub fn reached_max(&self) -> bool {
        self.primary.scores.is_full()
    }

    /// Primary and secondary hits, best first.
    pub fn into_hits(self) -> (Vec<ElementId>, Vec<ElementId>) {
        let secondary = self
            .secondary
            .map(|filter| filter.scores.into_sorted_ids())
            .unwrap_or_default();
        (self.primary.scores.into_sorted_ids(), secondary)
    }

    fn check_stop(&mut self) -> bool {
        if self.stop.is_some() {
            return true;
        }
        if self.abort.load(Ordering::Acquire) {
            self.stop = Some(StopReason::Aborted);
        } else if self.priority.is_some_and(|priority| priority.is_pending()) {
            self.stop = Some(StopReason::Restart);
        }
        self.stop.is_some()
    }
}

fn combine(a: Option<(Within, f64)>, b: Option<(Within, f64)>) -> Option<(Within, f64)> {
    match (a, b) {
        (Some((wa, oa)), Some((wb, ob))) => Some((wa.max(wb), oa.max(ob))),
        (Some(hit), None) | (None, Some(hit)) => Some(hit),
        (None, None) => None,
    }
}

impl RangeVisitor for QueryFilter<'_> {
    fn test_range(&mut self, info: &mut RangeTestInfo) -> WalkControl {
        if self.check_stop() {
            return WalkControl::Stop;
        }
        self.tested += 1;
        let range = info.range();

        let verdict = match info.element {
            Some(id) if self.exclude.contains(&id) || self.always_draw.contains(&id) => None,
            Some(id) => {
                let primary = self.primary.test_entry(id, &range);
                let secondary = self
                    .secondary
                    .as_mut()
                    .and_then(|filter| filter.test_entry(id, &range));
                combine(primary, secondary)
            }
            None => {
                let primary = self.primary.test_node(&range);
                let secondary = self
                    .secondary
                    .as_ref()
                    .and_then(|filter| filter.test_node(&range));
                combine(primary, secondary)
            }
        };

        match verdict {
            Some((within, occlusion)) => {
                info.within = within;
                info.score = f64::from(info.level) - occlusion;
            }
            None => info.within = Within::Outside,
        }
        WalkControl::Continue
    }
}
