use crate::error::QueryError;
use bim_core::ElementId;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};

pub const DEFAULT_FANOUT: usize = 8;

/// Axis-aligned box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range3d {
    pub low: [f64; 3],
    pub high: [f64; 3],
}

impl Range3d {
    pub fn new(a: [f64; 3], b: [f64; 3]) -> Self {
        Self {
            low: [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            high: [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        }
    }

    pub fn null() -> Self {
        Self {
            low: [f64::INFINITY; 3],
            high: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_coords(coords: [f64; 6]) -> Self {
        Self {
            low: [coords[0], coords[1], coords[2]],
            high: [coords[3], coords[4], coords[5]],
        }
    }

    pub fn coords(&self) -> [f64; 6] {
        [
            self.low[0],
            self.low[1],
            self.low[2],
            self.high[0],
            self.high[1],
            self.high[2],
        ]
    }

    pub fn is_null(&self) -> bool {
        (0..3).any(|axis| !(self.low[axis] <= self.high[axis]))
    }

    pub fn extend(&mut self, other: &Range3d) {
        for axis in 0..3 {
            self.low[axis] = self.low[axis].min(other.low[axis]);
            self.high[axis] = self.high[axis].max(other.high[axis]);
        }
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.low[0] + self.high[0]) * 0.5,
            (self.low[1] + self.high[1]) * 0.5,
            (self.low[2] + self.high[2]) * 0.5,
        ]
    }

    pub fn corners(&self) -> [[f64; 3]; 8] {
        let (l, h) = (self.low, self.high);
        [
            [l[0], l[1], l[2]],
            [h[0], l[1], l[2]],
            [l[0], h[1], l[2]],
            [h[0], h[1], l[2]],
            [l[0], l[1], h[2]],
            [h[0], l[1], h[2]],
            [l[0], h[1], h[2]],
            [h[0], h[1], h[2]],
        ]
    }
}

/// Containment of a box in a query volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Within {
    Outside,
    #[default]
    Partly,
    Inside,
}

/// One node or entry offered to a [`RangeVisitor`]. `within` and `score` are
/// written by the visitor; `Outside` prunes, lower scores are visited first.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeTestInfo {
    pub coords: [f64; 6],
    pub parent_within: Within,
    /// 0 for entries, growing towards the root.
    pub level: u32,
    pub element: Option<ElementId>,
    pub within: Within,
    pub score: f64,
}

impl RangeTestInfo {
    pub fn node(range: &Range3d, level: u32, parent_within: Within) -> Self {
        Self {
            coords: range.coords(),
            parent_within,
            level,
            element: None,
            within: Within::Partly,
            score: f64::from(level),
        }
    }

    pub fn entry(range: &Range3d, element: ElementId, parent_within: Within) -> Self {
        Self {
            coords: range.coords(),
            parent_within,
            level: 0,
            element: Some(element),
            within: Within::Partly,
            score: 0.0,
        }
    }

    pub fn range(&self) -> Range3d {
        Range3d::from_coords(self.coords)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    Completed,
    Stopped,
}

pub trait RangeVisitor {
    fn test_range(&mut self, info: &mut RangeTestInfo) -> WalkControl;
}

/// Spatial index the query worker walks.
pub trait RangeIndex: Send + Sync {
    fn walk(&self, visitor: &mut dyn RangeVisitor) -> Result<WalkStatus, QueryError>;

    fn contains(&self, id: ElementId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
enum Children {
    Entries(Vec<usize>),
    Nodes(Vec<usize>),
}

#[derive(Debug, Clone)]
struct Node {
    range: Range3d,
    level: u32,
    children: Children,
}

/// Bulk-loaded (sort-tile-recursive) in-memory R-tree walked best-first.
#[derive(Debug, Clone, Default)]
pub struct MemoryRangeIndex {
    entries: Vec<(ElementId, Range3d)>,
    positions: HashMap<ElementId, usize>,
    nodes: Vec<Node>,
    root: Option<usize>,
}

impl MemoryRangeIndex {
    pub fn new(entries: impl IntoIterator<Item = (ElementId, Range3d)>) -> Self {
        Self::with_fanout(entries, DEFAULT_FANOUT)
    }

    /// Later duplicates of an id replace earlier ones; null ranges and
    /// invalid ids are skipped.
    pub fn with_fanout(
        entries: impl IntoIterator<Item = (ElementId, Range3d)>,
        fanout: usize,
    ) -> Self {
        let mut index = Self::default();
        for (id, range) in entries {
            if !id.is_valid() || range.is_null() {
                continue;
            }
            match index.positions.get(&id) {
                Some(&position) => index.entries[position].1 = range,
                None => {
                    index.positions.insert(id, index.entries.len());
                    index.entries.push((id, range));
                }
            }
        }
        index.build(fanout.max(2));
        index
    }

    pub fn range_of(&self, id: ElementId) -> Option<Range3d> {
        self.positions
            .get(&id)
            .map(|&position| self.entries[position].1)
    }

    /// Level of the root node; 0 when empty.
    pub fn height(&self) -> u32 {
        self.root.map(|root| self.nodes[root].level).unwrap_or(0)
    }

    fn build(&mut self, fanout: usize) {
        let items = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, (_, range))| (*range, position))
            .collect::<Vec<_>>();
        if items.is_empty() {
            return;
        }

        let mut level = 1;
        let mut layer = pack(items, fanout)
            .into_iter()
            .map(|group| self.push_node(level, group, Children::Entries))
            .collect::<Vec<_>>();
        while layer.len() > 1 {
            level += 1;
            let items = layer
                .iter()
                .map(|&node| (self.nodes[node].range, node))
                .collect::<Vec<_>>();
            layer = pack(items, fanout)
                .into_iter()
                .map(|group| self.push_node(level, group, Children::Nodes))
                .collect();
        }
        self.root = layer.first().copied();
    }

    fn push_node(
        &mut self,
        level: u32,
        group: Vec<(Range3d, usize)>,
        wrap: fn(Vec<usize>) -> Children,
    ) -> usize {
        let mut range = Range3d::null();
        for (child_range, _) in &group {
            range.extend(child_range);
        }
        self.nodes.push(Node {
            range,
            level,
            children: wrap(group.into_iter().map(|(_, child)| child).collect()),
        });
        self.nodes.len() - 1
    }

    fn node(&self, index: usize) -> Result<&Node, QueryError> {
        self.nodes
            .get(index)
            .ok_or_else(|| QueryError::Index(format!("dangling node {index}")))
    }
}

fn pack(mut items: Vec<(Range3d, usize)>, fanout: usize) -> Vec<Vec<(Range3d, usize)>> {
    let leaf_count = items.len().div_ceil(fanout);
    let slabs = ((leaf_count as f64).sqrt().ceil() as usize).max(1);
    let per_slab = slabs * fanout;

    items.sort_by(|a, b| a.0.center()[0].total_cmp(&b.0.center()[0]));
    let mut groups = Vec::with_capacity(leaf_count);
    for slab in items.chunks_mut(per_slab) {
        slab.sort_by(|a, b| a.0.center()[1].total_cmp(&b.0.center()[1]));
        for group in slab.chunks(fanout) {
            groups.push(group.to_vec());
        }
    }
    groups
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f64,
    node: usize,
    within: Within,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl RangeIndex for MemoryRangeIndex {
    fn walk(&self, visitor: &mut dyn RangeVisitor) -> Result<WalkStatus, QueryError> {
        let Some(root) = self.root else {
            return Ok(WalkStatus::Completed);
        };

        let mut frontier = BinaryHeap::new();
        let node = self.node(root)?;
        let mut info = RangeTestInfo::node(&node.range, node.level, Within::Partly);
        if visitor.test_range(&mut info) == WalkControl::Stop {
            return Ok(WalkStatus::Stopped);
        }
        if info.within != Within::Outside {
            frontier.push(Reverse(Candidate {
                score: info.score,
                node: root,
                within: info.within,
            }));
        }

        while let Some(Reverse(candidate)) = frontier.pop() {
            match &self.node(candidate.node)?.children {
                Children::Entries(entries) => {
                    for &position in entries {
                        let (id, range) = self.entries.get(position).ok_or_else(|| {
                            QueryError::Index(format!("dangling entry {position}"))
                        })?;
                        let mut info = RangeTestInfo::entry(range, *id, candidate.within);
                        if visitor.test_range(&mut info) == WalkControl::Stop {
                            return Ok(WalkStatus::Stopped);
                        }
                    }
                }
                Children::Nodes(children) => {
                    for &child in children {
                        let node = self.node(child)?;
                        let mut info =
                            RangeTestInfo::node(&node.range, node.level, candidate.within);
                        if visitor.test_range(&mut info) == WalkControl::Stop {
                            return Ok(WalkStatus::Stopped);
                        }
                        if info.within != Within::Outside {
                            frontier.push(Reverse(Candidate {
                                score: info.score,
                                node: child,
                                within: info.within,
                            }));
                        }
                    }
                }
            }
        }
        Ok(WalkStatus::Completed)
    }

    fn contains(&self, id: ElementId) -> bool {
        self.positions.contains_key(&id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
