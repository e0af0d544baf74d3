use bim_core::ElementId;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

#[derive(Debug, Clone, Copy)]
struct ScoredHit {
    score: f64,
    id: ElementId,
}

impl Ord for ScoredHit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for ScoredHit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScoredHit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredHit {}

/// Keeps the `limit` best-scoring elements seen so far. Ties on score are
/// broken by id so the retained set does not depend on arrival order.
#[derive(Debug, Clone)]
pub struct OcclusionScores {
    limit: usize,
    heap: BinaryHeap<Reverse<ScoredHit>>,
    members: HashSet<ElementId>,
}

impl OcclusionScores {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            heap: BinaryHeap::with_capacity(limit.min(4096)),
            members: HashSet::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.limit
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.members.contains(&id)
    }

    pub fn min_score(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(hit)| hit.score)
    }

    /// Whether anything scoring `score` could still get in. Used to prune
    /// nodes whose best possible score is already too low.
    pub fn could_accept(&self, score: f64) -> bool {
        match self.min_score() {
            Some(min) if self.is_full() => score >= min,
            _ => self.limit > 0,
        }
    }

    /// Returns false when the candidate did not make the cut or was
    /// already present.
    pub fn insert(&mut self, id: ElementId, score: f64) -> bool {
        if self.limit == 0 || self.members.contains(&id) {
            return false;
        }
        let candidate = ScoredHit { score, id };
        if self.is_full() {
            let Some(Reverse(min)) = self.heap.peek() else {
                return false;
            };
            if candidate <= *min {
                return false;
            }
            if let Some(Reverse(evicted)) = self.heap.pop() {
                self.members.remove(&evicted.id);
            }
        }
        self.members.insert(id);
        self.heap.push(Reverse(candidate));
        true
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.members.clear();
    }

    /// Ids from best to worst score.
    pub fn into_sorted_ids(self) -> Vec<ElementId> {
        let mut hits = self
            .heap
            .into_iter()
            .map(|Reverse(hit)| hit)
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| b.cmp(a));
        hits.into_iter().map(|hit| hit.id).collect()
    }
}
