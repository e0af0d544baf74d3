use anyhow::{bail, Context, Result};
use bim_core::{ElementId, ModelId};
use bim_query::{
    ElementLoader, MemoryRangeIndex, QueryConfig, QueryModel, QueryPlan, QueryQueue, Range3d,
    RangeIndex,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

const DEFAULT_ELEMENT_BYTES: u64 = 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct SceneElement {
    pub id: ElementId,
    pub low: [f64; 3],
    pub high: [f64; 3],
    /// Resident size once loaded.
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// A model's element boxes plus the plan to run against them.
#[derive(Debug, Clone, Deserialize)]
pub struct Scene {
    #[serde(default = "default_model")]
    pub model: ModelId,
    pub elements: Vec<SceneElement>,
    pub plan: QueryPlan,
}

fn default_model() -> ModelId {
    ModelId(1)
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}

/// In-memory element store sized from the scene.
#[derive(Debug, Default)]
pub struct SceneLoader {
    sizes: HashMap<ElementId, u64>,
    resident: Mutex<BTreeMap<ElementId, u64>>,
}

impl SceneLoader {
    pub fn new(elements: &[SceneElement]) -> Self {
        Self {
            sizes: elements
                .iter()
                .map(|element| {
                    (
                        element.id,
                        element.bytes.unwrap_or(DEFAULT_ELEMENT_BYTES),
                    )
                })
                .collect(),
            resident: Mutex::new(BTreeMap::new()),
        }
    }
}

impl ElementLoader for SceneLoader {
    fn load(&self, id: ElementId) -> bool {
        let Some(&bytes) = self.sizes.get(&id) else {
            return false;
        };
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, bytes);
        true
    }

    fn find(&self, id: ElementId) -> bool {
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    fn total_allocated(&self) -> u64 {
        self.resident
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    fn purge(&self, target_bytes: u64) {
        let mut resident = self.resident.lock().unwrap_or_else(PoisonError::into_inner);
        let mut total: u64 = resident.values().sum();
        while total > target_bytes {
            let Some((_, bytes)) = resident.pop_first() else {
                break;
            };
            total -= bytes;
        }
        debug!(total, target_bytes, "purged scene elements");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub model: ModelId,
    pub primary: Vec<ElementId>,
    pub secondary: Vec<ElementId>,
    pub reached_max: bool,
    pub elapsed_ms: u64,
    pub resident_bytes: u64,
}

impl QueryReport {
    pub fn lines(&self) -> Vec<String> {
        let join = |ids: &[ElementId]| {
            ids.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        };
        vec![
            format!(
                "model {}: {} primary, {} secondary hits in {} ms{}",
                self.model,
                self.primary.len(),
                self.secondary.len(),
                self.elapsed_ms,
                if self.reached_max { " (limit reached)" } else { "" }
            ),
            format!("primary: {}", join(&self.primary)),
            format!("secondary: {}", join(&self.secondary)),
            format!("resident: {} bytes", self.resident_bytes),
        ]
    }
}

/// Runs the scene once on a fresh worker and waits for the hand-off.
pub fn run(scene: Scene, config: QueryConfig) -> Result<QueryReport> {
    let Scene {
        model,
        elements,
        plan,
    } = scene;
    let loader = Arc::new(SceneLoader::new(&elements));
    let index = MemoryRangeIndex::new(
        elements
            .iter()
            .map(|element| (element.id, Range3d::new(element.low, element.high))),
    );
    info!(model = %model, entries = index.len(), "running scene query");
    let query_model = Arc::new(QueryModel::new(
        model,
        Arc::new(index),
        loader.clone(),
        plan,
    ));

    let queue = QueryQueue::start(config).context("Failed to start query worker")?;
    queue
        .request_processing(query_model.clone())
        .context("Failed to queue scene query")?;
    queue.wait_until_idle();
    queue.terminate();

    let Some(results) = query_model.take_updated_results() else {
        bail!("Query for model {model} produced no results");
    };
    Ok(QueryReport {
        model,
        primary: results.primary,
        secondary: results.secondary,
        reached_max: results.reached_max,
        elapsed_ms: results.elapsed.as_millis() as u64,
        resident_bytes: loader.total_allocated(),
    })
}
