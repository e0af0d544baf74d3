use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Thread name of the range-query worker.
    pub worker_name: String,
    /// Best-K size of the primary hit set when a plan does not set its own.
    pub hit_limit: usize,
    /// Best-K size of the close-range hit set.
    pub secondary_hit_limit: usize,
    /// Above this many resident bytes, hits are only looked up, not loaded.
    pub max_memory_bytes: u64,
    /// Purge down to this many bytes before loading when over the cap.
    pub purge_target_bytes: u64,
    /// Preemptions tolerated before a walk ignores pending graphics work.
    pub max_restarts: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            worker_name: "bim-range-query".to_string(),
            hit_limit: 5_000,
            secondary_hit_limit: 500,
            max_memory_bytes: 256 * 1024 * 1024,
            purge_target_bytes: 192 * 1024 * 1024,
            max_restarts: 8,
        }
    }
}
