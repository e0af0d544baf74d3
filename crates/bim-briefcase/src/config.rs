use bim_core::CodeSpecId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BriefcaseConfig {
    /// Reuse a stamped `.local` file instead of pulling again on open.
    pub reuse_local_db: bool,
    /// Code specs whose codes this briefcase never reserves.
    pub unmanaged_code_specs: BTreeSet<CodeSpecId>,
    /// Code specs left out of bulk requests (e.g. generated geometry parts).
    pub bulk_filtered_code_specs: BTreeSet<CodeSpecId>,
}

impl Default for BriefcaseConfig {
    fn default() -> Self {
        Self {
            reuse_local_db: true,
            unmanaged_code_specs: BTreeSet::new(),
            bulk_filtered_code_specs: BTreeSet::new(),
        }
    }
}

impl BriefcaseConfig {
    pub fn is_code_managed(&self, spec: CodeSpecId) -> bool {
        !self.unmanaged_code_specs.contains(&spec)
    }

    pub fn is_bulk_filtered(&self, spec: CodeSpecId) -> bool {
        self.bulk_filtered_code_specs.contains(&spec)
    }
}
