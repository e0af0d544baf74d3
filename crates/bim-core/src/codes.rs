use crate::{BriefcaseId, CodeSpecId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DgnCode {
    pub spec: CodeSpecId,
    pub scope: String,
    pub value: String,
}

impl DgnCode {
    pub fn new(spec: CodeSpecId, scope: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            spec,
            scope: scope.into(),
            value: value.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_valid(&self) -> bool {
        self.spec.is_valid() && !self.is_empty()
    }
}

impl fmt::Display for DgnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.spec, self.scope, self.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    #[default]
    Available,
    Reserved(BriefcaseId),
    Used,
    Discarded,
}

impl CodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeState::Available => "available",
            CodeState::Reserved(_) => "reserved",
            CodeState::Used => "used",
            CodeState::Discarded => "discarded",
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CodeState::Available)
    }

    pub fn is_reserved_by(&self, briefcase: BriefcaseId) -> bool {
        matches!(self, CodeState::Reserved(owner) if *owner == briefcase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DgnCodeInfo {
    pub code: DgnCode,
    pub state: CodeState,
}

impl DgnCodeInfo {
    pub fn new(code: DgnCode, state: CodeState) -> Self {
        Self { code, state }
    }
}
