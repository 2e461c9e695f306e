use serde::{Deserialize, Serialize};

/// `source_id` is blocked by `target_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyLink {
    pub source_id: String,
    pub target_id: String,
}

impl DependencyLink {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        DependencyLink {
            source_id: source_id.into(),
            target_id: target_id.into(),
        }
    }
}
