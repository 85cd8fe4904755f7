use crate::resources::{ResourceList, ResourceScorer};
use serde::{Deserialize, Serialize};

/// A node's advertised device tree plus its current consumption.
///
/// Rebuilt from the node annotation at the start of every scheduling
/// decision; `used` is only written back at commit time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct NodeInfo {
    pub name: String,
    pub capacity: ResourceList,
    pub allocatable: ResourceList,
    pub used: ResourceList,
    /// Scorer selector per allocatable key; missing entries select the
    /// default scorer.
    pub scorer: ResourceScorer,
    /// Standard kube quantities, passthrough.
    pub kube_cap: ResourceList,
    pub kube_alloc: ResourceList,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        NodeInfo {
            name: name.into(),
            ..Default::default()
        }
    }
}
