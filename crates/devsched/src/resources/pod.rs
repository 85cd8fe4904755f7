use crate::Map;
use crate::resources::{ResourceList, ResourceLocation, ResourceScorer};
use serde::{Deserialize, Serialize};

/// Per-container device requests and their resolution.
///
/// Field names serialize in PascalCase so the structure round-trips the
/// device-info pod annotation produced by the cluster-side codec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ContainerInfo {
    /// Standard kube quantities, carried through untouched.
    pub kube_requests: ResourceList,
    /// Abstract device requests as written by the user.
    pub requests: ResourceList,
    /// Requests translated into the device namespace. Starts out equal to
    /// `requests`; device translators may rewrite it before allocation.
    pub dev_requests: ResourceList,
    /// Filled by the group allocator. `None` means no allocation was
    /// attempted yet; `Some` with an empty map means an allocation produced
    /// no device placements.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocate_from: Option<ResourceLocation>,
    /// Per-requirement scorer overrides.
    pub scorer: ResourceScorer,
}

impl ContainerInfo {
    pub fn new() -> Self {
        Default::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PodInfo {
    pub name: String,
    pub node_name: String,
    /// Pod-level abstract requests, passthrough for device translators.
    pub requests: ResourceList,
    pub init_containers: Map<String, ContainerInfo>,
    pub running_containers: Map<String, ContainerInfo>,
}

impl PodInfo {
    pub fn new(name: impl Into<String>) -> Self {
        PodInfo {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Drops every container's `allocate_from` so the next scheduling cycle
    /// performs a fresh allocation instead of rescoring a stale one.
    pub fn clear_allocate_from(&mut self) {
        for cont in self.running_containers.values_mut() {
            cont.allocate_from = None;
        }
        for cont in self.init_containers.values_mut() {
            cont.allocate_from = None;
        }
    }
}
