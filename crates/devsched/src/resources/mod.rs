pub mod node;
pub mod pod;

pub use node::NodeInfo;
pub use pod::{ContainerInfo, PodInfo};

use crate::Map;
use std::fmt;

/// An opaque resource key. Keys are frequently `/`-delimited paths
/// (e.g. `resource/group/gpugrp/0/gpu/2/cards`); the path structure is
/// interpreted only by the group allocator.
pub type ResourceName = String;

/// Quantities per resource key. Values may be transiently negative
/// (release replays a scorer with a negated request).
pub type ResourceList = Map<ResourceName, i64>;

/// Mapping from a requirement key to the allocatable key it was satisfied
/// from.
pub type ResourceLocation = Map<ResourceName, ResourceName>;

/// Scorer selectors per resource key, see [`crate::scorer`].
pub type ResourceScorer = Map<ResourceName, i64>;

/// A single predicate failure, carrying enough to render a human-readable
/// message upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsufficientResource {
    pub resource: ResourceName,
    pub requested: i64,
    pub used: i64,
    pub capacity: i64,
}

impl InsufficientResource {
    pub fn new(resource: impl Into<ResourceName>, requested: i64, used: i64, capacity: i64) -> Self {
        InsufficientResource {
            resource: resource.into(),
            requested,
            used,
            capacity,
        }
    }
}

impl fmt::Display for InsufficientResource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Insufficient {}: requested {}, used {}, capacity {}",
            self.resource, self.requested, self.used, self.capacity
        )
    }
}
