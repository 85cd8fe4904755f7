use crate::common::error::SchedError;
use crate::grpalloc::{self, GroupPrefix, accounting};
use crate::resources::{InsufficientResource, NodeInfo, PodInfo};
use crate::scheduler::DeviceScheduler;
use crate::{Result, Score};
use itertools::Itertools;

/// The synthetic device scheduler backing every device type that relies on
/// group allocation. The aggregator appends it once and keeps it as the last
/// element so that device-specific schedulers can rewrite requests before
/// the group search runs.
pub struct GroupDevice {
    prefix: GroupPrefix,
}

impl GroupDevice {
    pub fn new(prefix: GroupPrefix) -> Self {
        GroupDevice { prefix }
    }
}

impl DeviceScheduler for GroupDevice {
    fn add_node(&mut self, _node_name: &str, _node: &NodeInfo) {}

    fn remove_node(&mut self, _node_name: &str) {}

    fn pod_fits_device(
        &self,
        node: &NodeInfo,
        pod: &mut PodInfo,
        fill_allocate_from: bool,
    ) -> (bool, Vec<InsufficientResource>, Score) {
        log::debug!("Running group scheduler for pod {}", pod.name);
        grpalloc::pod_fits_group_constraints(&self.prefix, node, pod, fill_allocate_from)
    }

    /// Re-runs the fit with `allocate_from` write-back. Usage may have moved
    /// between predicate and commit, in which case the caller gets an error
    /// and re-enqueues the pod.
    fn pod_allocate(&self, node: &NodeInfo, pod: &mut PodInfo) -> Result<()> {
        let (fits, reasons, _) =
            grpalloc::pod_fits_group_constraints(&self.prefix, node, pod, true);
        if !fits {
            return Err(SchedError::PodNoLongerFits {
                pod: pod.name.clone(),
                node: node.name.clone(),
                reasons: reasons.iter().join("; "),
            });
        }
        Ok(())
    }

    fn take_pod_resources(&self, node: &mut NodeInfo, pod: &PodInfo) -> Result<()> {
        accounting::take_pod_group_resources(&self.prefix, node, pod);
        Ok(())
    }

    fn return_pod_resources(&self, node: &mut NodeInfo, pod: &PodInfo) -> Result<()> {
        accounting::return_pod_group_resources(&self.prefix, node, pod);
        Ok(())
    }

    fn name(&self) -> &str {
        "grpdevice"
    }

    fn uses_group_scheduler(&self) -> bool {
        true
    }
}
