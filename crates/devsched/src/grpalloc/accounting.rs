//! Node usage accounting.
//!
//! Replays the per-resource scorers over a pod's committed `allocate_from`
//! mappings to work out the delta a node's `used` map absorbs when the pod is
//! placed, or gives back when it is removed.

use crate::common::utils::sorted_keys;
use crate::grpalloc::GroupPrefix;
use crate::resources::{ContainerInfo, NodeInfo, PodInfo, ResourceList};
use crate::scorer;

fn update_resources_for_container(
    prefix: &GroupPrefix,
    node: &NodeInfo,
    cont: &ContainerInfo,
    init_container: bool,
    pod_resources: &mut ResourceList,
    updated_used_by_node: &mut ResourceList,
) {
    let Some(allocate_from) = &cont.allocate_from else {
        return;
    };
    for req_key in sorted_keys(allocate_from) {
        if !prefix.owns(req_key) {
            continue;
        }
        let allocated_from = &allocate_from[req_key];
        let quantity = cont.dev_requests.get(req_key).copied().unwrap_or(0);
        let capacity = node.allocatable.get(allocated_from).copied().unwrap_or(0);
        let used_pod = pod_resources.get(allocated_from).copied().unwrap_or(0);
        let used_node = updated_used_by_node
            .get(allocated_from)
            .copied()
            .unwrap_or(0);
        let selector = node
            .scorer
            .get(allocated_from)
            .copied()
            .unwrap_or(scorer::SCORER_LEFTOVER);
        let score_fn = scorer::select(allocated_from, selector);
        let result = score_fn(capacity, used_pod, used_node, &[quantity], init_container);
        pod_resources.insert(allocated_from.clone(), result.used_by_pod);
        updated_used_by_node.insert(allocated_from.clone(), result.used_by_node);
    }
}

/// Computes the resources a pod holds on a node together with the node's
/// usage map after taking (or, with `remove`, after releasing) the pod.
///
/// Running containers accumulate; init containers contribute their serial
/// peak. On removal the pod's total contribution is subtracted at the node
/// level in a single scorer replay per target key, so the arithmetic stays
/// with the scorer.
pub fn compute_pod_group_resources(
    prefix: &GroupPrefix,
    node: &NodeInfo,
    pod: &PodInfo,
    remove: bool,
) -> (ResourceList, ResourceList) {
    let mut pod_resources = ResourceList::default();
    let mut updated_used_by_node = node.used.clone();

    for cont_name in sorted_keys(&pod.running_containers) {
        update_resources_for_container(
            prefix,
            node,
            &pod.running_containers[cont_name],
            false,
            &mut pod_resources,
            &mut updated_used_by_node,
        );
    }
    for cont_name in sorted_keys(&pod.init_containers) {
        update_resources_for_container(
            prefix,
            node,
            &pod.init_containers[cont_name],
            true,
            &mut pod_resources,
            &mut updated_used_by_node,
        );
    }

    if remove {
        for allocated_from in sorted_keys(&pod_resources) {
            let pod_used = pod_resources[allocated_from];
            let used_node = node.used.get(allocated_from).copied().unwrap_or(0);
            let selector = node
                .scorer
                .get(allocated_from)
                .copied()
                .unwrap_or(scorer::SCORER_LEFTOVER);
            let score_fn = scorer::select(allocated_from, selector);
            let result = score_fn(0, 0, used_node, &[-pod_used], false);
            updated_used_by_node.insert(allocated_from.clone(), result.used_by_node);
        }
    }

    log::debug!(
        "Pod {} group resources: pod {pod_resources:?}, node after update {updated_used_by_node:?}, remove {remove}",
        pod.name
    );

    (pod_resources, updated_used_by_node)
}

/// Folds a placed pod's usage into `node.used`.
pub fn take_pod_group_resources(prefix: &GroupPrefix, node: &mut NodeInfo, pod: &PodInfo) {
    let (_, updated) = compute_pod_group_resources(prefix, node, pod, false);
    for (key, value) in updated {
        node.used.insert(key, value);
    }
}

/// Gives a removed pod's usage back to `node.used`.
pub fn return_pod_group_resources(prefix: &GroupPrefix, node: &mut NodeInfo, pod: &PodInfo) {
    let (_, updated) = compute_pod_group_resources(prefix, node, pod, true);
    for (key, value) in updated {
        node.used.insert(key, value);
    }
}
