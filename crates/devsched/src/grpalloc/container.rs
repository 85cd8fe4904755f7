//! Per-container and pod-level allocation drivers.

use crate::grpalloc::{AllocState, GroupContext, GroupPrefix, LocalKeys};
use crate::resources::{ContainerInfo, InsufficientResource, NodeInfo, PodInfo, ResourceList};
use crate::scorer::{self, ResourceScoreFn};
use crate::{Map, Score, Set};
use itertools::Itertools;

pub(crate) struct ContainerOutcome {
    pub fits: bool,
    pub reasons: Vec<InsufficientResource>,
    pub score: Score,
    pub used_by_pod: ResourceList,
    pub used_by_node: ResourceList,
}

/// Scoring functions for every allocatable key of a node. A missing selector
/// entry picks the default scorer for that key.
pub(crate) fn node_score_fns(node: &NodeInfo) -> Map<String, ResourceScoreFn> {
    node.allocatable
        .keys()
        .map(|key| {
            let selector = node
                .scorer
                .get(key)
                .copied()
                .unwrap_or(scorer::SCORER_LEFTOVER);
            (key.clone(), scorer::select(key, selector))
        })
        .collect()
}

/// Runs one container against the node's allocatable tree.
///
/// Three modes: a fresh allocation when `allocate_from` has not been filled
/// yet, a score-only pass when it has (the container is left untouched; only
/// an internal copy is rescored), and a trivial pass when the container has
/// no device requests at all.
#[allow(clippy::too_many_arguments)]
pub(crate) fn container_fits_group_constraints(
    prefix: &GroupPrefix,
    cont_name: &str,
    cont: &mut ContainerInfo,
    init_container: bool,
    allocatable: &ResourceList,
    alloc_scorer: &Map<String, ResourceScoreFn>,
    used_by_pod: ResourceList,
    used_by_node: ResourceList,
    used_groups: &mut Set<String>,
    prefer_used: bool,
    set_allocate_from: bool,
) -> ContainerOutcome {
    log::debug!("Allocating for container {cont_name}");

    let mut required = ResourceList::default();
    let mut req_name = LocalKeys::default();
    let mut req_scorer: Map<String, Option<ResourceScoreFn>> = Map::default();
    for (key, &quantity) in &cont.dev_requests {
        if !prefix.owns(key) {
            continue;
        }
        req_name.insert(key.clone(), key.clone());
        required.insert(key.clone(), quantity);
        let override_fn = cont
            .scorer
            .get(key)
            .map(|&selector| scorer::select(key, selector));
        req_scorer.insert(key.clone(), override_fn);
    }

    // Every allocatable key of the device namespace hangs off the single
    // top-level group location.
    let mut alloc = ResourceList::default();
    let mut alloc_name: Map<String, LocalKeys> = Map::default();
    for (key, &quantity) in allocatable {
        if !prefix.owns(key) {
            continue;
        }
        alloc_name
            .entry(prefix.group().to_string())
            .or_default()
            .insert(key.clone(), key.clone());
        alloc.insert(key.clone(), quantity);
    }

    let ctx = GroupContext {
        cont_name,
        init_container,
        prefer_used,
        required: &required,
        req_scorer: &req_scorer,
        alloc: &alloc,
        alloc_scorer,
    };

    let mut state = AllocState {
        used_by_pod,
        used_by_node,
        ..Default::default()
    };

    let needs_allocation = match &cont.allocate_from {
        None => true,
        Some(allocate_from) => allocate_from.is_empty() && !required.is_empty(),
    };

    let (fits, reasons) = if needs_allocation {
        let (fits, reasons) = ctx.allocate_group(
            &req_name,
            &alloc_name,
            prefix.full(),
            prefix.head(),
            &mut state,
            used_groups,
        );
        if set_allocate_from {
            log::debug!("Setting allocate_from of {cont_name} to {:?}", state.allocate_from);
            cont.allocate_from = Some(state.allocate_from.clone());
        }
        (fits, reasons)
    } else if !required.is_empty() {
        log::debug!("Performing only find and score, allocate_from already set");
        state.allocate_from = cont.allocate_from.clone().unwrap_or_default();
        let empty = LocalKeys::default();
        let top_level = alloc_name.get(prefix.group()).unwrap_or(&empty);
        ctx.find_score_and_update(&req_name, top_level, &mut state)
    } else {
        log::debug!("No group requests for container {cont_name}");
        (true, Vec::new())
    };

    log::debug!(
        "Container {cont_name} allocation found {fits} with score {}",
        state.score
    );

    ContainerOutcome {
        fits,
        reasons,
        score: state.score,
        used_by_pod: state.used_by_pod,
        used_by_node: state.used_by_node,
    }
}

/// Evaluates a whole pod against a node.
///
/// Running containers go first in sorted name order, then init containers,
/// threading pod/node usage and a shared used-group set through so that init
/// containers land on locations the running containers already claimed. The
/// returned score is the last running container's score; it already
/// summarizes the pod's allocation on this node. With `allocating` set, each
/// container's `allocate_from` is written back.
pub fn pod_fits_group_constraints(
    prefix: &GroupPrefix,
    node: &NodeInfo,
    pod: &mut PodInfo,
    allocating: bool,
) -> (bool, Vec<InsufficientResource>, Score) {
    let mut used_by_pod = ResourceList::default();
    let mut used_by_node = node.used.clone();
    let mut used_groups = Set::default();
    let alloc_scorer = node_score_fns(node);

    let mut found = true;
    let mut total_score = 0.0;
    let mut failures = Vec::new();

    let running: Vec<String> = pod.running_containers.keys().cloned().sorted().collect();
    for cont_name in &running {
        let cont = pod.running_containers.get_mut(cont_name).unwrap();
        let outcome = container_fits_group_constraints(
            prefix,
            cont_name,
            cont,
            false,
            &node.allocatable,
            &alloc_scorer,
            used_by_pod,
            used_by_node,
            &mut used_groups,
            true,
            allocating,
        );
        if outcome.fits {
            total_score = outcome.score;
        } else {
            found = false;
            failures.extend(outcome.reasons);
        }
        used_by_pod = outcome.used_by_pod;
        used_by_node = outcome.used_by_node;
    }

    let init: Vec<String> = pod.init_containers.keys().cloned().sorted().collect();
    for cont_name in &init {
        let cont = pod.init_containers.get_mut(cont_name).unwrap();
        let outcome = container_fits_group_constraints(
            prefix,
            cont_name,
            cont,
            true,
            &node.allocatable,
            &alloc_scorer,
            used_by_pod,
            used_by_node,
            &mut used_groups,
            true,
            allocating,
        );
        if !outcome.fits {
            found = false;
            failures.extend(outcome.reasons);
        }
        used_by_pod = outcome.used_by_pod;
        used_by_node = outcome.used_by_node;
    }

    log::debug!(
        "Pod {} fits {found}, score {total_score}, pod usage {used_by_pod:?}, node usage {used_by_node:?}",
        pod.name
    );

    (found, failures, total_score)
}
