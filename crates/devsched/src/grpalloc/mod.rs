//! Hierarchical device-group allocation.
//!
//! A container's device requests form a path-structured requirement tree; a
//! node advertises its devices as an allocatable tree of the same shape. The
//! allocator walks the requirement tree recursively, enumerating candidate
//! allocatable locations per group, checking capacity through the per-resource
//! scorers, backtracking on failure, and committing the best-scoring
//! candidate at every level.

pub mod accounting;
pub mod container;

pub use container::pod_fits_group_constraints;

use crate::Result;
use crate::common::error::SchedError;
use crate::common::utils::sorted_keys;
use crate::resources::{InsufficientResource, ResourceList};
use crate::scorer::{self, ResourceScoreFn};
use crate::{Map, Set};
use smallvec::SmallVec;

/// The configured anchor of the device-group namespace, e.g.
/// `resource/group`. Exactly one `/` separates the allocatable-side prefix
/// from the name of the top-level group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPrefix {
    full: String,
    head: String,
    group: String,
}

impl GroupPrefix {
    pub fn parse(prefix: &str) -> Result<Self> {
        let mut parts = prefix.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(head), Some(group), None) if !head.is_empty() && !group.is_empty() => {
                Ok(GroupPrefix {
                    full: prefix.to_string(),
                    head: head.to_string(),
                    group: group.to_string(),
                })
            }
            _ => Err(SchedError::InvalidGroupPrefix(prefix.to_string())),
        }
    }

    /// The whole anchor, `<head>/<group>`.
    pub fn full(&self) -> &str {
        &self.full
    }

    pub(crate) fn head(&self) -> &str {
        &self.head
    }

    pub(crate) fn group(&self) -> &str {
        &self.group
    }

    /// Whether a resource key lives in the device-group namespace. Keys
    /// outside it are owned by the surrounding scheduler and pass through
    /// untouched.
    pub(crate) fn owns(&self, key: &str) -> bool {
        key.strip_prefix(self.full.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Group-local resource keys: local name -> global key.
pub(crate) type LocalKeys = Map<String, String>;

/// Subgroups found under a base path: group name -> group index -> members.
pub(crate) type SubGroups = Map<String, Map<String, LocalKeys>>;

/// Splits a set of keys anchored at `base` into subgroups.
///
/// A global key of the shape `base/<name>/<index>/<tail>` belongs to the
/// subgroup `(name, index)` with local member name `tail`; anything else is a
/// leaf of the current group. The second return value records, per local
/// key, whether it was claimed by a subgroup.
pub(crate) fn find_subgroups(base: &str, keys: &LocalKeys) -> (SubGroups, Map<String, bool>) {
    let mut subgroups = SubGroups::default();
    let mut is_subgroup = Map::default();
    for (local, global) in keys {
        let parsed = global.strip_prefix(base).and_then(|rest| {
            let rest = rest.strip_prefix('/')?;
            let mut segments = rest.splitn(3, '/');
            match (segments.next(), segments.next(), segments.next()) {
                (Some(name), Some(index), Some(tail)) => {
                    Some((name.to_string(), index.to_string(), tail.to_string()))
                }
                _ => None,
            }
        });
        match parsed {
            Some((name, index, tail)) => {
                subgroups
                    .entry(name)
                    .or_default()
                    .entry(index)
                    .or_default()
                    .insert(tail, global.clone());
                is_subgroup.insert(local.clone(), true);
            }
            None => {
                is_subgroup.insert(local.clone(), false);
            }
        }
    }
    (subgroups, is_subgroup)
}

/// Mutable allocation state for one candidate.
///
/// Every candidate location works on its own clone; the winner replaces the
/// parent's state, losers are dropped. Backtracking therefore never leaks
/// usage into sibling candidates.
#[derive(Debug, Clone, Default)]
pub(crate) struct AllocState {
    pub allocate_from: Map<String, String>,
    pub used_by_pod: ResourceList,
    pub used_by_node: ResourceList,
    pub score: f64,
}

/// Read-only inputs of one container's allocation.
pub(crate) struct GroupContext<'a> {
    pub cont_name: &'a str,
    pub init_container: bool,
    pub prefer_used: bool,
    /// Global requirement key -> requested quantity.
    pub required: &'a ResourceList,
    /// Per-requirement scorer overrides; `None` defers to the node-side
    /// scorer of the mapped allocatable key.
    pub req_scorer: &'a Map<String, Option<ResourceScoreFn>>,
    /// Global allocatable key -> capacity.
    pub alloc: &'a ResourceList,
    pub alloc_scorer: &'a Map<String, ResourceScoreFn>,
}

impl GroupContext<'_> {
    /// Recursive search for the group whose members are `grp_required`.
    ///
    /// On success the winning candidate's state is committed into `state`
    /// and its location path recorded in `used_groups`. The returned reasons
    /// are non-empty only on failure, and per-location reasons are bubbled
    /// only when the level had exactly one candidate; with several
    /// candidates the reasons of non-chosen alternatives are noise.
    pub fn allocate_group(
        &self,
        grp_required: &LocalKeys,
        grp_alloc: &Map<String, LocalKeys>,
        req_base: &str,
        alloc_base_prefix: &str,
        state: &mut AllocState,
        used_groups: &mut Set<String>,
    ) -> (bool, Vec<InsufficientResource>) {
        if grp_required.is_empty() {
            return (true, Vec::new());
        }

        let (subgrps_req, is_req_sub) = find_subgroups(req_base, grp_required);

        let mut best: Option<(AllocState, bool, String)> = None;
        let mut failures = Vec::new();

        for location in sorted_keys(grp_alloc) {
            let mut candidate = state.clone();
            let (found, reasons) = self.allocate_group_at(
                location,
                grp_alloc,
                grp_required,
                &subgrps_req,
                &is_req_sub,
                req_base,
                alloc_base_prefix,
                &mut candidate,
                used_groups,
            );
            let location_name = format!("{alloc_base_prefix}/{location}");

            if found {
                log::debug!(
                    "Group {req_base} available at {location_name} with score {}",
                    candidate.score
                );
                let location_used = used_groups.contains(&location_name);
                // `>=` on purpose: among equal scores the last candidate in
                // sorted order wins. Used locations beat unused ones when
                // `prefer_used` is set, regardless of score.
                let take_new = match &best {
                    None => true,
                    Some((best_state, best_used, _)) => {
                        if !self.prefer_used {
                            candidate.score >= best_state.score
                        } else if *best_used {
                            location_used && candidate.score >= best_state.score
                        } else {
                            location_used || candidate.score >= best_state.score
                        }
                    }
                };
                if take_new {
                    best = Some((candidate, location_used, location_name));
                }
            } else {
                log::debug!("Group {req_base} not available at {location_name}");
            }

            if grp_alloc.len() == 1 {
                failures.extend(reasons);
            }
        }

        match best {
            Some((best_state, _, location_name)) => {
                log::debug!("Group {req_base} allocated at {location_name}");
                *state = best_state;
                used_groups.insert(location_name);
                (true, Vec::new())
            }
            None => (false, failures),
        }
    }

    /// Tries to satisfy the current group entirely inside one candidate
    /// location: leaf feasibility, subgroup recursion, then a rescore that
    /// replays each target's scorer with the location's full request vector.
    #[allow(clippy::too_many_arguments)]
    fn allocate_group_at(
        &self,
        location: &str,
        grp_alloc: &Map<String, LocalKeys>,
        grp_required: &LocalKeys,
        subgrps_req: &SubGroups,
        is_req_sub: &Map<String, bool>,
        req_base: &str,
        alloc_base_prefix: &str,
        state: &mut AllocState,
        used_groups: &mut Set<String>,
    ) -> (bool, Vec<InsufficientResource>) {
        let location_name = format!("{alloc_base_prefix}/{location}");
        let grp_alloc_res = &grp_alloc[location];
        let (subgrps_alloc, _) = find_subgroups(&location_name, grp_alloc_res);

        // Leaf and subgroup admission below tracks usage incrementally; the
        // rescore afterwards recomputes it from this restore point with the
        // grouped request vectors, because a scorer's score may be nonlinear
        // in the vector.
        let restore = state.clone();

        let (found_leaves, mut reasons) =
            self.resource_available(grp_required, is_req_sub, grp_alloc_res, state);

        let (found_subgroups, mut reasons_sub) = self.allocate_subgroups(
            &location_name,
            subgrps_req,
            &subgrps_alloc,
            req_base,
            state,
            used_groups,
        );

        let mut found = found_leaves && found_subgroups;
        if found {
            state.used_by_pod = restore.used_by_pod;
            state.used_by_node = restore.used_by_node;
            state.score = restore.score;
            let (found_score, reasons_score) =
                self.find_score_and_update(grp_required, grp_alloc_res, state);
            if !found_score {
                log::error!(
                    "Rescoring {location_name} failed even though admission succeeded: {reasons_score:?}"
                );
                found = false;
                reasons_sub.extend(reasons_score);
            }
        }
        reasons.extend(reasons_sub);

        (found, reasons)
    }

    /// Checks every leaf requirement of the group against its counterpart
    /// under the candidate location, writing through `allocate_from` and the
    /// working usage as it goes.
    fn resource_available(
        &self,
        grp_required: &LocalKeys,
        is_req_sub: &Map<String, bool>,
        grp_alloc_res: &LocalKeys,
        state: &mut AllocState,
    ) -> (bool, Vec<InsufficientResource>) {
        let mut found = true;
        let mut failures = Vec::new();
        for local in sorted_keys(grp_required) {
            if is_req_sub.get(local).copied().unwrap_or(false) {
                continue;
            }
            let global_req = &grp_required[local];
            let required = self.required.get(global_req).copied().unwrap_or(0);
            let Some(global_alloc) = grp_alloc_res.get(local) else {
                found = false;
                failures.push(InsufficientResource::new(
                    format!("{}/{}", self.cont_name, global_req),
                    required,
                    0,
                    0,
                ));
                continue;
            };
            let score_fn = self
                .req_scorer
                .get(global_req)
                .copied()
                .flatten()
                .or_else(|| self.alloc_scorer.get(global_alloc).copied())
                .unwrap_or_else(|| scorer::default_for(global_alloc));
            let capacity = self.alloc.get(global_alloc).copied().unwrap_or(0);
            let used_pod = state.used_by_pod.get(global_alloc).copied().unwrap_or(0);
            let used_node = state.used_by_node.get(global_alloc).copied().unwrap_or(0);
            let result = score_fn(
                capacity,
                used_pod,
                used_node,
                &[required],
                self.init_container,
            );
            if !result.fits {
                found = false;
                failures.push(InsufficientResource::new(
                    format!("{}/{}", self.cont_name, global_req),
                    required,
                    used_node,
                    capacity,
                ));
                continue;
            }
            state
                .used_by_pod
                .insert(global_alloc.clone(), result.used_by_pod);
            state
                .used_by_node
                .insert(global_alloc.clone(), result.used_by_node);
            state
                .allocate_from
                .insert(global_req.clone(), global_alloc.clone());
            log::trace!(
                "Leaf {global_req} available from {global_alloc} with score {}",
                result.score
            );
        }
        (found, failures)
    }

    /// Recurses into every required subgroup, matching it against the
    /// candidate subgroup locations under `location_name`.
    fn allocate_subgroups(
        &self,
        location_name: &str,
        subgrps_req: &SubGroups,
        subgrps_alloc: &SubGroups,
        req_base: &str,
        state: &mut AllocState,
        used_groups: &mut Set<String>,
    ) -> (bool, Vec<InsufficientResource>) {
        let empty = Map::default();
        let mut found = true;
        let mut failures = Vec::new();
        for name in sorted_keys(subgrps_req) {
            let indices = &subgrps_req[name];
            let candidates = subgrps_alloc.get(name).unwrap_or(&empty);
            for index in sorted_keys(indices) {
                let sub_required = &indices[index];
                let sub_req_base = format!("{req_base}/{name}/{index}");
                let sub_alloc_prefix = format!("{location_name}/{name}");
                log::debug!("Allocating subgroup {sub_req_base}");
                let (sub_found, sub_reasons) = self.allocate_group(
                    sub_required,
                    candidates,
                    &sub_req_base,
                    &sub_alloc_prefix,
                    state,
                    used_groups,
                );
                if !sub_found {
                    found = false;
                    failures.push(InsufficientResource::new(
                        format!("{}/{}", self.cont_name, sub_req_base),
                        0,
                        0,
                        0,
                    ));
                    failures.extend(sub_reasons);
                }
            }
        }
        (found, failures)
    }

    /// Recomputes usage and score for a settled location: requested
    /// quantities are grouped per allocated target, then every allocatable
    /// key under the location is scored once with its full request vector
    /// (untouched keys contribute their headroom with an empty vector). The
    /// location score is the mean over all of them, which is what lets the
    /// top-level score summarize the whole allocation.
    pub fn find_score_and_update(
        &self,
        grp_required: &LocalKeys,
        grp_alloc_res: &LocalKeys,
        state: &mut AllocState,
    ) -> (bool, Vec<InsufficientResource>) {
        let mut found = true;
        let mut failures = Vec::new();

        let mut requested: Map<&str, SmallVec<[i64; 4]>> = Map::default();
        for local in sorted_keys(grp_required) {
            let global_req = &grp_required[local];
            let target = state
                .allocate_from
                .get(global_req)
                .filter(|target| self.alloc.contains_key(*target));
            let required = self.required.get(global_req).copied().unwrap_or(0);
            match target {
                Some(target) => requested.entry(target).or_default().push(required),
                None => {
                    found = false;
                    failures.push(InsufficientResource::new(global_req.clone(), required, 0, 0));
                }
            }
        }

        state.score = 0.0;
        let mut score_sum = 0.0;
        for local in sorted_keys(grp_alloc_res) {
            let key = &grp_alloc_res[local];
            let capacity = self.alloc.get(key).copied().unwrap_or(0);
            let score_fn = self
                .alloc_scorer
                .get(key)
                .copied()
                .unwrap_or_else(|| scorer::default_for(key));
            let used_pod = state.used_by_pod.get(key).copied().unwrap_or(0);
            let used_node = state.used_by_node.get(key).copied().unwrap_or(0);
            let requests: &[i64] = match requested.get(key.as_str()) {
                Some(vector) => vector,
                None => &[],
            };
            let result = score_fn(capacity, used_pod, used_node, requests, self.init_container);
            if !result.fits {
                found = false;
                failures.push(InsufficientResource::new(
                    key.clone(),
                    result.total_requested,
                    used_node,
                    capacity,
                ));
                continue;
            }
            score_sum += result.score;
            state.used_by_pod.insert(key.clone(), result.used_by_pod);
            state.used_by_node.insert(key.clone(), result.used_by_node);
        }
        if !grp_alloc_res.is_empty() {
            state.score = score_sum / grp_alloc_res.len() as f64;
        }

        (found, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_keys(keys: &[&str]) -> LocalKeys {
        keys.iter().map(|k| (k.to_string(), k.to_string())).collect()
    }

    #[test]
    fn test_group_prefix_parse() {
        let prefix = GroupPrefix::parse("resource/group").unwrap();
        assert_eq!(prefix.full(), "resource/group");
        assert_eq!(prefix.head(), "resource");
        assert_eq!(prefix.group(), "group");

        assert!(GroupPrefix::parse("resource").is_err());
        assert!(GroupPrefix::parse("a/b/c").is_err());
        assert!(GroupPrefix::parse("/group").is_err());
        assert!(GroupPrefix::parse("resource/").is_err());
    }

    #[test]
    fn test_group_prefix_owns() {
        let prefix = GroupPrefix::parse("r/grp").unwrap();
        assert!(prefix.owns("r/grp/gpu/0/cards"));
        assert!(!prefix.owns("r/grpx/gpu/0/cards"));
        assert!(!prefix.owns("r/grp"));
        assert!(!prefix.owns("cpu"));
    }

    #[test]
    fn test_find_subgroups_splits_leaves_and_groups() {
        let keys = local_keys(&[
            "r/grp/gpu/A/cards",
            "r/grp/gpu/A/memory",
            "r/grp/gpu/B/cards",
            "r/grp/counter",
        ]);
        let (subgroups, is_sub) = find_subgroups("r/grp", &keys);

        assert_eq!(subgroups.len(), 1);
        let gpu = &subgroups["gpu"];
        assert_eq!(gpu.len(), 2);
        assert_eq!(gpu["A"]["cards"], "r/grp/gpu/A/cards");
        assert_eq!(gpu["A"]["memory"], "r/grp/gpu/A/memory");
        assert_eq!(gpu["B"]["cards"], "r/grp/gpu/B/cards");

        assert!(is_sub["r/grp/gpu/A/cards"]);
        assert!(!is_sub["r/grp/counter"]);
    }

    #[test]
    fn test_find_subgroups_nested_tail() {
        // A deeper path keeps everything after the index as the member name,
        // so nested groups resolve level by level.
        let keys = local_keys(&["r/grp/gpugrp1/A/gpu/0/cards"]);
        let (subgroups, _) = find_subgroups("r/grp", &keys);
        assert_eq!(
            subgroups["gpugrp1"]["A"]["gpu/0/cards"],
            "r/grp/gpugrp1/A/gpu/0/cards"
        );

        let next = &subgroups["gpugrp1"]["A"];
        let (nested, _) = find_subgroups("r/grp/gpugrp1/A", next);
        assert_eq!(nested["gpu"]["0"]["cards"], "r/grp/gpugrp1/A/gpu/0/cards");
    }
}
