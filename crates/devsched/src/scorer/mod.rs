//! Per-resource scoring functions.
//!
//! A scorer encodes how used and requested quantities of one resource key
//! combine: normal containers accumulate, init containers contribute their
//! serial peak. It reports admission, post-allocation usage, and a fitness
//! score in `[0.0, 1.0]`.

use crate::resources::ResourceName;

/// Result of admitting a request vector against one resource key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResult {
    pub fits: bool,
    pub score: f64,
    pub total_requested: i64,
    pub used_by_pod: i64,
    pub used_by_node: i64,
}

/// `(capacity, used_by_pod, used_by_node, requests, is_init_container)`.
///
/// Scorers must accept negative request totals: release replays the scorer
/// with `[-pod_used]` to subtract a pod's contribution at the node level.
pub type ResourceScoreFn = fn(i64, i64, i64, &[i64], bool) -> ScoreResult;

/// Leftover-proportional scorer, the per-resource default.
pub const SCORER_LEFTOVER: i64 = 0;
/// Bin-packing scorer, prefers fuller resources.
pub const SCORER_PACKED: i64 = 1;

/// Usage arithmetic shared by all scorers.
///
/// Running containers accumulate. An init container runs serially before the
/// others, so it raises the pod's peak usage and the node absorbs only the
/// increase over the peak recorded so far.
fn admit(
    capacity: i64,
    used_by_pod: i64,
    used_by_node: i64,
    requests: &[i64],
    init_container: bool,
) -> (bool, i64, i64, i64) {
    let total: i64 = requests.iter().sum();
    let (new_pod, new_node) = if init_container {
        let new_pod = used_by_pod.max(total);
        (new_pod, used_by_node + (new_pod - used_by_pod))
    } else {
        (used_by_pod + total, used_by_node + total)
    };
    (new_node <= capacity, total, new_pod, new_node)
}

fn leftover_score(
    capacity: i64,
    used_by_pod: i64,
    used_by_node: i64,
    requests: &[i64],
    init_container: bool,
) -> ScoreResult {
    let (fits, total, new_pod, new_node) =
        admit(capacity, used_by_pod, used_by_node, requests, init_container);
    let score = if capacity > 0 {
        ((capacity - new_node) as f64 / capacity as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ScoreResult {
        fits,
        score,
        total_requested: total,
        used_by_pod: new_pod,
        used_by_node: new_node,
    }
}

fn packed_score(
    capacity: i64,
    used_by_pod: i64,
    used_by_node: i64,
    requests: &[i64],
    init_container: bool,
) -> ScoreResult {
    let (fits, total, new_pod, new_node) =
        admit(capacity, used_by_pod, used_by_node, requests, init_container);
    let score = if capacity > 0 {
        (new_node as f64 / capacity as f64).clamp(0.0, 1.0)
    } else {
        0.0
    };
    ScoreResult {
        fits,
        score,
        total_requested: total,
        used_by_pod: new_pod,
        used_by_node: new_node,
    }
}

/// Two-level scorer lookup: resource key plus numeric selector.
///
/// Unknown selectors fall back to the resource's default scorer so that a
/// stale selector in an annotation never breaks scheduling.
pub fn select(resource: &ResourceName, selector: i64) -> ResourceScoreFn {
    match selector {
        SCORER_LEFTOVER => leftover_score,
        SCORER_PACKED => packed_score,
        other => {
            log::debug!("Unknown scorer selector {other} for resource {resource}, using default");
            default_for(resource)
        }
    }
}

/// The scorer used when no selector is supplied.
pub fn default_for(_resource: &str) -> ResourceScoreFn {
    leftover_score
}
