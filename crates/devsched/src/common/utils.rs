use crate::Map;
use std::hash::Hash;

/// Keys of a map in ascending order. Candidate enumeration and container
/// iteration go through this so that allocation results are reproducible.
pub fn sorted_keys<K: Ord + Hash, V>(map: &Map<K, V>) -> Vec<&K> {
    let mut keys: Vec<_> = map.keys().collect();
    keys.sort_unstable();
    keys
}
