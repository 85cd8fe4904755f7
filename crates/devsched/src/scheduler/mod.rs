//! Composition of device-specific schedulers into one scheduling façade.

pub mod grpdevice;

pub use grpdevice::GroupDevice;

use crate::common::error::SchedError;
use crate::grpalloc::GroupPrefix;
use crate::resources::{InsufficientResource, NodeInfo, PodInfo};
use crate::{Map, Result, Score};
use std::sync::{Mutex, MutexGuard};

/// One device type's scheduling capabilities.
///
/// Implementations are registered with [`DevicesScheduler`] at startup and
/// called in registration order for every scheduling decision.
pub trait DeviceScheduler: Send + Sync {
    fn add_node(&mut self, node_name: &str, node: &NodeInfo);
    fn remove_node(&mut self, node_name: &str);
    /// Predicate plus score for one (pod, node) pair. With
    /// `fill_allocate_from` the pod's containers receive their allocation
    /// mappings.
    fn pod_fits_device(
        &self,
        node: &NodeInfo,
        pod: &mut PodInfo,
        fill_allocate_from: bool,
    ) -> (bool, Vec<InsufficientResource>, Score);
    fn pod_allocate(&self, node: &NodeInfo, pod: &mut PodInfo) -> Result<()>;
    fn take_pod_resources(&self, node: &mut NodeInfo, pod: &PodInfo) -> Result<()>;
    fn return_pod_resources(&self, node: &mut NodeInfo, pod: &PodInfo) -> Result<()>;
    fn name(&self) -> &str;
    /// Whether this device type expresses its requests in the group
    /// namespace and therefore needs the group allocator to run after it.
    fn uses_group_scheduler(&self) -> bool;
}

pub type DeviceSchedulerFactory = fn() -> Result<Box<dyn DeviceScheduler>>;

/// Compile-time replacement for dynamic plug-in loading: device scheduler
/// constructors are registered by name at startup and instantiated from the
/// configured list.
#[derive(Default)]
pub struct SchedulerRegistry {
    factories: Map<String, DeviceSchedulerFactory>,
}

impl SchedulerRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: DeviceSchedulerFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn DeviceScheduler>> {
        match self.factories.get(name) {
            Some(factory) => factory(),
            None => Err(SchedError::UnknownScheduler(name.to_string())),
        }
    }
}

#[derive(Default)]
struct ScoreTable {
    /// pod name -> node name -> total predicate score.
    score: Map<String, Map<String, Score>>,
    /// pod name -> best score seen across nodes.
    max_score: Map<String, Score>,
}

/// Ordered collection of device schedulers plus the score bookkeeping that
/// turns predicate scores into normalized priorities.
///
/// The surrounding scheduler may run predicates for different pods
/// concurrently, so the score tables live behind a mutex; the device list
/// itself is only mutated during startup registration.
pub struct DevicesScheduler {
    devices: Vec<Box<dyn DeviceScheduler>>,
    has_group_scheduler: bool,
    group_prefix: GroupPrefix,
    scores: Mutex<ScoreTable>,
}

impl DevicesScheduler {
    pub fn new(group_prefix: GroupPrefix) -> Self {
        DevicesScheduler {
            devices: Vec::new(),
            has_group_scheduler: false,
            group_prefix,
            scores: Mutex::new(Default::default()),
        }
    }

    fn scores(&self) -> MutexGuard<'_, ScoreTable> {
        // A panic while holding the lock leaves at worst a stale score, so
        // recover instead of propagating the poison.
        self.scores.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a device scheduler. The first group-using registration
    /// appends the synthetic [`GroupDevice`]; it stays the last element so
    /// the group search always runs after every device-specific rewrite.
    pub fn add_device(&mut self, device: Box<dyn DeviceScheduler>) {
        let uses_group = device.uses_group_scheduler();
        log::info!(
            "Registering device scheduler {}, using group scheduler {uses_group}",
            device.name()
        );
        if self.has_group_scheduler {
            let last = self.devices.len() - 1;
            self.devices.insert(last, device);
        } else {
            self.devices.push(device);
        }
        if uses_group && !self.has_group_scheduler {
            log::info!("Adding group device for group scheduler");
            self.devices
                .push(Box::new(GroupDevice::new(self.group_prefix.clone())));
            self.has_group_scheduler = true;
        }
    }

    /// Instantiates the configured schedulers from a registry. A name that
    /// fails to resolve or construct is logged and skipped; the rest of the
    /// configuration still loads.
    pub fn add_from_names(&mut self, registry: &SchedulerRegistry, names: &[String]) {
        for name in names {
            match registry.create(name) {
                Ok(device) => self.add_device(device),
                Err(err) => log::error!("Unable to add device scheduler {name}: {err}"),
            }
        }
    }

    /// Drops all registered schedulers and cached scores.
    pub fn remove_all(&mut self) {
        self.devices.clear();
        self.has_group_scheduler = false;
        let mut guard = self.scores();
        guard.score.clear();
        guard.max_score.clear();
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name()).collect()
    }

    pub fn add_node(&mut self, node_name: &str, node: &NodeInfo) {
        for device in &mut self.devices {
            log::debug!("Node {node_name} added to device {}", device.name());
            device.add_node(node_name, node);
        }
    }

    pub fn remove_node(&mut self, node_name: &str) {
        for device in &mut self.devices {
            device.remove_node(node_name);
        }
    }

    /// Predicate: every scheduler must fit; scores add up. The total is
    /// recorded for [`Self::pod_priority`] together with the running
    /// per-pod maximum.
    pub fn pod_fits_resources(
        &self,
        pod: &mut PodInfo,
        node: &NodeInfo,
        fill_allocate_from: bool,
    ) -> (bool, Vec<InsufficientResource>, Score) {
        let mut total_fit = true;
        let mut total_score = 0.0;
        let mut total_reasons = Vec::new();
        for device in &self.devices {
            let (fit, reasons, score) = device.pod_fits_device(node, pod, fill_allocate_from);
            log::debug!(
                "Device {}: fit {fit}, score {score}, reasons {reasons:?}",
                device.name()
            );
            // No early exit: the total score would be wrong.
            total_score += score;
            total_fit = total_fit && fit;
            total_reasons.extend(reasons);
        }

        let mut guard = self.scores();
        let table = &mut *guard;
        let per_node = table.score.entry(pod.name.clone()).or_default();
        if total_fit {
            per_node.insert(node.name.clone(), total_score);
            let max = table.max_score.entry(pod.name.clone()).or_insert(0.0);
            if total_score > *max {
                *max = total_score;
            }
        } else {
            per_node.insert(node.name.clone(), 0.0);
        }

        log::debug!(
            "PodFitsResources for pod {} on node {}: fit {total_fit}, score {total_score}",
            pod.name,
            node.name
        );
        (total_fit, total_reasons, total_score)
    }

    /// Normalized priority in `[0, 1]`; the best-scoring node of a pod gets
    /// `1.0`. Missing score entries yield `0.0`.
    pub fn pod_priority(&self, pod: &PodInfo, node: &NodeInfo) -> Score {
        let guard = self.scores();
        let Some(&max_score) = guard.max_score.get(&pod.name) else {
            log::error!("Max score not found for pod {}", pod.name);
            return 0.0;
        };
        let Some(&score) = guard
            .score
            .get(&pod.name)
            .and_then(|per_node| per_node.get(&node.name))
        else {
            log::error!("Score not found for pod {} on node {}", pod.name, node.name);
            return 0.0;
        };
        if max_score != 0.0 { score / max_score } else { 0.0 }
    }

    /// Cleanup hook for abandoned scheduling decisions.
    pub fn remove_pod_from_score(&self, pod: &PodInfo) {
        let mut guard = self.scores();
        guard.score.remove(&pod.name);
        guard.max_score.remove(&pod.name);
    }

    /// Commit: allocates on every scheduler in order, then drops the pod's
    /// cached scores.
    pub fn pod_allocate(&self, pod: &mut PodInfo, node: &NodeInfo) -> Result<()> {
        for device in &self.devices {
            device.pod_allocate(node, pod)?;
        }
        self.remove_pod_from_score(pod);
        Ok(())
    }

    pub fn take_pod_resources(&self, pod: &PodInfo, node: &mut NodeInfo) -> Result<()> {
        for device in &self.devices {
            device.take_pod_resources(node, pod)?;
        }
        Ok(())
    }

    pub fn return_pod_resources(&self, pod: &PodInfo, node: &mut NodeInfo) -> Result<()> {
        for device in &self.devices {
            device.return_pod_resources(node, pod)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::utils::{cont, node, pod};

    struct StubDevice {
        name: String,
        uses_group: bool,
        fits: bool,
        node_scores: Map<String, f64>,
    }

    impl StubDevice {
        fn new(name: &str, uses_group: bool) -> Self {
            StubDevice {
                name: name.to_string(),
                uses_group,
                fits: true,
                node_scores: Map::default(),
            }
        }

        fn with_score(mut self, node_name: &str, score: f64) -> Self {
            self.node_scores.insert(node_name.to_string(), score);
            self
        }
    }

    impl DeviceScheduler for StubDevice {
        fn add_node(&mut self, _node_name: &str, _node: &NodeInfo) {}

        fn remove_node(&mut self, _node_name: &str) {}

        fn pod_fits_device(
            &self,
            node: &NodeInfo,
            _pod: &mut PodInfo,
            _fill_allocate_from: bool,
        ) -> (bool, Vec<InsufficientResource>, f64) {
            let score = self.node_scores.get(&node.name).copied().unwrap_or(0.0);
            (self.fits, Vec::new(), score)
        }

        fn pod_allocate(&self, _node: &NodeInfo, _pod: &mut PodInfo) -> Result<()> {
            Ok(())
        }

        fn take_pod_resources(&self, _node: &mut NodeInfo, _pod: &PodInfo) -> Result<()> {
            Ok(())
        }

        fn return_pod_resources(&self, _node: &mut NodeInfo, _pod: &PodInfo) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn uses_group_scheduler(&self) -> bool {
            self.uses_group
        }
    }

    fn aggregator() -> DevicesScheduler {
        DevicesScheduler::new(GroupPrefix::parse("r/grp").unwrap())
    }

    #[test]
    fn test_group_device_stays_last() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("g1", true)));
        assert_eq!(ds.device_names(), vec!["g1", "grpdevice"]);

        ds.add_device(Box::new(StubDevice::new("s2", false)));
        assert_eq!(ds.device_names(), vec!["g1", "s2", "grpdevice"]);

        ds.add_device(Box::new(StubDevice::new("g3", true)));
        assert_eq!(ds.device_names(), vec!["g1", "s2", "g3", "grpdevice"]);
    }

    #[test]
    fn test_priority_normalization() {
        let mut ds = aggregator();
        ds.add_device(Box::new(
            StubDevice::new("s", false)
                .with_score("n0", 0.7)
                .with_score("n1", 0.9),
        ));

        let node0 = node("n0").finish();
        let node1 = node("n1").finish();
        let mut p = pod("p0").finish();

        let (fits, _, score) = ds.pod_fits_resources(&mut p, &node0, false);
        assert!(fits);
        assert_eq!(score, 0.7);
        let (fits, _, score) = ds.pod_fits_resources(&mut p, &node1, false);
        assert!(fits);
        assert_eq!(score, 0.9);

        assert_eq!(ds.pod_priority(&p, &node0), 0.7 / 0.9);
        assert_eq!(ds.pod_priority(&p, &node1), 1.0);
    }

    #[test]
    fn test_priority_without_predicate_is_zero() {
        let ds = aggregator();
        let p = pod("p0").finish();
        let n = node("n0").finish();
        assert_eq!(ds.pod_priority(&p, &n), 0.0);
    }

    #[test]
    fn test_unfit_node_scores_zero() {
        let mut ds = aggregator();
        let mut stub = StubDevice::new("s", false).with_score("n0", 0.7);
        stub.fits = false;
        ds.add_device(Box::new(stub));

        let n = node("n0").finish();
        let mut p = pod("p0").finish();
        let (fits, _, _) = ds.pod_fits_resources(&mut p, &n, false);
        assert!(!fits);
        // No fitting node was recorded, so the max score stays unset.
        assert_eq!(ds.pod_priority(&p, &n), 0.0);
    }

    #[test]
    fn test_fits_ands_across_devices() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("ok", false).with_score("n0", 0.4)));
        let mut failing = StubDevice::new("bad", false).with_score("n0", 0.6);
        failing.fits = false;
        ds.add_device(Box::new(failing));

        let n = node("n0").finish();
        let mut p = pod("p0").finish();
        let (fits, _, score) = ds.pod_fits_resources(&mut p, &n, false);
        assert!(!fits);
        // Scores still add up even when a device rejects.
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_pod_allocate_clears_scores() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("s", false).with_score("n0", 0.5)));

        let n = node("n0").finish();
        let mut p = pod("p0").finish();
        ds.pod_fits_resources(&mut p, &n, false);
        assert_eq!(ds.pod_priority(&p, &n), 1.0);

        ds.pod_allocate(&mut p, &n).unwrap();
        assert_eq!(ds.pod_priority(&p, &n), 0.0);
    }

    #[test]
    fn test_remove_pod_from_score() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("s", false).with_score("n0", 0.5)));

        let n = node("n0").finish();
        let mut p = pod("p0").finish();
        ds.pod_fits_resources(&mut p, &n, false);
        ds.remove_pod_from_score(&p);
        assert_eq!(ds.pod_priority(&p, &n), 0.0);
    }

    fn stub_factory() -> Result<Box<dyn DeviceScheduler>> {
        Ok(Box::new(StubDevice::new("stub", false)))
    }

    #[test]
    fn test_registry_skips_unknown_schedulers() {
        let mut registry = SchedulerRegistry::new();
        registry.register("stub", stub_factory);

        let mut ds = aggregator();
        ds.add_from_names(
            &registry,
            &["stub".to_string(), "bogus".to_string(), "stub".to_string()],
        );
        assert_eq!(ds.device_names(), vec!["stub", "stub"]);
    }

    #[test]
    fn test_remove_all() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("g", true).with_score("n0", 0.5)));
        let n = node("n0").finish();
        let mut p = pod("p0").finish();
        ds.pod_fits_resources(&mut p, &n, false);

        ds.remove_all();
        assert!(ds.device_names().is_empty());
        assert_eq!(ds.pod_priority(&p, &n), 0.0);

        // Registration starts from scratch, including the group device.
        ds.add_device(Box::new(StubDevice::new("g", true)));
        assert_eq!(ds.device_names(), vec!["g", "grpdevice"]);
    }

    #[test]
    fn test_group_allocation_through_aggregator() {
        let mut ds = aggregator();
        ds.add_device(Box::new(StubDevice::new("gpu", true)));

        let mut n = node("n0").alloc("r/grp/gpu/0/cards", 8).finish();
        let mut p = pod("p0")
            .running("c0", cont().request("r/grp/gpu/A/cards", 4))
            .finish();

        let (fits, reasons, score) = ds.pod_fits_resources(&mut p, &n, true);
        assert!(fits, "unexpected failure: {reasons:?}");
        assert_eq!(score, 0.5);
        assert_eq!(ds.pod_priority(&p, &n), 1.0);
        assert_eq!(
            p.running_containers["c0"].allocate_from.as_ref().unwrap()["r/grp/gpu/A/cards"],
            "r/grp/gpu/0/cards"
        );

        ds.pod_allocate(&mut p, &n).unwrap();
        assert_eq!(ds.pod_priority(&p, &n), 0.0);

        ds.take_pod_resources(&p, &mut n).unwrap();
        assert_eq!(n.used["r/grp/gpu/0/cards"], 4);

        ds.return_pod_resources(&p, &mut n).unwrap();
        assert_eq!(n.used["r/grp/gpu/0/cards"], 0);
    }
}
