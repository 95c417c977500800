//! Spatial environment and device registry
//!
//! One lock guards both the label → device map and the label → position map.
//! Device state has its own lock; code that needs both takes this one first and
//! releases it before touching a device. Lookups hand out `Arc<Device>` clones
//! so no registry guard ever outlives the call that produced it.

pub mod geometry;

pub use geometry::CoverageArea;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::config::{DiscoveryRule, SimConfig};
use crate::device::Device;
use crate::{MeshError, MeshResult};

/// Snapshot of every placed device, ordered by label
pub type Chart = BTreeMap<String, CoverageArea>;

#[derive(Default)]
struct Registry {
    devices: HashMap<String, Arc<Device>>,
    chart: HashMap<String, CoverageArea>,
}

pub struct Environment {
    registry: RwLock<Registry>,
    grid_max: i32,
    walk_step: i32,
    discovery: DiscoveryRule,
    rng: Mutex<StdRng>,
}

impl Environment {
    pub fn new(config: &SimConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            registry: RwLock::new(Registry::default()),
            grid_max: config.grid_max,
            walk_step: config.walk_step,
            discovery: config.discovery,
            rng: Mutex::new(rng),
        }
    }

    // ------------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------------

    /// Register a new device under its label
    pub fn insert_device(&self, device: Device) -> MeshResult<Arc<Device>> {
        let mut registry = self.registry.write();
        let label = device.label().to_string();
        if registry.devices.contains_key(&label) {
            return Err(MeshError::DeviceAlreadyExists { label });
        }
        let device = Arc::new(device);
        registry.devices.insert(label, Arc::clone(&device));
        Ok(device)
    }

    /// Remove a device and its chart entry
    pub fn remove_device(&self, label: &str) -> MeshResult<Arc<Device>> {
        let mut registry = self.registry.write();
        let device = registry
            .devices
            .remove(label)
            .ok_or_else(|| MeshError::not_found(label))?;
        registry.chart.remove(label);
        Ok(device)
    }

    pub fn device(&self, label: &str) -> MeshResult<Arc<Device>> {
        self.registry
            .read()
            .devices
            .get(label)
            .cloned()
            .ok_or_else(|| MeshError::not_found(label))
    }

    pub fn contains(&self, label: &str) -> bool {
        self.registry.read().devices.contains_key(label)
    }

    /// All registered devices, ordered by label
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.registry.read().devices.values().cloned().collect();
        devices.sort_by(|a, b| a.label().cmp(b.label()));
        devices
    }

    // ------------------------------------------------------------------------
    // Chart
    // ------------------------------------------------------------------------

    /// Insert or overwrite a position and radius
    pub fn place(&self, label: &str, x: i32, y: i32, r: f64) -> CoverageArea {
        let area = CoverageArea::new(x, y, r);
        self.registry.write().chart.insert(label.to_string(), area);
        debug!(device = label, x, y, r, "placed on chart");
        area
    }

    pub fn position(&self, label: &str) -> MeshResult<CoverageArea> {
        self.registry
            .read()
            .chart
            .get(label)
            .copied()
            .ok_or_else(|| MeshError::not_placed(label))
    }

    pub fn chart(&self) -> Chart {
        self.registry
            .read()
            .chart
            .iter()
            .map(|(label, area)| (label.clone(), *area))
            .collect()
    }

    /// Euclidean distance between two placed devices
    pub fn distance(&self, a: &str, b: &str) -> MeshResult<f64> {
        let registry = self.registry.read();
        let from = registry.chart.get(a).ok_or_else(|| MeshError::not_placed(a))?;
        let to = registry.chart.get(b).ok_or_else(|| MeshError::not_placed(b))?;
        Ok(from.distance_to(to))
    }

    /// Every other placed device that `label` can reach under the discovery rule
    pub fn neighbors_within_range(&self, label: &str) -> MeshResult<BTreeSet<String>> {
        let registry = self.registry.read();
        let origin = registry
            .chart
            .get(label)
            .ok_or_else(|| MeshError::not_placed(label))?;

        Ok(registry
            .chart
            .iter()
            .filter(|(other, _)| other.as_str() != label)
            .filter(|(_, area)| self.reaches(origin, area))
            .map(|(other, _)| other.clone())
            .collect())
    }

    /// True iff `other` is in `neighbors_within_range(label)`
    pub fn is_within_range(&self, label: &str, other: &str) -> bool {
        if label == other {
            return false;
        }
        let registry = self.registry.read();
        match (registry.chart.get(label), registry.chart.get(other)) {
            (Some(origin), Some(area)) => self.reaches(origin, area),
            _ => false,
        }
    }

    fn reaches(&self, origin: &CoverageArea, other: &CoverageArea) -> bool {
        let distance = origin.distance_to(other);
        match self.discovery {
            DiscoveryRule::SourceRadius => origin.covers(distance),
            DiscoveryRule::Mutual => origin.covers(distance) && other.covers(distance),
        }
    }

    /// Random walk step of at most `walk_step` per axis, clamped to the grid.
    /// Returns the new position, or `None` if the label is not placed.
    pub fn walk(&self, label: &str) -> Option<CoverageArea> {
        let step = self.walk_step;
        let (dx, dy) = {
            let mut rng = self.rng.lock();
            (rng.gen_range(-step..=step), rng.gen_range(-step..=step))
        };

        let mut registry = self.registry.write();
        let area = registry.chart.get_mut(label)?;
        area.shift_clamped(dx, dy, self.grid_max);
        debug!(device = label, x = area.x, y = area.y, "walked");
        Some(*area)
    }
}
