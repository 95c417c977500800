//! MeshSimulator: operations an outer adapter drives
//!
//! Owns the environment, the protocol engine and the scheduler. Inserting a
//! device starts its periodic jobs; deleting it cancels them before its state
//! is cleared and it leaves the registry. Operations that touch both the
//! registry and the scheduler run under one lifecycle lock, so a device is
//! registered exactly while it has jobs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimConfig;
use crate::device::{Device, DeviceSnapshot, LinkQualitySource, SeededLinkQuality};
use crate::environment::{Chart, CoverageArea, Environment};
use crate::message::ContentType;
use crate::protocol::{ProtocolEngine, RefreshReport};
use crate::routing::{Metric, Path};
use crate::scheduler::{JobKind, Scheduler};
use crate::{MeshError, MeshResult};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Arguments of `insert_device`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDevice {
    pub label: String,
    pub power: u32,
    /// Overrides `SimConfig::refresh_interval_ms` for this device
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    /// Overrides `SimConfig::walk_enabled` for this device
    #[serde(default)]
    pub walk: Option<bool>,
}

impl NewDevice {
    pub fn new(label: impl Into<String>, power: u32) -> Self {
        Self {
            label: label.into(),
            power,
            refresh_interval_ms: None,
            walk: None,
        }
    }
}

/// Arguments of `send_user_message`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub sender: String,
    pub destination: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub devices: Vec<DeviceSnapshot>,
    pub chart: Chart,
}

// ============================================================================
// SIMULATOR
// ============================================================================

pub struct MeshSimulator {
    config: SimConfig,
    env: Arc<Environment>,
    engine: Arc<ProtocolEngine>,
    scheduler: Scheduler,
    lifecycle: Mutex<()>,
}

impl MeshSimulator {
    /// Simulator with seeded random link quality
    pub fn new(config: SimConfig) -> MeshResult<Self> {
        let links = Arc::new(SeededLinkQuality::from_config(&config));
        Self::with_link_quality(config, links)
    }

    pub fn with_link_quality(
        config: SimConfig,
        links: Arc<dyn LinkQualitySource>,
    ) -> MeshResult<Self> {
        config.validate()?;
        let env = Arc::new(Environment::new(&config));
        let engine = Arc::new(ProtocolEngine::new(
            Arc::clone(&env),
            links,
            config.handshake_deadline(),
        ));
        info!(discovery = %config.discovery, grid_max = config.grid_max, "simulator ready");
        Ok(Self {
            config,
            env,
            engine,
            scheduler: Scheduler::new(),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ------------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------------

    pub fn list_devices(&self) -> Vec<DeviceSnapshot> {
        self.env.devices().iter().map(|d| d.snapshot()).collect()
    }

    /// Register a device and start its jobs. Fails with `NoRuntime` outside a
    /// Tokio runtime, leaving nothing registered.
    pub fn insert_device(&self, new: NewDevice) -> MeshResult<DeviceSnapshot> {
        let refresh_ms = new
            .refresh_interval_ms
            .unwrap_or(self.config.refresh_interval_ms);
        if refresh_ms == 0 {
            return Err(MeshError::InvalidConfig(format!(
                "refresh interval of {} must be positive",
                new.label
            )));
        }

        let walk = new.walk.unwrap_or(self.config.walk_enabled);

        let _lifecycle = self.lifecycle.lock();
        let device = self.env.insert_device(Device::new(new.label.as_str(), new.power))?;
        let label = new.label.as_str();

        if let Err(e) = self.start_jobs(label, Duration::from_millis(refresh_ms), walk) {
            self.scheduler.cancel_all(label);
            if let Ok(device) = self.env.remove_device(label) {
                device.clear();
            }
            return Err(e);
        }

        info!(device = label, power = new.power, refresh_ms, "device inserted");
        Ok(device.snapshot())
    }

    pub fn get_device(&self, label: &str) -> MeshResult<DeviceSnapshot> {
        Ok(self.env.device(label)?.snapshot())
    }

    /// Cancel the device's jobs, drop it and its chart entry, then wipe it
    pub fn delete_device(&self, label: &str) -> MeshResult<()> {
        let _lifecycle = self.lifecycle.lock();
        let cancelled = self.scheduler.cancel_all(label);
        let device = self.env.remove_device(label)?;
        device.clear();
        info!(device = label, cancelled, "device deleted");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Chart
    // ------------------------------------------------------------------------

    /// Place an existing device with its power as coverage radius
    pub fn place_device(&self, label: &str, x: i32, y: i32) -> MeshResult<CoverageArea> {
        let device = self.env.device(label)?;
        Ok(self.env.place(label, x, y, f64::from(device.power())))
    }

    /// Place an existing device with an explicit radius
    pub fn place(&self, label: &str, x: i32, y: i32, r: f64) -> MeshResult<CoverageArea> {
        self.env.device(label)?;
        Ok(self.env.place(label, x, y, r))
    }

    pub fn chart(&self) -> Chart {
        self.env.chart()
    }

    pub fn environment(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            devices: self.list_devices(),
            chart: self.chart(),
        }
    }

    // ------------------------------------------------------------------------
    // Routes & messages
    // ------------------------------------------------------------------------

    /// Best path from `source` to `target` over `source`'s table
    pub fn route(&self, source: &str, target: &str, metric: Metric) -> MeshResult<Path> {
        self.routes(source, target, metric, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| MeshError::NoRouteFound {
                from: source.to_string(),
                to: target.to_string(),
                metric,
            })
    }

    /// Up to `k` paths, lightest first. Empty if none exist.
    pub fn routes(&self, source: &str, target: &str, metric: Metric, k: usize) -> MeshResult<Vec<Path>> {
        self.env.device(target)?;
        self.engine.resolve(source, target, metric, k)
    }

    pub fn send_user_message(&self, message: OutgoingMessage) -> MeshResult<Uuid> {
        self.engine.send_user_message(
            &message.sender,
            &message.destination,
            message.content_type,
            message.body,
        )
    }

    /// Text rendering of a device's routing table
    pub fn render_table(&self, label: &str) -> MeshResult<String> {
        Ok(self.env.device(label)?.routing_table().render(label))
    }

    // ------------------------------------------------------------------------
    // Manual triggers
    // ------------------------------------------------------------------------

    /// Run a refresh round now, outside the periodic job
    pub async fn refresh_now(&self, label: &str) -> MeshResult<RefreshReport> {
        self.engine.refresh(label).await
    }

    /// Handle the device's unread requests now
    pub fn drain_inbox(&self, label: &str) -> MeshResult<usize> {
        self.engine.process_inbox(label)
    }

    pub fn prune_read(&self, label: &str) -> MeshResult<usize> {
        let pruned = self.env.device(label)?.prune_read();
        debug!(device = label, pruned, "inbox pruned");
        Ok(pruned)
    }

    /// Start or cancel the device's Walk job
    pub fn set_walking(&self, label: &str, enabled: bool) -> MeshResult<()> {
        let _lifecycle = self.lifecycle.lock();
        self.env.device(label)?;
        if enabled {
            self.start_walk(label)?;
        } else {
            self.scheduler.cancel(label, JobKind::Walk);
        }
        Ok(())
    }

    pub fn is_walking(&self, label: &str) -> bool {
        self.scheduler.is_scheduled(label, JobKind::Walk)
    }

    /// Cancel every job and wait for in-flight ticks
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("simulator stopped");
    }

    // ------------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------------

    fn start_jobs(&self, label: &str, refresh: Duration, walk: bool) -> MeshResult<()> {
        self.start_inbox_drain(label)?;
        self.start_refresh(label, refresh)?;
        if walk {
            self.start_walk(label)?;
        }
        Ok(())
    }

    fn start_inbox_drain(&self, label: &str) -> MeshResult<()> {
        let engine = Arc::clone(&self.engine);
        let owner = label.to_string();
        self.scheduler.start(
            label,
            JobKind::InboxDrain,
            self.config.inbox_interval(),
            move || {
                let result = engine.process_inbox(&owner).map(|_| ());
                std::future::ready(result)
            },
        )
    }

    fn start_refresh(&self, label: &str, period: Duration) -> MeshResult<()> {
        let engine = Arc::clone(&self.engine);
        let owner = label.to_string();
        self.scheduler.start(label, JobKind::RoutingRefresh, period, move || {
            let engine = Arc::clone(&engine);
            let owner = owner.clone();
            async move { engine.refresh(&owner).await.map(|_| ()) }
        })
    }

    fn start_walk(&self, label: &str) -> MeshResult<()> {
        let env = Arc::clone(&self.env);
        let owner = label.to_string();
        self.scheduler.start(label, JobKind::Walk, self.config.walk_interval(), move || {
            if env.walk(&owner).is_none() {
                debug!(device = %owner, "not placed, walk skipped");
            }
            std::future::ready(Ok(()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{FixedLinkQuality, LinkQuality};

    fn simulator() -> MeshSimulator {
        MeshSimulator::with_link_quality(
            SimConfig::default(),
            Arc::new(FixedLinkQuality(LinkQuality {
                error_rate: 1.0,
                latency: 1.0,
            })),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            inbox_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            MeshSimulator::new(config),
            Err(MeshError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_starts_jobs() {
        let sim = simulator();
        let snapshot = sim.insert_device(NewDevice::new("A", 10)).unwrap();
        assert_eq!(snapshot.label, "A");
        assert!(snapshot.inbox.is_empty());
        assert_eq!(
            sim.scheduler().scheduled("A"),
            vec![JobKind::InboxDrain, JobKind::RoutingRefresh]
        );
        assert!(!sim.is_walking("A"));
    }

    #[test]
    fn test_insert_outside_runtime_registers_nothing() {
        let sim = simulator();
        assert!(matches!(
            sim.insert_device(NewDevice::new("A", 10)),
            Err(MeshError::NoRuntime(_))
        ));
        assert!(!sim.env().contains("A"));
        assert!(sim.scheduler().scheduled("A").is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_insert_and_delete_leave_no_orphan_jobs() {
        let sim = Arc::new(simulator());
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let sim = Arc::clone(&sim);
                tokio::task::spawn_blocking(move || {
                    for _ in 0..200 {
                        let _ = sim.insert_device(NewDevice::new("A", 10));
                        let _ = sim.set_walking("A", true);
                        let _ = sim.delete_device("A");
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.await.unwrap();
        }

        assert!(!sim.env().contains("A"));
        assert!(sim.scheduler().scheduled("A").is_empty());
        sim.shutdown().await;
    }

    #[tokio::test]
    async fn test_insert_duplicate_and_zero_refresh() {
        let sim = simulator();
        sim.insert_device(NewDevice::new("A", 10)).unwrap();
        assert!(matches!(
            sim.insert_device(NewDevice::new("A", 5)),
            Err(MeshError::DeviceAlreadyExists { .. })
        ));

        let mut bad = NewDevice::new("B", 5);
        bad.refresh_interval_ms = Some(0);
        assert!(matches!(sim.insert_device(bad), Err(MeshError::InvalidConfig(_))));
        assert!(!sim.env().contains("B"));
    }

    #[tokio::test]
    async fn test_delete_device() {
        let sim = simulator();
        let mut new = NewDevice::new("A", 10);
        new.walk = Some(true);
        sim.insert_device(new).unwrap();
        sim.place_device("A", 1, 1).unwrap();

        sim.delete_device("A").unwrap();
        assert!(sim.scheduler().scheduled("A").is_empty());
        assert!(sim.chart().is_empty());
        assert!(matches!(sim.get_device("A"), Err(MeshError::DeviceNotFound { .. })));
        assert!(matches!(sim.delete_device("A"), Err(MeshError::DeviceNotFound { .. })));
    }

    #[tokio::test]
    async fn test_place_device_uses_power() {
        let sim = simulator();
        sim.insert_device(NewDevice::new("A", 12)).unwrap();
        let area = sim.place_device("A", 3, 4).unwrap();
        assert_eq!(area, CoverageArea::new(3, 4, 12.0));
        assert_eq!(sim.chart().get("A"), Some(&area));

        assert!(matches!(
            sim.place_device("ghost", 0, 0),
            Err(MeshError::DeviceNotFound { .. })
        ));
        assert!(sim.place("ghost", 0, 0, 1.0).is_err());
    }

    #[tokio::test]
    async fn test_set_walking_toggles_job() {
        let sim = simulator();
        sim.insert_device(NewDevice::new("A", 10)).unwrap();
        sim.set_walking("A", true).unwrap();
        assert!(sim.is_walking("A"));
        sim.set_walking("A", false).unwrap();
        assert!(!sim.is_walking("A"));
        assert!(sim.set_walking("ghost", true).is_err());
    }

    #[tokio::test]
    async fn test_route_errors() {
        let sim = simulator();
        sim.insert_device(NewDevice::new("A", 10)).unwrap();
        sim.insert_device(NewDevice::new("D", 10)).unwrap();

        assert_eq!(
            sim.route("A", "D", Metric::Distance),
            Err(MeshError::NoRouteFound {
                from: "A".to_string(),
                to: "D".to_string(),
                metric: Metric::Distance,
            })
        );
        assert!(sim.routes("A", "D", Metric::Latency, 3).unwrap().is_empty());
        assert!(matches!(
            sim.route("A", "ghost", Metric::Distance),
            Err(MeshError::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_environment_snapshot() {
        let sim = simulator();
        sim.insert_device(NewDevice::new("B", 5)).unwrap();
        sim.insert_device(NewDevice::new("A", 10)).unwrap();
        sim.place_device("A", 0, 0).unwrap();

        let snapshot = sim.environment();
        let labels: Vec<_> = snapshot.devices.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["A", "B"]);
        assert_eq!(snapshot.chart.len(), 1);
        assert!(sim.render_table("A").unwrap().contains("No table found"));
    }
}
