//! Per-device protocol state
//!
//! A `Device` owns one lock over its mutable fields. Every accessor takes and
//! releases it inside the call, so no guard escapes and none can be held
//! across an `.await` or while the registry lock is being acquired.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::Notify;

use crate::config::SimConfig;
use crate::message::Request;
use crate::routing::RoutingTable;

// ============================================================================
// LINK QUALITY
// ============================================================================

/// Characteristics of an established link, fixed when the handshake completes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkQuality {
    pub error_rate: f64,
    pub latency: f64,
}

/// Source of link characteristics for newly confirmed neighbors
#[cfg_attr(test, mockall::automock)]
pub trait LinkQualitySource: Send + Sync {
    fn sample(&self, from: &str, to: &str) -> LinkQuality;
}

/// Uniform random link quality in `[0, max)`, reproducible when seeded
pub struct SeededLinkQuality {
    rng: Mutex<StdRng>,
    max: f64,
}

impl SeededLinkQuality {
    pub fn new(seed: Option<u64>, max: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
            max,
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        // Offset so link quality and mobility don't draw the same stream
        Self::new(config.seed.map(|s| s.wrapping_add(1)), config.link_quality_max)
    }
}

impl LinkQualitySource for SeededLinkQuality {
    fn sample(&self, _from: &str, _to: &str) -> LinkQuality {
        let mut rng = self.rng.lock();
        LinkQuality {
            error_rate: rng.gen::<f64>() * self.max,
            latency: rng.gen::<f64>() * self.max,
        }
    }
}

/// Same quality for every link
pub struct FixedLinkQuality(pub LinkQuality);

impl LinkQualitySource for FixedLinkQuality {
    fn sample(&self, _from: &str, _to: &str) -> LinkQuality {
        self.0
    }
}

// ============================================================================
// DEVICE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

#[derive(Debug)]
struct DeviceState {
    status: DeviceStatus,
    scanning: bool,
    neighbors: BTreeMap<String, LinkQuality>,
    routing_table: RoutingTable,
    inbox: Vec<Request>,
    outbox: Vec<Request>,
    /// Peers whose NewConnectionAck the running refresh still waits for
    awaiting_acks: BTreeSet<String>,
}

#[derive(Debug)]
pub struct Device {
    label: String,
    power: u32,
    state: Mutex<DeviceState>,
    acks_settled: Notify,
}

/// Point-in-time copy of a device for callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub label: String,
    pub power: u32,
    pub status: DeviceStatus,
    pub scanning: bool,
    pub neighbors: BTreeMap<String, LinkQuality>,
    pub routing_table: RoutingTable,
    pub inbox: Vec<Request>,
    pub outbox: Vec<Request>,
}

impl DeviceSnapshot {
    pub fn unread(&self) -> usize {
        self.inbox.iter().filter(|r| !r.is_read()).count()
    }
}

impl Device {
    pub fn new(label: impl Into<String>, power: u32) -> Self {
        Self {
            label: label.into(),
            power,
            state: Mutex::new(DeviceState {
                status: DeviceStatus::Active,
                scanning: false,
                neighbors: BTreeMap::new(),
                routing_table: RoutingTable::new(),
                inbox: Vec::new(),
                outbox: Vec::new(),
                awaiting_acks: BTreeSet::new(),
            }),
            acks_settled: Notify::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Transmit power; the coverage radius when placed by power
    pub fn power(&self) -> u32 {
        self.power
    }

    pub fn status(&self) -> DeviceStatus {
        self.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == DeviceStatus::Active
    }

    // ------------------------------------------------------------------------
    // Scan guard
    // ------------------------------------------------------------------------

    pub fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    /// Claim the refresh slot. False if a refresh is already in flight.
    pub fn try_begin_scan(&self) -> bool {
        let mut state = self.state.lock();
        if state.scanning {
            return false;
        }
        state.scanning = true;
        true
    }

    pub fn end_scan(&self) {
        self.state.lock().scanning = false;
    }

    // ------------------------------------------------------------------------
    // Neighbors
    // ------------------------------------------------------------------------

    pub fn neighbors(&self) -> BTreeMap<String, LinkQuality> {
        self.state.lock().neighbors.clone()
    }

    pub fn link_to(&self, peer: &str) -> Option<LinkQuality> {
        self.state.lock().neighbors.get(peer).copied()
    }

    pub fn set_neighbor(&self, peer: &str, quality: LinkQuality) {
        self.state.lock().neighbors.insert(peer.to_string(), quality);
    }

    pub fn clear_neighbors(&self) {
        self.state.lock().neighbors.clear();
    }

    // ------------------------------------------------------------------------
    // Handshake tracking
    // ------------------------------------------------------------------------

    /// Start waiting for acks from `peers`, replacing any earlier set
    pub fn expect_acks(&self, peers: impl IntoIterator<Item = String>) {
        let settled = {
            let mut state = self.state.lock();
            state.awaiting_acks = peers.into_iter().collect();
            state.awaiting_acks.is_empty()
        };
        if settled {
            self.acks_settled.notify_waiters();
        }
    }

    /// Record an ack from `peer`. True if it was awaited.
    pub fn acknowledge(&self, peer: &str) -> bool {
        let (was_awaited, settled) = {
            let mut state = self.state.lock();
            let was_awaited = state.awaiting_acks.remove(peer);
            (was_awaited, state.awaiting_acks.is_empty())
        };
        if was_awaited && settled {
            self.acks_settled.notify_waiters();
        }
        was_awaited
    }

    pub fn awaiting_acks(&self) -> BTreeSet<String> {
        self.state.lock().awaiting_acks.clone()
    }

    /// Stop waiting; wakes any pending `acks_settled`
    pub fn abandon_acks(&self) {
        self.state.lock().awaiting_acks.clear();
        self.acks_settled.notify_waiters();
    }

    /// Resolves once every awaited ack has arrived
    pub async fn acks_settled(&self) {
        loop {
            let notified = self.acks_settled.notified();
            let settled = self.state.lock().awaiting_acks.is_empty();
            if settled {
                return;
            }
            notified.await;
        }
    }

    // ------------------------------------------------------------------------
    // Routing table
    // ------------------------------------------------------------------------

    pub fn routing_table(&self) -> RoutingTable {
        self.state.lock().routing_table.clone()
    }

    pub fn merge_routing(&self, table: &RoutingTable) {
        self.state.lock().routing_table.merge(table);
    }

    /// Replace the rows `sender` owns with the ones it just gossiped
    pub fn replace_routes_from(&self, sender: &str, table: &RoutingTable) {
        let mut state = self.state.lock();
        state.routing_table.purge_source(sender);
        state.routing_table.merge(table);
    }

    /// Drop rows with `label` at either end
    pub fn purge_routes_with(&self, label: &str) -> usize {
        self.state.lock().routing_table.purge_label(label)
    }

    /// Drop rows that start at `label`; inbound rows stay
    pub fn purge_routes_from(&self, label: &str) -> usize {
        self.state.lock().routing_table.purge_source(label)
    }

    // ------------------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------------------

    pub fn push_inbox(&self, request: Request) {
        self.state.lock().inbox.push(request);
    }

    pub fn push_outbox(&self, request: Request) {
        self.state.lock().outbox.push(request);
    }

    /// Copies of unread requests, oldest first
    pub fn unread(&self) -> Vec<Request> {
        self.state
            .lock()
            .inbox
            .iter()
            .filter(|r| !r.is_read())
            .cloned()
            .collect()
    }

    /// Mark every unread request read and return copies, oldest first.
    /// Each request is handed out once, however many drains overlap.
    pub fn take_unread(&self) -> Vec<Request> {
        let mut state = self.state.lock();
        state
            .inbox
            .iter_mut()
            .filter_map(|r| r.mark_read().then(|| r.clone()))
            .collect()
    }

    pub fn inbox(&self) -> Vec<Request> {
        self.state.lock().inbox.clone()
    }

    pub fn outbox(&self) -> Vec<Request> {
        self.state.lock().outbox.clone()
    }

    /// Drop read requests from the inbox; returns how many went
    pub fn prune_read(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.inbox.len();
        state.inbox.retain(|r| !r.is_read());
        before - state.inbox.len()
    }

    /// Wipe connections, table and queues and mark inactive (on deletion)
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            state.status = DeviceStatus::Inactive;
            state.scanning = false;
            state.neighbors.clear();
            state.routing_table = RoutingTable::new();
            state.inbox.clear();
            state.outbox.clear();
            state.awaiting_acks.clear();
        }
        self.acks_settled.notify_waiters();
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state.lock();
        DeviceSnapshot {
            label: self.label.clone(),
            power: self.power,
            status: state.status,
            scanning: state.scanning,
            neighbors: state.neighbors.clone(),
            routing_table: state.routing_table.clone(),
            inbox: state.inbox.clone(),
            outbox: state.outbox.clone(),
        }
    }
}
