//! Protocol engine: handshake, routing gossip and source-routed delivery
//!
//! Refresh round for one device:
//! 1. **Discover**: claim the scan slot, forget old neighbors, ask the chart who
//!    is in range, send NewConnection to each
//! 2. **Wait**: until every NewConnectionAck arrived or the deadline passed
//! 3. **Propagate**: drop the rows this device wrote, add one 3-metric row per
//!    confirmed neighbor, then gossip the whole table to each of them
//!
//! Acks are consumed by the device's own inbox drain, which runs concurrently
//! with the waiting refresh. Delivery is an append to the receiver's inbox and
//! never waits on the receiver.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::device::{Device, LinkQualitySource};
use crate::environment::Environment;
use crate::message::{ContentType, Payload, Request, Route, UserMessage};
use crate::routing::{best_paths, Metric, Path, RoutingTable};
use crate::{MeshError, MeshResult};

// ============================================================================
// REFRESH TYPES
// ============================================================================

/// Outcome of one refresh round
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RefreshReport {
    pub device: String,
    /// Devices in range when the round started
    pub discovered: Vec<String>,
    /// Devices that acked and received the gossiped table
    pub confirmed: Vec<String>,
    /// The deadline passed before every ack arrived
    pub timed_out: bool,
    /// Another refresh of this device was already running
    pub skipped: bool,
}

/// Releases the device's scan slot when the round ends, however it ends
struct ScanGuard(Arc<Device>);

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.0.end_scan();
    }
}

/// A refresh between discovery and propagation
pub struct RefreshRound {
    device: Arc<Device>,
    discovered: BTreeSet<String>,
    _guard: ScanGuard,
}

impl RefreshRound {
    pub fn discovered(&self) -> &BTreeSet<String> {
        &self.discovered
    }
}

// ============================================================================
// PROTOCOL ENGINE
// ============================================================================

pub struct ProtocolEngine {
    env: Arc<Environment>,
    links: Arc<dyn LinkQualitySource>,
    handshake_deadline: Duration,
}

impl ProtocolEngine {
    pub fn new(
        env: Arc<Environment>,
        links: Arc<dyn LinkQualitySource>,
        handshake_deadline: Duration,
    ) -> Self {
        Self {
            env,
            links,
            handshake_deadline,
        }
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    /// Append `request` to the receiver's inbox; user traffic is also logged
    /// in the sender's outbox
    pub fn deliver(&self, from: &Device, to: &Device, request: Request) {
        debug!(
            source = from.label(),
            target = to.label(),
            topic = %request.topic(),
            id = %request.id,
            "deliver"
        );
        if request.topic().is_user_traffic() {
            from.push_outbox(request.clone());
        }
        to.push_inbox(request);
    }

    fn send(&self, from: &Device, to: &str, payload: Payload) -> MeshResult<Uuid> {
        let target = self.env.device(to)?;
        let request = Request::new(from.label(), to, payload);
        let id = request.id;
        self.deliver(from, &target, request);
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Inbox
    // ------------------------------------------------------------------------

    /// Handle every unread request of `label` in arrival order.
    /// Requests are claimed before handling, so overlapping drains never see
    /// the same one. Returns how many this call handled.
    pub fn process_inbox(&self, label: &str) -> MeshResult<usize> {
        let device = self.env.device(label)?;
        if !device.is_active() {
            return Ok(0);
        }

        let claimed = device.take_unread();
        for request in &claimed {
            if let Err(e) = self.dispatch(&device, request) {
                warn!(
                    device = label,
                    topic = %request.topic(),
                    sender = %request.sender,
                    error = %e,
                    "request handling failed"
                );
            }
        }
        Ok(claimed.len())
    }

    fn dispatch(&self, device: &Device, request: &Request) -> MeshResult<()> {
        match &request.payload {
            Payload::NewConnection => self.on_new_connection(device, &request.sender),
            Payload::NewConnectionAck => self.on_new_connection_ack(device, &request.sender),
            Payload::ConfirmConnection => {
                self.on_confirm_connection(device, &request.sender);
                Ok(())
            }
            Payload::UpdateRouting(table) => {
                self.on_update_routing(device, &request.sender, table);
                Ok(())
            }
            Payload::UserMessage(message) => self.on_user_message(device, request, message),
            Payload::UserMessageAck { acked } => {
                debug!(device = device.label(), sender = %request.sender, %acked, "user message acked");
                Ok(())
            }
        }
    }

    fn on_new_connection(&self, device: &Device, sender: &str) -> MeshResult<()> {
        // Our own radius decides, not the initiator's
        if !self.env.is_within_range(device.label(), sender) {
            debug!(device = device.label(), sender, "new-connection out of range, dropped");
            return Ok(());
        }
        self.send(device, sender, Payload::NewConnectionAck)?;
        Ok(())
    }

    fn on_new_connection_ack(&self, device: &Device, sender: &str) -> MeshResult<()> {
        let quality = self.links.sample(device.label(), sender);
        device.set_neighbor(sender, quality);
        self.send(device, sender, Payload::ConfirmConnection)?;
        device.acknowledge(sender);
        debug!(
            device = device.label(),
            peer = sender,
            error_rate = quality.error_rate,
            latency = quality.latency,
            "link established"
        );
        Ok(())
    }

    fn on_confirm_connection(&self, device: &Device, sender: &str) {
        // Adjacency is only recorded on the side that received the ack
        info!(device = device.label(), sender, "connection confirmed");
    }

    fn on_update_routing(&self, device: &Device, sender: &str, table: &RoutingTable) {
        device.replace_routes_from(sender, table);
        debug!(device = device.label(), sender, rows = table.len(), "routing table merged");
    }

    fn on_user_message(
        &self,
        device: &Device,
        request: &Request,
        message: &UserMessage,
    ) -> MeshResult<()> {
        self.send(
            device,
            &request.sender,
            Payload::UserMessageAck { acked: request.id },
        )?;

        let Some((next, rest)) = message.path.split_first() else {
            info!(
                device = device.label(),
                origin = %message.origin,
                content_type = %message.content_type,
                "user message delivered"
            );
            return Ok(());
        };

        if next.source != device.label() {
            warn!(device = device.label(), hop = %next, "user message path does not start here, dropped");
            return Ok(());
        }

        let forwarded = UserMessage {
            path: rest.to_vec(),
            ..message.clone()
        };
        self.send(device, &next.target, Payload::UserMessage(forwarded))?;
        debug!(device = device.label(), next = %next.target, remaining = rest.len(), "user message forwarded");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------------

    /// Full refresh round: discover, wait for acks, propagate
    pub async fn refresh(&self, label: &str) -> MeshResult<RefreshReport> {
        let Some(round) = self.begin_refresh(label)? else {
            debug!(device = label, "refresh already running, skipped");
            return Ok(RefreshReport {
                device: label.to_string(),
                skipped: true,
                ..Default::default()
            });
        };
        let settled = self.await_handshakes(&round).await;
        let mut report = self.finish_refresh(round)?;
        report.timed_out = !settled;
        Ok(report)
    }

    /// Discovery step. `None` if a refresh of this device is already running.
    pub fn begin_refresh(&self, label: &str) -> MeshResult<Option<RefreshRound>> {
        let device = self.env.device(label)?;
        if !device.try_begin_scan() {
            return Ok(None);
        }
        let guard = ScanGuard(Arc::clone(&device));
        device.clear_neighbors();

        let discovered = self.env.neighbors_within_range(label)?;
        if discovered.is_empty() {
            let purged = device.purge_routes_with(label);
            debug!(device = label, purged, "no devices in range");
            device.expect_acks(Vec::new());
            return Ok(Some(RefreshRound {
                device,
                discovered,
                _guard: guard,
            }));
        }

        device.expect_acks(discovered.iter().cloned());
        for peer in &discovered {
            if let Err(e) = self.send(&device, peer, Payload::NewConnection) {
                // Vanished between the chart scan and now; stop waiting on it
                debug!(device = label, peer = %peer, error = %e, "new-connection not sent");
                device.acknowledge(peer);
            }
        }
        info!(device = label, discovered = discovered.len(), "handshakes started");

        Ok(Some(RefreshRound {
            device,
            discovered,
            _guard: guard,
        }))
    }

    /// Wait for the round's acks. False if the deadline elapsed first.
    pub async fn await_handshakes(&self, round: &RefreshRound) -> bool {
        let device = &round.device;
        match tokio::time::timeout(self.handshake_deadline, device.acks_settled()).await {
            Ok(()) => true,
            Err(_) => {
                let missing = device.awaiting_acks();
                let timeout = MeshError::HandshakeTimeout {
                    label: device.label().to_string(),
                };
                warn!(error = %timeout, missing = ?missing, "continuing with confirmed neighbors");
                device.abandon_acks();
                false
            }
        }
    }

    /// Propagation step; releases the scan slot when done
    pub fn finish_refresh(&self, round: RefreshRound) -> MeshResult<RefreshReport> {
        let device = &round.device;
        let label = device.label();
        let mut report = RefreshReport {
            device: label.to_string(),
            discovered: round.discovered.iter().cloned().collect(),
            ..Default::default()
        };
        if round.discovered.is_empty() {
            return Ok(report);
        }

        // Only our own link rows are rebuilt; rows learned from gossip stay
        device.purge_routes_from(label);
        let origin = self.env.position(label)?;

        // Every link row goes in before any gossip leaves, so each neighbor
        // receives the complete table
        let mut reachable = Vec::new();
        for (peer, quality) in device.neighbors() {
            let (Ok(peer_device), Ok(peer_position)) =
                (self.env.device(&peer), self.env.position(&peer))
            else {
                debug!(device = label, peer = %peer, "neighbor gone before propagation");
                continue;
            };
            let row = RoutingTable::link_row(label, &peer, origin.distance_to(&peer_position), quality);
            device.merge_routing(&row);
            reachable.push(peer_device);
        }

        let table = device.routing_table();
        for peer_device in reachable {
            let peer = peer_device.label();
            let request = Request::new(label, peer, Payload::UpdateRouting(table.clone()));
            self.deliver(device, &peer_device, request);
            report.confirmed.push(peer.to_string());
        }

        info!(
            device = label,
            discovered = report.discovered.len(),
            confirmed = report.confirmed.len(),
            "routing table propagated"
        );
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Routes & user messages
    // ------------------------------------------------------------------------

    /// Up to `k` paths from `source` to `target` over `source`'s own table
    pub fn resolve(&self, source: &str, target: &str, metric: Metric, k: usize) -> MeshResult<Vec<Path>> {
        let device = self.env.device(source)?;
        let table = device.routing_table();
        Ok(best_paths(&table, metric, source, target, k))
    }

    /// Resolve a path for the content type's metric and hand the message to
    /// the first hop. Returns the id of the first-hop request.
    pub fn send_user_message(
        &self,
        sender: &str,
        destination: &str,
        content_type: ContentType,
        body: String,
    ) -> MeshResult<Uuid> {
        let origin = self.env.device(sender)?;
        self.env.device(destination)?;

        let metric = content_type.metric();
        let no_route = || MeshError::NoRouteFound {
            from: sender.to_string(),
            to: destination.to_string(),
            metric,
        };
        let path = self
            .resolve(sender, destination, metric, 1)?
            .into_iter()
            .next()
            .ok_or_else(no_route)?;

        let mut hops = path.hops.into_iter();
        let first: Route = hops.next().ok_or_else(no_route)?;
        let message = UserMessage {
            origin: sender.to_string(),
            destination: destination.to_string(),
            content_type,
            body,
            path: hops.collect(),
        };
        let id = self.send(&origin, &first.target, Payload::UserMessage(message))?;
        info!(sender, destination, %metric, weight = path.weight, "user message sent");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::device::{FixedLinkQuality, LinkQuality, MockLinkQualitySource};
    use crate::message::Topic;

    const QUALITY: LinkQuality = LinkQuality {
        error_rate: 0.5,
        latency: 2.0,
    };

    fn engine_with(links: Arc<dyn LinkQualitySource>) -> ProtocolEngine {
        let env = Arc::new(Environment::new(&SimConfig::default()));
        ProtocolEngine::new(env, links, Duration::from_millis(200))
    }

    fn engine() -> ProtocolEngine {
        engine_with(Arc::new(FixedLinkQuality(QUALITY)))
    }

    fn add(engine: &ProtocolEngine, label: &str, x: i32, y: i32, r: f64) {
        let env = engine.environment();
        env.insert_device(Device::new(label, r as u32)).unwrap();
        env.place(label, x, y, r);
    }

    fn topics(engine: &ProtocolEngine, label: &str) -> Vec<Topic> {
        engine
            .environment()
            .device(label)
            .unwrap()
            .inbox()
            .iter()
            .map(Request::topic)
            .collect()
    }

    #[test]
    fn test_handshake_round_builds_distance_row() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);

        let round = engine.begin_refresh("A").unwrap().unwrap();
        assert!(round.discovered().contains("B"));
        assert_eq!(topics(&engine, "B"), vec![Topic::NewConnection]);

        engine.process_inbox("B").unwrap();
        assert_eq!(topics(&engine, "A"), vec![Topic::NewConnectionAck]);

        engine.process_inbox("A").unwrap();
        let a = engine.environment().device("A").unwrap();
        assert!(a.awaiting_acks().is_empty());
        assert_eq!(a.link_to("B"), Some(QUALITY));

        let report = engine.finish_refresh(round).unwrap();
        assert_eq!(report.confirmed, vec!["B".to_string()]);
        assert!(!a.is_scanning());

        let table = a.routing_table();
        let distance = table.get(Metric::Distance, "A", "B").unwrap();
        assert!((distance - 7.07).abs() < 0.01);
        assert_eq!(table.get(Metric::Latency, "A", "B"), Some(2.0));
        assert_eq!(table.get(Metric::ErrorRate, "A", "B"), Some(0.5));

        assert_eq!(
            topics(&engine, "B"),
            vec![Topic::NewConnection, Topic::ConfirmConnection, Topic::UpdateRouting]
        );
    }

    #[test]
    fn test_confirm_does_not_register_initiator() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);

        let round = engine.begin_refresh("A").unwrap().unwrap();
        engine.process_inbox("B").unwrap();
        engine.process_inbox("A").unwrap();
        engine.process_inbox("B").unwrap();
        engine.finish_refresh(round).unwrap();

        let b = engine.environment().device("B").unwrap();
        assert!(b.neighbors().is_empty());
    }

    #[test]
    fn test_out_of_range_receiver_stays_silent() {
        let engine = engine();
        add(&engine, "strong", 0, 0, 20.0);
        add(&engine, "weak", 10, 0, 2.0);

        let _round = engine.begin_refresh("strong").unwrap().unwrap();
        engine.process_inbox("weak").unwrap();
        assert!(topics(&engine, "strong").is_empty());
    }

    #[test]
    fn test_update_routing_replaces_sender_rows() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);
        let a = engine.environment().device("A").unwrap();
        let b = engine.environment().device("B").unwrap();

        let mut old = RoutingTable::new();
        old.insert(Metric::Distance, "B", "Z", 4.0);
        a.merge_routing(&old);

        let mut gossip = RoutingTable::new();
        gossip.insert(Metric::Distance, "B", "C", 1.0);
        engine.deliver(&b, &a, Request::new("B", "A", Payload::UpdateRouting(gossip)));
        assert_eq!(engine.process_inbox("A").unwrap(), 1);

        let table = a.routing_table();
        assert_eq!(table.get(Metric::Distance, "B", "C"), Some(1.0));
        assert_eq!(table.get(Metric::Distance, "B", "Z"), None);
        assert!(a.unread().is_empty());
    }

    #[test]
    fn test_propagation_keeps_rows_learned_mid_round() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);
        let a = engine.environment().device("A").unwrap();
        let b = engine.environment().device("B").unwrap();

        let mut stale = RoutingTable::new();
        stale.insert(Metric::Distance, "A", "Z", 3.0);
        a.merge_routing(&stale);

        let round = engine.begin_refresh("A").unwrap().unwrap();
        engine.process_inbox("B").unwrap();

        // B's own refresh gossips its link back to A before A finishes
        let mut gossip = RoutingTable::new();
        gossip.insert(Metric::Distance, "B", "A", 7.0);
        engine.deliver(&b, &a, Request::new("B", "A", Payload::UpdateRouting(gossip)));
        engine.process_inbox("A").unwrap();
        engine.finish_refresh(round).unwrap();

        let table = a.routing_table();
        assert_eq!(table.get(Metric::Distance, "B", "A"), Some(7.0));
        assert!(table.get(Metric::Distance, "A", "B").is_some());
        assert_eq!(table.get(Metric::Distance, "A", "Z"), None);
    }

    #[test]
    fn test_overlapping_drains_handle_each_request_once() {
        let engine = Arc::new(engine());
        for (label, x) in [("A", 0), ("B", 5), ("C", 10)] {
            add(&engine, label, x, 0, 6.0);
        }
        let a = engine.environment().device("A").unwrap();
        let mut table = RoutingTable::new();
        table.insert(Metric::Distance, "A", "B", 1.0);
        table.insert(Metric::Distance, "B", "C", 1.0);
        a.merge_routing(&table);
        for _ in 0..300 {
            engine
                .send_user_message("A", "C", ContentType::Text, String::new())
                .unwrap();
        }

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let drains: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    engine.process_inbox("B").unwrap()
                })
            })
            .collect();
        let handled: usize = drains.into_iter().map(|t| t.join().unwrap()).sum();

        assert_eq!(handled, 300);
        assert_eq!(topics(&engine, "C").len(), 300);
        assert_eq!(topics(&engine, "A").len(), 300);
    }

    #[test]
    fn test_refresh_is_reentrancy_guarded() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);

        let round = engine.begin_refresh("A").unwrap();
        assert!(round.is_some());
        assert!(engine.begin_refresh("A").unwrap().is_none());
        drop(round);
        assert!(engine.begin_refresh("A").unwrap().is_some());
    }

    #[test]
    fn test_isolated_device_purges_own_rows() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        let a = engine.environment().device("A").unwrap();
        let mut table = RoutingTable::new();
        table.insert(Metric::Distance, "A", "B", 1.0);
        table.insert(Metric::Distance, "B", "C", 1.0);
        a.merge_routing(&table);

        let round = engine.begin_refresh("A").unwrap().unwrap();
        let report = engine.finish_refresh(round).unwrap();
        assert!(report.discovered.is_empty());
        assert_eq!(a.routing_table().len(), 1);
        assert!(!a.is_scanning());
    }

    #[test]
    fn test_unplaced_refresh_releases_scan_slot() {
        let engine = engine();
        engine
            .environment()
            .insert_device(Device::new("A", 10))
            .unwrap();
        assert!(matches!(
            engine.begin_refresh("A"),
            Err(MeshError::NotPlaced { .. })
        ));
        assert!(!engine.environment().device("A").unwrap().is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_returns_early_when_acked() {
        let engine = Arc::new(engine());
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);

        let refresh = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.refresh("A").await })
        };
        tokio::task::yield_now().await;
        while engine.environment().device("B").unwrap().unread().is_empty() {
            tokio::task::yield_now().await;
        }

        let started = tokio::time::Instant::now();
        engine.process_inbox("B").unwrap();
        engine.process_inbox("A").unwrap();
        let report = refresh.await.unwrap().unwrap();

        assert!(!report.timed_out);
        assert_eq!(report.confirmed, vec!["B".to_string()]);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_times_out_without_acks() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 5, 5, 10.0);

        let report = engine.refresh("A").await.unwrap();
        assert!(report.timed_out);
        assert!(report.confirmed.is_empty());
        assert_eq!(report.discovered, vec!["B".to_string()]);
        let a = engine.environment().device("A").unwrap();
        assert!(!a.is_scanning());
        assert!(a.awaiting_acks().is_empty());
    }

    #[test]
    fn test_link_quality_drawn_once_per_ack() {
        let mut links = MockLinkQualitySource::new();
        links
            .expect_sample()
            .times(1)
            .returning(|_, _| LinkQuality {
                error_rate: 9.0,
                latency: 1.0,
            });
        let engine = engine_with(Arc::new(links));
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "B", 3, 4, 10.0);

        let round = engine.begin_refresh("A").unwrap().unwrap();
        engine.process_inbox("B").unwrap();
        engine.process_inbox("A").unwrap();
        engine.finish_refresh(round).unwrap();

        let table = engine.environment().device("A").unwrap().routing_table();
        assert_eq!(table.get(Metric::ErrorRate, "A", "B"), Some(9.0));
        assert_eq!(table.get(Metric::Distance, "A", "B"), Some(5.0));
    }

    #[test]
    fn test_send_without_route() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        add(&engine, "D", 40, 40, 10.0);

        let err = engine
            .send_user_message("A", "D", ContentType::Text, "hi".to_string())
            .unwrap_err();
        assert_eq!(
            err,
            MeshError::NoRouteFound {
                from: "A".to_string(),
                to: "D".to_string(),
                metric: Metric::Distance,
            }
        );
    }

    #[test]
    fn test_send_unknown_destination() {
        let engine = engine();
        add(&engine, "A", 0, 0, 10.0);
        assert!(matches!(
            engine.send_user_message("A", "nope", ContentType::Text, String::new()),
            Err(MeshError::DeviceNotFound { .. })
        ));
        assert!(matches!(
            engine.send_user_message("nope", "A", ContentType::Text, String::new()),
            Err(MeshError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_source_routed_forwarding() {
        let engine = engine();
        for (label, x) in [("A", 0), ("B", 5), ("C", 10)] {
            add(&engine, label, x, 0, 6.0);
        }
        let a = engine.environment().device("A").unwrap();
        let mut table = RoutingTable::new();
        table.insert(Metric::Latency, "A", "B", 1.0);
        table.insert(Metric::Latency, "B", "C", 1.0);
        a.merge_routing(&table);

        let id = engine
            .send_user_message("A", "C", ContentType::Audio, "song".to_string())
            .unwrap();
        assert_eq!(a.outbox().len(), 1);
        assert_eq!(a.outbox()[0].id, id);

        // B has no table of its own; it only follows the carried path
        engine.process_inbox("B").unwrap();
        assert_eq!(topics(&engine, "A"), vec![Topic::UserMessageAck]);
        assert_eq!(topics(&engine, "C"), vec![Topic::UserMessage]);

        engine.process_inbox("C").unwrap();
        let c = engine.environment().device("C").unwrap();
        let delivered = &c.inbox()[0];
        assert!(delivered.is_read());
        assert!(delivered.path().is_empty());
        match &delivered.payload {
            Payload::UserMessage(message) => {
                assert_eq!(message.origin, "A");
                assert_eq!(message.body, "song");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(
            topics(&engine, "B"),
            vec![Topic::UserMessage, Topic::UserMessageAck]
        );
    }
}
