//! C3 — port substrate: per-port configuration, operational state,
//! statistics, and concurrent-safe mutation (§4.2).
//!
//! Each port's mutable state sits behind its own `Mutex` rather than a
//! single-threaded `Rc<RefCell<_>>`, since §5 requires per-port locks
//! callable from any thread.

use std::sync::{Arc, Mutex};

use crate::common::address::{is_mac_multicast_or_broadcast, port_mac};
use crate::common::{MacAddress, PortId, SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Physical,
    Logical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Half,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperState {
    Down,
    Up,
    Loopback,
}

/// Admin-configurable fields, replaced atomically by `set_config` (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortConfig {
    pub admin_up: bool,
    pub speed_mbps: u32,
    pub duplex: Duplex,
    pub auto_negotiation: bool,
    pub flow_control: bool,
    pub mtu: usize,
    pub pvid: u16,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            admin_up: false,
            speed_mbps: 1000,
            duplex: Duplex::Full,
            auto_negotiation: true,
            flow_control: false,
            mtu: crate::config::DEFAULT_MAX_ETHERNET_FRAME,
            pvid: 1,
        }
    }
}

/// Monotonic (until cleared) traffic counters, classified per §4.2: broadcast
/// destination -> broadcast counter; else multicast bit set -> multicast;
/// else unicast. Byte counts include Ethernet headers but not trailers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_unicast: u64,
    pub rx_multicast: u64,
    pub rx_broadcast: u64,
    pub rx_drops: u64,

    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_unicast: u64,
    pub tx_multicast: u64,
    pub tx_broadcast: u64,
    pub tx_drops: u64,
}

fn classify(dest: MacAddress) -> (bool, bool, bool) {
    let is_broadcast = dest == crate::common::address::MAC_BROADCAST;
    let is_multicast = !is_broadcast && is_mac_multicast_or_broadcast(dest);
    (is_broadcast, is_multicast, !is_broadcast && !is_multicast)
}

struct PortInner {
    config: PortConfig,
    oper_state: OperState,
    stats: PortStats,
    link_carrier: bool,
    connection: Option<PortId>,
    incoming: Vec<Vec<u8>>,
    outgoing: Vec<Vec<u8>>,
}

/// A single provisioned port (§3). One `Mutex` guards every mutable field,
/// satisfying "port operations acquire only that port's lock" (§5) since
/// there is exactly one lock per port.
pub struct Port {
    id: PortId,
    name: String,
    mac_address: MacAddress,
    kind: PortKind,
    inner: Mutex<PortInner>,
}

impl Port {
    pub fn new(id: PortId, name: impl Into<String>, kind: PortKind) -> Self {
        Self {
            mac_address: port_mac(id.raw()),
            id,
            name: name.into(),
            kind,
            inner: Mutex::new(PortInner {
                config: PortConfig::default(),
                oper_state: OperState::Down,
                stats: PortStats::default(),
                link_carrier: true,
                connection: None,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac_address(&self) -> MacAddress {
        self.mac_address
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn config(&self) -> PortConfig {
        self.inner.lock().unwrap().config
    }

    pub fn oper_state(&self) -> OperState {
        self.inner.lock().unwrap().oper_state
    }

    pub fn is_up(&self) -> bool {
        self.oper_state() == OperState::Up
    }

    pub fn stats(&self) -> PortStats {
        self.inner.lock().unwrap().stats
    }

    pub fn clear_stats(&self) {
        self.inner.lock().unwrap().stats = PortStats::default();
    }

    /// Atomically replaces the configuration and re-evaluates operational
    /// state: UP iff admin-up AND simulated carrier is present (§4.2).
    pub fn set_config(&self, config: PortConfig) -> SimResult<()> {
        if config.mtu < crate::config::MIN_ETHERNET_FRAME {
            return Err(SimError::InvalidParam(format!(
                "mtu {} below minimum frame size {}",
                config.mtu,
                crate::config::MIN_ETHERNET_FRAME
            )));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.config = config;
        Self::reevaluate_oper_state(&mut inner);
        Ok(())
    }

    pub fn set_admin_up(&self, up: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.config.admin_up = up;
        Self::reevaluate_oper_state(&mut inner);
    }

    /// Simulated carrier-loss toggle, driven by the hardware-simulation tick
    /// (§4.3 step iii).
    pub fn set_link_carrier(&self, present: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.link_carrier = present;
        Self::reevaluate_oper_state(&mut inner);
    }

    /// Flips simulated carrier presence and returns the resulting
    /// operational state (§4.3 step iii: "toggle operational state").
    pub fn toggle_link_carrier(&self) -> OperState {
        let mut inner = self.inner.lock().unwrap();
        inner.link_carrier = !inner.link_carrier;
        Self::reevaluate_oper_state(&mut inner);
        inner.oper_state
    }

    fn reevaluate_oper_state(inner: &mut PortInner) {
        inner.oper_state = if inner.config.admin_up && inner.link_carrier {
            OperState::Up
        } else {
            OperState::Down
        };
    }

    pub fn connect(&self, peer: PortId) {
        self.inner.lock().unwrap().connection = Some(peer);
    }

    pub fn disconnect(&self) {
        self.inner.lock().unwrap().connection = None;
    }

    pub fn connection(&self) -> Option<PortId> {
        self.inner.lock().unwrap().connection
    }

    /// Appends to this port's incoming queue, classifying and counting the
    /// frame by destination MAC (offset 0..6). Byte counts include the
    /// Ethernet header but no trailer (§4.2).
    pub fn deliver_incoming(&self, frame: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if frame.len() >= 6 {
            let dest: MacAddress = frame[0..6].try_into().unwrap();
            let (bcast, mcast, ucast) = classify(dest);
            inner.stats.rx_packets += 1;
            inner.stats.rx_bytes += frame.len() as u64;
            if bcast {
                inner.stats.rx_broadcast += 1;
            } else if mcast {
                inner.stats.rx_multicast += 1;
            } else if ucast {
                inner.stats.rx_unicast += 1;
            }
        }
        inner.incoming.push(frame);
    }

    /// Drains and returns the incoming queue.
    pub fn consume_incoming(&self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.incoming)
    }

    /// Drains and returns this port's outgoing queue. Called once per tick
    /// by `PortTable::tick_cables`, which moves the drained frames onto the
    /// connected peer's incoming queue (§4.3).
    pub fn drain_outgoing(&self) -> Vec<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.outgoing)
    }

    /// Increments the TX drop counter without touching any other stat.
    /// Used when a frame never reaches `transmit_frame` because STP denied
    /// forwarding on this port (§4.4).
    pub fn record_blocked_egress(&self) {
        self.inner.lock().unwrap().stats.tx_drops += 1;
    }

    /// Egress a frame: drop if the port is not UP or the frame exceeds MTU,
    /// incrementing the appropriate drop counter either way (§4.2, §4.4
    /// `transmit`).
    pub fn transmit_frame(&self, frame: Vec<u8>) -> SimResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.oper_state != OperState::Up {
            inner.stats.tx_drops += 1;
            return Err(SimError::ResourceUnavailable("port not up".into()));
        }

        if frame.len() > inner.config.mtu {
            inner.stats.tx_drops += 1;
            return Err(SimError::InvalidPacket("frame exceeds mtu".into()));
        }

        if frame.len() >= 6 {
            let dest: MacAddress = frame[0..6].try_into().unwrap();
            let (bcast, mcast, ucast) = classify(dest);
            inner.stats.tx_packets += 1;
            inner.stats.tx_bytes += frame.len() as u64;
            if bcast {
                inner.stats.tx_broadcast += 1;
            } else if mcast {
                inner.stats.tx_multicast += 1;
            } else if ucast {
                inner.stats.tx_unicast += 1;
            }
        }

        inner.outgoing.push(frame);
        Ok(())
    }
}

/// All provisioned ports (§4.2 "globally: get port count, enumerate ports").
///
/// Provisioning (`add_port`) is rare and structural, so it takes the single
/// `Mutex` briefly; everyday per-port operations go straight through the
/// cloned `Arc<Port>` and that port's own lock, never touching this one
/// (§5 "port operations acquire only that port's lock").
pub struct PortTable {
    ports: Mutex<Vec<Arc<Port>>>,
    max_ports: usize,
}

impl PortTable {
    pub fn new(max_ports: usize) -> Self {
        Self {
            ports: Mutex::new(Vec::new()),
            max_ports,
        }
    }

    pub fn add_port(&self, kind: PortKind) -> SimResult<Arc<Port>> {
        let mut ports = self.ports.lock().unwrap();
        if ports.len() >= self.max_ports {
            return Err(SimError::ResourceExhausted("max ports reached".into()));
        }
        let id = PortId::from(ports.len());
        let port = Arc::new(Port::new(id, format!("port{}", id.raw()), kind));
        ports.push(port.clone());
        Ok(port)
    }

    pub fn get(&self, id: PortId) -> SimResult<Arc<Port>> {
        self.ports
            .lock()
            .unwrap()
            .get(id.index())
            .cloned()
            .ok_or_else(|| SimError::InvalidPort(id.to_string()))
    }

    pub fn port_count(&self) -> usize {
        self.ports.lock().unwrap().len()
    }

    pub fn enumerate(&self) -> Vec<Arc<Port>> {
        self.ports.lock().unwrap().clone()
    }

    /// Connects two ports bidirectionally (a simulated cable).
    pub fn connect(&self, a: PortId, b: PortId) -> SimResult<()> {
        self.get(a)?.connect(b);
        self.get(b)?.connect(a);
        Ok(())
    }

    pub fn disconnect(&self, a: PortId) -> SimResult<()> {
        let port = self.get(a)?;
        if let Some(peer) = port.connection() {
            if let Ok(peer_port) = self.get(peer) {
                peer_port.disconnect();
            }
        }
        port.disconnect();
        Ok(())
    }

    /// Moves every port's outgoing queue onto its connected peer's incoming
    /// queue (§4.3's cable movement, folded into the hardware-simulation
    /// tick rather than kept as a separate always-on component).
    pub fn tick_cables(&self) {
        for port in self.enumerate() {
            let frames = port.drain_outgoing();
            if frames.is_empty() {
                continue;
            }
            match port.connection() {
                Some(peer_id) => {
                    if let Ok(peer) = self.get(peer_id) {
                        for frame in frames {
                            peer.deliver_incoming(frame);
                        }
                    }
                }
                None => {
                    tracing::trace!(target: "HAL", port = %port.id(), "dropped {} frames; no connection", frames.len());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn SetConfig_AdminDown_OperStateReachesDown() {
        let port = Port::new(PortId::from(0u32), "p0", PortKind::Physical);
        let mut cfg = PortConfig::default();
        cfg.admin_up = true;
        port.set_config(cfg).unwrap();
        assert!(port.is_up());

        port.set_admin_up(false);
        assert_eq!(port.oper_state(), OperState::Down);
    }

    #[test]
    fn TransmitFrame_PortDown_FailsAndCountsDrop() {
        let port = Port::new(PortId::from(0u32), "p0", PortKind::Physical);
        let res = port.transmit_frame(vec![0u8; 64]);
        assert_eq!(res, Err(SimError::ResourceUnavailable("port not up".into())));
        assert_eq!(port.stats().tx_drops, 1);
    }

    #[test]
    fn TransmitFrame_OversizedMtu_Drops() {
        let port = Port::new(PortId::from(0u32), "p0", PortKind::Physical);
        let mut cfg = PortConfig::default();
        cfg.admin_up = true;
        cfg.mtu = 64;
        port.set_config(cfg).unwrap();

        let res = port.transmit_frame(vec![0u8; 65]);
        assert!(res.is_err());
        assert_eq!(port.stats().tx_drops, 1);
    }

    #[test]
    fn DeliverIncoming_Broadcast_IncrementsBroadcastCounter() {
        let port = Port::new(PortId::from(0u32), "p0", PortKind::Physical);
        let mut frame = vec![0xFFu8; 14];
        frame[0..6].copy_from_slice(&crate::common::address::MAC_BROADCAST);
        port.deliver_incoming(frame);
        assert_eq!(port.stats().rx_broadcast, 1);
        assert_eq!(port.stats().rx_packets, 1);
    }

    #[test]
    fn StatsAfter_NeverLessThan_StatsBefore() {
        let port = Port::new(PortId::from(0u32), "p0", PortKind::Physical);
        let before = port.stats();
        port.deliver_incoming(vec![1, 2, 3, 4, 5, 6, 7, 8]);
        let after = port.stats();
        assert!(after.rx_packets >= before.rx_packets);
        assert!(after.rx_bytes >= before.rx_bytes);
    }

    #[test]
    fn TickCables_MovesOutgoingToConnectedPeerIncoming() {
        let mut table = PortTable::new(8);
        let p0 = table.add_port(PortKind::Physical).unwrap();
        let p1 = table.add_port(PortKind::Physical).unwrap();
        table.connect(p0.id(), p1.id()).unwrap();

        let mut cfg = PortConfig::default();
        cfg.admin_up = true;
        p0.set_config(cfg).unwrap();
        p1.set_config(cfg).unwrap();

        p0.transmit_frame(vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        table.tick_cables();

        let received = p1.consume_incoming();
        assert_eq!(received.len(), 1);
    }
}
