//! C7 — Spanning Tree Protocol: BPDU framing, bridge-id/superiority
//! comparison, per-port role/state machine, and the forwarding gate that
//! C5/C6 consult before using a port (§4.6).
//!
//! Five port states (DISABLED/BLOCKING/LISTENING/LEARNING/FORWARDING)
//! driven by a per-port comparison — is this incoming BPDU superior to what
//! this bridge would itself advertise on this port — rather than a
//! whole-topology segment election.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::common::address::MAC_BPDU;
use crate::common::{MacAddress, PortId, SharedClock, SimError, SimResult, Tickable};
use crate::config::StpTimers;

/// Default root path cost contributed by traversing one hop of this bridge,
/// standing in for a per-link speed-derived cost (802.1D's 19 for 100Mbps
/// class links would also be reasonable; 4 matches a 1Gbps-class link).
pub const DEFAULT_PATH_COST: u32 = 4;

/// Bridge ID: 16-bit priority then 48-bit MAC. Field order matters — the
/// derived `Ord` gives exactly "priority first (lower wins), MAC breaks
/// ties (lower wins)" (§4.6 "Bridge-id comparison").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BridgeId {
    pub priority: u16,
    pub mac: MacAddress,
}

impl BridgeId {
    pub fn new(priority: u16, mac: MacAddress) -> Self {
        Self { priority, mac }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Root,
    Designated,
    Alternate,
    Backup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Disabled,
    Blocking,
    Listening,
    Learning,
    Forwarding,
}

const LLC_DSAP: u8 = 0x42;
const LLC_SSAP: u8 = 0x42;
const LLC_CONTROL: u8 = 0x03;
const BPDU_PROTOCOL_IDENTIFIER: u16 = 0x0000;
const BPDU_PROTOCOL_VERSION: u8 = 0x00;
const BPDU_TYPE_CONFIG: u8 = 0x00;
const BPDU_TYPE_TCN: u8 = 0x80;

const ETHERNET_HEADER_LEN: usize = 14;
const LLC_HEADER_LEN: usize = 3;
const BPDU_FIXED_HEADER_LEN: usize = 4;
const CONFIG_BODY_LEN: usize = 31;

const TOPOLOGY_CHANGE_FLAG: u8 = 0b0000_0001;
const TOPOLOGY_CHANGE_ACK_FLAG: u8 = 0b1000_0000;

/// A configuration BPDU's fixed fields (§4.6): root id, root-path cost,
/// sending bridge id and port id, message age, and the root's timers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigBpdu {
    pub root_id: BridgeId,
    pub root_path_cost: u32,
    pub sender_bridge_id: BridgeId,
    pub sender_port_id: u16,
    pub message_age: u16,
    pub max_age: u16,
    pub hello_time: u16,
    pub forward_delay: u16,
    pub topology_change: bool,
    pub topology_change_ack: bool,
}

impl ConfigBpdu {
    /// The lexicographic superiority key (§4.6): lower is more superior.
    fn superiority_key(&self) -> (BridgeId, u32, BridgeId, u16) {
        (self.root_id, self.root_path_cost, self.sender_bridge_id, self.sender_port_id)
    }
}

/// A bridge protocol data unit (§6): a periodic configuration advertisement,
/// or a topology-change notification relayed toward the root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bpdu {
    Config(ConfigBpdu),
    Tcn,
}

/// Wire timer values are in units of 1/256 seconds (§6); whole-second timers
/// convert cleanly in both directions since every timer this crate uses is a
/// small integer number of seconds.
fn wire_timer(seconds: u16) -> [u8; 2] {
    seconds.saturating_mul(256).to_be_bytes()
}

fn from_wire_timer(raw: [u8; 2]) -> u16 {
    u16::from_be_bytes(raw) / 256
}

impl Bpdu {
    /// Serializes the full frame this BPDU would be sent as (§6): Ethernet
    /// header (destination always `MAC_BPDU`), LLC header (DSAP/SSAP 0x42,
    /// control 0x03), protocol id/version, BPDU type, and — for a
    /// configuration BPDU — the 31-byte body. Total length is 52 bytes for
    /// configuration, 21 for TCN.
    pub fn to_bytes(&self, source_mac: MacAddress) -> Vec<u8> {
        let mut buf = Vec::with_capacity(match self {
            Bpdu::Config(_) => ETHERNET_HEADER_LEN + LLC_HEADER_LEN + BPDU_FIXED_HEADER_LEN + CONFIG_BODY_LEN,
            Bpdu::Tcn => ETHERNET_HEADER_LEN + LLC_HEADER_LEN + BPDU_FIXED_HEADER_LEN,
        });

        buf.extend_from_slice(&MAC_BPDU);
        buf.extend_from_slice(&source_mac);
        let length_offset = buf.len();
        buf.extend_from_slice(&[0u8; 2]);
        buf.push(LLC_DSAP);
        buf.push(LLC_SSAP);
        buf.push(LLC_CONTROL);
        buf.extend_from_slice(&BPDU_PROTOCOL_IDENTIFIER.to_be_bytes());
        buf.push(BPDU_PROTOCOL_VERSION);

        match self {
            Bpdu::Tcn => {
                buf.push(BPDU_TYPE_TCN);
            }
            Bpdu::Config(cfg) => {
                buf.push(BPDU_TYPE_CONFIG);

                let mut flags = 0u8;
                if cfg.topology_change {
                    flags |= TOPOLOGY_CHANGE_FLAG;
                }
                if cfg.topology_change_ack {
                    flags |= TOPOLOGY_CHANGE_ACK_FLAG;
                }
                buf.push(flags);

                buf.extend_from_slice(&cfg.root_id.priority.to_be_bytes());
                buf.extend_from_slice(&cfg.root_id.mac);
                buf.extend_from_slice(&cfg.root_path_cost.to_be_bytes());
                buf.extend_from_slice(&cfg.sender_bridge_id.priority.to_be_bytes());
                buf.extend_from_slice(&cfg.sender_bridge_id.mac);
                buf.extend_from_slice(&cfg.sender_port_id.to_be_bytes());
                buf.extend_from_slice(&wire_timer(cfg.message_age));
                buf.extend_from_slice(&wire_timer(cfg.max_age));
                buf.extend_from_slice(&wire_timer(cfg.hello_time));
                buf.extend_from_slice(&wire_timer(cfg.forward_delay));
            }
        }

        let length = (buf.len() - length_offset - 2) as u16;
        buf[length_offset..length_offset + 2].copy_from_slice(&length.to_be_bytes());
        buf
    }

    /// Parses a full frame as written by `to_bytes` (§6).
    pub fn from_bytes(bytes: &[u8]) -> SimResult<Self> {
        let header_len = ETHERNET_HEADER_LEN + LLC_HEADER_LEN + BPDU_FIXED_HEADER_LEN;
        if bytes.len() < header_len {
            return Err(SimError::InvalidPacket("bpdu frame shorter than fixed header".into()));
        }

        let llc = &bytes[ETHERNET_HEADER_LEN..];
        if llc[0] != LLC_DSAP || llc[1] != LLC_SSAP || llc[2] != LLC_CONTROL {
            return Err(SimError::InvalidPacket("bpdu frame has non-stp llc header".into()));
        }

        let fixed = &llc[LLC_HEADER_LEN..];
        let protocol_identifier = u16::from_be_bytes([fixed[0], fixed[1]]);
        if protocol_identifier != BPDU_PROTOCOL_IDENTIFIER {
            return Err(SimError::InvalidPacket(format!("unexpected bpdu protocol id {:#06x}", protocol_identifier)));
        }
        let protocol_version = fixed[2];
        if protocol_version != BPDU_PROTOCOL_VERSION {
            return Err(SimError::Unsupported(format!("bpdu protocol version {}", protocol_version)));
        }

        match fixed[3] {
            BPDU_TYPE_TCN => Ok(Bpdu::Tcn),
            BPDU_TYPE_CONFIG => {
                let body = &bytes[header_len..];
                if body.len() < CONFIG_BODY_LEN {
                    return Err(SimError::InvalidPacket("config bpdu body truncated".into()));
                }

                let flags = body[0];
                let root_mac: MacAddress = body[3..9].try_into().unwrap();
                let sender_mac: MacAddress = body[15..21].try_into().unwrap();

                Ok(Bpdu::Config(ConfigBpdu {
                    topology_change: flags & TOPOLOGY_CHANGE_FLAG != 0,
                    topology_change_ack: flags & TOPOLOGY_CHANGE_ACK_FLAG != 0,
                    root_id: BridgeId::new(u16::from_be_bytes([body[1], body[2]]), root_mac),
                    root_path_cost: u32::from_be_bytes(body[9..13].try_into().unwrap()),
                    sender_bridge_id: BridgeId::new(u16::from_be_bytes([body[13], body[14]]), sender_mac),
                    sender_port_id: u16::from_be_bytes(body[21..23].try_into().unwrap()),
                    message_age: from_wire_timer(body[23..25].try_into().unwrap()),
                    max_age: from_wire_timer(body[25..27].try_into().unwrap()),
                    hello_time: from_wire_timer(body[27..29].try_into().unwrap()),
                    forward_delay: from_wire_timer(body[29..31].try_into().unwrap()),
                }))
            }
            other => Err(SimError::InvalidPacket(format!("unknown bpdu type {:#04x}", other))),
        }
    }
}

struct PortInfo {
    enabled: bool,
    link_up: bool,
    state: PortState,
    role: Option<PortRole>,
    state_entered_at: Duration,
    last_bpdu_at: Option<Duration>,
}

impl PortInfo {
    fn new() -> Self {
        Self {
            enabled: true,
            link_up: false,
            state: PortState::Disabled,
            role: None,
            state_entered_at: Duration::ZERO,
            last_bpdu_at: None,
        }
    }
}

/// One bridge's STP state. All mutable state lives behind one lock (§5:
/// "STP owns a single lock over the bridge state; BPDU ingestion and tick
/// both acquire it").
pub struct Stp {
    globally_enabled: bool,
    bridge_id: BridgeId,
    path_cost: u32,
    clock: SharedClock,
    timers: StpTimers,
    state: Mutex<BridgeState>,
    last_hello_at: Mutex<Option<Duration>>,
}

struct BridgeState {
    root_id: BridgeId,
    root_path_cost: u32,
    root_port: Option<PortId>,
    topology_change_until: Option<Duration>,
    pending_tcn_relay: bool,
    ports: HashMap<PortId, PortInfo>,
}

impl Stp {
    pub fn new(bridge_id: BridgeId, timers: StpTimers, clock: SharedClock, enabled: bool) -> Self {
        Self {
            globally_enabled: enabled,
            bridge_id,
            path_cost: DEFAULT_PATH_COST,
            clock,
            timers,
            state: Mutex::new(BridgeState {
                root_id: bridge_id,
                root_path_cost: 0,
                root_port: None,
                topology_change_until: None,
                pending_tcn_relay: false,
                ports: HashMap::new(),
            }),
            last_hello_at: Mutex::new(None),
        }
    }

    pub fn bridge_id(&self) -> BridgeId {
        self.bridge_id
    }

    pub fn is_root_bridge(&self) -> bool {
        self.state.lock().unwrap().root_id == self.bridge_id
    }

    pub fn root_id(&self) -> BridgeId {
        self.state.lock().unwrap().root_id
    }

    pub fn root_path_cost(&self) -> u32 {
        self.state.lock().unwrap().root_path_cost
    }

    pub fn root_port(&self) -> Option<PortId> {
        self.state.lock().unwrap().root_port
    }

    pub fn add_port(&self, port: PortId) {
        self.state.lock().unwrap().ports.entry(port).or_insert_with(PortInfo::new);
    }

    pub fn port_role(&self, port: PortId) -> Option<PortRole> {
        self.state.lock().unwrap().ports.get(&port).and_then(|p| p.role)
    }

    pub fn port_state(&self, port: PortId) -> Option<PortState> {
        self.state.lock().unwrap().ports.get(&port).map(|p| p.state)
    }

    /// §4.6 "Forwarding gate": true if STP is globally disabled, else true
    /// iff the port is FORWARDING.
    pub fn can_forward(&self, port: PortId) -> bool {
        if !self.globally_enabled {
            return true;
        }
        self.state
            .lock()
            .unwrap()
            .ports
            .get(&port)
            .map(|p| p.state == PortState::Forwarding)
            .unwrap_or(false)
    }

    /// Companion gate for MAC learning: BLOCKING/LISTENING never learn;
    /// LEARNING/FORWARDING do (§4.6 state descriptions).
    pub fn can_learn(&self, port: PortId) -> bool {
        if !self.globally_enabled {
            return true;
        }
        self.state
            .lock()
            .unwrap()
            .ports
            .get(&port)
            .map(|p| matches!(p.state, PortState::Learning | PortState::Forwarding))
            .unwrap_or(false)
    }

    /// Link up/down transition (§4.6): DISABLED -> BLOCKING on link up with
    /// STP enabled on the port; any state -> DISABLED on link down. A port
    /// that was FORWARDING when it drops triggers a topology change.
    pub fn set_link_up(&self, port: PortId, up: bool) -> SimResult<()> {
        let now = self.clock.lock().unwrap().now();
        let mut state = self.state.lock().unwrap();

        let was_forwarding = {
            let info = state.ports.get_mut(&port).ok_or_else(|| SimError::InvalidPort(port.to_string()))?;
            let was_forwarding = info.state == PortState::Forwarding;

            info.link_up = up;
            if !up {
                info.state = PortState::Disabled;
                info.role = None;
            } else if info.enabled && info.state == PortState::Disabled {
                info.state = PortState::Blocking;
                info.state_entered_at = now;
            }
            was_forwarding
        };

        if !up && was_forwarding {
            Self::mark_topology_change(&mut state, self.bridge_id, self.timers.forward_delay, now);
        }
        Ok(())
    }

    fn transition(info: &mut PortInfo, state: PortState, now: Duration) {
        info.state = state;
        info.state_entered_at = now;
    }

    /// Records a topology change at either of the two canonical 802.1D
    /// trigger points — a forwarding port drops, or a port newly starts
    /// forwarding — and on receipt of a relayed TCN (§4.6). The root arms
    /// its own flag directly; any other bridge queues a TCN to relay out
    /// its root port on the next tick.
    fn mark_topology_change(state: &mut BridgeState, bridge_id: BridgeId, forward_delay: Duration, now: Duration) {
        if state.root_id == bridge_id {
            state.topology_change_until = Some(now + forward_delay * 2);
        } else {
            state.pending_tcn_relay = true;
        }
    }

    /// Processes one inbound BPDU on `port` (§4.6 "BPDU processing").
    pub fn receive_bpdu(&self, port: PortId, bpdu: Bpdu) -> SimResult<()> {
        match bpdu {
            Bpdu::Tcn => self.receive_tcn(port),
            Bpdu::Config(cfg) => self.receive_config_bpdu(port, cfg),
        }
    }

    /// A topology-change notification arriving from a downstream bridge
    /// (§4.6 "Topology-change notifications propagate toward the root").
    fn receive_tcn(&self, port: PortId) -> SimResult<()> {
        let now = self.clock.lock().unwrap().now();
        let mut state = self.state.lock().unwrap();
        if !state.ports.contains_key(&port) {
            return Err(SimError::InvalidPort(port.to_string()));
        }
        Self::mark_topology_change(&mut state, self.bridge_id, self.timers.forward_delay, now);
        Ok(())
    }

    fn receive_config_bpdu(&self, port: PortId, bpdu: ConfigBpdu) -> SimResult<()> {
        let now = self.clock.lock().unwrap().now();
        let mut state = self.state.lock().unwrap();

        if !state.ports.contains_key(&port) {
            return Err(SimError::InvalidPort(port.to_string()));
        }

        let local_key = (state.root_id, state.root_path_cost, self.bridge_id, port.raw() as u16);
        let incoming_key = bpdu.superiority_key();

        if incoming_key < local_key {
            state.root_id = bpdu.root_id;
            state.root_path_cost = bpdu.root_path_cost + self.path_cost;
            state.root_port = Some(port);

            let info = state.ports.get_mut(&port).unwrap();
            info.last_bpdu_at = Some(now);
            info.role = Some(PortRole::Root);
            Self::transition(info, PortState::Listening, now);
        } else {
            let info = state.ports.get_mut(&port).unwrap();
            info.last_bpdu_at = Some(now);

            if local_key < incoming_key {
                info.role = Some(PortRole::Designated);
                Self::transition(info, PortState::Listening, now);
            } else {
                info.role = Some(if incoming_key == local_key { PortRole::Backup } else { PortRole::Alternate });
                Self::transition(info, PortState::Blocking, now);
            }
        }
        Ok(())
    }

    /// Builds the hello BPDU this bridge would emit on `port` right now.
    pub fn build_hello(&self, port: PortId) -> Bpdu {
        let state = self.state.lock().unwrap();
        let topology_change = state
            .topology_change_until
            .map(|until| self.clock.lock().unwrap().now() < until)
            .unwrap_or(false);

        Bpdu::Config(ConfigBpdu {
            root_id: state.root_id,
            root_path_cost: state.root_path_cost,
            sender_bridge_id: self.bridge_id,
            sender_port_id: port.raw() as u16,
            message_age: 0,
            max_age: self.timers.max_age.as_secs() as u16,
            hello_time: self.timers.hello.as_secs() as u16,
            forward_delay: self.timers.forward_delay.as_secs() as u16,
            topology_change,
            topology_change_ack: false,
        })
    }

    /// True on the root bridge's designated ports, the condition under
    /// which the hello timer emits configuration BPDUs (§4.6 "Timers").
    pub fn should_emit_hello(&self, port: PortId) -> bool {
        let state = self.state.lock().unwrap();
        state.root_id == self.bridge_id
            && state.ports.get(&port).map(|p| p.role == Some(PortRole::Designated)).unwrap_or(false)
    }

    /// True once `hello_time` has elapsed since the last time this returned
    /// true; arms the next interval as a side effect (§4.6 "Timers").
    pub fn hello_due(&self) -> bool {
        let now = self.clock.lock().unwrap().now();
        let mut last = self.last_hello_at.lock().unwrap();
        let due = last.map(|t| now.saturating_sub(t) >= self.timers.hello).unwrap_or(true);
        if due {
            *last = Some(now);
        }
        due
    }

    /// Takes and clears a pending topology-change relay, if one is queued
    /// (§4.6 "Topology-change notifications propagate toward the root").
    pub fn take_pending_tcn_relay(&self) -> Option<PortId> {
        let mut state = self.state.lock().unwrap();
        if !state.pending_tcn_relay {
            return None;
        }
        state.pending_tcn_relay = false;
        state.root_port
    }

    /// Forces this bridge to declare itself root (§4.6 "Message-age timer
    /// expires ... forces the bridge to declare itself root and
    /// reconfigure").
    fn become_root(&self) {
        let now = self.clock.lock().unwrap().now();
        let mut state = self.state.lock().unwrap();
        state.root_id = self.bridge_id;
        state.root_path_cost = 0;
        state.root_port = None;
        for info in state.ports.values_mut() {
            if info.link_up && info.enabled {
                info.role = Some(PortRole::Designated);
                Self::transition(info, PortState::Listening, now);
            }
        }
    }
}

impl Stp {
    /// Advances forward-delay-gated state transitions and checks the
    /// message-age timer on the root port (§4.6 "Timers").
    ///
    /// Takes `&self`: bridge state lives behind a `Mutex` already, so a
    /// caller holding only `Arc<Stp>` (the top-level simulator handle) can
    /// drive the tick without exclusive ownership.
    pub fn tick_now(&self) {
        let now = self.clock.lock().unwrap().now();
        let forward_delay = self.timers.forward_delay;
        let max_age = self.timers.max_age;

        let mut expired_root = false;
        let mut became_forwarding = false;
        {
            let mut state = self.state.lock().unwrap();
            let root_port = state.root_port;

            for (port, info) in state.ports.iter_mut() {
                if !info.link_up || !info.enabled {
                    continue;
                }
                match info.state {
                    PortState::Listening if now.saturating_sub(info.state_entered_at) >= forward_delay => {
                        Self::transition(info, PortState::Learning, now);
                    }
                    PortState::Learning if now.saturating_sub(info.state_entered_at) >= forward_delay => {
                        Self::transition(info, PortState::Forwarding, now);
                        became_forwarding = true;
                    }
                    _ => {}
                }

                if Some(*port) == root_port {
                    if let Some(last) = info.last_bpdu_at {
                        if now.saturating_sub(last) >= max_age {
                            expired_root = true;
                        }
                    }
                }
            }

            if became_forwarding {
                Self::mark_topology_change(&mut state, self.bridge_id, forward_delay, now);
            }
        }

        if expired_root {
            self.become_root();
        }
    }
}

impl Tickable for Stp {
    fn tick(&mut self) {
        self.tick_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::new_shared_clock;

    fn mac(n: u8) -> MacAddress {
        [0, 0, 0, 0, 0, n]
    }

    #[test]
    fn BridgeId_LowerPriority_IsSuperior() {
        let low = BridgeId::new(10, mac(9));
        let high = BridgeId::new(20, mac(1));
        assert!(low < high);
    }

    #[test]
    fn BridgeId_EqualPriority_LowerMacIsSuperior() {
        let a = BridgeId::new(10, mac(1));
        let b = BridgeId::new(10, mac(2));
        assert!(a < b);
    }

    #[test]
    fn CanForward_StpDisabled_AlwaysTrue() {
        let clock = new_shared_clock();
        let stp = Stp::new(BridgeId::new(1, mac(1)), StpTimers::default(), clock, false);
        assert!(stp.can_forward(PortId::from(0u32)));
    }

    #[test]
    fn NewPort_StartsDisabled_ThenBlockingOnLinkUp() {
        let clock = new_shared_clock();
        let stp = Stp::new(BridgeId::new(1, mac(1)), StpTimers::default(), clock, true);
        let port = PortId::from(0u32);
        stp.add_port(port);
        assert_eq!(stp.port_state(port), Some(PortState::Disabled));

        stp.set_link_up(port, true).unwrap();
        assert_eq!(stp.port_state(port), Some(PortState::Blocking));
    }

    #[test]
    fn ReceiveBpdu_SuperiorRoot_BecomesRootPortInListening() {
        let clock = new_shared_clock();
        let local = BridgeId::new(100, mac(1));
        let stp = Stp::new(local, StpTimers::default(), clock, true);
        let port = PortId::from(0u32);
        stp.add_port(port);
        stp.set_link_up(port, true).unwrap();

        let superior_root = BridgeId::new(1, mac(2));
        let bpdu = Bpdu::Config(ConfigBpdu {
            root_id: superior_root,
            root_path_cost: 0,
            sender_bridge_id: superior_root,
            sender_port_id: 0,
            message_age: 0,
            max_age: 20,
            hello_time: 2,
            forward_delay: 15,
            topology_change: false,
            topology_change_ack: false,
        });

        stp.receive_bpdu(port, bpdu).unwrap();
        assert_eq!(stp.root_id(), superior_root);
        assert_eq!(stp.root_port(), Some(port));
        assert_eq!(stp.port_state(port), Some(PortState::Listening));
        assert!(!stp.is_root_bridge());
    }

    #[test]
    fn Bpdu_RoundTripsThroughBytes() {
        let bpdu = Bpdu::Config(ConfigBpdu {
            root_id: BridgeId::new(5, mac(1)),
            root_path_cost: 12,
            sender_bridge_id: BridgeId::new(9, mac(2)),
            sender_port_id: 3,
            message_age: 1,
            max_age: 20,
            hello_time: 2,
            forward_delay: 15,
            topology_change: true,
            topology_change_ack: false,
        });
        let bytes = bpdu.to_bytes(mac(9));
        assert_eq!(bytes.len(), 52);
        let decoded = Bpdu::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, bpdu);
    }

    #[test]
    fn Tcn_RoundTripsThroughBytes_As21ByteFrame() {
        let bytes = Bpdu::Tcn.to_bytes(mac(1));
        assert_eq!(bytes.len(), 21);
        assert_eq!(Bpdu::from_bytes(&bytes).unwrap(), Bpdu::Tcn);
    }

    #[test]
    fn Tick_ListeningPortAfterForwardDelay_AdvancesToLearning() {
        let clock = new_shared_clock();
        let mut timers = StpTimers::default();
        timers.forward_delay = Duration::from_secs(5);
        let mut stp = Stp::new(BridgeId::new(1, mac(1)), timers, clock.clone(), true);
        let port = PortId::from(0u32);
        stp.add_port(port);
        stp.set_link_up(port, true).unwrap();
        stp.state.get_mut().unwrap().ports.get_mut(&port).unwrap().state = PortState::Listening;

        clock.lock().unwrap().advance(Duration::from_secs(6));
        stp.tick();
        assert_eq!(stp.port_state(port), Some(PortState::Learning));
    }

    #[test]
    fn Tick_PortReachesForwarding_ArmsTopologyChangeOnRoot() {
        let clock = new_shared_clock();
        let mut timers = StpTimers::default();
        timers.forward_delay = Duration::from_secs(5);
        let stp = Stp::new(BridgeId::new(1, mac(1)), timers, clock.clone(), true);
        let port = PortId::from(0u32);
        stp.add_port(port);
        stp.set_link_up(port, true).unwrap();
        stp.state.lock().unwrap().ports.get_mut(&port).unwrap().state = PortState::Learning;

        clock.lock().unwrap().advance(Duration::from_secs(6));
        stp.tick_now();

        assert_eq!(stp.port_state(port), Some(PortState::Forwarding));
        let Bpdu::Config(cfg) = stp.build_hello(port) else { panic!("expected config bpdu") };
        assert!(cfg.topology_change);
    }

    #[test]
    fn SetLinkUp_ForwardingPortDrops_QueuesTcnRelayOnNonRoot() {
        let clock = new_shared_clock();
        let stp = Stp::new(BridgeId::new(100, mac(2)), StpTimers::default(), clock.clone(), true);
        let port = PortId::from(0u32);
        stp.add_port(port);
        stp.set_link_up(port, true).unwrap();

        // This bridge learns of a superior root elsewhere, so it isn't root.
        let superior = BridgeId::new(1, mac(1));
        let bpdu = Bpdu::Config(ConfigBpdu {
            root_id: superior,
            root_path_cost: 0,
            sender_bridge_id: superior,
            sender_port_id: 0,
            message_age: 0,
            max_age: 20,
            hello_time: 2,
            forward_delay: 15,
            topology_change: false,
            topology_change_ack: false,
        });
        stp.receive_bpdu(port, bpdu).unwrap();
        stp.state.lock().unwrap().ports.get_mut(&port).unwrap().state = PortState::Forwarding;

        stp.set_link_up(port, false).unwrap();
        assert_eq!(stp.take_pending_tcn_relay(), Some(port));
        assert_eq!(stp.take_pending_tcn_relay(), None);
    }

    #[test]
    fn HelloDue_FirstCall_TrueThenFalseUntilIntervalElapses() {
        let clock = new_shared_clock();
        let mut timers = StpTimers::default();
        timers.hello = Duration::from_secs(2);
        let stp = Stp::new(BridgeId::new(1, mac(1)), timers, clock.clone(), true);

        assert!(stp.hello_due());
        assert!(!stp.hello_due());

        clock.lock().unwrap().advance(Duration::from_secs(2));
        assert!(stp.hello_due());
    }
}
