//! C6 — L2 forwarding: source-MAC learning with aging, destination lookup,
//! VLAN-scoped flooding, and the STP forwarding gate (§4.5).
//!
//! Learn-then-lookup-or-flood, as a standalone table that composes with a
//! separately owned `Stp` (C7) and `PortTable` (C3) rather than being a
//! method on either.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::common::{is_mac_multicast_or_broadcast, MacAddress, PortId, SharedClock, SimError, SimResult};
use crate::port::PortTable;
use crate::stp::Stp;

#[derive(Debug, Clone, Copy)]
struct MacEntry {
    port: PortId,
    last_seen: Duration,
}

/// The forwarding (MAC learning) table, keyed by (VLAN, MAC) so the same
/// address can live on different ports in different VLANs (§4.5, §6).
pub struct ForwardingTable {
    clock: SharedClock,
    aging_time: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<(u16, MacAddress), MacEntry>>,
}

impl ForwardingTable {
    pub fn new(clock: SharedClock, aging_time: Duration, max_entries: usize) -> Self {
        Self {
            clock,
            aging_time,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Learns or refreshes a (vlan, mac) -> port binding. Source addresses
    /// that are multicast/broadcast are never learned — a multicast source
    /// address is malformed and would poison the table.
    pub fn learn(&self, vlan: u16, mac: MacAddress, port: PortId) -> SimResult<()> {
        if is_mac_multicast_or_broadcast(mac) {
            return Ok(());
        }

        let now = self.clock.lock().unwrap().now();
        let mut entries = self.entries.lock().unwrap();
        let key = (vlan, mac);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            return Err(SimError::ResourceExhausted("mac table full".into()));
        }

        entries.insert(key, MacEntry { port, last_seen: now });
        Ok(())
    }

    pub fn lookup(&self, vlan: u16, mac: MacAddress) -> Option<PortId> {
        self.entries.lock().unwrap().get(&(vlan, mac)).map(|e| e.port)
    }

    /// Removes entries untouched for longer than the configured aging time.
    pub fn age_out(&self) {
        let now = self.clock.lock().unwrap().now();
        let aging_time = self.aging_time;
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| now.saturating_sub(entry.last_seen) < aging_time);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

/// The decision L2 makes for an ingress frame: send on one port, or flood
/// to several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardDecision {
    Unicast(PortId),
    Flood(Vec<PortId>),
    Drop,
}

/// Ties the forwarding table, the port substrate, and STP together into the
/// single operation C5 calls on ingress (§4.5).
pub struct L2Forwarder {
    pub table: ForwardingTable,
}

impl L2Forwarder {
    pub fn new(clock: SharedClock, aging_time: Duration, max_entries: usize) -> Self {
        Self {
            table: ForwardingTable::new(clock, aging_time, max_entries),
        }
    }

    /// Decides where `(source_mac, destination_mac)` arriving on `ingress`
    /// should go. `tagged_vlan` is `Some(vid)` for a tagged frame; `None`
    /// means untagged, in which case the ingress port's PVID is used (§4.5
    /// "VLAN semantics follow 802.1Q").
    pub fn forward(
        &self,
        ports: &PortTable,
        stp: &Stp,
        source_mac: MacAddress,
        destination_mac: MacAddress,
        ingress: PortId,
        tagged_vlan: Option<u16>,
    ) -> SimResult<ForwardDecision> {
        let ingress_port = ports.get(ingress)?;
        let vlan = tagged_vlan.unwrap_or_else(|| ingress_port.config().pvid);

        if stp.can_learn(ingress) {
            self.table.learn(vlan, source_mac, ingress)?;
        }

        if !stp.can_forward(ingress) {
            return Ok(ForwardDecision::Drop);
        }

        if !is_mac_multicast_or_broadcast(destination_mac) {
            if let Some(egress) = self.table.lookup(vlan, destination_mac) {
                if egress != ingress {
                    return Ok(ForwardDecision::Unicast(egress));
                }
                return Ok(ForwardDecision::Drop);
            }
        }

        let flood_set: Vec<PortId> = ports
            .enumerate()
            .iter()
            .filter(|p| p.id() != ingress && p.is_up() && p.config().pvid == vlan && stp.can_forward(p.id()))
            .map(|p| p.id())
            .collect();

        if flood_set.is_empty() {
            Ok(ForwardDecision::Drop)
        } else {
            Ok(ForwardDecision::Flood(flood_set))
        }
    }
}
