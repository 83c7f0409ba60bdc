//! OSPF adapter skeleton: the same routing-table contract as RIP (§4.8
//! "OSPF interaction with the routing table is identical at this layer").
//!
//! Deliberately narrow: only the RIB-facing surface (install/withdraw a
//! route learned from SPF, expire a neighbor's routes) is implemented. The
//! link-state database and the SPF computation itself are out of scope —
//! exactly the boundary the source material draws around OSPF.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{IpAddress, PortId, SharedClock, SimResult, Tickable};
use crate::routing::{RouteEntry, RouteSource, RoutingTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OspfNeighborId(pub PortId, pub IpAddress);

struct NeighborState {
    last_heard: Duration,
}

/// An OSPF process bound to a routing table. Routes are handed to it
/// already computed (by whatever SPF implementation a caller plugs in); this
/// type only owns the RIB install/withdraw/expire contract.
pub struct OspfAdapter {
    table: Arc<RoutingTable>,
    clock: SharedClock,
    neighbor_timeout: Duration,
    neighbors: Mutex<HashMap<OspfNeighborId, NeighborState>>,
}

impl OspfAdapter {
    pub fn new(table: Arc<RoutingTable>, clock: SharedClock, neighbor_timeout: Duration) -> Self {
        Self {
            table,
            clock,
            neighbor_timeout,
            neighbors: Mutex::new(HashMap::new()),
        }
    }

    /// Installs a route an external SPF computation decided on, via the
    /// same routing-table contract RIP uses.
    pub fn install_route(
        &self,
        neighbor: OspfNeighborId,
        prefix: IpAddress,
        prefix_len: u8,
        cost: u32,
        egress_port: PortId,
    ) -> SimResult<()> {
        self.neighbors.lock().unwrap().insert(
            neighbor,
            NeighborState {
                last_heard: self.clock.lock().unwrap().now(),
            },
        );

        self.table.add(RouteEntry {
            prefix,
            prefix_len,
            next_hop: neighbor.1,
            egress_port,
            source: RouteSource::Ospf,
            admin_distance: RouteSource::Ospf.default_distance(),
            metric: cost,
        })
    }

    pub fn withdraw_route(&self, prefix: IpAddress, prefix_len: u8) -> SimResult<RouteEntry> {
        self.table.remove(prefix.family(), prefix, prefix_len)
    }

    /// Removes every OSPF route reachable through `neighbor` (mirrors RIP's
    /// neighbor-timeout withdrawal, §4.8).
    pub fn expire_neighbor(&self, neighbor: OspfNeighborId) {
        self.neighbors.lock().unwrap().remove(&neighbor);
        for entry in self.table.entries() {
            if entry.source == RouteSource::Ospf && entry.next_hop == neighbor.1 {
                let _ = self.table.remove(entry.prefix.family(), entry.prefix, entry.prefix_len);
            }
        }
    }

    pub fn check_neighbor_timeouts(&self) {
        let now = self.clock.lock().unwrap().now();
        let stale: Vec<OspfNeighborId> = self
            .neighbors
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, state)| now.saturating_sub(state.last_heard) >= self.neighbor_timeout)
            .map(|(id, _)| *id)
            .collect();

        for neighbor in stale {
            self.expire_neighbor(neighbor);
        }
    }
}

impl Tickable for OspfAdapter {
    fn tick(&mut self) {
        self.check_neighbor_timeouts();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::new_shared_clock;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddress {
        IpAddress::V4([a, b, c, d])
    }

    #[test]
    fn InstallRoute_UsesOspfAdminDistance() {
        let table = Arc::new(RoutingTable::new(64));
        let clock = new_shared_clock();
        let ospf = OspfAdapter::new(table.clone(), clock, Duration::from_secs(40));

        let neighbor = OspfNeighborId(PortId::from(0u32), v4(10, 10, 10, 1));
        ospf.install_route(neighbor, v4(172, 16, 0, 0), 16, 10, PortId::from(0u32)).unwrap();

        let entry = table.lookup(v4(172, 16, 5, 5)).unwrap();
        assert_eq!(entry.source, RouteSource::Ospf);
        assert_eq!(entry.admin_distance, 110);
    }

    #[test]
    fn WithdrawRoute_RemovesInstalledEntry() {
        let table = Arc::new(RoutingTable::new(64));
        let clock = new_shared_clock();
        let ospf = OspfAdapter::new(table.clone(), clock, Duration::from_secs(40));
        let neighbor = OspfNeighborId(PortId::from(0u32), v4(10, 10, 10, 1));

        ospf.install_route(neighbor, v4(172, 16, 0, 0), 16, 10, PortId::from(0u32)).unwrap();
        ospf.withdraw_route(v4(172, 16, 0, 0), 16).unwrap();

        assert_eq!(table.lookup(v4(172, 16, 5, 5)), Err(crate::common::SimError::NotFound));
    }
}
