//! RIP adapter: installs/withdraws routes through the routing-table API and
//! drives neighbor timers (§4.8). Speaks only to the generic `RoutingTable`
//! contract rather than mutating a router-private table directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::{IpAddress, PortId, SharedClock, SimError, SimResult, Tickable};
use crate::routing::{RouteEntry, RouteSource, RoutingTable};

/// RIP metric 16 means infinity/unreachable (§4.8).
pub const RIP_INFINITY: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NeighborId(pub PortId, pub IpAddress);

struct NeighborState {
    last_heard: Duration,
}

/// One RIP process, bound to a routing table it installs/withdraws into.
pub struct RipAdapter {
    table: Arc<RoutingTable>,
    clock: SharedClock,
    neighbor_timeout: Duration,
    neighbors: Mutex<HashMap<NeighborId, NeighborState>>,
}

impl RipAdapter {
    pub fn new(table: Arc<RoutingTable>, clock: SharedClock, neighbor_timeout: Duration) -> Self {
        Self {
            table,
            clock,
            neighbor_timeout,
            neighbors: Mutex::new(HashMap::new()),
        }
    }

    /// Validates a RIP metric: 1..=15 are reachable, 16 is infinity and
    /// never gets installed as a forwarding route (§4.8).
    fn validated_metric(metric: u8) -> SimResult<u8> {
        if metric == 0 || metric > RIP_INFINITY {
            return Err(SimError::InvalidParam(format!("rip metric {} out of range 1..=16", metric)));
        }
        Ok(metric)
    }

    /// Installs (or withdraws, if `metric == 16`) a route learned from
    /// `neighbor` via RIP.
    pub fn learn_route(
        &self,
        neighbor: NeighborId,
        prefix: IpAddress,
        prefix_len: u8,
        metric: u8,
        egress_port: PortId,
    ) -> SimResult<()> {
        let metric = Self::validated_metric(metric)?;

        self.neighbors.lock().unwrap().insert(
            neighbor,
            NeighborState {
                last_heard: self.clock.lock().unwrap().now(),
            },
        );

        if metric == RIP_INFINITY {
            let _ = self.table.remove(prefix.family(), prefix, prefix_len);
            return Ok(());
        }

        self.table.add(RouteEntry {
            prefix,
            prefix_len,
            next_hop: neighbor.1,
            egress_port,
            source: RouteSource::Rip,
            admin_distance: RouteSource::Rip.default_distance(),
            metric: metric as u32,
        })
    }

    /// Removes every route with `source == Rip` and a next hop through
    /// `neighbor` (§4.8 "timer expiry on a neighbor triggers removal").
    pub fn expire_neighbor(&self, neighbor: NeighborId) {
        self.neighbors.lock().unwrap().remove(&neighbor);

        for entry in self.table.entries() {
            if entry.source == RouteSource::Rip && entry.next_hop == neighbor.1 {
                let _ = self.table.remove(entry.prefix.family(), entry.prefix, entry.prefix_len);
            }
        }
    }

    /// Checks every known neighbor against the timeout and expires the
    /// stale ones. Intended to be called once per tick (§4.8 "drive its own
    /// neighbor timers").
    pub fn check_neighbor_timeouts(&self) {
        let now = self.clock.lock().unwrap().now();
        let stale: Vec<NeighborId> = self
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

impl Tickable for RipAdapter {
    fn tick(&mut self) {
        self.check_neighbor_timeouts();
    }
}
