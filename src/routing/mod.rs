//! C8 — the routing table (RIB/FIB): exact-match plus longest-prefix-match
//! lookup, administrative-distance arbitration, and the hardware-sync hook
//! (§4.7).
//!
//! Dual-family exact-match plus prefix-length-bucketed LPM storage, the way
//! a forwarding ASIC's route table is organized.

pub mod ospf;
pub mod rip;

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::common::address::{prefix_match, v4_prefix_mask, v6_prefix_mask};
use crate::common::{AddressFamily, IpAddress, PortId, SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteSource {
    Static,
    Connected,
    Rip,
    Ospf,
    /// `external` is true for eBGP, false for iBGP — the two carry different
    /// administrative distances even though both originate from the same
    /// protocol adapter.
    Bgp { external: bool },
}

impl RouteSource {
    /// Default administrative distance for routes from this source, lower
    /// wins (§7 glossary "Administrative distance"). Static/connected mirror
    /// common router defaults; RIP/OSPF/BGP match their textbook distances.
    pub fn default_distance(self) -> u8 {
        match self {
            RouteSource::Connected => 0,
            RouteSource::Static => 1,
            RouteSource::Bgp { external: true } => 20,
            RouteSource::Ospf => 110,
            RouteSource::Rip => 120,
            RouteSource::Bgp { external: false } => 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteEntry {
    pub prefix: IpAddress,
    pub prefix_len: u8,
    pub next_hop: IpAddress,
    pub egress_port: PortId,
    pub source: RouteSource,
    pub admin_distance: u8,
    pub metric: u32,
}

impl RouteEntry {
    fn key(&self) -> (AddressFamily, Vec<u8>, u8) {
        (self.prefix.family(), self.prefix.as_bytes().to_vec(), self.prefix_len)
    }

    /// Lower (admin_distance, metric) is strictly better (§4.7 "Add").
    fn strictly_better_than(&self, other: &RouteEntry) -> bool {
        (self.admin_distance, self.metric) < (other.admin_distance, other.metric)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouteStats {
    pub total: usize,
    pub max: usize,
    pub v4_count: usize,
    pub v6_count: usize,
    pub hardware_sync_enabled: bool,
}

type ExactKey = (AddressFamily, Vec<u8>, u8);

struct Inner {
    exact: HashMap<ExactKey, RouteEntry>,
    buckets_v4: Vec<Vec<RouteEntry>>,
    buckets_v6: Vec<Vec<RouteEntry>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            buckets_v4: vec![Vec::new(); 33],
            buckets_v6: vec![Vec::new(); 129],
        }
    }

    fn bucket_mut(&mut self, family: AddressFamily, prefix_len: u8) -> &mut Vec<RouteEntry> {
        match family {
            AddressFamily::V4 => &mut self.buckets_v4[prefix_len as usize],
            AddressFamily::V6 => &mut self.buckets_v6[prefix_len as usize],
        }
    }

    fn bucket(&self, family: AddressFamily, prefix_len: u8) -> &Vec<RouteEntry> {
        match family {
            AddressFamily::V4 => &self.buckets_v4[prefix_len as usize],
            AddressFamily::V6 => &self.buckets_v6[prefix_len as usize],
        }
    }
}

type SyncHook = Box<dyn FnMut(&RouteEntry, bool) + Send>;

/// The route table. Mutations take the single writer lock; `lookup` takes
/// only a read lock, so concurrent lookups never block each other (§5).
pub struct RoutingTable {
    max_routes: usize,
    inner: RwLock<Inner>,
    hook: Mutex<Option<SyncHook>>,
}

impl RoutingTable {
    pub fn new(max_routes: usize) -> Self {
        Self {
            max_routes,
            inner: RwLock::new(Inner::new()),
            hook: Mutex::new(None),
        }
    }

    pub fn set_hardware_sync_hook(&self, hook: SyncHook) {
        *self.hook.lock().unwrap() = Some(hook);
    }

    fn notify(&self, entry: &RouteEntry, added: bool) {
        if let Some(hook) = self.hook.lock().unwrap().as_mut() {
            hook(entry, added);
        }
    }

    /// Validates the prefix length, then replaces an existing entry at the
    /// same key iff `entry` is strictly better by (distance, metric);
    /// otherwise inserts fresh, failing with "table full" if the pool is
    /// exhausted (§4.7 "Add").
    pub fn add(&self, entry: RouteEntry) -> SimResult<()> {
        if entry.prefix_len > entry.prefix.max_prefix_len() {
            return Err(SimError::InvalidParam(format!(
                "prefix length {} exceeds {}",
                entry.prefix_len,
                entry.prefix.max_prefix_len()
            )));
        }

        let key = entry.key();
        let mut inner = self.inner.write().unwrap();

        if let Some(existing) = inner.exact.get(&key).copied() {
            if !entry.strictly_better_than(&existing) {
                return Err(SimError::AlreadyExists);
            }
            let bucket = inner.bucket_mut(entry.prefix.family(), entry.prefix_len);
            if let Some(slot) = bucket.iter_mut().find(|e| e.key() == key) {
                *slot = entry;
            }
            inner.exact.insert(key, entry);
            drop(inner);
            self.notify(&entry, true);
            return Ok(());
        }

        if inner.exact.len() >= self.max_routes {
            return Err(SimError::ResourceExhausted("table full".into()));
        }

        inner.bucket_mut(entry.prefix.family(), entry.prefix_len).push(entry);
        inner.exact.insert(key, entry);
        drop(inner);
        self.notify(&entry, true);
        Ok(())
    }

    /// Removes the entry at the exact (family, prefix, length) key.
    pub fn remove(&self, family: AddressFamily, prefix: IpAddress, prefix_len: u8) -> SimResult<RouteEntry> {
        let key = (family, prefix.as_bytes().to_vec(), prefix_len);
        let mut inner = self.inner.write().unwrap();
        let entry = inner.exact.remove(&key).ok_or(SimError::NotFound)?;

        let bucket = inner.bucket_mut(family, prefix_len);
        bucket.retain(|e| e.key() != key);
        drop(inner);

        self.notify(&entry, false);
        Ok(entry)
    }

    /// Walks the LPM index from the longest prefix length down to 0 and
    /// returns the first (and, by the uniqueness invariant, only) match at
    /// the longest matching length; ties broken by (distance, metric)
    /// (§4.7 "Lookup").
    pub fn lookup(&self, addr: IpAddress) -> SimResult<RouteEntry> {
        let inner = self.inner.read().unwrap();
        let family = addr.family();
        let max_len = addr.max_prefix_len();

        for len in (0..=max_len).rev() {
            let bucket = inner.bucket(family, len);
            if bucket.is_empty() {
                continue;
            }
            let mut best: Option<RouteEntry> = None;
            for entry in bucket {
                if prefix_match(addr.as_bytes(), entry.prefix.as_bytes(), len) {
                    best = match best {
                        None => Some(*entry),
                        Some(current) if entry.strictly_better_than(&current) => Some(*entry),
                        Some(current) => Some(current),
                    };
                }
            }
            if let Some(entry) = best {
                return Ok(entry);
            }
        }

        Err(SimError::NotFound)
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap();
        let removed: Vec<RouteEntry> = inner.exact.values().copied().collect();
        *inner = Inner::new();
        drop(inner);
        for entry in &removed {
            self.notify(entry, false);
        }
    }

    pub fn stats(&self) -> RouteStats {
        let inner = self.inner.read().unwrap();
        let v4_count: usize = inner.buckets_v4.iter().map(|b| b.len()).sum();
        let v6_count: usize = inner.buckets_v6.iter().map(|b| b.len()).sum();
        RouteStats {
            total: inner.exact.len(),
            max: self.max_routes,
            v4_count,
            v6_count,
            hardware_sync_enabled: self.hook.lock().unwrap().is_some(),
        }
    }

    /// Returns every installed route, for adapters that need to scan for
    /// redistribution or neighbor-timeout withdrawal (§4.8).
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.inner.read().unwrap().exact.values().copied().collect()
    }
}

/// Network/mask pair for a v4 prefix, a small convenience for call sites
/// that think in dotted-quad masks rather than prefix lengths.
pub fn v4_mask_for(prefix_len: u8) -> [u8; 4] {
    v4_prefix_mask(prefix_len)
}

pub fn v6_mask_for(prefix_len: u8) -> [u8; 16] {
    v6_prefix_mask(prefix_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PortId;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddress {
        IpAddress::V4([a, b, c, d])
    }

    fn route(prefix: IpAddress, len: u8, distance: u8, metric: u32) -> RouteEntry {
        RouteEntry {
            prefix,
            prefix_len: len,
            next_hop: v4(0, 0, 0, 0),
            egress_port: PortId::from(0u32),
            source: RouteSource::Static,
            admin_distance: distance,
            metric,
        }
    }

    #[test]
    fn Lookup_TieBreakByLength_Scenario1() {
        let table = RoutingTable::new(64);
        table.add(route(v4(192, 168, 0, 0), 16, 1, 1)).unwrap();
        table.add(route(v4(192, 168, 1, 0), 24, 1, 1)).unwrap();
        table.add(route(v4(192, 168, 1, 128), 25, 1, 1)).unwrap();

        assert_eq!(table.lookup(v4(192, 168, 1, 130)).unwrap().prefix_len, 25);
        assert_eq!(table.lookup(v4(192, 168, 1, 10)).unwrap().prefix_len, 24);
        assert_eq!(table.lookup(v4(192, 168, 2, 1)).unwrap().prefix_len, 16);
        assert_eq!(table.lookup(v4(10, 0, 0, 1)), Err(SimError::NotFound));
    }

    #[test]
    fn Add_ConflictingKey_BetterDistanceReplaces_Scenario6() {
        let table = RoutingTable::new(64);
        let mut rip_route = route(v4(10, 0, 0, 0), 8, 120, 3);
        rip_route.source = RouteSource::Rip;
        table.add(rip_route).unwrap();

        let static_route = route(v4(10, 0, 0, 0), 8, 1, 1);
        table.add(static_route).unwrap();

        let looked_up = table.lookup(v4(10, 1, 2, 3)).unwrap();
        assert_eq!(looked_up.source, RouteSource::Static);

        table.remove(AddressFamily::V4, v4(10, 0, 0, 0), 8).unwrap();
        table.add(rip_route).unwrap();
        let looked_up = table.lookup(v4(10, 1, 2, 3)).unwrap();
        assert_eq!(looked_up.source, RouteSource::Rip);
    }

    #[test]
    fn Add_WorseDistance_IsRejected() {
        let table = RoutingTable::new(64);
        table.add(route(v4(10, 0, 0, 0), 8, 1, 1)).unwrap();
        let worse = route(v4(10, 0, 0, 0), 8, 120, 3);
        assert_eq!(table.add(worse), Err(SimError::AlreadyExists));
    }

    #[test]
    fn Add_TableFull_ReturnsResourceExhausted() {
        let table = RoutingTable::new(1);
        table.add(route(v4(10, 0, 0, 0), 8, 1, 1)).unwrap();
        let err = table.add(route(v4(11, 0, 0, 0), 8, 1, 1)).unwrap_err();
        assert_eq!(err, SimError::ResourceExhausted("table full".into()));
    }

    #[test]
    fn DefaultDistance_Bgp_ExternalLowerThanInternal() {
        assert_eq!(RouteSource::Bgp { external: true }.default_distance(), 20);
        assert_eq!(RouteSource::Bgp { external: false }.default_distance(), 200);
    }

    #[test]
    fn Remove_UnknownKey_ReturnsNotFound() {
        let table = RoutingTable::new(64);
        assert_eq!(table.remove(AddressFamily::V4, v4(1, 2, 3, 4), 32), Err(SimError::NotFound));
    }

    #[test]
    fn HardwareSyncHook_FiresOnAddAndRemove() {
        let table = RoutingTable::new(64);
        let events = std::sync::Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        table.set_hardware_sync_hook(Box::new(move |_entry, added| {
            events_clone.lock().unwrap().push(added);
        }));

        table.add(route(v4(10, 0, 0, 0), 8, 1, 1)).unwrap();
        table.remove(AddressFamily::V4, v4(10, 0, 0, 0), 8).unwrap();

        assert_eq!(*events.lock().unwrap(), vec![true, false]);
    }
}
