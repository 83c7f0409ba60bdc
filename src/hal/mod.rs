//! C4 — hardware-simulation tick: traffic synthesis, link flap, statistics
//! time, and the injection entry point (§4.3).
//!
//! Generalizes a fixed two-port cable-tick loop to an n-port `PortTable`,
//! and wall-clock timing to the injected `SharedClock`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::Rng;

use crate::common::address::port_mac;
use crate::common::{PortId, SharedClock, SimError, SimResult, Tickable};
use crate::config::HardwareSimConfig;
use crate::packet::{Direction, PacketAllocator, PacketBuffer};
use crate::port::{OperState, PortTable};

/// Invoked for every packet entering the processor chain, whether
/// synthesized by the tick or injected externally (§4.3's "installed packet
/// handler"). Installed by whatever owns the processor chain (C5).
pub type PacketHandler = Box<dyn FnMut(PacketBuffer) + Send>;

/// Invoked whenever a port's operational state changes due to simulated
/// link flap (§4.3 step iii).
pub type LinkEventHandler = Box<dyn FnMut(PortId, OperState) + Send>;

struct Handlers {
    packet: Option<PacketHandler>,
    link_event: Option<LinkEventHandler>,
}

/// The background tick loop's state. `tick()` is meant to be called
/// repeatedly by an owning scheduler (real or, in tests, by hand) rather
/// than spawning its own OS thread, keeping synthesized traffic
/// deterministic and the loop itself trivially single-stepped in tests.
pub struct HardwareSim {
    config: Mutex<HardwareSimConfig>,
    clock: SharedClock,
    ports: Arc<PortTable>,
    allocator: Mutex<PacketAllocator>,
    running: AtomicBool,
    traffic_rate: Mutex<f64>,
    traffic_remainder: Mutex<f64>,
    traffic_enabled: Mutex<HashSet<PortId>>,
    handlers: Mutex<Handlers>,
}

impl HardwareSim {
    pub fn new(config: HardwareSimConfig, clock: SharedClock, ports: Arc<PortTable>) -> Self {
        let mut allocator = PacketAllocator::new();
        let _ = allocator.init();
        Self {
            config: Mutex::new(config),
            clock,
            ports,
            allocator: Mutex::new(allocator),
            running: AtomicBool::new(false),
            traffic_rate: Mutex::new(0.0),
            traffic_remainder: Mutex::new(0.0),
            traffic_enabled: Mutex::new(HashSet::new()),
            handlers: Mutex::new(Handlers {
                packet: None,
                link_event: None,
            }),
        }
    }

    pub fn set_packet_handler(&self, handler: PacketHandler) {
        self.handlers.lock().unwrap().packet = Some(handler);
    }

    pub fn set_link_event_handler(&self, handler: LinkEventHandler) {
        self.handlers.lock().unwrap().link_event = Some(handler);
    }

    /// Packets per second of synthesized traffic; 0 disables synthesis.
    pub fn set_traffic_rate(&self, rate: f64) {
        *self.traffic_rate.lock().unwrap() = rate.max(0.0);
    }

    pub fn enable_traffic_generation(&self, port: PortId, enabled: bool) {
        let mut set = self.traffic_enabled.lock().unwrap();
        if enabled {
            set.insert(port);
        } else {
            set.remove(&port);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// Clears the running flag. The loop exits after at most one more tick
    /// (§4.3 "Cancellation"); since this implementation has no background
    /// thread of its own, the caller's own tick loop simply stops calling
    /// `tick()` once this returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// An external caller presents a buffer and an ingress port; the tick
    /// path is bypassed entirely — ingress metadata is stamped and the
    /// buffer goes straight to the installed packet handler (§4.3
    /// "Injection entry point").
    pub fn inject(&self, mut buf: PacketBuffer, ingress: PortId) -> SimResult<()> {
        self.ports.get(ingress)?;

        buf.metadata.ingress_port = ingress;
        buf.metadata.direction = Direction::Rx;
        buf.metadata.timestamp = self.clock.lock().unwrap().now();

        self.dispatch(buf);
        Ok(())
    }

    fn dispatch(&self, buf: PacketBuffer) {
        let mut handlers = self.handlers.lock().unwrap();
        if let Some(handler) = handlers.packet.as_mut() {
            handler(buf);
        }
    }

    /// One synthesized frame: well-formed source/destination MACs derived
    /// from port id, EtherType 0x0800, random payload length in [64, 1518]
    /// total frame size (§4.3 step ii).
    fn synthesize_frame<R: Rng>(&self, rng: &mut R, src: PortId, dst: PortId) -> SimResult<PacketBuffer> {
        let total_len = rng.gen_range(crate::config::MIN_ETHERNET_FRAME..=crate::config::DEFAULT_MAX_ETHERNET_FRAME);

        let mut allocator = self.allocator.lock().unwrap();
        let mut buf = allocator.alloc(total_len)?;
        drop(allocator);

        {
            let bytes = buf.bytes_mut();
            bytes[0..6].copy_from_slice(&port_mac(dst.raw()));
            bytes[6..12].copy_from_slice(&port_mac(src.raw()));
            bytes[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
            for b in bytes[14..].iter_mut() {
                *b = rng.gen();
            }
        }

        buf.metadata.ingress_port = src;
        buf.metadata.direction = Direction::Rx;
        buf.metadata.source_mac = port_mac(src.raw());
        buf.metadata.destination_mac = port_mac(dst.raw());
        buf.metadata.ether_type = 0x0800;
        buf.metadata.timestamp = self.clock.lock().unwrap().now();

        Ok(buf)
    }

    fn synthesize_traffic(&self) {
        let rate = *self.traffic_rate.lock().unwrap();
        if rate <= 0.0 {
            return;
        }

        let tick_ms = self.config.lock().unwrap().tick_period.as_secs_f64() * 1000.0;
        let exact = rate * tick_ms / 1000.0;
        let mut whole = exact.trunc() as u64;
        let fraction = exact.fract();

        let mut rng = rand::thread_rng();

        if whole == 0 && fraction > 0.0 && rng.gen::<f64>() < fraction {
            whole = 1;
        }

        let eligible: Vec<PortId> = {
            let enabled = self.traffic_enabled.lock().unwrap();
            self.ports
                .enumerate()
                .iter()
                .filter(|p| p.is_up() && enabled.contains(&p.id()))
                .map(|p| p.id())
                .collect()
        };

        if eligible.len() < 2 {
            return;
        }

        for _ in 0..whole {
            let src = eligible[rng.gen_range(0..eligible.len())];
            let mut dst = eligible[rng.gen_range(0..eligible.len())];
            while dst == src {
                dst = eligible[rng.gen_range(0..eligible.len())];
            }

            match self.synthesize_frame(&mut rng, src, dst) {
                Ok(buf) => self.dispatch(buf),
                Err(err) => tracing::warn!(target: "HAL", %err, "failed to synthesize traffic"),
            }
        }
    }

    fn flap_links(&self) {
        let probability = self.config.lock().unwrap().link_flap_probability;
        if probability <= 0.0 {
            return;
        }

        let mut rng = rand::thread_rng();
        for port in self.ports.enumerate() {
            if rng.gen::<f64>() < probability {
                let new_state = port.toggle_link_carrier();
                let mut handlers = self.handlers.lock().unwrap();
                if let Some(handler) = handlers.link_event.as_mut() {
                    handler(port.id(), new_state);
                }
            }
        }
    }
}

impl HardwareSim {
    /// Performs one tick in order: advance simulated time, synthesize
    /// traffic, flap links, move cable traffic between connected ports
    /// (§4.3). A no-op once `stop()` has cleared the running flag.
    ///
    /// Takes `&self` rather than `&mut self` since every field is already
    /// interior-mutable; callers holding only an `Arc<HardwareSim>` (the
    /// top-level simulator handle, §9 Design Notes) can drive the tick
    /// without needing exclusive ownership.
    pub fn tick_now(&self) {
        if !self.is_running() {
            return;
        }

        let period = self.config.lock().unwrap().tick_period;
        self.clock.lock().unwrap().advance(period);

        self.synthesize_traffic();
        self.flap_links();
        self.ports.tick_cables();
    }
}

impl Tickable for HardwareSim {
    fn tick(&mut self) {
        self.tick_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::new_shared_clock;
    use crate::port::{PortConfig, PortKind};
    use std::sync::atomic::AtomicUsize;

    fn up_port(table: &mut PortTable) -> Arc<crate::port::Port> {
        let port = table.add_port(PortKind::Physical).unwrap();
        let mut cfg = PortConfig::default();
        cfg.admin_up = true;
        port.set_config(cfg).unwrap();
        port
    }

    #[test]
    fn Inject_UnknownPort_ReturnsInvalidPort() {
        let table = Arc::new(PortTable::new(4));
        let hal = HardwareSim::new(HardwareSimConfig::default(), new_shared_clock(), table);
        let mut allocator = PacketAllocator::new();
        allocator.init().unwrap();
        let buf = allocator.alloc(64).unwrap();

        let err = hal.inject(buf, PortId::from(0u32)).unwrap_err();
        assert_eq!(err, SimError::InvalidPort(PortId::from(0u32).to_string()));
    }

    #[test]
    fn Inject_StampsIngressAndInvokesHandler() {
        let mut table = PortTable::new(4);
        let p0 = up_port(&mut table);
        let table = Arc::new(table);
        let hal = HardwareSim::new(HardwareSimConfig::default(), new_shared_clock(), table);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        hal.set_packet_handler(Box::new(move |buf| {
            assert_eq!(buf.metadata.direction, Direction::Rx);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        }));

        let mut allocator = PacketAllocator::new();
        allocator.init().unwrap();
        let buf = allocator.alloc(64).unwrap();
        hal.inject(buf, p0.id()).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn Tick_StoppedSim_NeverAdvancesClock() {
        let table = Arc::new(PortTable::new(4));
        let clock = new_shared_clock();
        let mut hal = HardwareSim::new(HardwareSimConfig::default(), clock.clone(), table);

        hal.tick();
        assert_eq!(clock.lock().unwrap().now(), std::time::Duration::ZERO);
    }

    #[test]
    fn Tick_Running_AdvancesClockByTickPeriod() {
        let table = Arc::new(PortTable::new(4));
        let clock = new_shared_clock();
        let mut hal = HardwareSim::new(HardwareSimConfig::default(), clock.clone(), table);
        hal.start();

        hal.tick();
        assert_eq!(clock.lock().unwrap().now(), std::time::Duration::from_millis(100));
    }

    #[test]
    fn Tick_ZeroTrafficRate_SynthesizesNothing() {
        let mut table = PortTable::new(4);
        let p0 = up_port(&mut table);
        let p1 = up_port(&mut table);
        table.connect(p0.id(), p1.id()).unwrap();
        let table = Arc::new(table);

        let mut hal = HardwareSim::new(HardwareSimConfig::default(), new_shared_clock(), table);
        hal.start();

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        hal.set_packet_handler(Box::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..5 {
            hal.tick();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
