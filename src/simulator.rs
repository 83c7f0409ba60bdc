//! The top-level simulator handle: wires C1-C9 together and owns the
//! init/start/stop/shutdown lifecycle (§6 "Process surface"). Every
//! component that would otherwise be a module-level singleton is instead
//! an explicit owned value held here and handed out as `Arc<_>` clones to
//! whatever needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::common::address::MAC_BPDU;
use crate::common::{new_shared_clock, IpAddress, MacAddress, PortId, SharedClock, SimError, SimResult, Tickable};
use crate::config::SimulatorConfig;
use crate::hal::HardwareSim;
use crate::l2::{ForwardDecision, L2Forwarder};
use crate::packet::ipv4::{FragmentReassembler, Ipv4Header};
use crate::packet::{Direction, PacketAllocator, PacketBuffer};
use crate::pipeline::{ProcessorChain, ProcessorResult};
use crate::port::{PortKind, PortTable};
use crate::routing::rip::RipAdapter;
use crate::routing::ospf::OspfAdapter;
use crate::routing::RoutingTable;
use crate::stp::{BridgeId, Bpdu, Stp};

/// Default MAC aging time for the L2 forwarding table.
const DEFAULT_MAC_AGING: Duration = Duration::from_secs(300);

pub struct Simulator {
    pub config: SimulatorConfig,
    pub clock: SharedClock,
    pub ports: Arc<PortTable>,
    pub chain: Arc<ProcessorChain>,
    pub l2: Arc<L2Forwarder>,
    pub stp: Arc<Stp>,
    pub routing: Arc<RoutingTable>,
    pub rip: Arc<RipAdapter>,
    pub ospf: Arc<OspfAdapter>,
    pub hal: Arc<HardwareSim>,
    allocator: Mutex<PacketAllocator>,
    bridge_mac: MacAddress,
    initialized: AtomicBool,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, bridge_mac: MacAddress, bridge_priority: u16, stp_enabled: bool) -> Self {
        let clock = new_shared_clock();
        let ports = Arc::new(PortTable::new(config.limits.max_ports));
        let chain = Arc::new(ProcessorChain::new(config.limits.max_processors));
        let l2 = Arc::new(L2Forwarder::new(clock.clone(), DEFAULT_MAC_AGING, config.limits.max_mac_entries));
        let stp = Arc::new(Stp::new(BridgeId::new(bridge_priority, bridge_mac), config.stp_timers, clock.clone(), stp_enabled));
        let routing = Arc::new(RoutingTable::new(config.limits.max_routes));
        let rip = Arc::new(RipAdapter::new(routing.clone(), clock.clone(), config.routing_protocols.rip_neighbor_timeout));
        let ospf = Arc::new(OspfAdapter::new(routing.clone(), clock.clone(), config.routing_protocols.ospf_neighbor_timeout));
        let hal = Arc::new(HardwareSim::new(config.hardware, clock.clone(), ports.clone()));

        let mut allocator = PacketAllocator::new();
        let _ = allocator.init();

        Self {
            config,
            clock,
            ports,
            chain,
            l2,
            stp,
            routing,
            rip,
            ospf,
            hal,
            allocator: Mutex::new(allocator),
            bridge_mac,
            initialized: AtomicBool::new(false),
        }
    }

    /// Registers a new port, in both the port table and STP (§4.2, §4.6).
    pub fn provision_port(&self, kind: PortKind) -> SimResult<PortId> {
        let port = self.ports.add_port(kind)?;
        self.stp.add_port(port.id());
        let _ = self.stp.set_link_up(port.id(), port.is_up());
        Ok(port.id())
    }

    /// Installs the default processor chain (STP BPDU ingestion, L3 ingress,
    /// L2 forwarding, in that priority order) and marks the simulator ready
    /// (§4.4's data-flow summary: "Processors include L2 learning/
    /// forwarding (C6), STP BPDU ingestion (C7), and an L3 ingress that
    /// consults the routing table (C8)").
    pub fn init(&self) -> SimResult<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(SimError::AlreadyInitialized);
        }

        let stp = self.stp.clone();
        self.chain.register(
            0,
            Box::new(move |buf: &mut PacketBuffer| {
                if buf.metadata.destination_mac != MAC_BPDU {
                    return ProcessorResult::Forward;
                }
                match Bpdu::from_bytes(buf.bytes()) {
                    Ok(bpdu) => {
                        let _ = stp.receive_bpdu(buf.metadata.ingress_port, bpdu);
                        ProcessorResult::Consume
                    }
                    Err(_) => ProcessorResult::Drop,
                }
            }),
        )?;

        let routing = self.routing.clone();
        let bridge_mac = self.bridge_mac;
        let reassembler = Arc::new(FragmentReassembler::new());
        self.chain.register(
            10,
            Box::new(move |buf: &mut PacketBuffer| {
                if buf.metadata.destination_mac != bridge_mac || buf.metadata.ether_type != 0x0800 {
                    return ProcessorResult::Forward;
                }
                if buf.size() < 14 + 20 {
                    return ProcessorResult::Drop;
                }
                let header = match Ipv4Header::from_bytes(&buf.bytes()[14..]) {
                    Ok(h) => h,
                    Err(_) => return ProcessorResult::Drop,
                };
                if header.ttl == 0 {
                    return ProcessorResult::Drop;
                }

                let payload = &buf.bytes()[14 + 20..];
                match reassembler.accept(&header, payload) {
                    Ok(Some(_complete)) => match routing.lookup(IpAddress::V4(header.destination)) {
                        Ok(route) => {
                            buf.metadata.egress_port = route.egress_port;
                            ProcessorResult::Forward
                        }
                        Err(_) => ProcessorResult::Drop,
                    },
                    Ok(None) => ProcessorResult::Consume,
                    Err(_) => ProcessorResult::Drop,
                }
            }),
        )?;

        let ports = self.ports.clone();
        let l2 = self.l2.clone();
        let stp = self.stp.clone();
        self.chain.register(
            20,
            Box::new(move |buf: &mut PacketBuffer| {
                if buf.metadata.egress_port.is_valid() {
                    return ProcessorResult::Forward;
                }

                match l2.forward(
                    &ports,
                    &stp,
                    buf.metadata.source_mac,
                    buf.metadata.destination_mac,
                    buf.metadata.ingress_port,
                    buf.metadata.vlan_id,
                ) {
                    Ok(ForwardDecision::Unicast(port)) => {
                        buf.metadata.egress_port = port;
                        ProcessorResult::Forward
                    }
                    Ok(ForwardDecision::Flood(targets)) => {
                        for target in targets {
                            if let Ok(port) = ports.get(target) {
                                let allowed = stp.can_forward(target);
                                if allowed {
                                    let _ = port.transmit_frame(buf.bytes().to_vec());
                                } else {
                                    port.record_blocked_egress();
                                }
                            }
                        }
                        ProcessorResult::Consume
                    }
                    Ok(ForwardDecision::Drop) | Err(_) => ProcessorResult::Drop,
                }
            }),
        )?;

        Ok(())
    }

    pub fn start(&self) {
        self.hal.start();
    }

    pub fn stop(&self) {
        self.hal.stop();
    }

    pub fn shutdown(&self) {
        self.stop();
        self.chain.shutdown();
        self.initialized.store(false, Ordering::SeqCst);
    }

    /// Runs one simulation tick: the hardware tick (traffic synthesis, link
    /// flap, cable movement), oper-state sync into STP, STP's own timer
    /// work, periodic hello/TCN emission, L2 MAC aging, and routing-protocol
    /// neighbor-timeout checks (§5 "STP runs its timer work on the tick").
    pub fn tick(&self) {
        self.hal.tick_now();

        for port in self.ports.enumerate() {
            let _ = self.stp.set_link_up(port.id(), port.is_up());
        }

        self.stp.tick_now();
        self.run_stp_periodic();

        self.l2.table.age_out();
        self.rip.check_neighbor_timeouts();
        self.ospf.check_neighbor_timeouts();
    }

    /// Emits a hello BPDU on every designated port once per hello interval,
    /// and relays a queued topology-change notification out the root port
    /// (§4.6 "Timers", "Topology-change notifications propagate toward the
    /// root").
    fn run_stp_periodic(&self) {
        if self.stp.hello_due() {
            for port in self.ports.enumerate() {
                if self.stp.should_emit_hello(port.id()) {
                    let bpdu = self.stp.build_hello(port.id());
                    self.transmit_bpdu(bpdu, port.id());
                }
            }
        }

        if let Some(port) = self.stp.take_pending_tcn_relay() {
            self.transmit_bpdu(Bpdu::Tcn, port);
        }
    }

    fn transmit_bpdu(&self, bpdu: Bpdu, port: PortId) {
        let Ok(port) = self.ports.get(port) else {
            return;
        };
        let bytes = bpdu.to_bytes(self.bridge_mac);
        let mut allocator = self.allocator.lock().unwrap();
        if let Ok(mut buf) = allocator.alloc(bytes.len()) {
            buf.bytes_mut()[..bytes.len()].copy_from_slice(&bytes);
            drop(allocator);
            let _ = self.chain.transmit(buf, &port, true);
        }
    }

    /// External injection entry point: stamps ingress metadata and runs the
    /// chain directly, bypassing the tick (§4.3 "Injection entry point").
    pub fn receive(&self, mut buf: PacketBuffer, ingress: PortId) -> SimResult<ProcessorResult> {
        let port = self.ports.get(ingress)?;
        buf.metadata.direction = Direction::Rx;
        buf.metadata.ingress_port = ingress;
        buf.metadata.timestamp = self.clock.lock().unwrap().now();
        if buf.size() >= 14 {
            let bytes = buf.bytes();
            buf.metadata.destination_mac = bytes[0..6].try_into().unwrap();
            buf.metadata.source_mac = bytes[6..12].try_into().unwrap();
            buf.metadata.ether_type = u16::from_be_bytes([bytes[12], bytes[13]]);
        }

        let result = self.chain.receive(&mut buf, &port, &self.clock)?;
        if result == ProcessorResult::Forward && buf.metadata.egress_port.is_valid() {
            if let Ok(egress) = self.ports.get(buf.metadata.egress_port) {
                let allowed = self.stp.can_forward(buf.metadata.egress_port);
                let _ = self.chain.transmit(buf, &egress, allowed);
            }
        }
        Ok(result)
    }
}
