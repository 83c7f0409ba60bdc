//! C5 — packet processor chain: priority-ordered processors, recirculation,
//! and the `inject`/`receive`/`transmit` entry points (§4.4).
//!
//! Handle-based register/deregister, a snapshot taken under a brief lock,
//! work done outside it — the same "list plus one lock" discipline used
//! for every other shared collection in this crate, built to the
//! concurrency discipline spelled out in §5.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::common::{SharedClock, SimError, SimResult};
use crate::config::MAX_RECIRCULATION_DEPTH;
use crate::packet::{Direction, PacketBuffer};
use crate::port::Port;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorResult {
    Forward,
    Drop,
    Consume,
    Recirculate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorHandle(u64);

pub type ProcessorFn = Box<dyn FnMut(&mut PacketBuffer) -> ProcessorResult + Send>;

struct ProcessorSlot {
    handle: ProcessorHandle,
    priority: i32,
    seq: u64,
    active: bool,
    callback: Arc<Mutex<ProcessorFn>>,
}

struct Registry {
    slots: Vec<ProcessorSlot>,
    initialized: bool,
}

/// The chain itself. Registration/deregistration mutate `slots` under
/// `Mutex<Registry>`; walking a packet clones a sorted snapshot of `Arc`
/// handles to active callbacks out from under that lock, then releases it
/// before invoking anything (§5: "processors run outside that lock").
pub struct ProcessorChain {
    registry: Mutex<Registry>,
    next_handle: AtomicU64,
    next_seq: AtomicU64,
    max_processors: usize,
}

impl ProcessorChain {
    pub fn new(max_processors: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                slots: Vec::new(),
                initialized: true,
            }),
            next_handle: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
            max_processors,
        }
    }

    pub fn shutdown(&self) {
        let mut reg = self.registry.lock().unwrap();
        reg.initialized = false;
        reg.slots.clear();
    }

    /// Registers a processor at `priority` (smaller runs earlier). Ties
    /// broken by registration order (§4.4 "stable sort").
    pub fn register(&self, priority: i32, callback: ProcessorFn) -> SimResult<ProcessorHandle> {
        let mut reg = self.registry.lock().unwrap();
        if !reg.initialized {
            return Err(SimError::NotInitialized);
        }
        if reg.slots.iter().filter(|s| s.active).count() >= self.max_processors {
            return Err(SimError::ResourceExhausted("max processors reached".into()));
        }

        let handle = ProcessorHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        reg.slots.push(ProcessorSlot {
            handle,
            priority,
            seq,
            active: true,
            callback: Arc::new(Mutex::new(callback)),
        });
        reg.slots.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.seq.cmp(&b.seq)));
        Ok(handle)
    }

    /// Marks a slot inactive; it no longer appears in future snapshots.
    pub fn deregister(&self, handle: ProcessorHandle) -> SimResult<()> {
        let mut reg = self.registry.lock().unwrap();
        let slot = reg
            .slots
            .iter_mut()
            .find(|s| s.handle == handle && s.active)
            .ok_or(SimError::NotFound)?;
        slot.active = false;
        Ok(())
    }

    fn snapshot(&self) -> SimResult<Vec<Arc<Mutex<ProcessorFn>>>> {
        let reg = self.registry.lock().unwrap();
        if !reg.initialized {
            return Err(SimError::NotInitialized);
        }
        Ok(reg
            .slots
            .iter()
            .filter(|s| s.active)
            .map(|s| s.callback.clone())
            .collect())
    }

    /// Walks `buf` through the active processor snapshot, restarting on
    /// RECIRCULATE up to a depth of 16 before forcing DROP (§4.4). Invalid
    /// snapshots ("not initialized") also become DROP rather than an error,
    /// since the chain's result type has no error variant.
    fn walk(&self, buf: &mut PacketBuffer) -> ProcessorResult {
        let mut depth: u32 = 0;

        loop {
            let snapshot = match self.snapshot() {
                Ok(s) => s,
                Err(_) => return ProcessorResult::Drop,
            };

            let mut result = ProcessorResult::Forward;
            for callback in &snapshot {
                let r = (callback.lock().unwrap())(buf);
                if r != ProcessorResult::Forward {
                    result = r;
                    break;
                }
            }

            match result {
                ProcessorResult::Recirculate => {
                    depth += 1;
                    if depth >= MAX_RECIRCULATION_DEPTH {
                        return ProcessorResult::Drop;
                    }
                    continue;
                }
                other => return other,
            }
        }
    }

    /// Marks INTERNAL and runs the chain (§4.4).
    pub fn inject(&self, buf: &mut PacketBuffer) -> ProcessorResult {
        buf.metadata.direction = Direction::Internal;
        self.walk(buf)
    }

    /// Marks RX, stamps ingress port and timestamp, and requires the port
    /// be UP before entering the chain (§4.4).
    pub fn receive(&self, buf: &mut PacketBuffer, port: &Port, clock: &SharedClock) -> SimResult<ProcessorResult> {
        if !port.is_up() {
            return Err(SimError::ResourceUnavailable("port not up".into()));
        }

        buf.metadata.direction = Direction::Rx;
        buf.metadata.ingress_port = port.id();
        buf.metadata.timestamp = clock.lock().unwrap().now();

        Ok(self.walk(buf))
    }

    /// Marks TX and requires the port UP with the buffer within MTU. If
    /// `stp_allows_forward` is false the chain is skipped entirely and the
    /// packet is dropped with a drop-counter increment (§4.4) — STP's
    /// forwarding gate (C7) is evaluated by the caller to respect the
    /// port -> STP -> routing-table lock ordering (§5).
    pub fn transmit(&self, mut buf: PacketBuffer, port: &Arc<Port>, stp_allows_forward: bool) -> SimResult<ProcessorResult> {
        buf.metadata.direction = Direction::Tx;
        buf.metadata.egress_port = port.id();

        if !port.is_up() {
            return Err(SimError::ResourceUnavailable("port not up".into()));
        }
        if buf.size() > port.config().mtu {
            return Err(SimError::InvalidPacket("frame exceeds mtu".into()));
        }

        if !stp_allows_forward {
            port.record_blocked_egress();
            return Ok(ProcessorResult::Drop);
        }

        let result = self.walk(&mut buf);
        if result == ProcessorResult::Forward {
            port.transmit_frame(buf.bytes().to_vec())?;
        }
        Ok(result)
    }
}
