//! C2 — packet buffer: an owned byte buffer with capacity >= size, a
//! metadata block, and an optional user data slot, plus the allocator that
//! owns its lifecycle (§4.1).

use std::any::Any;
use std::time::Duration;

use crate::common::{MacAddress, PortId, SimError, SimResult};

pub mod ipv4;

/// Where a packet currently sits in the pipeline (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Invalid,
    Rx,
    Tx,
    Internal,
}

/// The metadata block carried alongside every packet's bytes (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketMetadata {
    pub ingress_port: PortId,
    pub egress_port: PortId,
    pub direction: Direction,
    pub vlan_id: Option<u16>,
    pub priority: u8,
    pub source_mac: MacAddress,
    pub destination_mac: MacAddress,
    pub ether_type: u16,
    pub timestamp: Duration,
    pub dropped: bool,
}

impl Default for PacketMetadata {
    fn default() -> Self {
        Self {
            ingress_port: PortId::INVALID,
            egress_port: PortId::INVALID,
            direction: Direction::Invalid,
            vlan_id: None,
            priority: 0,
            source_mac: [0; 6],
            destination_mac: [0; 6],
            ether_type: 0,
            timestamp: Duration::ZERO,
            dropped: false,
        }
    }
}

/// An owned byte buffer with `size <= capacity`, metadata, and an optional
/// user data slot standing in for the reference source's `void*` (§9).
///
/// Single-writer: only the current holder mutates a buffer. Cloning is a
/// deep copy of bytes and metadata; the user pointer is never cloned (§3).
pub struct PacketBuffer {
    storage: Vec<u8>,
    size: usize,
    pub metadata: PacketMetadata,
    user_data: Option<Box<dyn Any>>,
}

impl std::fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("size", &self.size)
            .field("capacity", &self.storage.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl PacketBuffer {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity],
            size: 0,
            metadata: PacketMetadata::default(),
            user_data: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn bytes(&self) -> &[u8] {
        &self.storage[..self.size]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.storage[..self.size]
    }

    pub fn set_user_data(&mut self, data: Box<dyn Any>) {
        self.user_data = Some(data);
    }

    pub fn user_data(&self) -> Option<&dyn Any> {
        self.user_data.as_deref()
    }

    pub fn take_user_data(&mut self) -> Option<Box<dyn Any>> {
        self.user_data.take()
    }

    /// Deep copy of bytes and metadata; user pointer is dropped (set to
    /// `None`), never cloned (§3).
    pub fn deep_clone(&self) -> PacketBuffer {
        PacketBuffer {
            storage: self.storage.clone(),
            size: self.size,
            metadata: self.metadata,
            user_data: None,
        }
    }

    fn validate(&self) -> SimResult<()> {
        if self.size > self.storage.len() {
            return Err(SimError::InvalidPacket(format!(
                "size {} exceeds capacity {}",
                self.size,
                self.storage.len()
            )));
        }
        Ok(())
    }

    /// Grows or shrinks the logical size. If `new_size <= capacity`, only
    /// `size` is updated; otherwise storage is grown and both are updated
    /// (§4.1).
    pub fn resize(&mut self, new_size: usize) {
        if new_size > self.storage.len() {
            self.storage.resize(new_size, 0);
        }
        self.size = new_size;
    }

    pub fn get_header(&self, offset: usize, len: usize) -> SimResult<&[u8]> {
        self.validate()?;
        let end = offset.checked_add(len).ok_or(SimError::OutOfBounds)?;
        if end > self.size {
            return Err(SimError::OutOfBounds);
        }
        Ok(&self.storage[offset..offset + len])
    }

    pub fn set_header(&mut self, offset: usize, bytes: &[u8]) -> SimResult<()> {
        self.validate()?;
        let end = offset
            .checked_add(bytes.len())
            .ok_or(SimError::OutOfBounds)?;
        if end > self.size {
            return Err(SimError::OutOfBounds);
        }
        self.storage[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Inserts `bytes` at `offset`, growing capacity if needed and shifting
    /// the tail right (§4.1). Used for e.g. 802.1Q tag insertion (§6).
    pub fn insert(&mut self, offset: usize, bytes: &[u8]) -> SimResult<()> {
        self.validate()?;
        if offset > self.size {
            return Err(SimError::OutOfBounds);
        }

        let new_size = self.size + bytes.len();
        if new_size > self.storage.len() {
            self.storage.resize(new_size, 0);
        }

        self.storage.copy_within(offset..self.size, offset + bytes.len());
        self.storage[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.size = new_size;
        Ok(())
    }

    /// Removes `len` bytes at `offset`, shifting the tail down. Shrinks
    /// `size` only; `capacity` is unchanged (§4.1).
    pub fn remove(&mut self, offset: usize, len: usize) -> SimResult<()> {
        self.validate()?;
        let end = offset.checked_add(len).ok_or(SimError::OutOfBounds)?;
        if end > self.size {
            return Err(SimError::OutOfBounds);
        }

        self.storage.copy_within(end..self.size, offset);
        self.size -= len;
        Ok(())
    }

    /// Inserts an 802.1Q tag at offset 12 (§6): TPID 0x8100, then a 2-byte
    /// tag encoding priority (bits 15..13), DEI (bit 12), VID (bits 11..0).
    pub fn insert_vlan_tag(&mut self, vid: u16, priority: u8, dei: bool) -> SimResult<()> {
        let tci: u16 = ((priority as u16 & 0x7) << 13) | ((dei as u16) << 12) | (vid & 0x0FFF);
        let mut tag = [0u8; 4];
        tag[0..2].copy_from_slice(&0x8100u16.to_be_bytes());
        tag[2..4].copy_from_slice(&tci.to_be_bytes());
        self.insert(12, &tag)?;
        self.metadata.vlan_id = Some(vid);
        self.metadata.priority = priority;
        Ok(())
    }

    /// Removes a previously inserted 802.1Q tag at offset 12, restoring the
    /// original bytes and size (§6, §8 scenario 4).
    pub fn remove_vlan_tag(&mut self) -> SimResult<()> {
        self.remove(12, 4)?;
        self.metadata.vlan_id = None;
        Ok(())
    }
}

/// Owns the lifecycle of packet buffers: allocation, a free pool, and the
/// "not initialized" guard from §4.1/§4.9. Buffers are pooled on free and
/// reused on the next allocation large enough to hold them.
pub struct PacketAllocator {
    initialized: bool,
    pool: Vec<PacketBuffer>,
}

impl Default for PacketAllocator {
    fn default() -> Self {
        Self {
            initialized: false,
            pool: Vec::new(),
        }
    }
}

impl PacketAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self) -> SimResult<()> {
        if self.initialized {
            return Err(SimError::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.initialized = false;
        self.pool.clear();
    }

    /// Allocates a buffer of the given size. Reuses a pooled buffer if one
    /// is available and large enough; otherwise allocates fresh storage.
    /// Zero-size allocation is legal (an empty payload, §3); only a missing
    /// `init()` call is an error.
    pub fn alloc(&mut self, size: usize) -> SimResult<PacketBuffer> {
        if !self.initialized {
            return Err(SimError::NotInitialized);
        }

        if let Some(mut buf) = self.pool.pop() {
            buf.resize(size);
            buf.metadata = PacketMetadata::default();
            buf.user_data = None;
            return Ok(buf);
        }

        let mut buf = PacketBuffer::with_capacity(size.max(crate::config::MIN_ETHERNET_FRAME));
        buf.resize(size);
        Ok(buf)
    }

    /// Returns a buffer to the pool instead of dropping it.
    pub fn free(&mut self, buf: PacketBuffer) {
        self.pool.push(buf);
    }
}
