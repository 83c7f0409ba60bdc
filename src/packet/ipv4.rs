//! IPv4 header parsing and in-order fragment reassembly (§6 "IPv4 header
//! parsing").

use std::collections::HashMap;
use std::sync::Mutex;

use crate::common::{SimError, SimResult};

/// Standard 20-byte IPv4 header (options are not modeled; §6 names only the
/// fixed fields relevant to forwarding and fragmentation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version_ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub id: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: [u8; 4],
    pub destination: [u8; 4],
}

const DONT_FRAGMENT: u8 = 0b010;
const MORE_FRAGMENTS: u8 = 0b001;

impl Ipv4Header {
    /// Parses the fixed 20-byte header per RFC 791. Runt (<20 bytes) and
    /// giant (total_length disagrees with what's on the wire) frames are
    /// rejected as `InvalidPacket`.
    pub fn from_bytes(bytes: &[u8]) -> SimResult<Self> {
        if bytes.len() < 20 {
            return Err(SimError::InvalidPacket("ipv4 header shorter than 20 bytes".into()));
        }

        let version_ihl = bytes[0];
        if version_ihl >> 4 != 4 {
            return Err(SimError::InvalidPacket(format!("not ipv4, version nibble {}", version_ihl >> 4)));
        }

        let flags_fragment_offset = u16::from_be_bytes([bytes[6], bytes[7]]);

        Ok(Self {
            version_ihl,
            tos: bytes[1],
            total_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            id: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: (flags_fragment_offset >> 13) as u8,
            fragment_offset: flags_fragment_offset & 0x1FFF,
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            source: [bytes[12], bytes[13], bytes[14], bytes[15]],
            destination: [bytes[16], bytes[17], bytes[18], bytes[19]],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20);
        out.push(self.version_ihl);
        out.push(self.tos);
        out.extend_from_slice(&self.total_length.to_be_bytes());
        out.extend_from_slice(&self.id.to_be_bytes());
        let flags_fragment_offset = ((self.flags as u16) << 13) | (self.fragment_offset & 0x1FFF);
        out.extend_from_slice(&flags_fragment_offset.to_be_bytes());
        out.push(self.ttl);
        out.push(self.protocol);
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.source);
        out.extend_from_slice(&self.destination);
        out
    }

    pub fn dont_fragment(&self) -> bool {
        self.flags & DONT_FRAGMENT != 0
    }

    pub fn more_fragments(&self) -> bool {
        self.flags & MORE_FRAGMENTS != 0
    }

    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset != 0
    }

    /// Byte offset of this fragment's payload within the original datagram
    /// (the wire field is in units of 8 bytes).
    pub fn fragment_byte_offset(&self) -> usize {
        self.fragment_offset as usize * 8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FragmentKey {
    source: [u8; 4],
    id: u16,
}

struct Reassembly {
    buffer: Vec<u8>,
}

/// Reassembles fragmented IPv4 datagrams. Only the in-order case is
/// supported (§6 "reassembly accepts in-order fragment arrays") — a
/// fragment that doesn't extend the buffer contiguously is rejected rather
/// than buffered for later reordering.
pub struct FragmentReassembler {
    pending: Mutex<HashMap<FragmentKey, Reassembly>>,
}

impl Default for FragmentReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentReassembler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Feeds one fragment in. Returns `Ok(Some(payload))` once the final
    /// fragment (`more_fragments == false`) completes a contiguous run from
    /// offset 0; `Ok(None)` while reassembly is still in progress.
    pub fn accept(&self, header: &Ipv4Header, payload: &[u8]) -> SimResult<Option<Vec<u8>>> {
        if !header.is_fragment() {
            return Ok(Some(payload.to_vec()));
        }

        let key = FragmentKey {
            source: header.source,
            id: header.id,
        };
        let offset = header.fragment_byte_offset();

        let mut pending = self.pending.lock().unwrap();
        let entry = pending.entry(key).or_insert_with(|| Reassembly { buffer: Vec::new() });

        if offset != entry.buffer.len() {
            pending.remove(&key);
            return Err(SimError::InvalidPacket("out-of-order ipv4 fragment".into()));
        }

        entry.buffer.extend_from_slice(payload);

        if !header.more_fragments() {
            let complete = pending.remove(&key).unwrap().buffer;
            return Ok(Some(complete));
        }

        Ok(None)
    }

    /// Drops any reassembly state for a datagram, e.g. on timeout.
    pub fn discard(&self, source: [u8; 4], id: u16) {
        self.pending.lock().unwrap().remove(&FragmentKey { source, id });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;

    fn header(id: u16, more: bool, offset_words: u16) -> Ipv4Header {
        Ipv4Header {
            version_ihl: 0x45,
            tos: 0,
            total_length: 0,
            id,
            flags: if more { MORE_FRAGMENTS } else { 0 },
            fragment_offset: offset_words,
            ttl: 64,
            protocol: 1,
            checksum: 0,
            source: [10, 0, 0, 1],
            destination: [10, 0, 0, 2],
        }
    }

    #[test]
    fn FromBytes_RuntFrame_IsInvalidPacket() {
        assert_eq!(
            Ipv4Header::from_bytes(&[0u8; 10]),
            Err(SimError::InvalidPacket("ipv4 header shorter than 20 bytes".into()))
        );
    }

    #[test]
    fn RoundTrip_ThroughBytes_PreservesFields() {
        let h = header(7, true, 5);
        let bytes = h.to_bytes();
        let parsed = Ipv4Header::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn Accept_UnfragmentedDatagram_ReturnsImmediately() {
        let r = FragmentReassembler::new();
        let h = header(1, false, 0);
        let out = r.accept(&h, b"hello").unwrap();
        assert_eq!(out, Some(b"hello".to_vec()));
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn Accept_InOrderFragments_ReassemblesOnLastFragment() {
        let r = FragmentReassembler::new();
        let first = header(9, true, 0);
        let second = header(9, false, 1);

        assert_eq!(r.accept(&first, &[0xAA; 8]).unwrap(), None);
        assert_eq!(r.pending_count(), 1);

        let complete = r.accept(&second, &[0xBB; 4]).unwrap().unwrap();
        assert_eq!(complete.len(), 12);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn Accept_OutOfOrderFragment_IsRejectedAndDiscarded() {
        let r = FragmentReassembler::new();
        let first = header(9, true, 0);
        let skipped = header(9, false, 5);

        r.accept(&first, &[0xAA; 8]).unwrap();
        let err = r.accept(&skipped, &[0xBB; 4]).unwrap_err();
        assert_eq!(err, SimError::InvalidPacket("out-of-order ipv4 fragment".into()));
        assert_eq!(r.pending_count(), 0);
    }
}
