use std::fmt;

/// An opaque, dense port identifier. Identifiers are 0-based: `0..N-1` for
/// `N` provisioned ports (§3, Ambiguity (i) of §9 resolved in favor of the
/// 0-based external convention everywhere, internal and external alike).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortId(u32);

impl PortId {
    pub const INVALID: PortId = PortId(u32::MAX);

    pub fn new(id: u32) -> Self {
        PortId(id)
    }

    pub fn is_valid(&self) -> bool {
        *self != PortId::INVALID
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "<invalid>")
        }
    }
}

impl From<u32> for PortId {
    fn from(v: u32) -> Self {
        PortId(v)
    }
}

impl From<usize> for PortId {
    fn from(v: usize) -> Self {
        PortId(v as u32)
    }
}
