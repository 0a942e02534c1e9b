use {
    crate::{RingError, RingResult, hash::RingHasher},
    std::{
        fmt,
        hash::{BuildHasher, Hash},
    },
};

/// Position on the ring, always in `[0, RING_LEN)`.
pub type RingPos = u64;

/// Largest supported ring width.
pub const MAX_RING_BITS: u32 = 63;

/// Ring space of `2^bits` positions.
///
/// Identities and keys are placed on the ring by hashing them and reducing the
/// hash modulo the ring length. The ring width is fixed when a cluster is
/// created and must be the same on every node.
#[derive(Clone)]
pub struct Ring<H = RingHasher> {
    bits: u32,
    len: u64,
    build_hasher: H,
}

impl Ring {
    /// Creates a ring of `2^bits` positions using the default hasher.
    pub fn new(bits: u32) -> RingResult<Self> {
        Self::with_build_hasher(bits, RingHasher::default())
    }
}

impl<H: BuildHasher> Ring<H> {
    /// Creates a ring of `2^bits` positions using the given hasher.
    pub fn with_build_hasher(bits: u32, build_hasher: H) -> RingResult<Self> {
        if bits == 0 || bits > MAX_RING_BITS {
            return Err(RingError::Config(format!(
                "ring bits must be within 1..={MAX_RING_BITS}, got {bits}"
            )));
        }
        Ok(Self {
            bits,
            len: 1 << bits,
            build_hasher,
        })
    }

    /// Number of bits of the ring space.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Number of positions on the ring (`RING_LEN`).
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Maps an arbitrary identifier onto the ring.
    pub fn wrap(&self, raw: u64) -> RingPos {
        raw % self.len
    }

    /// Returns the ring position of a key (or an address).
    pub fn position<K: Hash + ?Sized>(&self, key: &K) -> RingPos {
        self.wrap(self.build_hasher.hash_one(key))
    }
}

impl<H> fmt::Debug for Ring<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ring")
            .field("bits", &self.bits)
            .field("len", &self.len)
            .finish()
    }
}

/// Half-open interval `(after, upto]` of the ring, wrapping past zero when
/// `after > upto`.
///
/// This is the portion of the ring a node owns: everything strictly after its
/// predecessor, up to and including the node itself. When both bounds
/// coincide the interval covers the whole ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnedRange {
    after: RingPos,
    upto: RingPos,
}

impl OwnedRange {
    pub fn new(after: RingPos, upto: RingPos) -> Self {
        Self { after, upto }
    }

    /// Exclusive lower bound.
    pub fn after(&self) -> RingPos {
        self.after
    }

    /// Inclusive upper bound.
    pub fn upto(&self) -> RingPos {
        self.upto
    }

    /// Checks if the given position falls into the range.
    pub fn contains(&self, pos: RingPos) -> bool {
        use std::cmp::Ordering::*;
        match self.after.cmp(&self.upto) {
            Less => pos > self.after && pos <= self.upto,
            Greater => pos > self.after || pos <= self.upto,
            Equal => true,
        }
    }
}
