use {
    rapidhash::v3::rapidhash_v3,
    std::hash::{BuildHasherDefault, Hasher},
};

/// Hasher used to place identities and keys on the ring.
///
/// Every node of a cluster must compute the same position for the same key,
/// otherwise two nodes would disagree on ownership. This uses the rapidhash
/// V3 algorithm with the default seed and secrets, so the output is portable
/// across platforms, processes and releases (unlike `RandomState`).
#[derive(Default)]
pub struct DefaultHasher(Vec<u8>);

impl Hasher for DefaultHasher {
    fn write(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        rapidhash_v3(&self.0)
    }
}

/// Default `BuildHasher` of the ring.
pub type RingHasher = BuildHasherDefault<DefaultHasher>;

#[cfg(test)]
mod tests {
    use {super::*, std::hash::BuildHasher};

    #[test]
    fn portable_output() {
        let builder = RingHasher::default();
        assert_eq!(builder.hash_one("hello world"), 11123828800333028832);
        assert_eq!(builder.hash_one(42), 6826880404968503204);
    }

    #[test]
    fn independent_builders_agree() {
        // Two nodes build their hashers independently.
        let a = RingHasher::default();
        let b = RingHasher::default();
        for addr in ["10.0.0.1:4000", "10.0.0.2:4000", "node-a:9000"] {
            assert_eq!(a.hash_one(addr), b.hash_one(addr));
        }
        assert_ne!(a.hash_one("10.0.0.1:4000"), a.hash_one("10.0.0.1:4001"));
    }
}
