//! Helpers for deterministic ring placement in tests and demos.

use std::hash::{BuildHasher, Hasher};

/// `BuildHasher` placing a value at the number formed by the last run of
/// decimal digits in its hashed bytes.
///
/// With it, `"key-5"` lands on position 5 and `"127.0.0.1:7011"` on
/// `7011 mod RING_LEN`, which makes ring layouts easy to reason about.
/// Input without digits hashes to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitsHasher;

impl BuildHasher for DigitsHasher {
    type Hasher = DigitsState;

    fn build_hasher(&self) -> Self::Hasher {
        DigitsState::default()
    }
}

#[derive(Debug, Default)]
pub struct DigitsState(Vec<u8>);

impl Hasher for DigitsState {
    fn write(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    fn finish(&self) -> u64 {
        let end = match self.0.iter().rposition(u8::is_ascii_digit) {
            Some(idx) => idx + 1,
            None => return 0,
        };
        let start = self.0[..end]
            .iter()
            .rposition(|b| !b.is_ascii_digit())
            .map_or(0, |idx| idx + 1);
        self.0[start..end].iter().fold(0u64, |acc, digit| {
            acc.wrapping_mul(10).wrapping_add(u64::from(digit - b'0'))
        })
    }
}
