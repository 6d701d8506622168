use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::{xxh3_128, Xxh3};

/// The 128 bit digest of an item, split into the two halves used for double hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Digest {
    h1: u64,
    h2: u64,
}

impl Digest {
    #[inline]
    pub(crate) fn of_bytes(data: &[u8]) -> Self {
        Self::from_u128(xxh3_128(data))
    }

    #[inline]
    pub(crate) fn of_item<T: Hash + ?Sized>(item: &T) -> Self {
        let mut hasher = StableHasher::new();
        item.hash(&mut hasher);
        Self::from_u128(hasher.finish128())
    }

    #[inline]
    fn from_u128(digest: u128) -> Self {
        Self {
            h1: digest as u64,
            h2: (digest >> 64) as u64,
        }
    }

    /// Bit positions for `rounds` rounds in a bit array of `size` bits.
    ///
    /// Round `i` maps to `(h1 + i * h2) % size`, computed with wrapping arithmetic.
    #[inline]
    pub(crate) fn positions(self, rounds: u64, size: u64) -> Positions {
        debug_assert_ne!(size, 0);
        Positions {
            digest: self,
            round: 0,
            rounds,
            size,
        }
    }
}

/// Iterator over the bit positions of a [`Digest`].
#[derive(Debug, Clone)]
pub(crate) struct Positions {
    digest: Digest,
    round: u64,
    rounds: u64,
    size: u64,
}

impl Iterator for Positions {
    type Item = u64;

    #[inline]
    fn next(&mut self) -> Option<u64> {
        if self.round == self.rounds {
            return None;
        }
        let combined = self
            .digest
            .h1
            .wrapping_add(self.round.wrapping_mul(self.digest.h2));
        self.round += 1;
        Some(combined % self.size)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.rounds - self.round).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Positions {}

/// A `Hasher` whose output does not depend on the platform.
///
/// Integers are fed to xxh3 in little endian and `usize`/`isize` are widened to 64 bits,
/// so the same `Hash` value produces the same digest on every target.
pub(crate) struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    #[inline]
    pub(crate) fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    #[inline]
    pub(crate) fn finish128(&self) -> u128 {
        self.inner.digest128()
    }
}

impl Hasher for StableHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.inner.digest()
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    #[inline]
    fn write_u8(&mut self, i: u8) {
        self.write(&[i]);
    }

    #[inline]
    fn write_u16(&mut self, i: u16) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        self.write(&i.to_le_bytes());
    }

    #[inline]
    fn write_usize(&mut self, i: usize) {
        self.write_u64(i as u64);
    }

    #[inline]
    fn write_i8(&mut self, i: i8) {
        self.write_u8(i as u8);
    }

    #[inline]
    fn write_i16(&mut self, i: i16) {
        self.write_u16(i as u16);
    }

    #[inline]
    fn write_i32(&mut self, i: i32) {
        self.write_u32(i as u32);
    }

    #[inline]
    fn write_i64(&mut self, i: i64) {
        self.write_u64(i as u64);
    }

    #[inline]
    fn write_i128(&mut self, i: i128) {
        self.write_u128(i as u128);
    }

    #[inline]
    fn write_isize(&mut self, i: isize) {
        self.write_u64(i as i64 as u64);
    }
}
