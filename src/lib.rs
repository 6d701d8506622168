//! Thread-safe [bloom filter](https://en.wikipedia.org/wiki/Bloom_filter) ("ring") for cheap,
//! compact and mergeable membership checks, e.g. replay or duplicate detection.
//!
//! A ring answers "definitely not seen" or "possibly seen": false positives happen at the
//! designed rate, false negatives never do.
//!
//! ### Example
//!
//! ```rust
//! let ring = bloomring::Ring::new(1000, 0.01).unwrap();
//! ring.add(b"alpha");
//! assert!(ring.test(b"alpha"));
//! assert_eq!(ring.size(), 9586);
//! assert_eq!(ring.hash_rounds(), 7);
//! ```
//!
//! ### Hasher
//!
//! Every item is hashed once with the 128 bit variant of [xxhash3](https://crates.io/crates/xxhash-rust),
//! which is stable across platforms, so rings built in different processes can be merged and
//! exchanged. The two 64 bit halves `h1` and `h2` of the digest are combined into `k` bit
//! positions as `h1 + i * h2` (double hashing) instead of hashing the item `k` times.
//!
//! ### Filter size
//!
//! For `n` expected elements and a target false positive rate `p` the ring uses
//! `m = ceil(-n ln(p) / ln(2)^2)` bits and `k = ceil(m / n ln(2))` hash rounds.
//!
//! | Elements | Error probability when full | Bits (m) | Hash rounds (k) |
//! |:---:|:---:|:---:|:---:|
//! | 1000 | 0.1 | 4793 | 4 |
//! | 1000 | 0.01 | 9586 | 7 |
//! | 1000 | 0.001 | 14378 | 10 |
//! | 1000 | 0.0001 | 19171 | 14 |
//!
//! ### Encodings
//!
//! * [`Ring::to_bytes`] / [`Ring::from_bytes`]: self-describing, a version byte (`1`),
//!   `m` and `k` as big endian `u64`s and the bit buffer.
//! * [`Ring::to_storage_bytes`] / [`Ring::decode_storage`]: legacy bits-only format for stores
//!   that keep `k` elsewhere. It is not self-contained, see [`Ring::decode_storage`].
//! * [`Ring::to_compact_bytes`] / [`Ring::from_compact_bytes`]: bits-only format that
//!   round-trips exactly given the [`RingParams`].
//!
//! With the `serde` feature [`Ring`] (as its self-describing encoding) and [`RingParams`]
//! implement `Serialize` and `Deserialize`.
//!
//! ### Concurrency
//!
//! All operations take `&self`. [`Ring::test`] only takes a shared lock, so any number of
//! readers can run concurrently, while [`Ring::add`], [`Ring::reset`], [`Ring::merge`] (target)
//! and in-place decoding take the exclusive lock. [`Ring::merge`] acquires both locks in a fixed
//! global order, so merges in opposite directions don't deadlock.
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::hash::Hash;

use parking_lot::RwLock;
use stable_hasher::Digest;

pub use params::RingParams;

mod codec;
mod params;
mod stable_hasher;

/// Probabilistic set-membership filter backed by a fixed size bit array.
///
/// Bit `i` lives in byte `i / 8` under the mask `1 << (i % 8)`. The buffer holds
/// `size / 8 + 1` bytes, so there's always a spare byte at the end.
pub struct Ring {
    inner: RwLock<Inner>,
}

/// Params and bits, always replaced together.
#[derive(Clone)]
struct Inner {
    params: RingParams,
    bits: Box<[u8]>,
}

impl Inner {
    fn new(params: RingParams) -> Self {
        Self {
            params,
            bits: vec![0u8; params.byte_len()].into_boxed_slice(),
        }
    }

    #[inline]
    fn is_bit_set(&self, i: u64) -> bool {
        (self.bits[(i / 8) as usize] & (1 << (i % 8))) != 0
    }

    #[inline]
    fn set_bit(&mut self, i: u64) {
        self.bits[(i / 8) as usize] |= 1 << (i % 8);
    }

    #[inline]
    fn positions(&self, digest: Digest) -> stable_hasher::Positions {
        digest.positions(self.params.hash_rounds(), self.params.size())
    }
}

/// Errors returned by [`Ring`] and [`RingParams`]. None of them is transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The expected number of elements is 0
    #[error("elements must be greater than 0")]
    InvalidElements,
    /// The false positive rate is not within (0, 1)
    #[error("false positive rate must be greater than 0 and less than 1")]
    InvalidFalsePositiveRate,
    /// The bit array size is 0 (or too large for this platform)
    #[error("size must be greater than 0")]
    InvalidSize,
    /// The capacity and false positive rate require a bit array too large to allocate
    #[error("capacity is too large")]
    CapacityTooLarge,
    /// The number of hash rounds is 0
    #[error("hash rounds must be greater than 0")]
    InvalidHashRounds,
    /// The rings don't share the same size and hash rounds
    #[error("rings must have the same m/k parameters")]
    ParameterMismatch,
    /// The encoded input is too short to hold a ring
    #[error("incorrect length: {len}")]
    ShortBuffer { len: usize },
    /// The encoded input has an unknown format version
    #[error("unexpected version: {0}")]
    UnsupportedVersion(u8),
    /// The encoded bit buffer doesn't have the length the size requires
    #[error("bit buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },
}

impl Ring {
    /// Creates a ring that can hold `elements` items with a false positive
    /// rate of about `false_positive_rate` when full.
    ///
    /// Errors if `elements` is 0 or `false_positive_rate` isn't within (0, 1).
    pub fn new(elements: u64, false_positive_rate: f64) -> Result<Self, Error> {
        let params = RingParams::from_capacity(elements, false_positive_rate)?;
        tracing::debug!(
            elements,
            false_positive_rate,
            size = params.size(),
            hash_rounds = params.hash_rounds(),
            "derived ring parameters"
        );
        Ok(Self::with_params(params))
    }

    /// Creates a ring of `size` bits that probes `hash_rounds` bits per item.
    ///
    /// Errors if either is 0.
    pub fn with_size(size: u64, hash_rounds: u64) -> Result<Self, Error> {
        Ok(Self::with_params(RingParams::new(size, hash_rounds)?))
    }

    /// Creates an empty ring with the given params.
    pub fn with_params(params: RingParams) -> Self {
        Self {
            inner: RwLock::new(Inner::new(params)),
        }
    }

    /// Number of bits in the ring (`m`).
    ///
    /// Takes the shared lock, as [`Ring::decode_from`] and [`Ring::decode_storage`]
    /// can replace the size.
    #[inline]
    pub fn size(&self) -> u64 {
        self.inner.read().params.size()
    }

    /// Number of hash rounds per item (`k`).
    #[inline]
    pub fn hash_rounds(&self) -> u64 {
        self.inner.read().params.hash_rounds()
    }

    /// Current size and hash rounds.
    #[inline]
    pub fn params(&self) -> RingParams {
        self.inner.read().params
    }

    /// Number of bits set.
    pub fn count_ones(&self) -> u64 {
        let inner = self.inner.read();
        inner.bits.iter().map(|b| b.count_ones() as u64).sum()
    }

    /// Whether no bit is set, i.e. nothing was added since creation or the last reset.
    pub fn is_empty(&self) -> bool {
        self.inner.read().bits.iter().all(|&b| b == 0)
    }

    /// Records `data` in the ring. Adding the same data again has no effect.
    pub fn add(&self, data: &[u8]) {
        self.add_digest(Digest::of_bytes(data));
    }

    /// Returns whether `data` was (probabilistically) added to the ring.
    ///
    /// `false` means `data` was definitely never added, `true` means it may have been.
    pub fn test(&self, data: &[u8]) -> bool {
        self.test_digest(Digest::of_bytes(data))
    }

    /// Records `item` in the ring.
    ///
    /// Items are hashed through their `Hash` impl with a platform independent hasher,
    /// so `insert(b"x")` and `add(b"x")` set different bits.
    pub fn insert<T: Hash + ?Sized>(&self, item: &T) {
        self.add_digest(Digest::of_item(item));
    }

    /// Returns whether `item` was (probabilistically) inserted in the ring.
    pub fn contains<T: Hash + ?Sized>(&self, item: &T) -> bool {
        self.test_digest(Digest::of_item(item))
    }

    fn add_digest(&self, digest: Digest) {
        let mut inner = self.inner.write();
        for i in inner.positions(digest) {
            inner.set_bit(i);
        }
    }

    fn test_digest(&self, digest: Digest) -> bool {
        let inner = self.inner.read();
        inner.positions(digest).all(|i| inner.is_bit_set(i))
    }

    /// Clears every bit. Size and hash rounds are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let params = inner.params;
        *inner = Inner::new(params);
    }

    /// Merges `other` into `self`, so `self` reports every item added to either ring.
    ///
    /// Both rings must have the same size and hash rounds, otherwise this fails with
    /// `Err(Error::ParameterMismatch)` and neither ring is modified.
    /// Merging a ring into itself is a no-op.
    pub fn merge(&self, other: &Ring) -> Result<(), Error> {
        if std::ptr::eq(self, other) {
            return Ok(());
        }
        // Lock by address so that a.merge(b) racing b.merge(a) can't deadlock.
        let (mut target, source) = if (self as *const Ring) < (other as *const Ring) {
            let target = self.inner.write();
            let source = other.inner.read();
            (target, source)
        } else {
            let source = other.inner.read();
            let target = self.inner.write();
            (target, source)
        };
        if target.params != source.params {
            return Err(Error::ParameterMismatch);
        }
        for (t, s) in target.bits.iter_mut().zip(source.bits.iter()) {
            *t |= *s;
        }
        tracing::trace!(size = target.params.size(), "merged rings");
        Ok(())
    }
}

impl Clone for Ring {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Ring")
            .field("bits", &"[..]")
            .field("size", &inner.params.size())
            .field("hash_rounds", &inner.params.hash_rounds())
            .finish()
    }
}
