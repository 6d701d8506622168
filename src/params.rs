use std::f64::consts::LN_2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::Error;

/// The two constants governing a [`Ring`](crate::Ring): the number of bits `m`
/// and the number of hash rounds `k`.
///
/// Both are always non-zero. Two rings can only be merged if their params are equal,
/// and the storage encoding expects callers to persist `hash_rounds` next to the bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "UncheckedParams"))]
pub struct RingParams {
    #[cfg_attr(feature = "serde", serde(rename = "m"))]
    size: u64,
    #[cfg_attr(feature = "serde", serde(rename = "k"))]
    hash_rounds: u64,
}

impl RingParams {
    /// Explicit parameters: a bit array of `size` bits probed `hash_rounds` times per item.
    ///
    /// Errors with [`Error::InvalidSize`] if `size` is 0 or the bit buffer couldn't be
    /// allocated on this platform (more than `isize::MAX` bytes), and with
    /// [`Error::InvalidHashRounds`] if `hash_rounds` is 0.
    pub fn new(size: u64, hash_rounds: u64) -> Result<Self, Error> {
        if size == 0 || isize::try_from(size / 8 + 1).is_err() {
            return Err(Error::InvalidSize);
        }
        if hash_rounds == 0 {
            return Err(Error::InvalidHashRounds);
        }
        Ok(Self { size, hash_rounds })
    }

    /// Optimal parameters for holding `elements` items with a false positive rate
    /// of about `false_positive_rate` once full.
    ///
    /// `m = ceil(-n * ln(p) / ln(2)^2)` and `k = ceil(m / n * ln(2))`, where `k`
    /// is computed from the unrounded `m`.
    ///
    /// Errors with [`Error::InvalidElements`] if `elements` is 0, with
    /// [`Error::InvalidFalsePositiveRate`] unless `0 < false_positive_rate < 1` and with
    /// [`Error::CapacityTooLarge`] if the bit buffer wouldn't fit in `isize::MAX` bytes.
    pub fn from_capacity(elements: u64, false_positive_rate: f64) -> Result<Self, Error> {
        if elements == 0 {
            return Err(Error::InvalidElements);
        }
        // also rejects NaN
        if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
            return Err(Error::InvalidFalsePositiveRate);
        }
        let n = elements as f64;
        let m = -n * false_positive_rate.ln() / (LN_2 * LN_2);
        let k = (m / n) * LN_2;
        // `as u64` saturates, catch oversized filters before it does
        if !m.is_finite() || m / 8.0 + 1.0 >= isize::MAX as f64 {
            return Err(Error::CapacityTooLarge);
        }
        Self::new(m.ceil() as u64, k.ceil() as u64)
    }

    /// Number of bits in the bit array (`m`).
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of hash rounds per item (`k`).
    #[inline]
    pub fn hash_rounds(&self) -> u64 {
        self.hash_rounds
    }

    /// Length in bytes of the bit buffer, one more than `size / 8`.
    #[inline]
    pub fn byte_len(&self) -> usize {
        // Checked in the constructor.
        (self.size / 8 + 1) as usize
    }

    /// Theoretical false positive rate after `elements` distinct items were added.
    pub fn expected_false_positive_rate(&self, elements: u64) -> f64 {
        let k = self.hash_rounds as f64;
        let exponent = -k * elements as f64 / self.size as f64;
        (1.0 - exponent.exp()).powf(k)
    }
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct UncheckedParams {
    m: u64,
    k: u64,
}

#[cfg(feature = "serde")]
impl TryFrom<UncheckedParams> for RingParams {
    type Error = Error;

    fn try_from(raw: UncheckedParams) -> Result<Self, Error> {
        Self::new(raw.m, raw.k)
    }
}
