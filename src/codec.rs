use parking_lot::RwLock;

use crate::{Error, Inner, Ring, RingParams};

/// Version byte of the self-describing encoding.
const FORMAT_VERSION: u8 = 1;
/// Version + size + hash rounds.
const HEADER_LEN: usize = 1 + 8 + 8;

/// Validates a self-describing encoding and splits it into params and bit payload.
fn parse(data: &[u8]) -> Result<(RingParams, &[u8]), Error> {
    // at least one byte of bits
    if data.len() < HEADER_LEN + 1 {
        return Err(Error::ShortBuffer { len: data.len() });
    }
    if data[0] != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(data[0]));
    }
    let size = u64::from_be_bytes(data[1..1 + 8].try_into().unwrap());
    let hash_rounds = u64::from_be_bytes(data[1 + 8..HEADER_LEN].try_into().unwrap());
    let params = RingParams::new(size, hash_rounds)?;
    let payload = &data[HEADER_LEN..];
    let expected = params.byte_len();
    match payload.len() {
        len if len == expected => Ok((params, payload)),
        // Buffers sized `ceil(size / 8) + 1` carry one more byte when size isn't a
        // multiple of 8. No bit can live there, so it must be zero.
        len if len == expected + 1 && size % 8 != 0 && payload[expected] == 0 => {
            Ok((params, &payload[..expected]))
        }
        actual => Err(Error::BufferSizeMismatch { expected, actual }),
    }
}

impl Ring {
    /// Self-describing encoding: the version byte `1`, size and hash rounds as
    /// big endian `u64`s, followed by the `size / 8 + 1` bytes of bits.
    pub fn to_bytes(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let mut out = Vec::with_capacity(HEADER_LEN + inner.bits.len());
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&inner.params.size().to_be_bytes());
        out.extend_from_slice(&inner.params.hash_rounds().to_be_bytes());
        out.extend_from_slice(&inner.bits);
        out
    }

    /// Decodes a ring produced by [`Ring::to_bytes`].
    ///
    /// Errors with [`Error::ShortBuffer`] if `data` is shorter than 18 bytes, with
    /// [`Error::UnsupportedVersion`] if the version byte isn't `1`, with
    /// [`Error::InvalidSize`]/[`Error::InvalidHashRounds`] if either is 0 and with
    /// [`Error::BufferSizeMismatch`] if the bits don't match the encoded size.
    ///
    /// Besides the `size / 8 + 1` bytes [`Ring::to_bytes`] writes, a bit buffer of
    /// `ceil(size / 8) + 1` bytes is accepted as long as its extra trailing byte is zero.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let (params, payload) = parse(data)?;
        Ok(Self {
            inner: RwLock::new(Inner {
                params,
                bits: payload.into(),
            }),
        })
    }

    /// Replaces size, hash rounds and bits of `self` with the ring encoded in `data`,
    /// see [`Ring::from_bytes`]. On error `self` is left unchanged.
    pub fn decode_from(&self, data: &[u8]) -> Result<(), Error> {
        let (params, payload) = parse(data)?;
        let mut inner = self.inner.write();
        if inner.bits.len() == payload.len() {
            inner.bits.copy_from_slice(payload);
        } else {
            tracing::debug!(
                from = inner.bits.len(),
                to = payload.len(),
                "reallocating ring bit buffer"
            );
            inner.bits = payload.into();
        }
        inner.params = params;
        Ok(())
    }

    /// Legacy storage encoding: the bit buffer without its first byte, padded with
    /// a trailing zero byte so the output has the length of the bit buffer.
    ///
    /// Size and hash rounds are not included, see [`Ring::decode_storage`].
    pub fn to_storage_bytes(&self) -> Vec<u8> {
        let inner = self.inner.read();
        let mut out = vec![0u8; inner.bits.len()];
        out[..inner.bits.len() - 1].copy_from_slice(&inner.bits[1..]);
        out
    }

    /// Loads a legacy storage encoding into `self`, using `hash_rounds` as the number of
    /// hash rounds.
    ///
    /// The size is *not* taken from `data`: it becomes `(len(bits) - 1) * 8` of the bit
    /// buffer `self` already has, and the first byte of that buffer is kept. `data` is copied
    /// over the rest of the buffer; excess input is ignored and bytes it doesn't reach keep
    /// their previous value. Round-tripping therefore only reproduces the original ring when
    /// the receiver has the same size, that size is a multiple of 8 and the receiver's first
    /// byte matches. Use
    /// [`Ring::to_compact_bytes`]/[`Ring::from_compact_bytes`] for new data.
    ///
    /// Errors with [`Error::ShortBuffer`] if `data` is shorter than 18 bytes, and with
    /// [`Error::InvalidSize`]/[`Error::InvalidHashRounds`] if the derived size or
    /// `hash_rounds` is 0. On error `self` is left unchanged.
    pub fn decode_storage(&self, data: &[u8], hash_rounds: u64) -> Result<(), Error> {
        if data.len() < HEADER_LEN + 1 {
            return Err(Error::ShortBuffer { len: data.len() });
        }
        let mut inner = self.inner.write();
        let params = RingParams::new((inner.bits.len() as u64 - 1) * 8, hash_rounds)?;
        debug_assert_eq!(params.byte_len(), inner.bits.len());
        if data.len() != inner.bits.len() {
            tracing::warn!(
                len = data.len(),
                expected = inner.bits.len(),
                "storage encoding doesn't match the receiving ring"
            );
        }
        let tail = &mut inner.bits[1..];
        let n = tail.len().min(data.len());
        tail[..n].copy_from_slice(&data[..n]);
        tracing::debug!(
            size = params.size(),
            hash_rounds,
            "decoded ring from storage encoding"
        );
        inner.params = params;
        Ok(())
    }

    /// Bits-only encoding: the full bit buffer.
    ///
    /// Size and hash rounds are not included, the caller stores the [`RingParams`].
    pub fn to_compact_bytes(&self) -> Vec<u8> {
        self.inner.read().bits.to_vec()
    }

    /// Decodes a ring produced by [`Ring::to_compact_bytes`] given its params.
    ///
    /// Errors with [`Error::BufferSizeMismatch`] if `data` isn't `size / 8 + 1` bytes long.
    pub fn from_compact_bytes(params: RingParams, data: &[u8]) -> Result<Self, Error> {
        if data.len() != params.byte_len() {
            return Err(Error::BufferSizeMismatch {
                expected: params.byte_len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            inner: RwLock::new(Inner {
                params,
                bits: data.into(),
            }),
        })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Ring {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serde_bytes::serialize(&self.to_bytes(), serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Ring {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let buf: serde_bytes::ByteBuf = serde_bytes::deserialize(deserializer)?;
        Ring::from_bytes(&buf).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    fn sample(size: u64, hash_rounds: u64, items: u32) -> Ring {
        let r = Ring::with_size(size, hash_rounds).unwrap();
        for i in 0..items {
            r.add(&i.to_le_bytes());
        }
        r
    }

    #[test]
    fn test_layout() {
        let r = sample(9586, 7, 100);
        let out = r.to_bytes();
        assert_eq!(out.len(), 17 + 9586 / 8 + 1);
        assert_eq!(out[0], 1);
        assert_eq!(out[1..9], 9586u64.to_be_bytes());
        assert_eq!(out[9..17], 7u64.to_be_bytes());
        assert_eq!(out[17..], r.to_compact_bytes());
    }

    #[test]
    fn test_decode_known_bytes() {
        let mut data = vec![1u8];
        data.extend_from_slice(&16u64.to_be_bytes());
        data.extend_from_slice(&2u64.to_be_bytes());
        data.extend_from_slice(&[0b1, 0b10, 0]);
        let r = Ring::from_bytes(&data).unwrap();
        assert_eq!(r.size(), 16);
        assert_eq!(r.hash_rounds(), 2);
        assert_eq!(r.count_ones(), 2);
        assert_eq!(r.to_bytes(), data);
    }

    #[test]
    fn test_round_trip() {
        for (size, k) in [(1, 1), (7, 2), (8, 3), (9586, 7), (100_003, 11)] {
            let r = sample(size, k, 200);
            let d = Ring::from_bytes(&r.to_bytes()).unwrap();
            assert_eq!(d.params(), r.params());
            assert_eq!(d.to_compact_bytes(), r.to_compact_bytes());
            for i in 0u32..200 {
                assert!(d.test(&i.to_le_bytes()));
            }
        }
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            Ring::from_bytes(&[1; 10]).unwrap_err(),
            Error::ShortBuffer { len: 10 }
        );
        assert_eq!(
            Ring::from_bytes(&[1; 17]).unwrap_err(),
            Error::ShortBuffer { len: 17 }
        );

        let mut data = sample(64, 3, 10).to_bytes();
        data[0] = 2;
        assert_eq!(
            Ring::from_bytes(&data).unwrap_err(),
            Error::UnsupportedVersion(2)
        );

        let mut data = sample(64, 3, 10).to_bytes();
        data[1..9].copy_from_slice(&0u64.to_be_bytes());
        assert_eq!(Ring::from_bytes(&data).unwrap_err(), Error::InvalidSize);

        let mut data = sample(64, 3, 10).to_bytes();
        data[9..17].copy_from_slice(&0u64.to_be_bytes());
        assert_eq!(Ring::from_bytes(&data).unwrap_err(), Error::InvalidHashRounds);

        let mut data = sample(64, 3, 10).to_bytes();
        data.pop();
        assert_eq!(
            Ring::from_bytes(&data).unwrap_err(),
            Error::BufferSizeMismatch {
                expected: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn test_decode_ceil_sized_payload() {
        let r = sample(9586, 7, 100);
        let bits = r.to_compact_bytes();
        assert_eq!(bits.len(), 1199);

        let mut data = vec![1u8];
        data.extend_from_slice(&9586u64.to_be_bytes());
        data.extend_from_slice(&7u64.to_be_bytes());
        data.extend_from_slice(&bits);
        data.push(0);
        assert_eq!(data.len(), 17 + 1200);
        let d = Ring::from_bytes(&data).unwrap();
        assert_eq!(d.params(), r.params());
        assert_eq!(d.to_bytes(), r.to_bytes());
        for i in 0u32..100 {
            assert!(d.test(&i.to_le_bytes()));
        }

        // the extra byte can't hold bits
        *data.last_mut().unwrap() = 1;
        assert_eq!(
            Ring::from_bytes(&data).unwrap_err(),
            Error::BufferSizeMismatch {
                expected: 1199,
                actual: 1200
            }
        );

        // for multiples of 8 both layouts have the same length
        let mut data = sample(1024, 3, 10).to_bytes();
        data.push(0);
        assert_eq!(
            Ring::from_bytes(&data).unwrap_err(),
            Error::BufferSizeMismatch {
                expected: 129,
                actual: 130
            }
        );
    }

    #[test]
    fn test_decode_from_in_place() {
        init_tracing();
        let src = sample(9586, 7, 300);
        let dst = sample(1024, 3, 5);
        dst.decode_from(&src.to_bytes()).unwrap();
        assert_eq!(dst.params(), src.params());
        assert_eq!(dst.to_bytes(), src.to_bytes());

        // same shape, overwritten in place
        let other = sample(9586, 7, 10);
        dst.decode_from(&other.to_bytes()).unwrap();
        assert_eq!(dst.to_bytes(), other.to_bytes());

        let before = dst.to_bytes();
        assert!(dst.decode_from(&[2; 64]).is_err());
        assert_eq!(dst.to_bytes(), before);
    }

    #[test]
    fn test_storage_layout() {
        let r = sample(1024, 5, 50);
        let bits = r.to_compact_bytes();
        let out = r.to_storage_bytes();
        assert_eq!(out.len(), bits.len());
        assert_eq!(out[..out.len() - 1], bits[1..]);
        assert_eq!(out[out.len() - 1], 0);
    }

    #[test]
    fn test_storage_round_trip_on_matching_receiver() {
        let r = sample(1024, 5, 50);
        let recv = Ring::with_size(1024, 1).unwrap();
        recv.decode_storage(&r.to_storage_bytes(), 5).unwrap();
        assert_eq!(recv.params(), r.params());
        // everything but the first byte carries over
        assert_eq!(recv.to_storage_bytes(), r.to_storage_bytes());
        assert_eq!(recv.to_compact_bytes()[0], 0);
    }

    #[test]
    fn test_storage_derives_size_from_receiver() {
        init_tracing();
        let r = sample(9586, 7, 50);
        let recv = Ring::with_size(9586, 7).unwrap();
        recv.decode_storage(&r.to_storage_bytes(), 7).unwrap();
        // (1199 - 1) * 8, not the original 9586
        assert_eq!(recv.size(), 9584);
        assert_eq!(recv.hash_rounds(), 7);

        // a small receiver only takes what fits
        let recv = Ring::with_size(64, 2).unwrap();
        recv.decode_storage(&r.to_storage_bytes(), 3).unwrap();
        assert_eq!(recv.params(), RingParams::new(64, 3).unwrap());
        assert_eq!(recv.to_compact_bytes()[1..], r.to_compact_bytes()[1..9]);
    }

    #[test]
    fn test_storage_errors() {
        let recv = sample(1024, 5, 10);
        let before = recv.to_bytes();
        assert_eq!(
            recv.decode_storage(&[0; 17], 5).unwrap_err(),
            Error::ShortBuffer { len: 17 }
        );
        assert_eq!(
            recv.decode_storage(&[0; 129], 0).unwrap_err(),
            Error::InvalidHashRounds
        );
        // a receiver with a single byte buffer would end up with 0 bits
        let tiny = Ring::with_size(5, 1).unwrap();
        assert_eq!(
            tiny.decode_storage(&[0; 18], 1).unwrap_err(),
            Error::InvalidSize
        );
        assert_eq!(recv.to_bytes(), before);
    }

    #[test]
    fn test_compact_round_trip() {
        let r = sample(9586, 7, 100);
        let d = Ring::from_compact_bytes(r.params(), &r.to_compact_bytes()).unwrap();
        assert_eq!(d.to_bytes(), r.to_bytes());

        assert_eq!(
            Ring::from_compact_bytes(r.params(), &[0; 3]).unwrap_err(),
            Error::BufferSizeMismatch {
                expected: 1199,
                actual: 3
            }
        );
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde() {
        for (n, fp) in [(100, 0.1), (1000, 0.01), (10000, 0.0001)] {
            let r = Ring::new(n, fp).unwrap();
            for i in 0..n {
                r.insert(&i);
            }
            let ser = serde_cbor::to_vec(&r).unwrap();
            // a cbor byte string header followed by the self-describing encoding
            assert!(ser.ends_with(&r.to_bytes()));

            let d: Ring = serde_cbor::from_slice(&ser).unwrap();
            assert_eq!(d.params(), r.params());
            for i in 0..n {
                assert!(d.contains(&i));
            }
        }
        let garbage = serde_cbor::to_vec(&serde_bytes::Bytes::new(&[1; 10])).unwrap();
        assert!(serde_cbor::from_slice::<Ring>(&garbage).is_err());
    }
}
