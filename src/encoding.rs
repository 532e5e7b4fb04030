//! Binary codec for log records: fixed-width timestamps, length prefixes and byte blocks.
//!
//! Record layout:
//! ```text
//! [8-byte timestamp][4-byte dims_len][dims ByteMap][4-byte vals_len][vals ByteMap]
//! ```
//! All integers are big-endian so that byte-wise comparison of encoded timestamps
//! matches chronological order.

use crate::bytemap::ByteMap;
use crate::error::DbError;
use crate::types::Timestamp;

use crc32fast::Hasher as Crc32;

pub const WIDTH_64BITS: usize = 8;
pub const WIDTH_32BITS: usize = 4;

/// Appends the 8-byte big-endian encoding of `ts`.
pub fn encode_timestamp(buf: &mut Vec<u8>, ts: Timestamp) {
    buf.extend_from_slice(&ts.to_be_bytes());
}

/// Inverse of [`encode_timestamp`]. Reads the first 8 bytes of `bytes`.
pub fn decode_timestamp(bytes: &[u8]) -> Result<Timestamp, DbError> {
    let (block, _) = read_block(bytes, WIDTH_64BITS)?;
    let mut b = [0u8; WIDTH_64BITS];
    b.copy_from_slice(block);
    Ok(u64::from_be_bytes(b))
}

/// Appends `n` as a 4-byte big-endian length.
pub fn encode_length(buf: &mut Vec<u8>, n: usize) -> Result<(), DbError> {
    let n = u32::try_from(n)
        .map_err(|_| DbError::Internal(format!("Block of {} bytes too large for length prefix", n)))?;
    buf.extend_from_slice(&n.to_be_bytes());
    Ok(())
}

/// Inverse of [`encode_length`]. Reads the first 4 bytes of `bytes`.
pub fn decode_length(bytes: &[u8]) -> Result<usize, DbError> {
    let (block, _) = read_block(bytes, WIDTH_32BITS)?;
    let mut b = [0u8; WIDTH_32BITS];
    b.copy_from_slice(block);
    Ok(u32::from_be_bytes(b) as usize)
}

/// Splits `bytes` into the first `len` bytes and the remainder.
pub fn read_block(bytes: &[u8], len: usize) -> Result<(&[u8], &[u8]), DbError> {
    if bytes.len() < len {
        return Err(DbError::TruncatedInput {
            needed: len,
            available: bytes.len(),
        });
    }
    Ok(bytes.split_at(len))
}

/// Header parts of a record (timestamp, dims length, vals length), kept separate so the
/// maps themselves can be handed to the log without copying.
pub struct RecordHeader {
    pub timestamp: [u8; WIDTH_64BITS],
    pub dims_len: [u8; WIDTH_32BITS],
    pub vals_len: [u8; WIDTH_32BITS],
}

impl RecordHeader {
    pub fn new(ts: Timestamp, dims: &ByteMap, vals: &ByteMap) -> Result<Self, DbError> {
        let mut buf = Vec::with_capacity(WIDTH_64BITS + 2 * WIDTH_32BITS);
        encode_timestamp(&mut buf, ts);
        encode_length(&mut buf, dims.len())?;
        encode_length(&mut buf, vals.len())?;

        let mut header = RecordHeader {
            timestamp: [0u8; WIDTH_64BITS],
            dims_len: [0u8; WIDTH_32BITS],
            vals_len: [0u8; WIDTH_32BITS],
        };
        header.timestamp.copy_from_slice(&buf[..WIDTH_64BITS]);
        header
            .dims_len
            .copy_from_slice(&buf[WIDTH_64BITS..WIDTH_64BITS + WIDTH_32BITS]);
        header
            .vals_len
            .copy_from_slice(&buf[WIDTH_64BITS + WIDTH_32BITS..]);
        Ok(header)
    }

    /// The record as an ordered list of parts for an atomic multi-part append.
    pub fn parts<'a>(&'a self, dims: &'a ByteMap, vals: &'a ByteMap) -> [&'a [u8]; 5] {
        [
            &self.timestamp,
            &self.dims_len,
            dims.as_bytes(),
            &self.vals_len,
            vals.as_bytes(),
        ]
    }
}

/// Encodes a full record into one contiguous buffer.
pub fn encode_record(ts: Timestamp, dims: &ByteMap, vals: &ByteMap) -> Result<Vec<u8>, DbError> {
    let header = RecordHeader::new(ts, dims, vals)?;
    let parts = header.parts(dims, vals);
    let mut buf = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for p in parts {
        buf.extend_from_slice(p);
    }
    Ok(buf)
}

/// Splits the timestamp off a record, returning it with the undecoded remainder.
pub fn decode_record_timestamp(bytes: &[u8]) -> Result<(Timestamp, &[u8]), DbError> {
    let (tsd, rest) = read_block(bytes, WIDTH_64BITS)?;
    Ok((decode_timestamp(tsd)?, rest))
}

/// Decodes the dims and vals that follow a record's timestamp.
///
/// The returned maps own copies of their bytes so they outlive the read buffer.
pub fn decode_record_maps(data: &[u8]) -> Result<(ByteMap, ByteMap), DbError> {
    let (dims_len, remain) = read_block(data, WIDTH_32BITS)?;
    let (dims, remain) = read_block(remain, decode_length(dims_len)?)?;
    let (vals_len, remain) = read_block(remain, WIDTH_32BITS)?;
    let (vals, _) = read_block(remain, decode_length(vals_len)?)?;
    Ok((ByteMap::from_bytes(dims.to_vec())?, ByteMap::from_bytes(vals.to_vec())?))
}

/// Decodes a full record.
pub fn decode_record(bytes: &[u8]) -> Result<(Timestamp, ByteMap, ByteMap), DbError> {
    let (ts, rest) = decode_record_timestamp(bytes)?;
    let (dims, vals) = decode_record_maps(rest)?;
    Ok((ts, dims, vals))
}

#[inline]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut h = Crc32::new();
    h.update(bytes);
    h.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;

    fn dims() -> ByteMap {
        ByteMap::new(vec![
            ("host", Scalar::from("server1")),
            ("port", Scalar::from(8080)),
            ("secure", Scalar::from(true)),
            ("zone", Scalar::Null),
        ])
        .unwrap()
    }

    fn vals() -> ByteMap {
        ByteMap::from_floats(vec![("requests", 10.0), ("load", 0.75)]).unwrap()
    }

    #[test]
    fn test_record_roundtrip() {
        let ts = 1_700_000_000_123_456_789;
        let encoded = encode_record(ts, &dims(), &vals()).unwrap();
        let (ts2, d, v) = decode_record(&encoded).unwrap();
        assert_eq!(ts2, ts);
        assert_eq!(d, dims());
        assert_eq!(v, vals());
    }

    #[test]
    fn test_record_roundtrip_empty_maps() {
        let empty = ByteMap::default();
        let encoded = encode_record(42, &empty, &empty).unwrap();
        assert_eq!(encoded.len(), WIDTH_64BITS + 2 * WIDTH_32BITS);
        let (ts, d, v) = decode_record(&encoded).unwrap();
        assert_eq!(ts, 42);
        assert!(d.is_empty());
        assert!(v.is_empty());
    }

    #[test]
    fn test_timestamp_encoding_preserves_order() {
        let stamps = [0u64, 1, 255, 256, 65_535, 1 << 40, u64::MAX - 1, u64::MAX];
        let encoded: Vec<Vec<u8>> = stamps
            .iter()
            .map(|ts| {
                let mut buf = Vec::new();
                encode_timestamp(&mut buf, *ts);
                buf
            })
            .collect();
        for w in encoded.windows(2) {
            assert!(w[0] < w[1]);
        }
        for (ts, bytes) in stamps.iter().zip(&encoded) {
            assert_eq!(decode_timestamp(bytes).unwrap(), *ts);
        }
    }

    #[test]
    fn test_read_block_truncated() {
        let err = read_block(&[1, 2, 3], 4).unwrap_err();
        assert!(matches!(err, DbError::TruncatedInput { needed: 4, available: 3 }));
        let (block, rest) = read_block(&[1, 2, 3], 2).unwrap();
        assert_eq!(block, &[1, 2]);
        assert_eq!(rest, &[3]);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let encoded = encode_record(7, &dims(), &vals()).unwrap();
        for cut in [0, 5, WIDTH_64BITS + 2, encoded.len() - 1] {
            let err = decode_record(&encoded[..cut]).unwrap_err();
            assert!(
                matches!(err, DbError::TruncatedInput { .. }),
                "cut at {} gave {:?}",
                cut,
                err
            );
        }
    }

    #[test]
    fn test_length_roundtrip() {
        let mut buf = Vec::new();
        encode_length(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);
        assert_eq!(decode_length(&buf).unwrap(), 0x0102_0304);
    }
}
