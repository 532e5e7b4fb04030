//! Immutable, sorted-by-key binary map of scalar values.
//!
//! Entry layout, repeated in ascending key order:
//! ```text
//! [4-byte key_len][key][1-byte type][value]
//! ```
//! where `value` is empty for null, 1 byte for bool, 8 big-endian bytes of the IEEE-754
//! bits for float and `[4-byte len][utf-8]` for string. Because entries are sorted and
//! deduplicated before encoding, equal logical maps always encode to identical bytes,
//! which makes the raw bytes usable as a grouping key.

use crate::encoding::{decode_length, encode_length, read_block, WIDTH_32BITS, WIDTH_64BITS};
use crate::error::DbError;
use crate::persistence::MAX_RECORD_LEN;
use crate::types::{Dims, Scalar, Vals};
use std::collections::BTreeMap;
use std::fmt;

const TYPE_NULL: u8 = 0;
const TYPE_BOOL: u8 = 1;
const TYPE_FLOAT: u8 = 2;
const TYPE_STRING: u8 = 3;

/// Longest key or string value a map accepts. Anything larger could not be logged.
pub const MAX_ENTRY_LEN: usize = MAX_RECORD_LEN as usize;

#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteMap(Vec<u8>);

impl ByteMap {
    /// Builds a map from key/value pairs in any order. Later duplicates win.
    ///
    /// # Errors
    /// Returns `Serialization` if a key or string value is longer than [`MAX_ENTRY_LEN`].
    pub fn new<K, I>(entries: I) -> Result<Self, DbError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Scalar)>,
    {
        let sorted: BTreeMap<String, Scalar> =
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::from_sorted(&sorted)
    }

    /// Builds a map of float values, as used for a point's measurements.
    pub fn from_floats<K, I>(entries: I) -> Result<Self, DbError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f64)>,
    {
        Self::new(entries.into_iter().map(|(k, v)| (k, Scalar::Float(v))))
    }

    fn from_sorted(sorted: &BTreeMap<String, Scalar>) -> Result<Self, DbError> {
        let mut buf = Vec::new();
        for (key, value) in sorted {
            push_block(&mut buf, key.as_bytes(), || "key".to_string())?;
            match value {
                Scalar::Null => buf.push(TYPE_NULL),
                Scalar::Bool(b) => {
                    buf.push(TYPE_BOOL);
                    buf.push(u8::from(*b));
                }
                Scalar::Float(f) => {
                    buf.push(TYPE_FLOAT);
                    buf.extend_from_slice(&f.to_bits().to_be_bytes());
                }
                Scalar::Str(s) => {
                    buf.push(TYPE_STRING);
                    push_block(&mut buf, s.as_bytes(), || format!("value of {}", key))?;
                }
            }
        }
        Ok(ByteMap(buf))
    }

    /// Wraps already-encoded bytes, validating framing and key order.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DbError> {
        let mut rest: &[u8] = &bytes;
        let mut prev: Option<&str> = None;
        while !rest.is_empty() {
            let ((key, _), remain) = decode_entry(rest)?;
            if let Some(p) = prev {
                if key <= p {
                    return Err(DbError::Corruption {
                        details: format!("ByteMap keys out of order: {:?} after {:?}", key, p),
                        stream: None,
                        offset: None,
                    });
                }
            }
            prev = Some(key);
            rest = remain;
        }
        Ok(ByteMap(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Looks up `key`, returning `None` when absent.
    pub fn get(&self, key: &str) -> Option<Scalar> {
        for (k, v) in self.iter() {
            match k.cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Some(v),
                std::cmp::Ordering::Greater => return None,
            }
        }
        None
    }

    pub fn iter(&self) -> ByteMapIter<'_> {
        ByteMapIter { rest: &self.0 }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(k, _)| k)
    }

    pub fn to_map(&self) -> BTreeMap<String, Scalar> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

impl TryFrom<&Dims> for ByteMap {
    type Error = DbError;

    fn try_from(dims: &Dims) -> Result<Self, DbError> {
        ByteMap::from_sorted(dims)
    }
}

impl TryFrom<&Vals> for ByteMap {
    type Error = DbError;

    fn try_from(vals: &Vals) -> Result<Self, DbError> {
        ByteMap::from_floats(vals.iter().map(|(k, v)| (k.clone(), *v)))
    }
}

/// Appends `bytes` behind its length prefix.
fn push_block(buf: &mut Vec<u8>, bytes: &[u8], what: impl FnOnce() -> String) -> Result<(), DbError> {
    if bytes.len() > MAX_ENTRY_LEN {
        return Err(DbError::Serialization(format!(
            "{} of {} bytes exceeds the {} byte limit",
            what(),
            bytes.len(),
            MAX_ENTRY_LEN
        )));
    }
    encode_length(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

impl fmt::Debug for ByteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

pub struct ByteMapIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for ByteMapIter<'a> {
    type Item = (&'a str, Scalar);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        // Framing was validated on construction.
        match decode_entry(self.rest) {
            Ok((entry, remain)) => {
                self.rest = remain;
                Some(entry)
            }
            Err(_) => {
                self.rest = &[];
                None
            }
        }
    }
}

type Entry<'a> = ((&'a str, Scalar), &'a [u8]);

fn decode_entry(bytes: &[u8]) -> Result<Entry<'_>, DbError> {
    let (key_len, rest) = read_block(bytes, WIDTH_32BITS)?;
    let (key, rest) = read_block(rest, decode_length(key_len)?)?;
    let key = std::str::from_utf8(key).map_err(|e| corrupt(format!("Invalid UTF-8 in key: {}", e)))?;
    let (typ, rest) = read_block(rest, 1)?;
    match typ[0] {
        TYPE_NULL => Ok(((key, Scalar::Null), rest)),
        TYPE_BOOL => {
            let (b, rest) = read_block(rest, 1)?;
            Ok(((key, Scalar::Bool(b[0] != 0)), rest))
        }
        TYPE_FLOAT => {
            let (b, rest) = read_block(rest, WIDTH_64BITS)?;
            let mut bits = [0u8; WIDTH_64BITS];
            bits.copy_from_slice(b);
            Ok(((key, Scalar::Float(f64::from_bits(u64::from_be_bytes(bits)))), rest))
        }
        TYPE_STRING => {
            let (len, rest) = read_block(rest, WIDTH_32BITS)?;
            let (s, rest) = read_block(rest, decode_length(len)?)?;
            let s = std::str::from_utf8(s)
                .map_err(|e| corrupt(format!("Invalid UTF-8 in value of {:?}: {}", key, e)))?;
            Ok(((key, Scalar::Str(s.to_string())), rest))
        }
        other => Err(corrupt(format!("Unknown ByteMap value type {} for key {:?}", other, key))),
    }
}

fn corrupt(details: String) -> DbError {
    DbError::Corruption {
        details,
        stream: None,
        offset: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_does_not_matter() {
        let a = ByteMap::new(vec![
            ("b", Scalar::from(2)),
            ("a", Scalar::from("x")),
            ("c", Scalar::from(false)),
        ])
        .unwrap();
        let b = ByteMap::new(vec![
            ("c", Scalar::from(false)),
            ("b", Scalar::from(2)),
            ("a", Scalar::from("x")),
        ])
        .unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_get_and_iter() {
        let m = ByteMap::new(vec![
            ("host", Scalar::from("server1")),
            ("missing", Scalar::Null),
            ("port", Scalar::from(443)),
        ])
        .unwrap();
        assert_eq!(m.get("host"), Some(Scalar::from("server1")));
        assert_eq!(m.get("port"), Some(Scalar::Float(443.0)));
        assert_eq!(m.get("missing"), Some(Scalar::Null));
        assert_eq!(m.get("absent"), None);
        assert_eq!(m.get("aaa"), None);
        assert_eq!(m.iter().count(), 3);
    }

    #[test]
    fn test_from_bytes_validates() {
        let m = ByteMap::new(vec![("k", Scalar::from("v"))]).unwrap();
        let mut bytes = m.clone().into_bytes();
        assert_eq!(ByteMap::from_bytes(bytes.clone()).unwrap(), m);

        bytes.pop();
        assert!(matches!(
            ByteMap::from_bytes(bytes).unwrap_err(),
            DbError::TruncatedInput { .. }
        ));

        // Two entries encoded in descending key order.
        let mut unsorted = ByteMap::new(vec![("z", Scalar::Null)]).unwrap().into_bytes();
        unsorted.extend(ByteMap::new(vec![("a", Scalar::Null)]).unwrap().into_bytes());
        assert!(matches!(
            ByteMap::from_bytes(unsorted).unwrap_err(),
            DbError::Corruption { .. }
        ));
    }

    #[test]
    fn test_duplicate_keys_last_wins() {
        let m = ByteMap::new(vec![("k", Scalar::from(1)), ("k", Scalar::from(2))]).unwrap();
        assert_eq!(m.get("k"), Some(Scalar::Float(2.0)));
        assert_eq!(m.iter().count(), 1);
    }

    #[test]
    fn test_oversized_entries_are_rejected() {
        let long = "x".repeat(MAX_ENTRY_LEN + 1);
        assert!(matches!(
            ByteMap::new(vec![("k", Scalar::from(long.as_str()))]).unwrap_err(),
            DbError::Serialization(msg) if msg.starts_with("value of k ")
        ));
        assert!(matches!(
            ByteMap::new(vec![(long.clone(), Scalar::Null)]).unwrap_err(),
            DbError::Serialization(msg) if msg.starts_with("key of")
        ));
        let mut dims = Dims::new();
        dims.insert("k".into(), Scalar::Str(long));
        assert!(ByteMap::try_from(&dims).is_err());
        let fits = "x".repeat(1024);
        assert_eq!(ByteMap::new(vec![("k", Scalar::from(fits.as_str()))]).unwrap().get("k"), Some(Scalar::Str(fits)));
    }
}
