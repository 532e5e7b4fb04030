use crate::bytemap::ByteMap;
use crate::error::DbError;
use crate::table::RowStore;
use crate::types::{InsertRecord, LogOffset, TsParams};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Simple in-memory row store.
/// Rows are kept per group key, sorted by timestamp.
/// Uses RwLock for concurrent reads while a table worker inserts.
#[derive(Debug, Default)]
pub struct MemRowStore {
    groups: RwLock<HashMap<ByteMap, Arc<RwLock<Vec<TsParams>>>>>,
    /// Offset of the last record inserted.
    high_water: RwLock<Option<LogOffset>>,
}

impl MemRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group keys currently held, in byte order.
    pub fn keys(&self) -> Result<Vec<ByteMap>, DbError> {
        let mut keys: Vec<ByteMap> = self.groups.read()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Rows of one group, oldest first.
    pub fn rows(&self, key: &ByteMap) -> Result<Vec<TsParams>, DbError> {
        let group = self.groups.read()?.get(key).cloned();
        match group {
            Some(rows) => Ok(rows.read()?.clone()),
            None => Ok(Vec::new()),
        }
    }

    pub fn group_count(&self) -> Result<usize, DbError> {
        Ok(self.groups.read()?.len())
    }

    pub fn row_count(&self) -> Result<usize, DbError> {
        let groups = self.groups.read()?;
        let mut total = 0;
        for rows in groups.values() {
            total += rows.read()?.len();
        }
        Ok(total)
    }
}

impl RowStore for MemRowStore {
    fn insert(&self, record: InsertRecord) -> Result<(), DbError> {
        let group = {
            let mut groups = self.groups.write()?;
            Arc::clone(
                groups
                    .entry(record.key)
                    .or_insert_with(|| Arc::new(RwLock::new(Vec::new()))),
            )
        };

        {
            let mut rows = group.write()?;
            // Points mostly arrive in order; insert after any equal timestamps.
            let at = rows.partition_point(|r| r.timestamp <= record.params.timestamp);
            rows.insert(at, record.params);
        }

        let mut high_water = self.high_water.write()?;
        if high_water.map_or(true, |hw| record.offset > hw) {
            *high_water = Some(record.offset);
        }
        Ok(())
    }

    fn resume_offset(&self) -> LogOffset {
        match self.high_water.read() {
            Ok(hw) => hw.unwrap_or_default(),
            Err(poisoned) => poisoned.into_inner().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;
    use std::thread;

    fn record(host: &str, ts: u64, offset: u64) -> InsertRecord {
        let key = ByteMap::new(vec![("host", Scalar::from(host))]).unwrap();
        InsertRecord {
            key: key.clone(),
            params: TsParams {
                timestamp: ts,
                values: ByteMap::from_floats(vec![("v", ts as f64)]).unwrap(),
            },
            dims: key,
            offset: LogOffset(offset),
        }
    }

    #[test]
    fn test_rows_sorted_per_group() {
        let store = MemRowStore::new();
        store.insert(record("a", 30, 1)).unwrap();
        store.insert(record("a", 10, 2)).unwrap();
        store.insert(record("b", 20, 3)).unwrap();
        store.insert(record("a", 20, 4)).unwrap();

        assert_eq!(store.group_count().unwrap(), 2);
        assert_eq!(store.row_count().unwrap(), 4);
        let a = ByteMap::new(vec![("host", Scalar::from("a"))]).unwrap();
        let ts: Vec<u64> = store.rows(&a).unwrap().iter().map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![10, 20, 30]);
        assert_eq!(store.resume_offset(), LogOffset(4));
    }

    #[test]
    fn test_concurrent_inserts() {
        let store = Arc::new(MemRowStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        store.insert(record(&format!("h{}", t % 2), i, t * 1000 + i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.group_count().unwrap(), 2);
        assert_eq!(store.row_count().unwrap(), 1000);
        assert_eq!(store.resume_offset(), LogOffset(3249));
    }
}
