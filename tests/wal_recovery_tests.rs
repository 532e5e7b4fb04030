//! Restart behavior: replay of stream logs, resuming from a row store's offset and
//! repair of logs left behind by a crash.

use rollupdb::table::TableStatus;
use rollupdb::{Db, DbConfig, DbError, DbEvent, DbEventListener, Dims, InsertRecord, LogOffset, MemRowStore, RowStore, Scalar, TableOptions, Vals};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const SECOND: u64 = 1_000_000_000;

#[derive(Debug, Default)]
struct RecordingListener(Mutex<Vec<DbEvent>>);

impl DbEventListener for RecordingListener {
    fn on_event(&self, event: DbEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// Row store that rejects every insert.
#[derive(Debug)]
struct FullStore;

impl RowStore for FullStore {
    fn insert(&self, _record: InsertRecord) -> Result<(), DbError> {
        Err(DbError::Internal("store is full".into()))
    }
}

fn test_config(dir: &Path) -> DbConfig {
    DbConfig {
        data_dir: dir.to_path_buf(),
        wal_sync: false,
        reader_poll_interval: Duration::from_millis(10),
        throughput_report_interval: None,
        ..Default::default()
    }
}

fn wal_path(dir: &Path, stream: &str) -> PathBuf {
    dir.join("wal").join(format!("{}.log", stream))
}

fn host(name: &str) -> Dims {
    let mut dims = Dims::new();
    dims.insert("host".into(), Scalar::from(name));
    dims
}

fn one() -> Vals {
    let mut vals = Vals::new();
    vals.insert("requests".into(), 1.0);
    vals
}

fn totals() -> TableOptions {
    TableOptions::new("totals", "SELECT requests FROM inbound GROUP BY host")
}

fn fill(dir: &Path, store: Arc<MemRowStore>, points: u64) {
    let db = Db::open(test_config(dir)).unwrap();
    db.create_table(totals(), store).unwrap();
    for i in 0..points {
        db.insert("inbound", (i + 1) * SECOND, &host("web-01"), &one()).unwrap();
    }
    db.close().unwrap();
}

#[test]
fn test_fresh_store_replays_whole_stream() {
    let dir = tempdir().unwrap();
    fill(dir.path(), Arc::new(MemRowStore::new()), 3);

    let db = Db::open(test_config(dir.path())).unwrap();
    let store = Arc::new(MemRowStore::new());
    db.create_table(totals(), store.clone()).unwrap();
    db.close().unwrap();

    assert_eq!(store.row_count().unwrap(), 3);
    // The clock is rebuilt from replayed points.
    assert_eq!(db.clock().now(), 3 * SECOND);
}

#[test]
fn test_store_resumes_after_its_last_record() {
    let dir = tempdir().unwrap();
    let store = Arc::new(MemRowStore::new());
    fill(dir.path(), store.clone(), 3);
    let high_water = store.resume_offset();
    assert!(high_water > LogOffset(0));

    let listener = Arc::new(RecordingListener::default());
    let db = Db::open(DbConfig {
        event_listener: listener.clone(),
        ..test_config(dir.path())
    })
    .unwrap();
    let table = db.create_table(totals(), store.clone()).unwrap();
    db.insert("inbound", 4 * SECOND, &host("web-01"), &one()).unwrap();
    db.close().unwrap();

    assert_eq!(store.row_count().unwrap(), 4);
    assert_eq!(table.stats().unwrap().inserted_points, 1);
    let started = listener
        .0
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            DbEvent::IngestStarted { from_offset, .. } => Some(*from_offset),
            _ => None,
        });
    assert_eq!(started, Some(high_water.0));
}

#[test]
fn test_torn_tail_is_cut_on_reopen() {
    let dir = tempdir().unwrap();
    fill(dir.path(), Arc::new(MemRowStore::new()), 2);

    let path = wal_path(dir.path(), "inbound");
    let intact_len = fs::metadata(&path).unwrap().len();
    // A frame header promising more payload than was written.
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(&[64, 0, 0, 0, 1, 2, 3, 4, 5]).unwrap();
    drop(f);

    let listener = Arc::new(RecordingListener::default());
    let db = Db::open(DbConfig {
        event_listener: listener.clone(),
        ..test_config(dir.path())
    })
    .unwrap();
    let store = Arc::new(MemRowStore::new());
    db.create_table(totals(), store.clone()).unwrap();
    db.insert("inbound", 3 * SECOND, &host("web-02"), &one()).unwrap();
    db.close().unwrap();

    assert_eq!(store.row_count().unwrap(), 3);
    assert_eq!(store.group_count().unwrap(), 2);
    let events = listener.0.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        DbEvent::WalTailTruncated { stream, valid_len, discarded: 9 }
            if stream == "inbound" && *valid_len == intact_len
    )));
}

#[test]
fn test_corrupted_record_refuses_to_open() {
    let dir = tempdir().unwrap();
    fill(dir.path(), Arc::new(MemRowStore::new()), 2);

    let path = wal_path(dir.path(), "inbound");
    let mut bytes = fs::read(&path).unwrap();
    // First byte of the first record's payload: after the 12-byte file header and
    // the 8-byte frame header.
    bytes[20] ^= 0xFF;
    fs::write(&path, bytes).unwrap();

    let db = Db::open(test_config(dir.path())).unwrap();
    let err = db.create_table(totals(), Arc::new(MemRowStore::new())).unwrap_err();
    assert!(matches!(err, DbError::Corruption { stream: Some(s), .. } if s == "inbound"));
    assert!(db.table_names().unwrap().is_empty());
}

#[test]
fn test_oversized_length_in_first_record_refuses_to_open() {
    let dir = tempdir().unwrap();
    fill(dir.path(), Arc::new(MemRowStore::new()), 3);

    let path = wal_path(dir.path(), "inbound");
    let mut bytes = fs::read(&path).unwrap();
    // High byte of the first frame's little-endian length.
    bytes[12 + 3] = 0x7f;
    fs::write(&path, &bytes).unwrap();

    let db = Db::open(test_config(dir.path())).unwrap();
    let err = db.create_table(totals(), Arc::new(MemRowStore::new())).unwrap_err();
    assert!(matches!(err, DbError::Corruption { offset: Some(12), .. }));
    // Nothing was cut from the file.
    assert_eq!(fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_plausible_length_overrunning_later_records_refuses_to_open() {
    let dir = tempdir().unwrap();
    fill(dir.path(), Arc::new(MemRowStore::new()), 3);

    let path = wal_path(dir.path(), "inbound");
    let mut bytes = fs::read(&path).unwrap();
    let first_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    // Claims one byte more than the rest of the file holds.
    let bogus = (bytes.len() - 12 - 8 + 1) as u32;
    assert!(bogus > first_len);
    bytes[12..16].copy_from_slice(&bogus.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let db = Db::open(test_config(dir.path())).unwrap();
    let err = db.create_table(totals(), Arc::new(MemRowStore::new())).unwrap_err();
    assert!(matches!(err, DbError::Corruption { offset: Some(12), .. }));
    assert_eq!(fs::metadata(&path).unwrap().len(), bytes.len() as u64);
}

#[test]
fn test_failing_row_store_halts_only_its_table() {
    let dir = tempdir().unwrap();
    let db = Db::open(test_config(dir.path())).unwrap();
    let broken = db
        .create_table(TableOptions::new("broken", "SELECT requests FROM inbound"), Arc::new(FullStore))
        .unwrap();
    let healthy_store = Arc::new(MemRowStore::new());
    let healthy = db.create_table(totals(), healthy_store.clone()).unwrap();

    db.insert("inbound", SECOND, &host("web-01"), &one()).unwrap();
    db.insert("inbound", 2 * SECOND, &host("web-01"), &one()).unwrap();
    db.close().unwrap();

    assert!(matches!(broken.status().unwrap(), TableStatus::Halted(reason) if reason.contains("store is full")));
    assert_eq!(healthy.status().unwrap(), TableStatus::Stopped);
    assert_eq!(healthy_store.row_count().unwrap(), 2);
}
