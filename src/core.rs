//! Database facade: streams, tables and their ingestion workers, and query compilation.

use crate::bytemap::ByteMap;
use crate::clock::LogicalClock;
use crate::codec::WireCodec;
use crate::config::LoadedConfig;
use crate::encoding::RecordHeader;
use crate::error::DbError;
use crate::expr::FunctionRegistry;
use crate::persistence::{AppendLog, WalOptions, WriteAheadLog};
use crate::sql::{self, Field, Query};
use crate::table::{RowStore, Table, TableConfig, TableOptions};
use crate::telemetry::{noop_event_listener, DbEventListener};
use crate::types::{Dims, Point, Timestamp, Vals};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration options for the Db
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Directory holding the per-stream logs (`<data_dir>/wal/<stream>.log`)
    pub data_dir: PathBuf,
    /// Whether every append is synced to disk before it is acknowledged
    pub wal_sync: bool,
    /// How often blocked table readers re-check for shutdown
    pub reader_poll_interval: Duration,
    /// Interval between ingestion throughput events; `None` disables them
    pub throughput_report_interval: Option<Duration>,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn DbEventListener>,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            data_dir: PathBuf::from("./data"),
            wal_sync: true,
            reader_poll_interval: Duration::from_millis(100),
            throughput_report_interval: Some(Duration::from_secs(60)),
            event_listener: noop_event_listener(),
        }
    }
}

impl DbConfig {
    fn wal_options(&self) -> WalOptions {
        WalOptions {
            sync: self.wal_sync,
            poll_interval: self.reader_poll_interval,
        }
    }
}

/// Ingestion and query-compilation core.
#[derive(Debug)]
pub struct Db {
    config: DbConfig,
    functions: Arc<FunctionRegistry>,
    clock: Arc<LogicalClock>,
    streams: Mutex<HashMap<String, Arc<dyn AppendLog>>>,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Db {
    /// Opens a database with the built-in function registry.
    pub fn open(config: DbConfig) -> Result<Self, DbError> {
        Self::with_functions(config, FunctionRegistry::with_builtins())
    }

    /// Opens a database whose queries and table definitions resolve function calls
    /// against `functions`.
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created.
    pub fn with_functions(config: DbConfig, functions: FunctionRegistry) -> Result<Self, DbError> {
        std::fs::create_dir_all(config.data_dir.join("wal"))?;
        Ok(Db {
            config,
            functions: Arc::new(functions),
            clock: Arc::new(LogicalClock::new()),
            streams: Mutex::new(HashMap::new()),
            tables: RwLock::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Opens a database from loaded configuration and creates the tables it declares,
    /// asking `row_store_for` for each table's row store.
    pub fn open_configured<F>(loaded: LoadedConfig, row_store_for: F) -> Result<Self, DbError>
    where
        F: Fn(&str) -> Arc<dyn RowStore>,
    {
        let db = Self::open(loaded.db)?;
        for options in loaded.tables {
            let store = row_store_for(&sql::normalize(&options.name));
            db.create_table(options, store)?;
        }
        Ok(db)
    }

    pub fn get_config(&self) -> &DbConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// The logical clock shared by all tables.
    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    /// Opens the log for `name`, creating it if needed. Repeated calls return the
    /// same log.
    pub fn create_stream(&self, name: &str) -> Result<Arc<dyn AppendLog>, DbError> {
        let name = sql::normalize(name);
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            || name.starts_with('.')
        {
            return Err(DbError::ConfigError(format!("invalid stream name {:?}", name)));
        }

        let mut streams = self.streams.lock()?;
        if let Some(log) = streams.get(&name) {
            return Ok(Arc::clone(log));
        }
        let log: Arc<dyn AppendLog> = Arc::new(WriteAheadLog::open(
            self.config.data_dir.join("wal"),
            &name,
            self.config.wal_options(),
            &self.config.event_listener,
        )?);
        streams.insert(name, Arc::clone(&log));
        Ok(log)
    }

    /// Creates a table and starts its ingestion worker.
    ///
    /// The table's stream is created if it does not exist yet. The worker replays the
    /// stream from `row_store.resume_offset()` and then follows new appends.
    ///
    /// # Errors
    /// Returns an error if the definition does not compile, a table with the same name
    /// exists, or the stream's log cannot be opened.
    pub fn create_table(&self, options: TableOptions, row_store: Arc<dyn RowStore>) -> Result<Arc<Table>, DbError> {
        let config = TableConfig::compile(&options, &self.functions)?;

        let mut tables = self.tables.write()?;
        if tables.contains_key(&config.name) {
            return Err(DbError::ConfigError(format!("table {} already exists", config.name)));
        }

        let log = self.create_stream(&config.stream)?;
        let reader = log.reader(row_store.resume_offset())?;
        let table = Arc::new(Table::new(
            config,
            Arc::clone(&self.clock),
            row_store,
            Arc::clone(&self.config.event_listener),
            self.config.throughput_report_interval,
        ));

        let worker = Arc::clone(&table);
        let handle = thread::Builder::new()
            .name(format!("ingest-{}", table.name()))
            .spawn(move || worker.process_inserts(reader))?;
        self.workers.lock()?.push(handle);

        tables.insert(table.name().to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Replaces a table's definition. The new definition must read the same stream.
    pub fn alter_table(&self, name: &str, sql_text: &str) -> Result<(), DbError> {
        let table = self.table(name)?;
        let current = table.config()?;
        let options = TableOptions {
            name: current.name.clone(),
            sql: sql_text.to_string(),
            retention: current.retention,
        };
        table.reconfigure(TableConfig::compile(&options, &self.functions)?)
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>, DbError> {
        let name = sql::normalize(name);
        self.tables
            .read()?
            .get(&name)
            .cloned()
            .ok_or_else(|| DbError::UnknownTable {
                table: name,
                reason: "no such table".into(),
            })
    }

    pub fn table_names(&self) -> Result<Vec<String>, DbError> {
        let mut names: Vec<String> = self.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Appends a point to `stream`.
    ///
    /// # Arguments
    /// * `stream` - Stream name; trimmed and compared case-insensitively.
    /// * `ts` - Point timestamp, nanoseconds since the epoch.
    /// * `dims` - Dimension values.
    /// * `vals` - Measured values.
    ///
    /// # Errors
    /// Returns `UnknownStream` if the stream was never created, in which case nothing is
    /// appended, `Serialization` if a dimension is too long to encode, or `AppendFailure`
    /// if the log rejects the write.
    pub fn insert(&self, stream: &str, ts: Timestamp, dims: &Dims, vals: &Vals) -> Result<(), DbError> {
        self.insert_raw(stream, ts, &ByteMap::try_from(dims)?, &ByteMap::try_from(vals)?)
    }

    pub fn insert_point(&self, stream: &str, point: &Point) -> Result<(), DbError> {
        self.insert(stream, point.timestamp, &point.dims, &point.vals)
    }

    /// Appends a point whose dimensions and values are already encoded.
    pub fn insert_raw(&self, stream: &str, ts: Timestamp, dims: &ByteMap, vals: &ByteMap) -> Result<(), DbError> {
        let name = sql::normalize(stream);
        let log = self
            .streams
            .lock()?
            .get(&name)
            .cloned()
            .ok_or(DbError::UnknownStream(name))?;
        let header = RecordHeader::new(ts, dims, vals)?;
        log.write(&header.parts(dims, vals))?;
        Ok(())
    }

    /// Decodes a [`Point`] marshaled with `codec` and appends it to `stream`.
    pub fn insert_encoded<C: WireCodec>(&self, codec: &C, stream: &str, data: &[u8]) -> Result<(), DbError> {
        let point: Point = codec.unmarshal(data)?;
        self.insert_point(stream, &point)
    }

    /// Compiles a query against the tables of this database.
    pub fn compile_query(&self, sql_text: &str) -> Result<Query, DbError> {
        let known_fields = |table: &str| -> Result<Vec<Field>, DbError> {
            Ok(self.table(table)?.config()?.fields.clone())
        };
        sql::parse(sql_text, &self.functions, &known_fields)
    }

    /// Closes every stream and waits for the table workers to drain what was
    /// already appended.
    pub fn close(&self) -> Result<(), DbError> {
        for log in self.streams.lock()?.values() {
            log.close();
        }
        let workers: Vec<JoinHandle<()>> = self.workers.lock()?.drain(..).collect();
        for handle in workers {
            handle
                .join()
                .map_err(|_| DbError::Internal("table worker panicked".into()))?;
        }
        Ok(())
    }
}

/// Implement Drop to stop the table workers.
impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemRowStore;
    use crate::types::Scalar;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path) -> DbConfig {
        DbConfig {
            data_dir: dir.to_path_buf(),
            wal_sync: false,
            reader_poll_interval: Duration::from_millis(10),
            throughput_report_interval: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_stream_names_are_normalized() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        let a = db.create_stream(" Inbound ").unwrap();
        let b = db.create_stream("inbound").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(dir.path().join("wal").join("inbound.log").exists());
        assert!(db.create_stream("../etc").is_err());
    }

    #[test]
    fn test_unknown_stream_appends_nothing() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        let err = db.insert("nope", 1, &Dims::new(), &Vals::new()).unwrap_err();
        assert!(matches!(err, DbError::UnknownStream(s) if s == "nope"));
        assert!(!dir.path().join("wal").join("nope.log").exists());
    }

    #[test]
    fn test_oversized_dimension_appends_nothing() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        db.create_stream("s").unwrap();
        let log = dir.path().join("wal").join("s.log");
        let before = std::fs::metadata(&log).unwrap().len();
        let mut dims = Dims::new();
        dims.insert("host".into(), Scalar::Str("x".repeat(crate::bytemap::MAX_ENTRY_LEN + 1)));
        let err = db.insert("s", 1, &dims, &Vals::new()).unwrap_err();
        assert!(matches!(err, DbError::Serialization(_)));
        assert_eq!(std::fs::metadata(&log).unwrap().len(), before);
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        let store = Arc::new(MemRowStore::new());
        db.create_table(TableOptions::new("t", "SELECT v FROM s"), store.clone()).unwrap();
        assert!(matches!(
            db.create_table(TableOptions::new("T", "SELECT v FROM s"), store).unwrap_err(),
            DbError::ConfigError(_)
        ));
    }

    #[test]
    fn test_alter_table_cannot_switch_stream() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        db.create_table(TableOptions::new("t", "SELECT v FROM s"), Arc::new(MemRowStore::new()))
            .unwrap();
        assert!(db.alter_table("t", "SELECT v FROM other").is_err());
        db.alter_table("t", "SELECT v FROM s WHERE host = 'a'").unwrap();
        assert!(db.table("t").unwrap().config().unwrap().filter.is_some());
    }

    #[test]
    fn test_insert_reaches_row_store() {
        let dir = tempdir().unwrap();
        let db = Db::open(config(dir.path())).unwrap();
        let store = Arc::new(MemRowStore::new());
        let table = db
            .create_table(TableOptions::new("t", "SELECT v FROM s GROUP BY host"), store.clone())
            .unwrap();
        let mut dims = Dims::new();
        dims.insert("host".into(), Scalar::from("a"));
        let mut vals = Vals::new();
        vals.insert("v".into(), 1.5);
        db.insert("S", 42, &dims, &vals).unwrap();
        db.close().unwrap();

        assert_eq!(table.stats().unwrap().inserted_points, 1);
        assert_eq!(db.clock().now(), 42);
        let rows = store.rows(&ByteMap::try_from(&dims).unwrap()).unwrap();
        assert_eq!(rows[0].values.get("v"), Some(Scalar::Float(1.5)));
    }
}
