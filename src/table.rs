//! Tables: a SQL definition over one stream plus the worker that feeds accepted points
//! into a row store.

use crate::bytemap::ByteMap;
use crate::clock::LogicalClock;
use crate::encoding::{decode_record_maps, decode_record_timestamp};
use crate::error::DbError;
use crate::expr::{Expr, FunctionRegistry};
use crate::persistence::LogReader;
use crate::sql::{self, Field, GroupBy};
use crate::telemetry::{db_metrics, DbEvent, DbEventListener};
use crate::types::{InsertRecord, LogOffset, Scalar, TableStats, Timestamp, TsParams};
use chrono::TimeDelta;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Destination for points accepted by a table.
pub trait RowStore: std::fmt::Debug + Send + Sync {
    fn insert(&self, record: InsertRecord) -> Result<(), DbError>;

    /// Log position the table's reader should start from. Stores that persist what
    /// they have seen return the offset of the last record they hold.
    fn resume_offset(&self) -> LogOffset {
        LogOffset::default()
    }
}

/// How a table is declared.
#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    pub name: String,
    /// `SELECT <fields> FROM <stream> [WHERE <filter>] [GROUP BY ...]`
    pub sql: String,
    /// Points older than the logical clock minus this window are skipped.
    pub retention: Option<Duration>,
}

impl TableOptions {
    pub fn new(name: &str, sql: &str) -> Self {
        TableOptions {
            name: name.to_string(),
            sql: sql.to_string(),
            retention: None,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }
}

/// Compiled table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableConfig {
    pub name: String,
    pub stream: String,
    pub sql: String,
    /// Known fields, offered to queries against this table.
    pub fields: Vec<Field>,
    pub filter: Option<Expr>,
    /// Empty means every dimension is part of the group key.
    pub group_by: Vec<GroupBy>,
    pub resolution: Option<TimeDelta>,
    pub retention: Option<Duration>,
}

impl TableConfig {
    /// Compiles a table definition. The filter must be able to produce a boolean from
    /// the point alone, so obviously broken definitions never reach the ingestion path.
    pub fn compile(options: &TableOptions, functions: &FunctionRegistry) -> Result<Self, DbError> {
        let name = sql::normalize(&options.name);
        if name.is_empty() {
            return Err(DbError::ConfigError("table name must not be empty".into()));
        }
        let no_known_fields = |_: &str| -> Result<Vec<Field>, DbError> { Ok(Vec::new()) };
        let query = sql::parse(&options.sql, functions, &no_known_fields)?;
        let stream = query
            .table()
            .ok_or_else(|| DbError::ConfigError(format!("table {} must read from a stream, not a sub-query", name)))?
            .to_string();

        if let Some(filter) = &query.filter {
            if !filter.may_be_boolean() {
                return Err(DbError::TypeMismatch(format!(
                    "WHERE clause of table {} is not a boolean expression: {}",
                    name, filter
                )));
            }
            if filter.contains_sub_query() {
                return Err(DbError::ConfigError(format!(
                    "WHERE clause of table {} cannot use a sub-query: {}",
                    name, filter
                )));
            }
        }

        Ok(TableConfig {
            name,
            stream,
            sql: options.sql.clone(),
            fields: query.fields,
            filter: query.filter,
            group_by: query.group_by,
            resolution: query.resolution,
            retention: options.retention,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Reading,
    /// Ingestion stopped on an unrecoverable error.
    Halted(String),
    /// The stream was closed.
    Stopped,
}

enum Outcome {
    Inserted,
    Filtered,
    Skipped,
}

#[derive(Debug)]
pub struct Table {
    name: String,
    stream: String,
    config: RwLock<Arc<TableConfig>>,
    stats: Mutex<TableStats>,
    status: Mutex<TableStatus>,
    clock: Arc<LogicalClock>,
    row_store: Arc<dyn RowStore>,
    events: Arc<dyn DbEventListener>,
    report_interval: Option<Duration>,
}

impl Table {
    pub(crate) fn new(
        config: TableConfig,
        clock: Arc<LogicalClock>,
        row_store: Arc<dyn RowStore>,
        events: Arc<dyn DbEventListener>,
        report_interval: Option<Duration>,
    ) -> Self {
        Table {
            name: config.name.clone(),
            stream: config.stream.clone(),
            config: RwLock::new(Arc::new(config)),
            stats: Mutex::new(TableStats::default()),
            status: Mutex::new(TableStatus::Reading),
            clock,
            row_store,
            events,
            report_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Snapshot of the current definition.
    pub fn config(&self) -> Result<Arc<TableConfig>, DbError> {
        Ok(Arc::clone(&*self.config.read()?))
    }

    pub fn stats(&self) -> Result<TableStats, DbError> {
        Ok(*self.stats.lock()?)
    }

    pub fn status(&self) -> Result<TableStatus, DbError> {
        Ok(self.status.lock()?.clone())
    }

    /// Swaps in a new definition. Records already being processed finish under the
    /// definition they started with.
    pub(crate) fn reconfigure(&self, config: TableConfig) -> Result<(), DbError> {
        if config.stream != self.stream {
            return Err(DbError::ConfigError(format!(
                "table {} reads stream {}; it cannot be switched to {}",
                self.name, self.stream, config.stream
            )));
        }
        *self.config.write()? = Arc::new(config);
        self.events.on_event(DbEvent::TableReconfigured {
            table: self.name.clone(),
        });
        Ok(())
    }

    /// Counts a point handed to the filter/insert stage.
    pub fn record_queued(&self) -> Result<(), DbError> {
        self.stats.lock()?.queued_points += 1;
        Ok(())
    }

    /// Oldest timestamp still accepted, relative to the logical clock.
    pub fn truncate_before(&self) -> Result<Timestamp, DbError> {
        let retention = self.config.read()?.retention;
        Ok(match retention {
            Some(r) => {
                let window = u64::try_from(r.as_nanos()).unwrap_or(u64::MAX);
                self.clock.now().saturating_sub(window)
            }
            None => 0,
        })
    }

    /// Consumes records from `reader` until the log is closed or an unrecoverable
    /// error occurs. Runs on the table's worker thread.
    pub(crate) fn process_inserts(&self, mut reader: Box<dyn LogReader>) {
        self.events.on_event(DbEvent::IngestStarted {
            table: self.name.clone(),
            stream: self.stream.clone(),
            from_offset: reader.offset().0,
        });

        let mut window_start = Instant::now();
        let (mut bytes_read, mut inserted, mut skipped) = (0u64, 0u64, 0u64);
        loop {
            let data = match reader.read() {
                Ok(data) => data,
                Err(DbError::LogClosed(_)) => {
                    self.set_status(TableStatus::Stopped);
                    self.events.on_event(DbEvent::IngestStopped {
                        table: self.name.clone(),
                    });
                    return;
                }
                Err(err) => {
                    self.halt(err);
                    return;
                }
            };
            bytes_read += data.len() as u64;

            match self.ingest(&data, reader.offset()) {
                Ok(Outcome::Inserted) => inserted += 1,
                Ok(Outcome::Skipped) => skipped += 1,
                Ok(Outcome::Filtered) => {}
                Err(err) => {
                    self.halt(err);
                    return;
                }
            }

            if let Some(interval) = self.report_interval {
                let elapsed = window_start.elapsed();
                if elapsed >= interval {
                    self.events.on_event(DbEvent::IngestThroughput {
                        table: self.name.clone(),
                        elapsed,
                        bytes_read,
                        inserted,
                        skipped,
                    });
                    window_start = Instant::now();
                    (bytes_read, inserted, skipped) = (0, 0, 0);
                }
            }
        }
    }

    fn ingest(&self, data: &[u8], offset: LogOffset) -> Result<Outcome, DbError> {
        let (ts, rest) = decode_record_timestamp(data)?;
        if ts < self.truncate_before()? {
            self.stats.lock()?.skipped_points += 1;
            db_metrics::record_skipped(&self.name);
            return Ok(Outcome::Skipped);
        }
        self.record_queued()?;
        let (dims, vals) = decode_record_maps(rest)?;
        self.insert(ts, dims, vals, offset)
    }

    fn insert(&self, ts: Timestamp, dims: ByteMap, vals: ByteMap, offset: LogOffset) -> Result<Outcome, DbError> {
        let config = self.config()?;

        if let Some(filter) = &config.filter {
            let accepted = match filter.evaluate(&dims)? {
                Scalar::Bool(b) => b,
                Scalar::Null => false,
                other => {
                    return Err(DbError::TypeMismatch(format!(
                        "filter {} of table {} produced {} value {}",
                        filter,
                        self.name,
                        other.kind(),
                        other
                    )))
                }
            };
            if !accepted {
                self.stats.lock()?.filtered_points += 1;
                db_metrics::record_filtered(&self.name);
                return Ok(Outcome::Filtered);
            }
        }

        self.clock.advance(ts);

        let key = if config.group_by.is_empty() {
            dims.clone()
        } else {
            let mut entries = Vec::with_capacity(config.group_by.len());
            for gb in &config.group_by {
                let value = gb.expr.evaluate(&dims)?;
                if !value.is_null() {
                    entries.push((gb.name.clone(), value));
                }
            }
            ByteMap::new(entries)?
        };

        self.row_store.insert(InsertRecord {
            key,
            params: TsParams {
                timestamp: ts,
                values: vals,
            },
            dims,
            offset,
        })?;
        self.stats.lock()?.inserted_points += 1;
        db_metrics::record_inserted(&self.name);
        Ok(Outcome::Inserted)
    }

    fn halt(&self, err: DbError) {
        let error = err.to_string();
        self.set_status(TableStatus::Halted(error.clone()));
        db_metrics::record_halt(&self.name);
        self.events.on_event(DbEvent::IngestHalted {
            table: self.name.clone(),
            error,
        });
    }

    fn set_status(&self, status: TableStatus) {
        // A poisoned status lock only means another thread panicked mid-update.
        match self.status.lock() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }
}
