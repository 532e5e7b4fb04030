use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not acceptable for
/// production. Instead, callers can provide an implementation that forwards these events to
/// `tracing`, `log`, metrics, or custom sinks.
pub trait DbEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: DbEvent);
}

/// Structured events emitted by the core.
#[derive(Debug, Clone)]
pub enum DbEvent {
    StreamOpened { stream: String, path: PathBuf },
    /// A partially written record was found at the end of a log and cut off.
    WalTailTruncated { stream: String, valid_len: u64, discarded: u64 },

    IngestStarted { table: String, stream: String, from_offset: u64 },
    IngestStopped { table: String },
    /// Unrecoverable ingestion failure. The table no longer consumes its stream.
    IngestHalted { table: String, error: String },
    IngestThroughput {
        table: String,
        elapsed: Duration,
        bytes_read: u64,
        inserted: u64,
        skipped: u64,
    },

    TableReconfigured { table: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl DbEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: DbEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn DbEventListener> {
    Arc::new(NoopEventListener)
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Emitting metrics is effectively a no-op until the embedding application installs a
/// recorder; call [`db_metrics::describe_all`] once after installing one.
pub mod db_metrics {
    use std::time::Duration;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    pub const INGEST_POINTS: &str = "rollupdb_ingest_points";
    pub const FILTERED_POINTS: &str = "rollupdb_filtered_points";
    pub const SKIPPED_POINTS: &str = "rollupdb_skipped_points";
    pub const INGEST_HALTS: &str = "rollupdb_ingest_halts";

    pub const WAL_BYTES_WRITTEN: &str = "rollupdb_wal_bytes_written";
    pub const WAL_BYTES_READ: &str = "rollupdb_wal_bytes_read";
    pub const WAL_FSYNC_DURATION_SECONDS: &str = "rollupdb_wal_fsync_duration_seconds";

    #[inline]
    pub fn record_inserted(table: &str) {
        ::metrics::counter!(INGEST_POINTS, "table" => table.to_string()).increment(1);
    }

    #[inline]
    pub fn record_filtered(table: &str) {
        ::metrics::counter!(FILTERED_POINTS, "table" => table.to_string()).increment(1);
    }

    #[inline]
    pub fn record_skipped(table: &str) {
        ::metrics::counter!(SKIPPED_POINTS, "table" => table.to_string()).increment(1);
    }

    #[inline]
    pub fn record_halt(table: &str) {
        ::metrics::counter!(INGEST_HALTS, "table" => table.to_string()).increment(1);
    }

    #[inline]
    pub fn record_wal_bytes_written(stream: &str, bytes: u64) {
        if bytes > 0 {
            ::metrics::counter!(WAL_BYTES_WRITTEN, "stream" => stream.to_string()).increment(bytes);
        }
    }

    #[inline]
    pub fn record_wal_bytes_read(stream: &str, bytes: u64) {
        if bytes > 0 {
            ::metrics::counter!(WAL_BYTES_READ, "stream" => stream.to_string()).increment(bytes);
        }
    }

    #[inline]
    pub fn record_wal_fsync(duration: Duration) {
        ::metrics::histogram!(WAL_FSYNC_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    pub fn describe_all() {
        describe_counter!(
            INGEST_POINTS,
            Unit::Count,
            "Total number of points handed to a table's row store."
        );
        describe_counter!(
            FILTERED_POINTS,
            Unit::Count,
            "Total number of points rejected by a table's WHERE filter."
        );
        describe_counter!(
            SKIPPED_POINTS,
            Unit::Count,
            "Total number of points older than a table's retention window."
        );
        describe_counter!(
            INGEST_HALTS,
            Unit::Count,
            "Number of table ingestion workers halted by an unrecoverable error."
        );
        describe_counter!(
            WAL_BYTES_WRITTEN,
            Unit::Bytes,
            "Total number of record bytes appended to stream logs."
        );
        describe_counter!(
            WAL_BYTES_READ,
            Unit::Bytes,
            "Total number of record bytes read back by table workers."
        );
        describe_histogram!(
            WAL_FSYNC_DURATION_SECONDS,
            Unit::Seconds,
            "Duration of log sync_data calls."
        );
    }
}
