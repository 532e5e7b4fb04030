//! Durable, offset-addressable append log used as each stream's write-ahead log.
//!
//! File layout: an 8-byte magic plus a 4-byte version, followed by frames of
//! `[4-byte payload len][4-byte crc32][payload]` (little-endian). A frame's offset is the
//! byte position just past it.

use crate::encoding::crc32;
use crate::error::DbError;
use crate::telemetry::{db_metrics, DbEvent, DbEventListener};
use crate::types::LogOffset;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

const WAL_MAGIC: &[u8; 8] = b"RUPWAL01";
const WAL_VERSION: u32 = 1;
const WAL_HEADER_LEN: u64 = 12;
const FRAME_HEADER_LEN: u64 = 8;

/// Largest payload a single frame may carry. A declared length above this can only come
/// from a damaged frame header.
pub const MAX_RECORD_LEN: u64 = 16 * 1024 * 1024;

/// Sequential, durable log a stream's points are appended to.
pub trait AppendLog: fmt::Debug + Send + Sync {
    /// Appends all `parts` as a single record. Either the whole record is appended or
    /// none of it is.
    fn write(&self, parts: &[&[u8]]) -> Result<LogOffset, DbError>;

    /// Opens an independent reader positioned at `from`.
    fn reader(&self, from: LogOffset) -> Result<Box<dyn LogReader>, DbError>;

    /// Offset just past the last committed record.
    fn offset(&self) -> LogOffset;

    /// Rejects further appends and wakes blocked readers, which drain what is
    /// committed and then fail with [`DbError::LogClosed`].
    fn close(&self);
}

/// Blocking reader that replays records in write order.
pub trait LogReader: Send {
    fn read(&mut self) -> Result<Vec<u8>, DbError>;

    /// Offset just past the last record returned by [`LogReader::read`].
    fn offset(&self) -> LogOffset;
}

/// Options for opening a [`WriteAheadLog`].
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// `sync_data` after every append.
    pub sync: bool,
    /// How long a blocked reader sleeps before re-checking for close.
    pub poll_interval: Duration,
}

impl Default for WalOptions {
    fn default() -> Self {
        WalOptions {
            sync: true,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct Shared {
    stream: String,
    path: PathBuf,
    committed: Mutex<u64>,
    appended: Condvar,
    closed: AtomicBool,
}

/// File-backed [`AppendLog`].
#[derive(Debug)]
pub struct WriteAheadLog {
    shared: Arc<Shared>,
    file: Mutex<File>,
    options: WalOptions,
}

impl WriteAheadLog {
    /// Opens (or creates) `<dir>/<stream>.log`.
    ///
    /// Existing logs are validated frame by frame. A torn final frame left by a crash
    /// mid-append is cut off; a checksum mismatch anywhere else is reported as corruption.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        stream: &str,
        options: WalOptions,
        events: &Arc<dyn DbEventListener>,
    ) -> Result<Self, DbError> {
        fs::create_dir_all(&dir)?;
        let path = dir.as_ref().join(format!("{}.log", stream));

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let len = file.metadata()?.len();
        let committed = if len == 0 {
            write_wal_header(&mut file)?;
            WAL_HEADER_LEN
        } else {
            check_wal_header(&path, stream)?;
            let valid_len = scan_valid_len(&path, stream, len)?;
            if valid_len < len {
                file.set_len(valid_len)?;
                file.sync_data()?;
                events.on_event(DbEvent::WalTailTruncated {
                    stream: stream.to_string(),
                    valid_len,
                    discarded: len - valid_len,
                });
            }
            valid_len
        };

        events.on_event(DbEvent::StreamOpened {
            stream: stream.to_string(),
            path: path.clone(),
        });

        Ok(WriteAheadLog {
            shared: Arc::new(Shared {
                stream: stream.to_string(),
                path,
                committed: Mutex::new(committed),
                appended: Condvar::new(),
                closed: AtomicBool::new(false),
            }),
            file: Mutex::new(file),
            options,
        })
    }

    pub fn stream(&self) -> &str {
        &self.shared.stream
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Offset of the first record.
    pub fn start_offset(&self) -> LogOffset {
        LogOffset(WAL_HEADER_LEN)
    }

    fn append_failure(&self, reason: impl fmt::Display) -> DbError {
        DbError::AppendFailure {
            stream: self.shared.stream.clone(),
            reason: reason.to_string(),
        }
    }
}

impl AppendLog for WriteAheadLog {
    fn write(&self, parts: &[&[u8]]) -> Result<LogOffset, DbError> {
        let payload_len: usize = parts.iter().map(|p| p.len()).sum();
        let len = u32::try_from(payload_len)
            .ok()
            .filter(|l| u64::from(*l) <= MAX_RECORD_LEN)
            .ok_or_else(|| self.append_failure(format!("record of {} bytes too large", payload_len)))?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN as usize + payload_len);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&[0u8; 4]);
        for p in parts {
            frame.extend_from_slice(p);
        }
        let crc = crc32(&frame[FRAME_HEADER_LEN as usize..]);
        frame[4..8].copy_from_slice(&crc.to_le_bytes());

        // Holding the file lock until `committed` is bumped keeps offsets in file order.
        let mut file = self.file.lock().map_err(|e| self.append_failure(e))?;
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(self.append_failure("log closed"));
        }
        let mut committed = self.shared.committed.lock().map_err(|e| self.append_failure(e))?;

        let written = file.write_all(&frame).and_then(|_| {
            if self.options.sync {
                let start = Instant::now();
                file.sync_data()?;
                db_metrics::record_wal_fsync(start.elapsed());
            }
            Ok(())
        });
        if let Err(e) = written {
            // Roll back whatever part of the frame reached the file.
            let _ = file.set_len(*committed);
            return Err(self.append_failure(e));
        }

        *committed += frame.len() as u64;
        let offset = LogOffset(*committed);
        drop(committed);
        self.shared.appended.notify_all();
        db_metrics::record_wal_bytes_written(&self.shared.stream, frame.len() as u64);
        Ok(offset)
    }

    fn reader(&self, from: LogOffset) -> Result<Box<dyn LogReader>, DbError> {
        let committed = *self.shared.committed.lock()?;
        let position = from.0.max(WAL_HEADER_LEN);
        if position > committed {
            return Err(DbError::LogReadFailure {
                stream: self.shared.stream.clone(),
                reason: format!("offset {} is past the end of the log ({})", position, committed),
            });
        }
        let file = File::open(&self.shared.path)?;
        Ok(Box::new(WalReader {
            shared: Arc::clone(&self.shared),
            file: BufReader::new(file),
            position,
            poll_interval: self.options.poll_interval,
        }))
    }

    fn offset(&self) -> LogOffset {
        match self.shared.committed.lock() {
            Ok(c) => LogOffset(*c),
            Err(poisoned) => LogOffset(*poisoned.into_inner()),
        }
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.appended.notify_all();
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        self.close();
    }
}

struct WalReader {
    shared: Arc<Shared>,
    file: BufReader<File>,
    position: u64,
    poll_interval: Duration,
}

impl WalReader {
    fn failure(&self, reason: impl fmt::Display) -> DbError {
        DbError::LogReadFailure {
            stream: self.shared.stream.clone(),
            reason: format!("{} at offset {}", reason, self.position),
        }
    }

    fn wait_for_data(&self) -> Result<(), DbError> {
        let mut committed = self.shared.committed.lock().map_err(|e| self.failure(e))?;
        loop {
            if self.position < *committed {
                return Ok(());
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(DbError::LogClosed(self.shared.stream.clone()));
            }
            let (guard, _) = self
                .shared
                .appended
                .wait_timeout(committed, self.poll_interval)
                .map_err(|e| self.failure(e))?;
            committed = guard;
        }
    }
}

impl LogReader for WalReader {
    fn read(&mut self) -> Result<Vec<u8>, DbError> {
        self.wait_for_data()?;

        self.file
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| self.failure(e))?;
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        self.file.read_exact(&mut header).map_err(|e| self.failure(e))?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len as u64 > MAX_RECORD_LEN {
            return Err(self.failure(format!("record length {} exceeds limit", len)));
        }

        let mut payload = vec![0u8; len];
        self.file.read_exact(&mut payload).map_err(|e| self.failure(e))?;
        if crc32(&payload) != expected_crc {
            return Err(self.failure("record CRC mismatch"));
        }

        self.position += FRAME_HEADER_LEN + len as u64;
        db_metrics::record_wal_bytes_read(&self.shared.stream, payload.len() as u64);
        Ok(payload)
    }

    fn offset(&self) -> LogOffset {
        LogOffset(self.position)
    }
}

fn write_wal_header(file: &mut File) -> Result<(), DbError> {
    file.write_all(WAL_MAGIC)?;
    file.write_all(&WAL_VERSION.to_le_bytes())?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

fn check_wal_header(path: &Path, stream: &str) -> Result<(), DbError> {
    let mut f = File::open(path)?;
    let mut header = [0u8; WAL_HEADER_LEN as usize];
    let bad = |details: String| DbError::Corruption {
        details,
        stream: Some(stream.to_string()),
        offset: Some(0),
    };
    f.read_exact(&mut header)
        .map_err(|e| bad(format!("Unreadable WAL header in {:?}: {}", path, e)))?;
    if &header[..8] != WAL_MAGIC {
        return Err(bad(format!("Bad WAL magic in {:?}", path)));
    }
    let version = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
    if version != WAL_VERSION {
        return Err(bad(format!("Unsupported WAL version {} in {:?}", version, path)));
    }
    Ok(())
}

/// Returns the length of the longest prefix of whole, checksum-valid frames.
fn scan_valid_len(path: &Path, stream: &str, file_len: u64) -> Result<u64, DbError> {
    let mut reader = BufReader::new(File::open(path)?);
    reader.seek(SeekFrom::Start(WAL_HEADER_LEN))?;
    let mut pos = WAL_HEADER_LEN;
    let corruption = |offset: u64, details: String| DbError::Corruption {
        details,
        stream: Some(stream.to_string()),
        offset: Some(offset),
    };

    loop {
        let remaining = file_len - pos;
        if remaining < FRAME_HEADER_LEN {
            return Ok(pos);
        }
        let mut header = [0u8; FRAME_HEADER_LEN as usize];
        reader.read_exact(&mut header)?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if len > MAX_RECORD_LEN {
            return Err(corruption(
                pos,
                format!(
                    "WAL record at offset {} in {:?} declares {} bytes (limit {})",
                    pos, path, len, MAX_RECORD_LEN
                ),
            ));
        }
        if remaining < FRAME_HEADER_LEN + len {
            // The file ends inside this frame. That is a torn append unless a whole
            // committed frame still follows the damaged header.
            let mut tail = Vec::with_capacity((remaining - FRAME_HEADER_LEN) as usize);
            reader.read_to_end(&mut tail)?;
            if ends_with_whole_frame(&tail) {
                return Err(corruption(
                    pos,
                    format!("WAL record at offset {} in {:?} overruns later records", pos, path),
                ));
            }
            return Ok(pos);
        }
        let mut payload = vec![0u8; len as usize];
        reader.read_exact(&mut payload)?;
        if crc32(&payload) != expected_crc {
            return Err(corruption(pos, format!("WAL record CRC mismatch in {:?} at offset {}", path, pos)));
        }
        pos += FRAME_HEADER_LEN + len;
    }
}

/// Whether some suffix of `bytes` is exactly one non-empty, checksum-valid frame.
fn ends_with_whole_frame(bytes: &[u8]) -> bool {
    let header = FRAME_HEADER_LEN as usize;
    (0..bytes.len().saturating_sub(header - 1)).any(|start| {
        let h = &bytes[start..start + header];
        let len = u32::from_le_bytes([h[0], h[1], h[2], h[3]]) as usize;
        if len == 0 || start + header + len != bytes.len() {
            return false;
        }
        let crc = u32::from_le_bytes([h[4], h[5], h[6], h[7]]);
        crc32(&bytes[start + header..]) == crc
    })
}
