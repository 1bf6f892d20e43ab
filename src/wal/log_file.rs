use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{
    types::{
        Lsn, TransactionId,
        error::{DatabaseError, Result},
    },
    utils::{failpoint, hash::frame_checksum},
    wal::entry::{LogBody, LogEntry},
};

/// Magic number at the start of log files: "LMBGWAL\0"
const WAL_MAGIC: [u8; 8] = *b"LMBGWAL\0";
const WAL_VERSION: u32 = 1;
/// magic (8) + version (4) + reserved (4) + start_lsn (8)
pub const WAL_HEADER_SIZE: u64 = 24;
/// length prefix (4) + CRC32 suffix (4)
const FRAME_OVERHEAD: usize = 8;

fn encode_header(start_lsn: Lsn) -> [u8; WAL_HEADER_SIZE as usize] {
    let mut header = [0u8; WAL_HEADER_SIZE as usize];
    header[0..8].copy_from_slice(&WAL_MAGIC);
    header[8..12].copy_from_slice(&WAL_VERSION.to_le_bytes());
    header[16..24].copy_from_slice(&start_lsn.to_le_bytes());
    header
}

fn encode_entry(entry: &LogEntry) -> Result<Vec<u8>> {
    let data = bincode::serde::encode_to_vec(entry, bincode::config::standard()).map_err(|e| {
        DatabaseError::SerializationError {
            details: e.to_string(),
        }
    })?;
    let mut frame = Vec::with_capacity(data.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
    frame.extend_from_slice(&data);
    frame.extend_from_slice(&frame_checksum(&data).to_le_bytes());
    Ok(frame)
}

/// Creates an empty log whose first entry will get `start_lsn`.
pub fn create_log<P: AsRef<Path>>(path: P, start_lsn: Lsn) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&encode_header(start_lsn))?;
    file.sync_all()?;
    Ok(())
}

/// Everything readable from a log file.
#[derive(Debug)]
pub struct LogScan {
    pub entries: Vec<LogEntry>,
    pub start_lsn: Lsn,
    /// Length of the prefix holding the header and all intact frames.
    pub valid_len: u64,
    /// Bytes after the last intact frame (a torn final write).
    pub torn_bytes: u64,
}

impl LogScan {
    pub fn next_lsn(&self) -> Lsn {
        self.entries
            .last()
            .map(|entry| entry.lsn + 1)
            .unwrap_or(self.start_lsn)
    }
}

pub struct LogReader;

impl LogReader {
    /// Reads every intact entry. A torn or corrupt final frame ends the log;
    /// a bad header or a gap in the LSN sequence fails recovery.
    pub fn scan<P: AsRef<Path>>(path: P) -> Result<LogScan> {
        let bytes = fs::read(path.as_ref())?;
        if bytes.len() < WAL_HEADER_SIZE as usize {
            return Err(DatabaseError::recovery("log file too small for header"));
        }
        if bytes[0..8] != WAL_MAGIC {
            return Err(DatabaseError::recovery(format!(
                "invalid log magic number: {:?}",
                &bytes[0..8]
            )));
        }
        let version = u32::from_le_bytes(read_array(&bytes, 8));
        if version != WAL_VERSION {
            return Err(DatabaseError::recovery(format!(
                "unsupported log version: {version}, expected {WAL_VERSION}"
            )));
        }
        let start_lsn = u64::from_le_bytes(read_array(&bytes, 16));

        let mut entries: Vec<LogEntry> = Vec::new();
        let mut position = WAL_HEADER_SIZE as usize;
        loop {
            let remaining = bytes.len() - position;
            if remaining < 4 {
                break;
            }
            let len = u32::from_le_bytes(read_array(&bytes, position)) as usize;
            if remaining < len + FRAME_OVERHEAD {
                break;
            }
            let data = &bytes[position + 4..position + 4 + len];
            let crc = u32::from_le_bytes(read_array(&bytes, position + 4 + len));
            if crc != frame_checksum(data) {
                break;
            }
            let (entry, _): (LogEntry, usize) =
                bincode::serde::decode_from_slice(data, bincode::config::standard()).map_err(
                    |e| DatabaseError::recovery(format!("undecodable log entry at {position}: {e}")),
                )?;

            let expected = entries.last().map(|last| last.lsn + 1).unwrap_or(start_lsn);
            if entry.lsn != expected {
                return Err(DatabaseError::recovery(format!(
                    "log sequence broken at offset {position}: expected lsn {expected}, found {}",
                    entry.lsn
                )));
            }
            entries.push(entry);
            position += len + FRAME_OVERHEAD;
        }

        let torn_bytes = (bytes.len() - position) as u64;
        if torn_bytes > 0 {
            warn!(torn_bytes, offset = position, "log ends with an incomplete frame");
        }

        Ok(LogScan {
            entries,
            start_lsn,
            valid_len: position as u64,
            torn_bytes,
        })
    }
}

/// Append side of the log. Appends are buffered; `force` makes everything
/// appended so far durable.
pub struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    buffer_size: usize,
    next_lsn: Lsn,
    durable_lsn: Lsn,
}

impl LogWriter {
    /// Opens the log for appending after the intact prefix found by `scan`,
    /// cutting off any torn tail.
    pub fn open<P: AsRef<Path>>(path: P, scan: &LogScan, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if scan.torn_bytes > 0 {
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        let mut writer = BufWriter::with_capacity(buffer_size, file);
        writer.seek(SeekFrom::Start(scan.valid_len))?;

        let next_lsn = scan.next_lsn();
        Ok(Self {
            path,
            writer,
            buffer_size,
            next_lsn,
            durable_lsn: next_lsn - 1,
        })
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    /// Highest LSN known to be on stable storage.
    pub fn durable_lsn(&self) -> Lsn {
        self.durable_lsn
    }

    pub fn append(
        &mut self,
        xid: TransactionId,
        prev_lsn: Option<Lsn>,
        body: LogBody,
    ) -> Result<Lsn> {
        failpoint::maybe_fail(failpoint::LOG_APPEND)?;
        let entry = LogEntry {
            lsn: self.next_lsn,
            xid,
            prev_lsn,
            body,
        };
        let frame = encode_entry(&entry)?;
        self.writer.write_all(&frame)?;
        self.next_lsn += 1;
        Ok(entry.lsn)
    }

    pub fn force(&mut self) -> Result<()> {
        if self.durable_lsn + 1 == self.next_lsn {
            return Ok(());
        }
        failpoint::maybe_fail(failpoint::LOG_FORCE)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.durable_lsn = self.next_lsn - 1;
        Ok(())
    }

    /// Replaces the log with an empty one that continues the LSN sequence.
    /// Only safe once every page change is on disk and no transaction
    /// needs its entries.
    pub fn truncate(&mut self) -> Result<()> {
        self.force()?;
        let directory = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut replacement = NamedTempFile::new_in(directory)?;
        replacement.write_all(&encode_header(self.next_lsn))?;
        replacement.as_file().sync_all()?;
        replacement
            .persist(&self.path)
            .map_err(|e| DatabaseError::Io(e.error))?;

        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        writer.seek(SeekFrom::Start(WAL_HEADER_SIZE))?;
        self.writer = writer;
        debug!(start_lsn = self.next_lsn, "truncated log");
        Ok(())
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}
