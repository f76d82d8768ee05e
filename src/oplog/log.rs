//! Append-only operation log file.

use crate::error::{Result, TailError};
use crate::types::{Document, Position, Value};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for log entries.
const LOG_MAGIC: &[u8; 4] = b"OPL\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

/// Entry header size: magic + version + kind + payload length.
const ENTRY_HEADER_SIZE: u64 = 4 + 1 + 1 + 4;

/// Trailing CRC32 of the payload.
const ENTRY_TRAILER_SIZE: u64 = 4;

const KIND_OP: u8 = 0;
const KIND_SEAL: u8 = 1;

/// One decoded log entry.
#[derive(Clone, Debug, PartialEq)]
pub enum LogEntry {
    /// A recorded operation.
    Op(Document),
    /// End-of-stream marker; nothing follows it.
    Seal,
}

struct WriterState {
    file: File,
    size: u64,
    writes_since_sync: u64,
    sealed: bool,
}

/// Writer side of an operation log.
pub struct OplogFile {
    /// Path to the log file.
    path: PathBuf,

    state: Mutex<WriterState>,

    /// Sync every N writes (0 is treated as 1).
    sync_interval: u64,
}

impl OplogFile {
    /// Default sync interval - sync every 100 writes for balance of durability and performance.
    pub const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create a log with default sync interval.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(path, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create a log.
    ///
    /// A torn entry at the end of the file (from a crash mid-append) is
    /// truncated away.
    pub fn open_with_sync_interval(path: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut reader = OplogReader::from_file(file.try_clone()?);
        let mut sealed = false;
        while let Some(entry) = reader.read_next()? {
            sealed = entry == LogEntry::Seal;
        }
        let size = reader.offset();

        if file.metadata()?.len() > size {
            tracing::warn!(path = %path.display(), valid_len = size, "truncating torn log tail");
            file.set_len(size)?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                file,
                size,
                writes_since_sync: 0,
                sealed,
            }),
            sync_interval: sync_interval.max(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an operation. Returns the offset it was written at.
    pub fn append(&self, doc: &Document) -> Result<u64> {
        let payload = rmp_serde::to_vec(doc)?;
        self.write_entry(KIND_OP, &payload)
    }

    /// Append the end-of-stream marker. Later appends fail.
    pub fn seal(&self) -> Result<u64> {
        let offset = self.write_entry(KIND_SEAL, &[])?;
        self.sync()?;
        Ok(offset)
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Current file size.
    pub fn size(&self) -> u64 {
        self.state.lock().size
    }

    /// Force sync all pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.sync_all()?;
        state.writes_since_sync = 0;
        Ok(())
    }

    fn write_entry(&self, kind: u8, payload: &[u8]) -> Result<u64> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(TailError::Sealed);
        }

        let payload_len = u32::try_from(payload.len())
            .map_err(|_| TailError::Serialization("entry payload exceeds 4 GiB".into()))?;

        let mut buf = Vec::with_capacity(
            (ENTRY_HEADER_SIZE + ENTRY_TRAILER_SIZE) as usize + payload.len(),
        );
        buf.extend_from_slice(LOG_MAGIC);
        buf.push(LOG_VERSION);
        buf.push(kind);
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());

        // One write per entry so readers rarely observe a partial record.
        let offset = state.size;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&buf)?;
        state.size = offset + buf.len() as u64;

        state.writes_since_sync += 1;
        if state.writes_since_sync >= self.sync_interval {
            state.file.sync_all()?;
            state.writes_since_sync = 0;
        }

        if kind == KIND_SEAL {
            state.sealed = true;
        }

        Ok(offset)
    }
}

/// Sequential reader over an operation log that may still be growing.
pub struct OplogReader {
    file: File,
    offset: u64,
}

impl OplogReader {
    /// Open for reading from the start.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_file(File::open(path)?))
    }

    fn from_file(file: File) -> Self {
        Self { file, offset: 0 }
    }

    /// Offset of the next entry to read.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reposition at an entry boundary previously returned by [`offset`](Self::offset).
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Current length of the file on disk.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Skip every complete operation currently in the file, stopping in
    /// front of a seal.
    ///
    /// Returns the newest timestamp skipped, or [`Position::MIN`] when the
    /// log holds no timestamped operation yet.
    pub fn seek_to_end(&mut self) -> Result<Position> {
        let mut head = Position::MIN;
        loop {
            let offset = self.offset;
            match self.read_next()? {
                Some(LogEntry::Op(doc)) => {
                    if let Some(ts) = doc.get("ts").and_then(Value::as_timestamp) {
                        head = head.max(ts);
                    }
                }
                Some(LogEntry::Seal) => {
                    self.offset = offset;
                    return Ok(head);
                }
                None => return Ok(head),
            }
        }
    }

    /// Read the entry at the current offset.
    ///
    /// Returns `None` when no complete entry is available yet.
    pub fn read_next(&mut self) -> Result<Option<LogEntry>> {
        let len = self.len()?;
        if len < self.offset + ENTRY_HEADER_SIZE {
            return Ok(None);
        }

        self.file.seek(SeekFrom::Start(self.offset))?;

        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;

        if &header[0..4] != LOG_MAGIC {
            return Err(TailError::InvalidFormat(format!(
                "Invalid entry magic at offset {}",
                self.offset
            )));
        }
        if header[4] != LOG_VERSION {
            return Err(TailError::InvalidFormat(format!(
                "Unsupported log version: {}",
                header[4]
            )));
        }
        let kind = header[5];
        let payload_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as u64;

        let total = ENTRY_HEADER_SIZE + payload_len + ENTRY_TRAILER_SIZE;
        if len < self.offset + total {
            return Ok(None);
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        self.file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(TailError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let entry = match kind {
            KIND_OP => LogEntry::Op(rmp_serde::from_slice(&payload)?),
            KIND_SEAL => LogEntry::Seal,
            other => {
                return Err(TailError::InvalidFormat(format!("Unknown entry kind: {other}")))
            }
        };

        self.offset += total;
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn op(ts: u64) -> Document {
        Document::new().with("ts", Position(ts)).with("ns", "app.users").with("op", "i")
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let log = OplogFile::open(dir.path().join("oplog.bin")).unwrap();

        assert_eq!(log.append(&op(1)).unwrap(), 0);
        let second = log.append(&op(2)).unwrap();
        assert!(second > 0);
        assert_eq!(log.size(), second * 2);

        let mut reader = OplogReader::open(log.path()).unwrap();
        assert_eq!(reader.read_next().unwrap(), Some(LogEntry::Op(op(1))));
        assert_eq!(reader.offset(), second);
        assert_eq!(reader.read_next().unwrap(), Some(LogEntry::Op(op(2))));
        assert_eq!(reader.read_next().unwrap(), None);
    }

    #[test]
    fn test_reader_sees_later_appends() {
        let dir = TempDir::new().unwrap();
        let log = OplogFile::open(dir.path().join("oplog.bin")).unwrap();
        let mut reader = OplogReader::open(log.path()).unwrap();

        assert_eq!(reader.read_next().unwrap(), None);
        log.append(&op(7)).unwrap();
        assert_eq!(reader.read_next().unwrap(), Some(LogEntry::Op(op(7))));
    }

    #[test]
    fn test_partial_entry_is_not_available() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oplog.bin");
        {
            let log = OplogFile::open(&path).unwrap();
            log.append(&op(1)).unwrap();
            log.sync().unwrap();
        }

        let full = std::fs::read(&path).unwrap();
        let mut torn = full.clone();
        torn.extend_from_slice(&full[..full.len() - 3]);
        std::fs::write(&path, &torn).unwrap();

        let mut reader = OplogReader::open(&path).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        assert_eq!(reader.read_next().unwrap(), None);

        // the writer recovers by truncating the torn tail
        let log = OplogFile::open(&path).unwrap();
        assert_eq!(log.size(), full.len() as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), full.len() as u64);
    }

    #[test]
    fn test_seal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oplog.bin");
        {
            let log = OplogFile::open(&path).unwrap();
            log.append(&op(1)).unwrap();
            log.seal().unwrap();
            assert!(log.is_sealed());
            assert!(matches!(log.append(&op(2)), Err(TailError::Sealed)));
        }

        let log = OplogFile::open(&path).unwrap();
        assert!(log.is_sealed());

        let mut reader = OplogReader::open(&path).unwrap();
        assert!(matches!(reader.read_next().unwrap(), Some(LogEntry::Op(_))));
        assert_eq!(reader.read_next().unwrap(), Some(LogEntry::Seal));
    }

    #[test]
    fn test_checksum_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oplog.bin");
        {
            let log = OplogFile::open(&path).unwrap();
            log.append(&op(1)).unwrap();
            log.sync().unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let mut reader = OplogReader::open(&path).unwrap();
        assert!(matches!(reader.read_next(), Err(TailError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("oplog.bin");
        std::fs::write(&path, b"garbage-garbage-garbage").unwrap();

        let mut reader = OplogReader::open(&path).unwrap();
        assert!(matches!(reader.read_next(), Err(TailError::InvalidFormat(_))));
    }

    #[test]
    fn test_seek_to_end() {
        let dir = TempDir::new().unwrap();
        let log = OplogFile::open(dir.path().join("oplog.bin")).unwrap();
        for i in 1..=5 {
            log.append(&op(i)).unwrap();
        }

        let mut reader = OplogReader::open(log.path()).unwrap();
        assert_eq!(reader.seek_to_end().unwrap(), Position(5));
        assert_eq!(reader.offset(), log.size());
        assert_eq!(reader.read_next().unwrap(), None);
    }

    #[test]
    fn test_seek_to_end_of_empty_log() {
        let dir = TempDir::new().unwrap();
        let log = OplogFile::open(dir.path().join("oplog.bin")).unwrap();

        let mut reader = OplogReader::open(log.path()).unwrap();
        assert_eq!(reader.seek_to_end().unwrap(), Position::MIN);
        assert_eq!(reader.offset(), 0);
    }

    #[test]
    fn test_seek_to_end_stops_before_seal() {
        let dir = TempDir::new().unwrap();
        let log = OplogFile::open(dir.path().join("oplog.bin")).unwrap();
        log.append(&op(7)).unwrap();
        let seal_offset = log.seal().unwrap();

        let mut reader = OplogReader::open(log.path()).unwrap();
        assert_eq!(reader.seek_to_end().unwrap(), Position(7));
        assert_eq!(reader.offset(), seal_offset);
        assert_eq!(reader.read_next().unwrap(), Some(LogEntry::Seal));
    }
}
