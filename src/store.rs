//! Sequential append/read record store.
//!
//! The on-disk unit behind all sidecar persistence: a flat file of opaque
//! records, written once in order and read back in order. Each record is
//! framed as `[payload length: u32 LE][crc32 of payload: u32 LE][payload]`.
//!
//! A store is either appending (after [`RecordStore::create`]) or reading
//! (after [`RecordStore::open`]); never both. Opening scans the whole file
//! once, so framing damage and truncated tails surface at open time and
//! `record_count` is free afterwards. Single writer, single reader, no
//! concurrent access to the same path.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, error};

use crate::error::PaginateError;

const RECORD_HEADER_LEN: u64 = 8;

#[derive(Clone, Copy, Debug)]
struct RecordLoc {
    /// File offset of the payload (past the header).
    offset: u64,
    len: u32,
    crc: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Append,
    Read,
}

/// Append-only record file with a sequential read cursor.
#[derive(Debug)]
pub struct RecordStore {
    file: File,
    mode: Mode,
    records: Vec<RecordLoc>,
    cursor: Option<usize>,
}

impl RecordStore {
    /// Create a new store at `path`, truncating anything already there.
    /// The store is in append mode; records go in with [`Self::add_record`].
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, PaginateError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                error!("can't create record store {}: {}", path.display(), e);
                PaginateError::from(e)
            })?;
        debug!("created record store {}", path.display());
        Ok(Self {
            file,
            mode: Mode::Append,
            records: Vec::with_capacity(8),
            cursor: None,
        })
    }

    /// Open an existing store at `path` for sequential reading.
    ///
    /// The whole file is scanned and its framing validated; a header or
    /// payload that runs past end-of-file fails the open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PaginateError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| {
            error!("can't open record store {}: {}", path.display(), e);
            PaginateError::from(e)
        })?;

        let file_len = file.metadata()?.len();
        let mut records = Vec::with_capacity(8);
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        let mut pos = 0u64;
        while pos < file_len {
            if file_len - pos < RECORD_HEADER_LEN {
                error!("record store {}: truncated record header", path.display());
                return Err(PaginateError::Format("truncated record header".into()));
            }
            file.read_exact(&mut header)?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            pos += RECORD_HEADER_LEN;
            if file_len - pos < u64::from(len) {
                error!(
                    "record store {}: record of {} bytes runs past end of file",
                    path.display(),
                    len
                );
                return Err(PaginateError::Format("record runs past end of file".into()));
            }
            records.push(RecordLoc {
                offset: pos,
                len,
                crc,
            });
            pos += u64::from(len);
            file.seek(SeekFrom::Start(pos))?;
        }

        debug!(
            "opened record store {} ({} records)",
            path.display(),
            records.len()
        );
        Ok(Self {
            file,
            mode: Mode::Read,
            records,
            cursor: None,
        })
    }

    /// Append one opaque record. Only valid in append mode.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<(), PaginateError> {
        if self.mode != Mode::Append {
            error!("add_record on a read-mode store");
            return Err(PaginateError::Io("store is open read-only".into()));
        }
        let len = u32::try_from(payload.len()).map_err(|_| {
            error!("record of {} bytes exceeds framing limit", payload.len());
            PaginateError::Format("record too large".into())
        })?;
        let crc = crc32fast::hash(payload);

        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        header[0..4].copy_from_slice(&len.to_le_bytes());
        header[4..8].copy_from_slice(&crc.to_le_bytes());
        self.file.write_all(&header)?;
        self.file.write_all(payload)?;

        let offset = self
            .records
            .last()
            .map(|r| r.offset + u64::from(r.len) + RECORD_HEADER_LEN)
            .unwrap_or(RECORD_HEADER_LEN);
        self.records.push(RecordLoc { offset, len, crc });
        Ok(())
    }

    /// Move the read cursor to the first record. False if the store is
    /// empty or in append mode.
    pub fn advance_to_first(&mut self) -> bool {
        if self.mode != Mode::Read || self.records.is_empty() {
            return false;
        }
        self.cursor = Some(0);
        true
    }

    /// Move the read cursor to the next record. False at end of store or
    /// if the cursor was never positioned.
    pub fn advance_to_next(&mut self) -> bool {
        match self.cursor {
            Some(idx) if idx + 1 < self.records.len() => {
                self.cursor = Some(idx + 1);
                true
            }
            _ => false,
        }
    }

    /// Payload size of the record under the cursor; 0 with no cursor.
    pub fn current_record_size(&self) -> usize {
        self.cursor
            .map(|idx| self.records[idx].len as usize)
            .unwrap_or(0)
    }

    /// Read the record under the cursor into `buf`.
    ///
    /// `buf` must be exactly [`Self::current_record_size`] bytes; the read
    /// fails otherwise, and on a checksum mismatch.
    pub fn read_current_record(&mut self, buf: &mut [u8]) -> Result<(), PaginateError> {
        let Some(idx) = self.cursor else {
            error!("read_current_record with no positioned cursor");
            return Err(PaginateError::Io("no current record".into()));
        };
        let loc = self.records[idx];
        if buf.len() != loc.len as usize {
            error!(
                "record read size mismatch: buffer {} bytes, record {} bytes",
                buf.len(),
                loc.len
            );
            return Err(PaginateError::Format("record size mismatch".into()));
        }
        self.file.seek(SeekFrom::Start(loc.offset))?;
        self.file.read_exact(buf)?;
        if crc32fast::hash(buf) != loc.crc {
            error!("record {} checksum mismatch", idx);
            return Err(PaginateError::Format("record checksum mismatch".into()));
        }
        Ok(())
    }

    /// Number of records in the store.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Close the store, flushing appended data to disk.
    pub fn close(mut self) -> Result<(), PaginateError> {
        if self.mode == Mode::Append {
            self.file.flush()?;
            self.file.sync_all()?;
        }
        Ok(())
    }
}
