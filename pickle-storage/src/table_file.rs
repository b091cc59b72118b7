//! Build-once table files.
//!
//! A table is written in one sequential pass by [`TableWriter`] and becomes
//! readable only after [`TableWriter::finish`] has written the index and
//! footer. Duplicate keys are kept; every occurrence is indexed.
//!
//! Layout:
//! ```text
//! header   MAGIC(4) VERSION(2) record_count(8)
//! data     { key_len(4) val_len(4) key val }*
//! index    { key_len(4) offset(8) key }*        insertion order
//! footer   index_offset(8) record_count(8) data_crc(4) FOOTER_MAGIC(4)
//! ```

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StorageError;

pub const MAGIC: &[u8; 4] = b"PKLT";
pub const FOOTER_MAGIC: &[u8; 4] = b"PKLF";
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: u64 = 14;
pub const FOOTER_SIZE: u64 = 24;

fn corrupt(reason: impl Into<String>) -> StorageError {
    StorageError::TableFileError {
        reason: reason.into(),
    }
}

/// Metadata returned once a table has been finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub path: PathBuf,
    pub record_count: u64,
    pub file_size: u64,
}

/// Sequential writer for a new table file.
pub struct TableWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    record_count: u64,
    current_offset: u64,
    /// (key, offset) per record, in insertion order
    index: Vec<(Vec<u8>, u64)>,
    data_hasher: crc32fast::Hasher,
}

impl TableWriter {
    /// Create (or truncate) the file at `path` and write a placeholder header.
    pub fn create(path: &Path) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?; // patched in finish

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            record_count: 0,
            current_offset: HEADER_SIZE,
            index: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one record. Keys need not be unique or sorted.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let key_len = u32::try_from(key.len()).map_err(|_| corrupt("key too large"))?;
        let val_len = u32::try_from(value.len()).map_err(|_| corrupt("value too large"))?;

        let key_len_bytes = key_len.to_le_bytes();
        let val_len_bytes = val_len.to_le_bytes();
        for part in [&key_len_bytes[..], &val_len_bytes[..], key, value] {
            self.writer.write_all(part)?;
            self.data_hasher.update(part);
        }

        self.index.push((key.to_vec(), self.current_offset));
        self.current_offset += 8 + key.len() as u64 + value.len() as u64;
        self.record_count += 1;
        Ok(())
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Push buffered bytes to the OS. The table is still unreadable until
    /// [`finish`](Self::finish).
    pub fn flush(&mut self) -> Result<(), StorageError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Write the index block and footer, patch the header, and fsync.
    pub fn finish(mut self) -> Result<TableSummary, StorageError> {
        let index_offset = self.current_offset;

        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        let data_crc = self.data_hasher.finalize();
        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&self.record_count.to_le_bytes())?;
        self.writer.write_all(&data_crc.to_le_bytes())?;
        self.writer.write_all(FOOTER_MAGIC)?;
        self.writer.flush()?;

        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| corrupt(format!("failed to flush table: {}", e)))?;
        file.seek(SeekFrom::Start(6))?; // after magic + version
        file.write_all(&self.record_count.to_le_bytes())?;
        file.sync_all()?;

        let file_size = file.metadata()?.len();
        Ok(TableSummary {
            path: self.path,
            record_count: self.record_count,
            file_size,
        })
    }
}

fn read_u32(r: &mut impl Read) -> Result<u32, StorageError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(r: &mut impl Read) -> Result<u64, StorageError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read one data record, refusing lengths that run past `limit`.
fn read_record(
    r: &mut impl Read,
    offset: u64,
    limit: u64,
) -> Result<(Vec<u8>, Vec<u8>), StorageError> {
    let key_len = read_u32(r)? as u64;
    let val_len = read_u32(r)? as u64;
    if offset + 8 + key_len + val_len > limit {
        return Err(corrupt(format!("record at {} overruns data section", offset)));
    }
    let mut key = vec![0u8; key_len as usize];
    r.read_exact(&mut key)?;
    let mut value = vec![0u8; val_len as usize];
    r.read_exact(&mut value)?;
    Ok((key, value))
}

/// Read-only view over a finalized table.
pub struct TableReader {
    path: PathBuf,
    file: Mutex<File>,
    /// key -> offsets of every occurrence, in insertion order
    index: HashMap<Vec<u8>, Vec<u64>>,
    record_count: u64,
    index_offset: u64,
}

impl TableReader {
    /// Open a finalized table, verifying header, footer, and data checksum.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE + FOOTER_SIZE {
            return Err(corrupt("table not finalized: file too short"));
        }

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(corrupt("bad header magic"));
        }
        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        if u16::from_le_bytes(version) != VERSION {
            return Err(corrupt(format!(
                "unsupported version {}",
                u16::from_le_bytes(version)
            )));
        }
        let header_count = read_u64(&mut file)?;

        file.seek(SeekFrom::Start(file_len - FOOTER_SIZE))?;
        let index_offset = read_u64(&mut file)?;
        let record_count = read_u64(&mut file)?;
        let data_crc = read_u32(&mut file)?;
        file.read_exact(&mut magic)?;
        if &magic != FOOTER_MAGIC {
            return Err(corrupt("table not finalized: footer missing"));
        }
        if header_count != record_count {
            return Err(corrupt("header and footer record counts differ"));
        }
        if index_offset < HEADER_SIZE || index_offset > file_len - FOOTER_SIZE {
            return Err(corrupt("index offset out of bounds"));
        }

        // Verify the data section checksum.
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let n = remaining.min(chunk.len() as u64) as usize;
            file.read_exact(&mut chunk[..n])?;
            hasher.update(&chunk[..n]);
            remaining -= n as u64;
        }
        if hasher.finalize() != data_crc {
            return Err(corrupt("data checksum mismatch"));
        }

        // Load the index block.
        let index_end = file_len - FOOTER_SIZE;
        let mut index: HashMap<Vec<u8>, Vec<u64>> = HashMap::new();
        let mut reader = BufReader::new(&mut file);
        reader.seek(SeekFrom::Start(index_offset))?;
        let mut pos = index_offset;
        for _ in 0..record_count {
            let key_len = read_u32(&mut reader)? as u64;
            let offset = read_u64(&mut reader)?;
            if pos + 12 + key_len > index_end || offset >= index_offset {
                return Err(corrupt("index entry out of bounds"));
            }
            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            index.entry(key).or_default().push(offset);
            pos += 12 + key_len;
        }
        drop(reader);

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            record_count,
            index_offset,
        })
    }

    fn read_at(&self, offset: u64) -> Result<(Vec<u8>, Vec<u8>), StorageError> {
        let mut file = self.file.lock().map_err(|e| StorageError::ReadError {
            reason: e.to_string(),
        })?;
        file.seek(SeekFrom::Start(offset))?;
        read_record(&mut *file, offset, self.index_offset)
    }

    /// Value of the first indexed occurrence of `key`.
    pub fn find(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        match self.index.get(key).and_then(|offsets| offsets.first()) {
            Some(&offset) => Ok(Some(self.read_at(offset)?.1)),
            None => Ok(None),
        }
    }

    /// Values of every occurrence of `key`, in insertion order.
    pub fn find_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, StorageError> {
        let Some(offsets) = self.index.get(key) else {
            return Ok(Vec::new());
        };
        offsets
            .iter()
            .map(|&offset| self.read_at(offset).map(|(_, v)| v))
            .collect()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Total records, duplicates included.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Stream every record in physical (insertion) order.
    pub fn iter(&self) -> Result<TableIter, StorageError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(TableIter {
            reader,
            pos: HEADER_SIZE,
            end: self.index_offset,
        })
    }
}

/// Lazy sequential cursor over a table's data section.
pub struct TableIter {
    reader: BufReader<File>,
    pos: u64,
    end: u64,
}

impl Iterator for TableIter {
    type Item = Result<(Vec<u8>, Vec<u8>), StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        match read_record(&mut self.reader, self.pos, self.end) {
            Ok((key, value)) => {
                self.pos += 8 + key.len() as u64 + value.len() as u64;
                Some(Ok((key, value)))
            }
            Err(e) => {
                // A broken record ends the scan.
                self.pos = self.end;
                Some(Err(e))
            }
        }
    }
}
