// src/core/state/codec.rs

//! Fixed-size record encoding and atomic file replacement.
//!
//! Records are exactly [`RECORD_SIZE`] bytes, little-endian, led by a
//! format version integer. Unused trailing bytes are zero so the schema
//! can evolve by appending fields.

use crate::core::errors::StewardError;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Every record file is exactly this many bytes.
pub const RECORD_SIZE: usize = 1024;

/// An append-only writer over a zeroed fixed-size record.
pub struct RecordWriter {
    buf: Box<[u8; RECORD_SIZE]>,
    pos: usize,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; RECORD_SIZE]),
            pos: 0,
        }
    }

    fn put(&mut self, bytes: &[u8]) {
        let end = self.pos + bytes.len();
        assert!(end <= RECORD_SIZE, "record overflow at offset {}", self.pos);
        self.buf[self.pos..end].copy_from_slice(bytes);
        self.pos = end;
    }

    pub fn put_u8(&mut self, v: u8) {
        self.put(&[v]);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i64(&mut self, v: i64) {
        self.put(&v.to_le_bytes());
    }

    /// Skips ahead, leaving the skipped bytes zero.
    pub fn pad_to(&mut self, offset: usize) {
        assert!(offset >= self.pos && offset <= RECORD_SIZE);
        self.pos = offset;
    }

    pub fn finish(self) -> Box<[u8; RECORD_SIZE]> {
        self.buf
    }
}

impl Default for RecordWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor over a fixed-size record buffer.
pub struct RecordReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StewardError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(StewardError::StateCorrupt(format!(
                "record truncated at offset {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, StewardError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u32(&mut self) -> Result<u32, StewardError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_i32(&mut self) -> Result<i32, StewardError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64, StewardError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> Result<i64, StewardError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn skip_to(&mut self, offset: usize) {
        self.pos = offset;
    }
}

/// Reads a whole record file. A missing file maps to `StateMissing`; a
/// file of the wrong size is corrupt.
pub fn read_record_file(path: &Path) -> Result<Vec<u8>, StewardError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StewardError::StateMissing);
        }
        Err(e) => return Err(e.into()),
    };
    if bytes.len() != RECORD_SIZE {
        return Err(StewardError::StateCorrupt(format!(
            "'{}' is {} bytes, expected {RECORD_SIZE}",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Atomically replaces a record file: write to a temporary sibling, fsync,
/// then rename over the destination.
pub fn write_record_file(path: &Path, buf: &[u8; RECORD_SIZE]) -> Result<(), StewardError> {
    let temp_path = path.with_extension(format!("tmp.{}", rand::random::<u32>()));
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(buf)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        // Leave no temp file behind on failure.
        let _ = fs::remove_file(&temp_path);
    }
    result.map_err(StewardError::from)
}
