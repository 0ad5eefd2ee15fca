use super::error::StorageError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Destination for verified pieces.
///
/// Called from inside the piece tracker's critical section, so
/// implementations should return promptly.
pub trait PieceSink: Send + Sync {
    fn write(&self, offset: u64, data: Bytes) -> Result<(), StorageError>;
}

/// Writes pieces into one file sized to the torrent's total length.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
    capacity: u64,
}

impl FileSink {
    /// Creates (or truncates) `path` and preallocates `total_length` bytes.
    pub fn create(path: impl AsRef<Path>, total_length: u64) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(total_length)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
            capacity: total_length,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes written data to disk.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.file.lock().sync_data()?;
        Ok(())
    }
}

impl PieceSink for FileSink {
    fn write(&self, offset: u64, data: Bytes) -> Result<(), StorageError> {
        let in_bounds = offset
            .checked_add(data.len() as u64)
            .is_some_and(|end| end <= self.capacity);
        if !in_bounds {
            return Err(StorageError::OutOfBounds {
                offset,
                length: data.len(),
                capacity: self.capacity,
            });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        Ok(())
    }
}

/// Keeps every write in memory, in arrival order.
#[derive(Default)]
pub struct MemorySink {
    writes: Mutex<Vec<(u64, Bytes)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(offset, data)` pairs received so far, in call order.
    pub fn writes(&self) -> Vec<(u64, Bytes)> {
        self.writes.lock().clone()
    }

    /// Lays the writes out into a buffer of `total_length` bytes.
    pub fn assemble(&self, total_length: u64) -> Vec<u8> {
        let mut out = vec![0u8; total_length as usize];
        for (offset, data) in self.writes.lock().iter() {
            let start = *offset as usize;
            let end = (start + data.len()).min(out.len());
            if start < end {
                out[start..end].copy_from_slice(&data[..end - start]);
            }
        }
        out
    }
}

impl PieceSink for MemorySink {
    fn write(&self, offset: u64, data: Bytes) -> Result<(), StorageError> {
        self.writes.lock().push((offset, data));
        Ok(())
    }
}
