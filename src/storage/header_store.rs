// Append-only header file

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions, create_dir_all};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed-size header records, concatenated. Record `i` holds height
/// `checkpoint + i`; the record count is always derived from the file size.
///
/// Only one `HeaderStore` writes a given file. Readers get a `HeaderReader`,
/// which never looks past the last fully written record.
pub struct HeaderStore {
    path: PathBuf,
    file: File,
    record_size: usize,
    checkpoint: u64,
    records: Arc<AtomicU64>,
}

impl HeaderStore {
    /// Open or create the store. A size that is not a whole number of records
    /// is unrecoverable corruption.
    pub fn open<P: AsRef<Path>>(path: P, record_size: usize, checkpoint: u64) -> Result<Self> {
        if record_size == 0 {
            return Err(Error::Config("header record size must be positive".to_string()));
        }

        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
            && !dir.exists()
        {
            create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let size = file.metadata()?.len();
        if size % record_size as u64 != 0 {
            return Err(Error::CorruptStore(format!(
                "{} is {} bytes, not a multiple of {}",
                path.display(),
                size,
                record_size
            )));
        }

        let records = size / record_size as u64;
        log::info!(
            "Opened header store {} with {} records (checkpoint {})",
            path.display(),
            records,
            checkpoint
        );

        Ok(Self {
            path,
            file,
            record_size,
            checkpoint,
            records: Arc::new(AtomicU64::new(records)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    /// Number of stored records
    pub fn len(&self) -> u64 {
        self.records.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest stored height, None when empty
    pub fn tip(&self) -> Option<u64> {
        tip_of(self.checkpoint, self.len())
    }

    /// Height the next appended record will have
    pub fn next_height(&self) -> u64 {
        self.checkpoint + self.len()
    }

    /// Append whole records and make them durable before they become visible.
    pub fn append(&mut self, raw: &[u8]) -> Result<u64> {
        if raw.len() % self.record_size != 0 {
            return Err(Error::CorruptStore(format!(
                "refusing to append {} bytes, not a multiple of {}",
                raw.len(),
                self.record_size
            )));
        }
        if raw.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.write_durably(raw) {
            // a torn or unsynced write must not shift later records
            let kept = self.len() * self.record_size as u64;
            if let Err(rollback) = self.discard_unpublished() {
                log::error!(
                    "Could not cut {} back to {} bytes: {}",
                    self.path.display(),
                    kept,
                    rollback
                );
            }
            return Err(Error::CorruptStore(format!(
                "append to {} failed: {}",
                self.path.display(),
                e
            )));
        }

        let added = (raw.len() / self.record_size) as u64;
        self.records.fetch_add(added, Ordering::AcqRel);
        Ok(added)
    }

    fn write_durably(&mut self, raw: &[u8]) -> std::io::Result<()> {
        self.file.write_all(raw)?;
        self.file.sync_data()
    }

    /// Drop any bytes past the last published record.
    fn discard_unpublished(&self) -> std::io::Result<()> {
        self.file.set_len(self.len() * self.record_size as u64)?;
        self.file.sync_data()
    }

    /// Keep only the first `records` records. Used when rewinding past a fork.
    pub fn truncate(&mut self, records: u64) -> Result<()> {
        if records >= self.len() {
            return Ok(());
        }
        // shrink the visible count first so readers never see dropped records
        self.records.store(records, Ordering::Release);
        self.file.set_len(records * self.record_size as u64)?;
        self.file.sync_data()?;
        Ok(())
    }

    pub fn header(&self, height: u64) -> Result<Option<Vec<u8>>> {
        self.reader().header(height)
    }

    pub fn last(&self) -> Result<Option<Vec<u8>>> {
        self.reader().last()
    }

    /// Cheap read-only handle sharing this store's record count
    pub fn reader(&self) -> HeaderReader {
        HeaderReader {
            path: self.path.clone(),
            record_size: self.record_size,
            checkpoint: self.checkpoint,
            records: self.records.clone(),
        }
    }
}

/// Read-only view of a `HeaderStore`; opens the file per read.
#[derive(Clone)]
pub struct HeaderReader {
    path: PathBuf,
    record_size: usize,
    checkpoint: u64,
    records: Arc<AtomicU64>,
}

impl HeaderReader {
    pub fn len(&self) -> u64 {
        self.records.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn checkpoint(&self) -> u64 {
        self.checkpoint
    }

    pub fn tip(&self) -> Option<u64> {
        tip_of(self.checkpoint, self.len())
    }

    /// Raw record at `height`, None outside the stored range
    pub fn header(&self, height: u64) -> Result<Option<Vec<u8>>> {
        let mut records = self.headers(height, 1)?;
        Ok(records.pop())
    }

    /// Up to `count` raw records starting at `start`
    pub fn headers(&self, start: u64, count: u64) -> Result<Vec<Vec<u8>>> {
        let stored = self.len();
        if start < self.checkpoint || count == 0 {
            return Ok(Vec::new());
        }
        let first = start - self.checkpoint;
        if first >= stored {
            return Ok(Vec::new());
        }
        let count = count.min(stored - first);

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(first * self.record_size as u64))?;
        let mut buf = vec![0u8; count as usize * self.record_size];
        file.read_exact(&mut buf)?;

        Ok(buf.chunks(self.record_size).map(<[u8]>::to_vec).collect())
    }

    pub fn last(&self) -> Result<Option<Vec<u8>>> {
        match self.tip() {
            Some(tip) => self.header(tip),
            None => Ok(None),
        }
    }
}

fn tip_of(checkpoint: u64, records: u64) -> Option<u64> {
    records.checked_sub(1).map(|last| checkpoint + last)
}
