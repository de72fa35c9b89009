//! Fixed-extent [`PageArray`](crate::PageArray) implementation.
//!
//! §4.2 calls for a memory-mapped backend whose defining trait (unlike
//! the file-backed one) is a *fixed* extent: writes past `page_count`
//! fail with [`tkv_error::Error::DatabaseFull`] instead of growing the
//! file. A real OS mapping would normally back this, but every mapping
//! constructor in the `memmap2` crate is an `unsafe fn` (mapping a file
//! that something else concurrently truncates is undefined behavior),
//! and this workspace forbids `unsafe` outright. `MmapPageArray`
//! therefore reproduces the same fixed-capacity contract over a
//! pre-sized file rather than an actual mapping; callers see identical
//! `DatabaseFull` behavior at the page-array boundary.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tkv_error::{Error, Result};
use tkv_types::PageId;

use crate::{page_offset, CloseCause, PageArray};

pub struct MmapPageArray {
    file: Mutex<File>,
    page_size: u32,
    page_count: u64,
}

impl MmapPageArray {
    /// Create (or reopen) a fixed-extent array of exactly `page_count`
    /// pages.
    pub fn create(path: impl AsRef<Path>, page_size: u32, page_count: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(u64::from(page_size) * page_count)?;
        Ok(Self {
            file: Mutex::new(file),
            page_size,
            page_count,
        })
    }

    #[cfg(test)]
    fn from_tempfile(file: File, page_size: u32, page_count: u64) -> Result<Self> {
        file.set_len(u64::from(page_size) * page_count)?;
        Ok(Self {
            file: Mutex::new(file),
            page_size,
            page_count,
        })
    }
}

impl PageArray for MmapPageArray {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        self.page_count
    }

    fn read_page(&self, id: PageId, buf: &mut [u8], offset: usize, len: usize) -> Result<()> {
        if id.get() >= self.page_count {
            return Err(Error::DatabaseFull);
        }
        if offset + len > buf.len() {
            return Err(Error::illegal_argument("read_page range exceeds buffer"));
        }
        let mut file = self.file.lock();
        let pos = page_offset(self.page_size, id) + offset as u64;
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf[offset..offset + len])?;
        Ok(())
    }

    fn write_page(&self, id: PageId, buf: &[u8]) -> Result<()> {
        if id.get() >= self.page_count {
            return Err(Error::DatabaseFull);
        }
        if buf.len() != self.page_size as usize {
            return Err(Error::illegal_argument("write_page buffer is not page-sized"));
        }
        let mut file = self.file.lock();
        let pos = page_offset(self.page_size, id);
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self, metadata: bool) -> Result<()> {
        let file = self.file.lock();
        if metadata {
            file.sync_all()?;
        } else {
            file.sync_data()?;
        }
        Ok(())
    }

    fn sync_page(&self, _id: PageId) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn copy_page(&self, src: PageId, dst: PageId) -> Result<()> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.read_page_full(src, &mut buf)?;
        self.write_page(dst, &buf)
    }

    fn close(&self, cause: CloseCause) -> Result<()> {
        if matches!(cause, CloseCause::Requested) {
            self.sync(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(page_size: u32, page_count: u64) -> MmapPageArray {
        let file = tempfile::tempfile().unwrap();
        MmapPageArray::from_tempfile(file, page_size, page_count).unwrap()
    }

    #[test]
    fn write_within_extent_round_trips() {
        let arr = array(16, 4);
        arr.write_page(PageId::new(2), &[9u8; 16]).unwrap();
        let mut out = vec![0u8; 16];
        arr.read_page_full(PageId::new(2), &mut out).unwrap();
        assert_eq!(out, vec![9u8; 16]);
    }

    #[test]
    fn write_past_extent_is_database_full() {
        let arr = array(16, 4);
        let err = arr.write_page(PageId::new(4), &[0u8; 16]).unwrap_err();
        assert_eq!(err, Error::DatabaseFull);
    }

    #[test]
    fn read_past_extent_is_database_full() {
        let arr = array(16, 4);
        let mut out = vec![0u8; 16];
        let err = arr.read_page_full(PageId::new(10), &mut out).unwrap_err();
        assert_eq!(err, Error::DatabaseFull);
    }
}
