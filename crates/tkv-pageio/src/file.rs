//! File-backed [`PageArray`](crate::PageArray) implementation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tkv_error::{Error, Result};
use tkv_types::PageId;

use crate::{page_offset, CloseCause, PageArray};

/// A [`PageArray`] backed by a plain `std::fs::File`, serialized through a
/// single mutex. Grows on demand: `write_page` past the current extent
/// extends the file, rather than erroring as the mapped implementation
/// does (§4.2).
pub struct FilePageArray {
    file: Mutex<File>,
    page_size: u32,
}

impl FilePageArray {
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            page_size,
        })
    }

    #[cfg(test)]
    fn from_tempfile(file: File, page_size: u32) -> Self {
        Self {
            file: Mutex::new(file),
            page_size,
        }
    }
}

impl PageArray for FilePageArray {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn page_count(&self) -> u64 {
        let len = self.file.lock().metadata().map(|m| m.len()).unwrap_or(0);
        len / u64::from(self.page_size)
    }

    fn read_page(&self, id: PageId, buf: &mut [u8], offset: usize, len: usize) -> Result<()> {
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
        // No per-page durability primitive on a plain file; a full data
        // sync is the closest equivalent the OS offers.
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn copy_page(&self, src: PageId, dst: PageId) -> Result<()> {
        let mut buf = vec![0u8; self.page_size as usize];
        self.read_page_full(src, &mut buf)?;
        self.write_page(dst, &buf)
    }

    fn close(&self, cause: CloseCause) -> Result<()> {
        tracing::debug!(?cause, "closing file-backed page array");
        if matches!(cause, CloseCause::Requested) {
            self.sync(true)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(page_size: u32) -> FilePageArray {
        let file = tempfile::tempfile().unwrap();
        FilePageArray::from_tempfile(file, page_size)
    }

    #[test]
    fn write_then_read_round_trips() {
        let arr = array(16);
        let page = PageId::new(3);
        let data = vec![7u8; 16];
        arr.write_page(page, &data).unwrap();
        let mut out = vec![0u8; 16];
        arr.read_page_full(page, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn copy_page_duplicates_contents() {
        let arr = array(8);
        arr.write_page(PageId::new(0), &[1u8; 8]).unwrap();
        arr.copy_page(PageId::new(0), PageId::new(5)).unwrap();
        let mut out = vec![0u8; 8];
        arr.read_page_full(PageId::new(5), &mut out).unwrap();
        assert_eq!(out, vec![1u8; 8]);
    }

    #[test]
    fn write_page_rejects_wrong_length() {
        let arr = array(16);
        let err = arr.write_page(PageId::new(0), &[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::IllegalArgument(_)));
    }
}
