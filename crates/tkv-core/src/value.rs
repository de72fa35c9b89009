//! [`tkv_stream::ValueHandle`] over a single [`ByteIndex`] key (§6
//! "Cursor API" value access; §4.8). The trait's own doc comment
//! anticipates a `PageArray`-hosted overflow chain; this facade has no
//! page store underneath it, so every resize/write round-trips the
//! whole value through [`ByteIndex::get`]/[`ByteIndex::put`] instead of
//! touching an in-place overflow chain.

use std::sync::Arc;

use tkv_error::{Error, Result};
use tkv_stream::ValueHandle;

use crate::index::ByteIndex;

pub struct ByteIndexValueHandle {
    store: Arc<dyn ByteIndex>,
    key: Vec<u8>,
    bytes: Option<Vec<u8>>,
    closed: bool,
}

impl ByteIndexValueHandle {
    #[must_use]
    pub fn new(store: Arc<dyn ByteIndex>, key: Vec<u8>) -> Self {
        let bytes = store.get(&key);
        Self { store, key, bytes, closed: false }
    }
}

impl ValueHandle for ByteIndexValueHandle {
    fn exists(&self) -> bool {
        self.bytes.is_some()
    }

    fn value_length(&self) -> i64 {
        self.bytes.as_ref().map_or(-1, |b| b.len() as i64)
    }

    fn set_value_length(&mut self, new_len: i64) -> Result<()> {
        if new_len < 0 {
            self.bytes = None;
            self.store.remove(&self.key);
            return Ok(());
        }
        let new_len = new_len as usize;
        let mut bytes = self.bytes.take().unwrap_or_default();
        bytes.resize(new_len, 0);
        self.store.put(&self.key, bytes.clone());
        self.bytes = Some(bytes);
        Ok(())
    }

    fn value_read(&mut self, pos: i64, buf: &mut [u8]) -> Result<usize> {
        let Some(bytes) = self.bytes.as_ref() else {
            return Err(Error::NoSuchValue);
        };
        let pos = usize::try_from(pos).unwrap_or(bytes.len());
        if pos >= bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(bytes.len() - pos);
        buf[..n].copy_from_slice(&bytes[pos..pos + n]);
        Ok(n)
    }

    fn value_write(&mut self, pos: i64, buf: &[u8]) -> Result<()> {
        let pos = usize::try_from(pos).map_err(|_| Error::illegal_argument("negative write position"))?;
        let mut bytes = self.bytes.take().unwrap_or_default();
        let end = pos + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[pos..end].copy_from_slice(buf);
        self.store.put(&self.key, bytes.clone());
        self.bytes = Some(bytes);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::BTreeIndex;

    #[test]
    fn write_then_read_round_trips_through_the_backing_index() {
        let store: Arc<dyn ByteIndex> = Arc::new(BTreeIndex::new());
        let mut handle = ByteIndexValueHandle::new(Arc::clone(&store), b"k".to_vec());
        assert!(!handle.exists());

        handle.value_write(0, b"hello").unwrap();
        assert_eq!(store.get(b"k"), Some(b"hello".to_vec()));

        let mut buf = [0u8; 5];
        let n = handle.value_read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        handle.set_value_length(-1).unwrap();
        assert!(!handle.exists());
        assert_eq!(store.get(b"k"), None);
    }
}
