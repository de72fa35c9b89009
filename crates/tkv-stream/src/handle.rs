//! The random-access value abstraction that [`crate::InputStream`] and
//! [`crate::OutputStream`] buffer over (§4.8).

use tkv_error::Result;

/// A byte-addressable, resizable value. `tkv-core` implements this over
/// a `PageArray`-hosted overflow chain; tests here use [`VecValue`].
pub trait ValueHandle: Send {
    /// Whether the value this handle addresses currently exists.
    fn exists(&self) -> bool;

    /// Current length in bytes, or `-1` if the value does not exist.
    fn value_length(&self) -> i64;

    /// Resize the value. Growing zero-fills; a negative `new_len`
    /// deletes it.
    fn set_value_length(&mut self, new_len: i64) -> Result<()>;

    /// Read up to `buf.len()` bytes starting at `pos`. Returns the
    /// number of bytes actually read (`0` at end of value).
    ///
    /// # Errors
    /// [`tkv_error::Error::NoSuchValue`] if the value does not exist.
    fn value_read(&mut self, pos: i64, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf` at `pos`, extending the value on overrun.
    fn value_write(&mut self, pos: i64, buf: &[u8]) -> Result<()>;

    /// Whether this handle has already been released.
    fn is_closed(&self) -> bool;

    /// Release the handle. Idempotent.
    fn close(&mut self);
}

/// An in-memory [`ValueHandle`] used by tests and as a reference
/// implementation for callers with no page store.
#[derive(Default)]
pub struct VecValue {
    bytes: Option<Vec<u8>>,
    closed: bool,
}

impl VecValue {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            closed: false,
        }
    }

    #[must_use]
    pub fn missing() -> Self {
        Self {
            bytes: None,
            closed: false,
        }
    }
}

impl ValueHandle for VecValue {
    fn exists(&self) -> bool {
        self.bytes.is_some()
    }

    fn value_length(&self) -> i64 {
        self.bytes.as_ref().map_or(-1, |b| b.len() as i64)
    }

    fn set_value_length(&mut self, new_len: i64) -> Result<()> {
        if new_len < 0 {
            self.bytes = None;
            return Ok(());
        }
        let new_len = new_len as usize;
        let bytes = self.bytes.get_or_insert_with(Vec::new);
        bytes.resize(new_len, 0);
        Ok(())
    }

    fn value_read(&mut self, pos: i64, buf: &mut [u8]) -> Result<usize> {
        let Some(bytes) = self.bytes.as_ref() else {
            return Err(tkv_error::Error::NoSuchValue);
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
        let pos = usize::try_from(pos).map_err(|_| tkv_error::Error::illegal_argument("negative write position"))?;
        let bytes = self.bytes.get_or_insert_with(Vec::new);
        let end = pos + buf.len();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        bytes[pos..end].copy_from_slice(buf);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
