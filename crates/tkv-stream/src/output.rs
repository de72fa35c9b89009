//! Buffered positional writer (§4.8).

use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::{Error, Result};

use crate::handle::ValueHandle;

const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Buffers writes to a shared [`ValueHandle`]; flushes on overflow and
/// on close (§4.8).
pub struct OutputStream<H: ValueHandle> {
    handle: Arc<Mutex<H>>,
    pos: i64,
    buf: Vec<u8>,
    len: usize,
    closed: bool,
}

impl<H: ValueHandle> OutputStream<H> {
    #[must_use]
    pub fn new(handle: Arc<Mutex<H>>, pos: i64, buf_size: usize) -> Self {
        let cap = if buf_size == 0 { DEFAULT_BUF_SIZE } else { buf_size };
        Self {
            handle,
            pos,
            buf: vec![0; cap],
            len: 0,
            closed: false,
        }
    }

    fn flush(&mut self) -> Result<()> {
        if self.len == 0 {
            return Ok(());
        }
        let mut handle = self.handle.lock();
        handle.value_write(self.pos, &self.buf[..self.len])?;
        self.pos += self.len as i64;
        self.len = 0;
        Ok(())
    }

    /// Append `data`, flushing through to the handle whenever the
    /// internal buffer fills.
    ///
    /// # Errors
    /// [`Error::IllegalState`] if the stream is closed.
    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::illegal_state("write on a closed output stream"));
        }
        while !data.is_empty() {
            if self.len == self.buf.len() {
                self.flush()?;
            }
            let n = data.len().min(self.buf.len() - self.len);
            self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
            self.len += n;
            data = &data[n..];
        }
        Ok(())
    }

    /// Flush, clear the buffer, then release the underlying value
    /// handle. Idempotent, and a no-op if the handle was already
    /// closed by someone else (§4.8).
    ///
    /// # Errors
    /// Propagates a failed final flush.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.flush();
        if let Err(err) = &result {
            tracing::debug!(?err, "output stream close flush failed");
        }
        self.len = 0;
        let mut handle = self.handle.lock();
        if !handle.is_closed() {
            handle.close();
        }
        result
    }
}
