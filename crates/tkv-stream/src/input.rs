//! Buffered positional reader (§4.8).

use std::sync::Arc;

use parking_lot::Mutex;
use tkv_error::{Error, Result};

use crate::handle::ValueHandle;

const DEFAULT_BUF_SIZE: usize = 8 * 1024;

/// Buffers reads from a shared [`ValueHandle`], maintaining
/// `{pos, buf, start, end}` per §4.8.
pub struct InputStream<H: ValueHandle> {
    handle: Arc<Mutex<H>>,
    pos: i64,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    closed: bool,
}

impl<H: ValueHandle> InputStream<H> {
    #[must_use]
    pub fn new(handle: Arc<Mutex<H>>, pos: i64, buf_size: usize) -> Self {
        let cap = if buf_size == 0 { DEFAULT_BUF_SIZE } else { buf_size };
        Self {
            handle,
            pos,
            buf: vec![0; cap],
            start: 0,
            end: 0,
            closed: false,
        }
    }

    fn buffered(&self) -> usize {
        self.end - self.start
    }

    fn refill(&mut self) -> Result<()> {
        debug_assert_eq!(self.buffered(), 0);
        let mut handle = self.handle.lock();
        let n = handle.value_read(self.pos, &mut self.buf)?;
        self.start = 0;
        self.end = n;
        self.pos += n as i64;
        Ok(())
    }

    /// Fill `out` from the stream, refilling the internal buffer as
    /// many times as needed. Returns the number of bytes read, or
    /// `-1` if the stream was already at end of value.
    ///
    /// # Errors
    /// [`Error::IllegalState`] if the stream is closed;
    /// [`Error::NoSuchValue`] if the underlying value does not exist.
    pub fn read(&mut self, out: &mut [u8]) -> Result<i32> {
        if self.closed {
            return Err(Error::illegal_state("read on a closed input stream"));
        }
        let mut total = 0usize;
        while total < out.len() {
            if self.buffered() == 0 {
                let remaining = out.len() - total;
                if remaining >= self.buf.len() {
                    // bypass the internal buffer for large reads
                    let mut handle = self.handle.lock();
                    let n = handle.value_read(self.pos, &mut out[total..])?;
                    self.pos += n as i64;
                    total += n;
                    if n == 0 {
                        break;
                    }
                    continue;
                }
                self.refill()?;
                if self.buffered() == 0 {
                    break;
                }
            }
            let n = (out.len() - total).min(self.buffered());
            out[total..total + n].copy_from_slice(&self.buf[self.start..self.start + n]);
            self.start += n;
            total += n;
        }
        if total == 0 && !out.is_empty() {
            Ok(-1)
        } else {
            Ok(total as i32)
        }
    }

    /// Release the stream. Idempotent, and a no-op if the underlying
    /// value handle was already closed by someone else (§4.8).
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.start = 0;
        self.end = 0;
        let mut handle = self.handle.lock();
        if !handle.is_closed() {
            handle.close();
        }
    }
}
