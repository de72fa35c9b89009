//! Buffered positional reader/writer over a value handle (§4.8, C8).

mod handle;
mod input;
mod output;

pub use handle::{VecValue, ValueHandle};
pub use input::InputStream;
pub use output::OutputStream;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn vec_handle(bytes: Vec<u8>) -> Arc<Mutex<VecValue>> {
        Arc::new(Mutex::new(VecValue::new(bytes)))
    }

    /// S4: value length 10, `new_input_stream(pos=0, buf=4).read(out,
    /// 0, 10)` reads all 10 bytes across 2 refills plus 2 trailing
    /// bytes; a further `read` at EOF returns `-1`.
    #[test]
    fn s4_buffered_read_refills_and_reports_eof() {
        let handle = vec_handle((0..10).collect());
        let mut stream = InputStream::new(handle, 0, 4);

        let mut out = [0u8; 10];
        let n = stream.read(&mut out).unwrap();
        assert_eq!(n, 10);
        assert_eq!(out, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);

        let mut trailing = [0u8; 1];
        assert_eq!(stream.read(&mut trailing).unwrap(), -1);
    }

    #[test]
    fn read_on_nonexistent_value_raises_no_such_value() {
        let handle = Arc::new(Mutex::new(VecValue::missing()));
        let mut stream = InputStream::new(handle, 0, 4);
        let mut out = [0u8; 4];
        let err = stream.read(&mut out).unwrap_err();
        assert!(matches!(err, tkv_error::Error::NoSuchValue));
    }

    #[test]
    fn large_read_bypasses_the_internal_buffer() {
        let handle = vec_handle((0..100).map(|i| i as u8).collect());
        let mut stream = InputStream::new(handle, 0, 4);
        let mut out = [0u8; 100];
        assert_eq!(stream.read(&mut out).unwrap(), 100);
        assert_eq!(out[99], 99);
    }

    #[test]
    fn write_flushes_on_overflow_and_close() {
        let handle = vec_handle(Vec::new());
        let mut stream = OutputStream::new(Arc::clone(&handle), 0, 4);
        stream.write(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        stream.close().unwrap();
        assert_eq!(handle.lock().value_length(), 7);
    }

    #[test]
    fn use_after_stream_close_raises_illegal_state() {
        let handle = vec_handle(vec![0; 4]);
        let mut stream = InputStream::new(handle, 0, 4);
        stream.close();
        let err = stream.read(&mut [0u8; 1]).unwrap_err();
        assert!(matches!(err, tkv_error::Error::IllegalState(_)));
    }

    #[test]
    fn stream_close_after_value_close_is_a_no_op() {
        let handle = vec_handle(vec![0; 4]);
        handle.lock().close();
        let mut stream = InputStream::new(Arc::clone(&handle), 0, 4);
        // closing the stream must not panic or double-release the handle
        stream.close();
        assert!(handle.lock().is_closed());
    }
}
