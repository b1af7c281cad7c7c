use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::{FramingMode, NalSource};

/// [`NalSource`] over any [`Read`] implementation.
///
/// Only for readers that return promptly, such as files and in-memory
/// cursors. `close()` marks the source and every later read reports
/// end-of-stream, but a read already blocked inside the wrapped reader is
/// not woken. Over a pipe or socket that stalls,
/// [`H264Stream::stop`](crate::H264Stream::stop) would wait for that read.
/// Feed such producers through
/// [`AccessUnitQueue`](crate::AccessUnitQueue) instead.
pub struct ReaderSource<R> {
    inner: Mutex<R>,
    framing: FramingMode,
    closed: AtomicBool,
    available_hint: AtomicUsize,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(reader: R, framing: FramingMode) -> Self {
        Self {
            inner: Mutex::new(reader),
            framing,
            closed: AtomicBool::new(false),
            available_hint: AtomicUsize::new(0),
        }
    }

    /// Set the value reported by [`NalSource::available`].
    ///
    /// Plain readers cannot tell how much is buffered; a caller that knows
    /// (e.g. the remaining file length) can supply it.
    pub fn with_available_hint(self, bytes: usize) -> Self {
        self.available_hint.store(bytes, Ordering::Relaxed);
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<R: Read + Send> NalSource for ReaderSource<R> {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let n = self.inner.lock().read(buf)?;
        if self.is_closed() {
            return Ok(0);
        }
        let hint = self.available_hint.load(Ordering::Relaxed);
        self.available_hint
            .store(hint.saturating_sub(n), Ordering::Relaxed);
        Ok(n)
    }

    fn available(&self) -> usize {
        self.available_hint.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn framing(&self) -> FramingMode {
        self.framing
    }
}
