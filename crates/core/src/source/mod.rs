//! Byte sources the demuxer reads NAL units from.
//!
//! A source is shared between the stream worker (which reads) and the
//! controlling thread (which closes it to unblock a pending read during
//! [`H264Stream::stop`](crate::H264Stream::stop)), so every method takes
//! `&self` and implementations use interior locking.
//!
//! - [`ReaderSource`]: wraps any [`std::io::Read`], e.g. a file or pipe
//!   carrying length-prefixed NAL units.
//! - [`AccessUnitQueue`]: encoder output pushed one buffer at a time with
//!   its presentation time.

pub mod annexb;
pub mod queue;
pub mod reader;

use std::io;
use std::time::Duration;

pub use queue::AccessUnitQueue;
pub use reader::ReaderSource;

/// How NAL units are delimited in the bytes a source delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// 4-byte big-endian length before each NAL (MP4/3GPP recorder output).
    LengthPrefixed,
    /// `00 00 00 01` before each NAL, one NAL per source buffer.
    StartCodePrefixed,
    /// No delimiter, one NAL per source buffer.
    RawUnframed,
    /// The expected start code was missing; nothing more can be demuxed.
    Unknown,
}

impl FramingMode {
    /// Sink cache depth that suits this framing.
    ///
    /// Length-prefixed recorder output arrives in bursts, so the sink
    /// buffers packets to even out delivery. Encoder buffers arrive at
    /// frame rate and go out immediately.
    pub fn default_cache_size(self) -> usize {
        match self {
            Self::LengthPrefixed => 400,
            _ => 0,
        }
    }

    /// True when the source attaches its own presentation timestamps.
    pub fn has_source_timestamps(self) -> bool {
        matches!(self, Self::StartCodePrefixed | Self::RawUnframed)
    }
}

/// A blocking byte source.
pub trait NalSource: Send + Sync {
    /// Read into `buf`, blocking until at least one byte is available.
    ///
    /// Returns `Ok(0)` at end of stream or once the source is closed.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Bytes readable without blocking. For buffer-oriented sources this
    /// is what remains of the current buffer.
    fn available(&self) -> usize;

    /// Close the source. Later reads return end-of-stream.
    ///
    /// Sources whose reads can block indefinitely must also wake a read
    /// pending in another thread. [`ReaderSource`] cannot, and is only
    /// meant for readers that never stall.
    fn close(&self);

    /// Presentation time of the buffer most recently read from, if the
    /// source has one.
    fn presentation_time(&self) -> Option<Duration> {
        None
    }

    /// Framing of the bytes this source delivers.
    fn framing(&self) -> FramingMode;
}

/// Read exactly `buf.len()` bytes, mapping a short read to `UnexpectedEof`.
pub(crate) fn read_full(source: &dyn NalSource, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
