use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::{NalUnit, is_slice, nal_type};
use crate::error::{PacketizerError, Result};
use crate::source::{FramingMode, NalSource, read_full};

/// Lengths at or above this are treated as misalignment.
pub const DEFAULT_MAX_NAL_LENGTH: usize = 100_000;

/// Bytes resync may scan before giving up.
pub const DEFAULT_MAX_RESYNC_BYTES: usize = 1 << 20;

const HEADER_WINDOW: usize = 5;

/// Five-byte shift register holding `[length BE32][NAL header]`.
///
/// In length-prefixed framing the window is filled with the length field
/// and the first NAL byte; resync slides it one byte at a time until the
/// bytes line up with a plausible NAL boundary again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderWindow {
    bytes: [u8; HEADER_WINDOW],
}

impl HeaderWindow {
    /// Drop the oldest byte and append `byte` as the NAL header.
    pub fn shift_in(&mut self, byte: u8) {
        self.bytes.copy_within(1.., 0);
        self.bytes[HEADER_WINDOW - 1] = byte;
    }

    /// The first four bytes as a big-endian length.
    pub fn length(&self) -> u32 {
        u32::from_be_bytes([self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]])
    }

    pub fn nal_header(&self) -> u8 {
        self.bytes[HEADER_WINDOW - 1]
    }

    /// `(length, nal_type)` of the current alignment.
    pub fn as_length_and_type(&self) -> (u32, u8) {
        (self.length(), nal_type(self.nal_header()))
    }

    fn has_start_code_prefix(&self) -> bool {
        self.bytes[..3] == [0, 0, 0]
    }

    fn prefix(&self) -> [u8; 3] {
        [self.bytes[0], self.bytes[1], self.bytes[2]]
    }
}

/// Limits applied while demuxing.
#[derive(Debug, Clone)]
pub struct DemuxLimits {
    /// Exclusive upper bound for a length-prefixed NAL.
    pub max_nal_length: usize,
    /// Bytes a single resync episode may consume.
    pub max_resync_bytes: usize,
}

impl Default for DemuxLimits {
    fn default() -> Self {
        Self {
            max_nal_length: DEFAULT_MAX_NAL_LENGTH,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
        }
    }
}

/// Extracts NAL units from a [`NalSource`] according to its framing.
///
/// | Framing | Prefix read | Length | Timestamp |
/// |---------|-------------|--------|-----------|
/// | Length-prefixed | 4-byte BE length + NAL header | from prefix | previous + smoothed delay |
/// | Start-code | `00 00 00 01` + NAL header | `available() + 1` | source presentation time |
/// | Raw | NAL header | `available() + 1` | source presentation time |
///
/// The `available() + 1` length assumes the source delivers exactly one
/// NAL per buffer; the demuxer cannot verify this.
pub struct NalDemuxer {
    source: Arc<dyn NalSource>,
    framing: FramingMode,
    limits: DemuxLimits,
    window: HeaderWindow,
    scratch: Vec<u8>,
    timestamp: u64,
    cancelled: Arc<AtomicBool>,
    resyncs: Arc<AtomicU64>,
    resynced_at: Option<Instant>,
}

impl NalDemuxer {
    pub fn new(source: Arc<dyn NalSource>, limits: DemuxLimits) -> Self {
        let framing = source.framing();
        Self {
            source,
            framing,
            limits,
            window: HeaderWindow::default(),
            scratch: Vec::new(),
            timestamp: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            resyncs: Arc::new(AtomicU64::new(0)),
            resynced_at: None,
        }
    }

    /// Share a cancellation flag checked between blocking reads.
    pub fn with_cancel_flag(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Share the counter incremented on every resync episode.
    pub fn with_resync_counter(mut self, resyncs: Arc<AtomicU64>) -> Self {
        self.resyncs = resyncs;
        self
    }

    pub fn framing(&self) -> FramingMode {
        self.framing
    }

    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// When the last successful resync finished, cleared on read.
    pub fn take_resync_instant(&mut self) -> Option<Instant> {
        self.resynced_at.take()
    }

    /// Read the next NAL unit.
    ///
    /// `delay` is the smoothed cycle duration used to advance synthesized
    /// timestamps.
    pub fn next_nal(&mut self, delay: Duration) -> Result<NalUnit<'_>> {
        let length = match self.framing {
            FramingMode::LengthPrefixed => {
                self.fill_window(HEADER_WINDOW)?;
                self.advance_timestamp(delay);
                let length = self.window.length();
                if length == 0 || length as usize >= self.limits.max_nal_length {
                    self.resync(length)?
                } else {
                    length
                }
            }
            FramingMode::StartCodePrefixed => {
                self.fill_window(HEADER_WINDOW)?;
                if !self.window.has_start_code_prefix() {
                    let prefix = self.window.prefix();
                    tracing::error!(
                        prefix = format_args!("{:02X?}", prefix),
                        "NAL units are not preceded by 00 00 00 01"
                    );
                    self.framing = FramingMode::Unknown;
                    return Err(PacketizerError::FramingViolation { prefix });
                }
                self.take_source_timestamp(delay);
                (self.source.available() + 1) as u32
            }
            FramingMode::RawUnframed => {
                self.fill_window(1)?;
                self.take_source_timestamp(delay);
                (self.source.available() + 1) as u32
            }
            FramingMode::Unknown => {
                return Err(PacketizerError::FramingViolation {
                    prefix: self.window.prefix(),
                });
            }
        };

        let length = length as usize;
        self.scratch.clear();
        self.scratch.resize(length, 0);
        self.scratch[0] = self.window.nal_header();
        self.read_exact(1, length)?;

        Ok(NalUnit {
            data: &self.scratch,
            timestamp: self.timestamp,
        })
    }

    fn advance_timestamp(&mut self, delay: Duration) {
        let step = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        self.timestamp = self.timestamp.wrapping_add(step);
    }

    fn take_source_timestamp(&mut self, delay: Duration) {
        if !self.framing.has_source_timestamps() {
            self.advance_timestamp(delay);
            return;
        }
        match self.source.presentation_time() {
            Some(pts) => self.timestamp = u64::try_from(pts.as_nanos()).unwrap_or(u64::MAX),
            None => self.advance_timestamp(delay),
        }
    }

    /// Shift `count` fresh bytes into the header window.
    fn fill_window(&mut self, count: usize) -> Result<()> {
        let mut buf = [0u8; HEADER_WINDOW];
        self.read_into(&mut buf[..count])?;
        for &byte in &buf[..count] {
            self.window.shift_in(byte);
        }
        Ok(())
    }

    fn read_exact(&mut self, from: usize, to: usize) -> Result<()> {
        if from >= to {
            return Ok(());
        }
        read_full(self.source.as_ref(), &mut self.scratch[from..to])
            .map_err(|e| self.map_read_error(e))
    }

    fn read_into(&self, buf: &mut [u8]) -> Result<()> {
        read_full(self.source.as_ref(), buf).map_err(|e| self.map_read_error(e))
    }

    fn map_read_error(&self, e: io::Error) -> PacketizerError {
        if self.cancelled.load(Ordering::SeqCst) {
            PacketizerError::Cancelled
        } else if e.kind() == io::ErrorKind::UnexpectedEof {
            PacketizerError::EndOfStream
        } else {
            PacketizerError::Io(e)
        }
    }

    /// Slide the window one byte at a time until a slice NAL header
    /// follows a plausible length.
    fn resync(&mut self, bad_length: u32) -> Result<u32> {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            length = bad_length,
            "packetizer out of sync, scanning for a NAL boundary"
        );

        let mut scanned = 0usize;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(PacketizerError::Cancelled);
            }
            if scanned >= self.limits.max_resync_bytes {
                tracing::error!(scanned, "no NAL boundary found, giving up");
                return Err(PacketizerError::ResyncExhausted { bytes: scanned });
            }

            let mut byte = [0u8; 1];
            self.read_into(&mut byte)?;
            self.window.shift_in(byte[0]);
            scanned += 1;

            let (length, ty) = self.window.as_length_and_type();
            if !is_slice(ty) {
                continue;
            }
            if length > 0 && (length as usize) < self.limits.max_nal_length {
                self.resynced_at = Some(Instant::now());
                tracing::info!(length, nal_type = ty, scanned, "NAL boundary found, resynchronized");
                return Ok(length);
            } else if length == 0 {
                tracing::debug!("NAL unit with zero size found");
            } else if length == u32::MAX {
                tracing::debug!("NAL unit with 0xFFFFFFFF size found");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AccessUnitQueue, ReaderSource};

    fn length_prefixed(bytes: Vec<u8>) -> NalDemuxer {
        let source = ReaderSource::new(std::io::Cursor::new(bytes), FramingMode::LengthPrefixed);
        NalDemuxer::new(Arc::new(source), DemuxLimits::default())
    }

    fn framed(nal: &[u8]) -> Vec<u8> {
        let mut out = (nal.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn window_shift_and_length() {
        let mut w = HeaderWindow::default();
        for b in [0x00, 0x00, 0x01, 0x02, 0x65] {
            w.shift_in(b);
        }
        assert_eq!(w.as_length_and_type(), (0x0102, 5));
        w.shift_in(0x41);
        assert_eq!(w.length(), 0x0001_0265);
        assert_eq!(w.nal_header(), 0x41);
    }

    #[test]
    fn length_prefixed_nals_in_sequence() {
        let mut bytes = framed(&[0x06, 0x01, 0x02]);
        bytes.extend(framed(&[0x65, 0xAA]));
        let mut demux = length_prefixed(bytes);

        let nal = demux.next_nal(Duration::from_millis(10)).unwrap();
        assert_eq!(nal.data, &[0x06, 0x01, 0x02]);
        assert_eq!(nal.timestamp, 10_000_000);

        let nal = demux.next_nal(Duration::from_millis(10)).unwrap();
        assert_eq!(nal.data, &[0x65, 0xAA]);
        assert_eq!(nal.timestamp, 20_000_000);

        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::EndOfStream)
        ));
    }

    #[test]
    fn truncated_nal_is_end_of_stream() {
        let mut demux = length_prefixed(vec![0, 0, 0, 10, 0x65, 0x01]);
        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::EndOfStream)
        ));
    }

    #[test]
    fn resync_finds_next_slice() {
        let mut bytes = vec![0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        bytes.extend([0x02, 0x00, 0x03]);
        bytes.extend(framed(&[0x41, 0xBB]));
        bytes.extend(framed(&[0x65, 0xCC, 0xDD]));
        let mut demux = length_prefixed(bytes);

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x41, 0xBB]);
        assert_eq!(demux.resync_count(), 1);
        assert!(demux.take_resync_instant().is_some());

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x65, 0xCC, 0xDD]);
        assert_eq!(demux.resync_count(), 1);
        assert!(demux.take_resync_instant().is_none());
    }

    #[test]
    fn zero_length_triggers_resync() {
        let mut bytes = vec![0x00, 0x00, 0x00, 0x00];
        bytes.extend(framed(&[0x41, 0xBB]));
        bytes.extend(framed(&[0x65, 0xCC]));
        let mut demux = length_prefixed(bytes);

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x41, 0xBB]);
        assert_eq!(demux.resync_count(), 1);

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x65, 0xCC]);
        assert_eq!(demux.resync_count(), 1);
    }

    #[test]
    fn length_just_below_limit_is_accepted() {
        let mut nal = vec![0x41];
        nal.resize(DEFAULT_MAX_NAL_LENGTH - 1, 0xFF);
        let mut bytes = framed(&nal);
        bytes.extend(framed(&[0x65, 0xCC]));
        let mut demux = length_prefixed(bytes);

        let first = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(first.len(), DEFAULT_MAX_NAL_LENGTH - 1);
        assert_eq!(first.data, &nal[..]);
        assert_eq!(demux.next_nal(Duration::ZERO).unwrap().data, &[0x65, 0xCC]);
        assert_eq!(demux.resync_count(), 0);
    }

    #[test]
    fn length_at_limit_triggers_resync() {
        // 0xFF filler has NAL type 31, so the scan only stops at the next
        // real boundary.
        let mut nal = vec![0x41];
        nal.resize(DEFAULT_MAX_NAL_LENGTH, 0xFF);
        let mut bytes = framed(&nal);
        bytes.extend(framed(&[0x65, 0xCC]));
        let mut demux = length_prefixed(bytes);

        let next = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(next.data, &[0x65, 0xCC]);
        assert_eq!(demux.resync_count(), 1);
    }

    #[test]
    fn resync_is_bounded() {
        let source = ReaderSource::new(
            std::io::Cursor::new(vec![0xFFu8; 64]),
            FramingMode::LengthPrefixed,
        );
        let limits = DemuxLimits {
            max_resync_bytes: 16,
            ..DemuxLimits::default()
        };
        let mut demux = NalDemuxer::new(Arc::new(source), limits);
        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::ResyncExhausted { bytes: 16 })
        ));
    }

    #[test]
    fn resync_honours_cancellation() {
        let cancel = Arc::new(AtomicBool::new(true));
        let source = ReaderSource::new(
            std::io::Cursor::new(vec![0xFFu8; 64]),
            FramingMode::LengthPrefixed,
        );
        let mut demux = NalDemuxer::new(Arc::new(source), DemuxLimits::default())
            .with_cancel_flag(cancel);
        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::Cancelled)
        ));
    }

    #[test]
    fn start_code_uses_available_and_pts() {
        let q = Arc::new(AccessUnitQueue::new(FramingMode::StartCodePrefixed));
        q.push(vec![0, 0, 0, 1, 0x65, 0x01, 0x02, 0x03], Duration::from_micros(40));
        let mut demux = NalDemuxer::new(q, DemuxLimits::default());

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x65, 0x01, 0x02, 0x03]);
        assert_eq!(nal.timestamp, 40_000);
    }

    #[test]
    fn missing_start_code_is_terminal() {
        let q = Arc::new(AccessUnitQueue::new(FramingMode::StartCodePrefixed));
        q.push(vec![0x65, 0, 0, 1, 0x41, 0x01], Duration::ZERO);
        let mut demux = NalDemuxer::new(q, DemuxLimits::default());

        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::FramingViolation {
                prefix: [0x65, 0, 0]
            })
        ));
        assert_eq!(demux.framing(), FramingMode::Unknown);
        assert!(matches!(
            demux.next_nal(Duration::ZERO),
            Err(PacketizerError::FramingViolation { .. })
        ));
    }

    #[test]
    fn raw_unframed_reads_whole_buffer() {
        let q = Arc::new(AccessUnitQueue::new(FramingMode::RawUnframed));
        q.push(vec![0x41, 0x9A, 0x00], Duration::from_millis(1));
        q.push(vec![0x41, 0x9B], Duration::from_millis(2));
        let mut demux = NalDemuxer::new(q, DemuxLimits::default());

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x41, 0x9A, 0x00]);
        assert_eq!(nal.timestamp, 1_000_000);

        let nal = demux.next_nal(Duration::ZERO).unwrap();
        assert_eq!(nal.data, &[0x41, 0x9B]);
        assert_eq!(nal.timestamp, 2_000_000);
    }
}
