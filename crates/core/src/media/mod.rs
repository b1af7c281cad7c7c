//! H.264 NAL demuxing and RTP packetization.
//!
//! The pipeline for one stream is:
//!
//! ```text
//! NalSource ──► NalDemuxer ──► H264Packetizer ──► TransportSink
//!                  │                 ▲
//!                  └── RollingStats ─┘  (timestamp synthesis)
//! ```
//!
//! ## NAL unit header (RFC 6184 §1.3)
//!
//! ```text
//! +---------------+
//! |0|1|2|3|4|5|6|7|
//! +-+-+-+-+-+-+-+-+
//! |F|NRI|  Type   |
//! +---------------+
//! ```
//!
//! ## Payload structures
//!
//! | Structure | Type | RFC section | Used for |
//! |-----------|------|-------------|----------|
//! | Single NAL unit | 1–23 | §5.6 | NALs that fit in one packet |
//! | STAP-A | 24 | §5.7.1 | SPS + PPS ahead of IDR slices |
//! | FU-A | 28 | §5.8 | NALs larger than one packet |

pub mod demux;
pub mod h264;
pub mod params;
pub mod rtp;
pub mod stats;

/// Mask for the 5-bit `Type` field of a NAL header.
pub const NAL_TYPE_MASK: u8 = 0x1f;
/// Mask for the 2-bit `NRI` field of a NAL header.
pub const NAL_NRI_MASK: u8 = 0x60;

pub const NAL_SLICE: u8 = 1;
pub const NAL_IDR_SLICE: u8 = 5;
pub const NAL_SEI: u8 = 6;
pub const NAL_SPS: u8 = 7;
pub const NAL_PPS: u8 = 8;
pub const STAP_A: u8 = 24;
pub const FU_A: u8 = 28;

/// FU header start bit (`S`).
pub const FU_START_BIT: u8 = 0x80;
/// FU header end bit (`E`).
pub const FU_END_BIT: u8 = 0x40;

/// Extract the 5-bit NAL type from a NAL header byte.
#[inline]
pub fn nal_type(header: u8) -> u8 {
    header & NAL_TYPE_MASK
}

/// True for coded slice NALs (non-IDR and IDR).
#[inline]
pub fn is_slice(nal_type: u8) -> bool {
    nal_type == NAL_SLICE || nal_type == NAL_IDR_SLICE
}

/// One demuxed NAL unit, borrowed from the demuxer for a single send cycle.
///
/// `data[0]` is the NAL header byte; `data.len()` is the NAL length.
#[derive(Debug, Clone, Copy)]
pub struct NalUnit<'a> {
    pub data: &'a [u8],
    /// Presentation timestamp in nanoseconds.
    pub timestamp: u64,
}

impl NalUnit<'_> {
    pub fn header(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }

    pub fn nal_type(&self) -> u8 {
        nal_type(self.header())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
