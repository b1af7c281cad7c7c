/// Length of the RTP fixed header written by [`RtpHeader::write_into`].
pub const RTP_HEADER_LENGTH: usize = 12;

/// RTP fixed header state for one outgoing stream (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The packetizer hands out presentation times in nanoseconds;
/// [`set_timestamp_ns`](Self::set_timestamp_ns) converts them to the media
/// clock (90 kHz for H.264, RFC 6184 §8.1). The sequence number is 16-bit
/// and wraps. Version is always 2; padding, extension and CSRC count
/// are always 0.
#[derive(Debug)]
pub struct RtpHeader {
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    clock_rate: u32,
    sequence: u16,
    timestamp: u32,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32) -> Self {
        tracing::debug!(
            pt,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP header state created"
        );
        Self {
            pt: pt & 0x7f,
            ssrc,
            clock_rate: 90_000,
            sequence: 0,
            timestamp: 0,
        }
    }

    /// Create with a random SSRC.
    ///
    /// Per RFC 3550 §8.1, the SSRC should be chosen randomly to minimize
    /// the probability of collisions between independent sessions.
    pub fn with_random_ssrc(pt: u8) -> Self {
        Self::new(pt, rand::random::<u32>())
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn set_clock_rate(&mut self, hz: u32) {
        self.clock_rate = hz.max(1);
    }

    /// Sequence number the next [`write_into`](Self::write_into) will use.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Current timestamp in media clock units.
    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    /// Set the timestamp from a presentation time in nanoseconds.
    ///
    /// The lower 32 bits of `ns * clock_rate / 1e9` go on the wire.
    pub fn set_timestamp_ns(&mut self, ns: u64) {
        let ticks = ns as u128 * self.clock_rate as u128 / 1_000_000_000;
        self.timestamp = ticks as u32;
    }

    /// Serialize the fixed header into `buf[..12]` and advance the sequence number.
    ///
    /// The `marker` bit signals the last packet of an access unit
    /// (RFC 6184 §5.1).
    pub fn write_into(&mut self, buf: &mut [u8], marker: bool) {
        buf[0] = 2 << 6;
        buf[1] = ((marker as u8) << 7) | self.pt;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        self.sequence = self.sequence.wrapping_add(1);
    }
}
