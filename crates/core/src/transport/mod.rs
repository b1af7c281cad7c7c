//! Packet sinks the packetizer writes RTP payloads into.
//!
//! The packetizer never builds RTP headers itself. For every packet it:
//!
//! 1. asks the sink for a buffer ([`TransportSink::request_buffer`]),
//! 2. writes its payload at offset [`TransportSink::header_len`],
//! 3. sets the timestamp and, on the last packet of an access unit,
//!    the marker bit,
//! 4. calls [`TransportSink::send`] with the total packet length.
//!
//! Sequence numbers, SSRC and the socket belong to the sink.
//!
//! - [`UdpSink`]: RTP over UDP to a single destination.
//! - [`MemorySink`]: records packets in memory for inspection.

pub mod memory;
pub mod udp;

use std::io;

pub use crate::media::rtp::RTP_HEADER_LENGTH;
pub use memory::{MemorySink, SentPacket};
pub use udp::{UdpSink, UdpSinkConfig};

/// Default packet capacity, RTP header included.
pub const MAX_PACKET_SIZE: usize = 1272;

/// Smallest packet the bundled sinks allocate: an RTP header, the two
/// FU-A bytes and one payload byte.
pub const MIN_PACKET_SIZE: usize = RTP_HEADER_LENGTH + 3;

/// Destination for RTP packets.
pub trait TransportSink: Send {
    /// Set the media clock used to convert nanosecond timestamps.
    fn set_clock_frequency(&mut self, hz: u32);

    /// Number of packets the sink may hold back before transmitting.
    fn set_cache_size(&mut self, packets: usize);

    /// Buffer for the next packet, `max_packet_size()` bytes long.
    ///
    /// Bytes `[..header_len()]` are reserved for the RTP header.
    fn request_buffer(&mut self) -> &mut [u8];

    /// Timestamp, in nanoseconds, of the next packet sent.
    fn update_timestamp(&mut self, timestamp_ns: u64);

    /// Set the marker bit on the next packet sent.
    fn mark_next_packet(&mut self);

    /// Send the first `len` bytes of the current buffer.
    ///
    /// Consumes the pending marker; the timestamp stays until updated.
    fn send(&mut self, len: usize) -> io::Result<()>;

    fn max_packet_size(&self) -> usize {
        MAX_PACKET_SIZE
    }

    fn header_len(&self) -> usize {
        RTP_HEADER_LENGTH
    }
}

impl<T: TransportSink + ?Sized> TransportSink for Box<T> {
    fn set_clock_frequency(&mut self, hz: u32) {
        (**self).set_clock_frequency(hz)
    }

    fn set_cache_size(&mut self, packets: usize) {
        (**self).set_cache_size(packets)
    }

    fn request_buffer(&mut self) -> &mut [u8] {
        (**self).request_buffer()
    }

    fn update_timestamp(&mut self, timestamp_ns: u64) {
        (**self).update_timestamp(timestamp_ns)
    }

    fn mark_next_packet(&mut self) {
        (**self).mark_next_packet()
    }

    fn send(&mut self, len: usize) -> io::Result<()> {
        (**self).send(len)
    }

    fn max_packet_size(&self) -> usize {
        (**self).max_packet_size()
    }

    fn header_len(&self) -> usize {
        (**self).header_len()
    }
}
