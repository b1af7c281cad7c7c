use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};

use super::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, RTP_HEADER_LENGTH, TransportSink};
use crate::media::rtp::RtpHeader;

/// Settings for [`UdpSink`].
#[derive(Debug, Clone)]
pub struct UdpSinkConfig {
    /// Where RTP packets are sent.
    pub destination: SocketAddr,
    /// Local address to bind. Defaults to an ephemeral port on all interfaces.
    pub bind_addr: SocketAddr,
    /// RTP payload type. H.264 conventionally uses dynamic type 96.
    pub payload_type: u8,
    /// Fixed SSRC; random when `None` (RFC 3550 §8.1).
    pub ssrc: Option<u32>,
    /// Packet capacity including the RTP header. Raised to
    /// [`MIN_PACKET_SIZE`] if smaller.
    pub max_packet_size: usize,
}

impl UdpSinkConfig {
    pub fn new(destination: SocketAddr) -> Self {
        Self {
            destination,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            payload_type: 96,
            ssrc: None,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

/// RTP-over-UDP sink for a single destination.
///
/// Owns the RTP header state (sequence number, SSRC, media clock) and
/// writes it into each packet on [`send`](TransportSink::send). Up to
/// `cache_size` packets are held in a FIFO before going out on the socket;
/// with a cache of 0 every packet is transmitted immediately. Held
/// packets are flushed when the sink is dropped.
pub struct UdpSink {
    socket: UdpSocket,
    destination: SocketAddr,
    header: RtpHeader,
    buffer: Vec<u8>,
    marker: bool,
    cache_size: usize,
    cache: VecDeque<Vec<u8>>,
    packets_sent: u64,
}

impl UdpSink {
    /// Bind a UDP socket for outbound RTP.
    pub fn bind(config: UdpSinkConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)?;
        let header = match config.ssrc {
            Some(ssrc) => RtpHeader::new(config.payload_type, ssrc),
            None => RtpHeader::with_random_ssrc(config.payload_type),
        };
        tracing::info!(
            local = %socket.local_addr()?,
            destination = %config.destination,
            "RTP sink bound"
        );
        Ok(Self {
            socket,
            destination: config.destination,
            header,
            buffer: vec![0u8; config.max_packet_size.max(MIN_PACKET_SIZE)],
            marker: false,
            cache_size: 0,
            cache: VecDeque::new(),
            packets_sent: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Packets written to the socket so far.
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Transmit every cached packet.
    pub fn flush(&mut self) -> io::Result<()> {
        while let Some(packet) = self.cache.pop_front() {
            self.transmit(&packet)?;
        }
        Ok(())
    }

    fn transmit(&mut self, packet: &[u8]) -> io::Result<()> {
        self.socket.send_to(packet, self.destination)?;
        self.packets_sent += 1;
        Ok(())
    }
}

impl TransportSink for UdpSink {
    fn set_clock_frequency(&mut self, hz: u32) {
        self.header.set_clock_rate(hz);
    }

    fn set_cache_size(&mut self, packets: usize) {
        self.cache_size = packets;
        tracing::debug!(cache_size = packets, "RTP sink cache resized");
    }

    fn request_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn update_timestamp(&mut self, timestamp_ns: u64) {
        self.header.set_timestamp_ns(timestamp_ns);
    }

    fn mark_next_packet(&mut self) {
        self.marker = true;
    }

    fn send(&mut self, len: usize) -> io::Result<()> {
        if len < RTP_HEADER_LENGTH || len > self.buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet length {len} outside buffer"),
            ));
        }
        let marker = std::mem::take(&mut self.marker);
        self.header.write_into(&mut self.buffer, marker);

        if self.cache_size == 0 && self.cache.is_empty() {
            let packet = self.buffer[..len].to_vec();
            return self.transmit(&packet);
        }

        self.cache.push_back(self.buffer[..len].to_vec());
        while self.cache.len() > self.cache_size {
            if let Some(packet) = self.cache.pop_front() {
                self.transmit(&packet)?;
            }
        }
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for UdpSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "failed to flush cached RTP packets");
        }
    }
}
