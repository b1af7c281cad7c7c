use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MAX_PACKET_SIZE, MIN_PACKET_SIZE, RTP_HEADER_LENGTH, TransportSink};

/// One packet captured by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    /// RTP payload (everything after the header).
    pub payload: Vec<u8>,
    pub timestamp_ns: u64,
    pub marker: bool,
}

/// Sink that keeps every packet in memory.
///
/// The packet log is shared, so a handle taken with
/// [`packets`](Self::packets) stays readable after the sink has moved
/// into a stream worker. Useful for embedding the packetizer behind
/// another transport (e.g. interleaved RTSP) and for tests.
pub struct MemorySink {
    buffer: Vec<u8>,
    header_len: usize,
    timestamp_ns: u64,
    marker: bool,
    clock_rate: u32,
    cache_size: usize,
    sent: Arc<Mutex<Vec<SentPacket>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_packet_size(MAX_PACKET_SIZE)
    }

    /// Capacity is raised to [`MIN_PACKET_SIZE`] if smaller.
    pub fn with_packet_size(max_packet_size: usize) -> Self {
        Self {
            buffer: vec![0u8; max_packet_size.max(MIN_PACKET_SIZE)],
            header_len: RTP_HEADER_LENGTH,
            timestamp_ns: 0,
            marker: false,
            clock_rate: 0,
            cache_size: 0,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the packet log.
    pub fn packets(&self) -> Arc<Mutex<Vec<SentPacket>>> {
        self.sent.clone()
    }

    pub fn clock_rate(&self) -> u32 {
        self.clock_rate
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSink for MemorySink {
    fn set_clock_frequency(&mut self, hz: u32) {
        self.clock_rate = hz;
    }

    fn set_cache_size(&mut self, packets: usize) {
        self.cache_size = packets;
    }

    fn request_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    fn update_timestamp(&mut self, timestamp_ns: u64) {
        self.timestamp_ns = timestamp_ns;
    }

    fn mark_next_packet(&mut self) {
        self.marker = true;
    }

    fn send(&mut self, len: usize) -> io::Result<()> {
        if len < self.header_len || len > self.buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet length {len} outside buffer"),
            ));
        }
        self.sent.lock().push(SentPacket {
            payload: self.buffer[self.header_len..len].to_vec(),
            timestamp_ns: self.timestamp_ns,
            marker: std::mem::take(&mut self.marker),
        });
        Ok(())
    }

    fn max_packet_size(&self) -> usize {
        self.buffer.len()
    }

    fn header_len(&self) -> usize {
        self.header_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_payload_timestamp_and_marker() {
        let mut sink = MemorySink::new();
        let log = sink.packets();

        let buf = sink.request_buffer();
        buf[RTP_HEADER_LENGTH..RTP_HEADER_LENGTH + 2].copy_from_slice(&[0x65, 0xAA]);
        sink.update_timestamp(42);
        sink.mark_next_packet();
        sink.send(RTP_HEADER_LENGTH + 2).unwrap();

        sink.request_buffer()[RTP_HEADER_LENGTH] = 0x41;
        sink.send(RTP_HEADER_LENGTH + 1).unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].payload, vec![0x65, 0xAA]);
        assert_eq!(log[0].timestamp_ns, 42);
        assert!(log[0].marker);
        assert!(!log[1].marker, "marker is consumed by send");
        assert_eq!(log[1].timestamp_ns, 42);
    }

    #[test]
    fn records_sink_settings() {
        let mut sink = MemorySink::new();
        sink.set_clock_frequency(90_000);
        sink.set_cache_size(400);
        assert_eq!(sink.clock_rate(), 90_000);
        assert_eq!(sink.cache_size(), 400);
        assert_eq!(sink.max_packet_size(), MAX_PACKET_SIZE);
    }

    #[test]
    fn rejects_oversized_send() {
        let mut sink = MemorySink::with_packet_size(32);
        assert!(sink.send(33).is_err());
        assert!(sink.send(4).is_err());
    }

    #[test]
    fn packet_size_has_a_floor() {
        assert_eq!(MemorySink::with_packet_size(0).max_packet_size(), MIN_PACKET_SIZE);
        assert_eq!(
            MemorySink::with_packet_size(RTP_HEADER_LENGTH + 2).max_packet_size(),
            MIN_PACKET_SIZE
        );
    }
}
