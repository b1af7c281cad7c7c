use super::params::ParameterSets;
use super::{FU_A, FU_END_BIT, FU_START_BIT, NAL_IDR_SLICE, NAL_NRI_MASK, NAL_PPS, NAL_SPS, NalUnit};
use crate::error::{PacketizerError, Result};
use crate::transport::TransportSink;

/// In-band SPS/PPS sightings tolerated before the cache is dropped.
pub const DEFAULT_PARAMETER_SET_REPEAT_LIMIT: usize = 4;

/// H.264 RTP fragmentation engine (RFC 6184).
///
/// Writes each NAL unit into one or more packets obtained from a
/// [`TransportSink`]:
///
/// - **Single NAL Unit** (§5.6): NALs of at most
///   `max_packet_size - header_len - 2` bytes are copied as-is
///   (`[NAL header][bytes 2..n]`).
///
/// - **FU-A Fragmentation** (§5.8): larger NALs are split. Each fragment
///   carries a 2-byte FU header before the NAL payload:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]     (1 byte)
///   FU header:     [S|E|R|NAL_Type]    (1 byte)
///   Fragment data: [...]
///   ```
///
///   The original NAL header byte is not sent; the receiver rebuilds it
///   from the FU indicator's NRI and the FU header's type.
///
/// - **STAP-A** (§5.7.1): before every IDR slice, the cached SPS and PPS
///   are sent in one aggregation packet so a decoder can join mid-stream
///   without out-of-band parameters.
///
/// ## Marker bit
///
/// Set on the single packet of a NAL or on its last fragment; never on
/// the STAP-A that precedes an IDR slice. Every packet of one NAL carries
/// the NAL's timestamp.
#[derive(Debug)]
pub struct H264Packetizer {
    params: ParameterSets,
    parameter_set_count: usize,
    repeat_limit: usize,
}

impl H264Packetizer {
    pub fn new() -> Self {
        Self {
            params: ParameterSets::default(),
            parameter_set_count: 0,
            repeat_limit: DEFAULT_PARAMETER_SET_REPEAT_LIMIT,
        }
    }

    pub fn with_parameter_sets(params: ParameterSets) -> Self {
        Self {
            params,
            ..Self::new()
        }
    }

    /// Set how many in-band SPS/PPS NALs are seen before STAP-A injection stops.
    pub fn with_repeat_limit(mut self, limit: usize) -> Self {
        self.repeat_limit = limit;
        self
    }

    pub fn set_parameter_sets(&mut self, params: ParameterSets) {
        self.params = params;
    }

    pub fn parameter_sets(&self) -> &ParameterSets {
        &self.params
    }

    /// Forget how many in-band parameter sets have been seen.
    pub fn reset(&mut self) {
        self.parameter_set_count = 0;
    }

    /// Packetize one NAL unit and send it. Returns the number of packets sent.
    pub fn send<S: TransportSink + ?Sized>(&mut self, nal: &NalUnit<'_>, sink: &mut S) -> Result<usize> {
        if nal.is_empty() {
            return Ok(0);
        }

        let max_payload = max_payload(sink)?;
        let nal_type = nal.nal_type();
        self.observe(nal_type);

        let mut packets = 0;
        if nal_type == NAL_IDR_SLICE && self.send_stap_a(nal.timestamp, sink)? {
            packets += 1;
        }

        if nal.len() <= max_payload {
            self.send_single(nal, sink)?;
            packets += 1;
        } else {
            packets += self.send_fragmented(nal, sink, max_payload)?;
        }
        Ok(packets)
    }

    /// Count in-band parameter sets; once the stream clearly carries its
    /// own, stop injecting ours.
    fn observe(&mut self, nal_type: u8) {
        if nal_type != NAL_SPS && nal_type != NAL_PPS {
            return;
        }
        self.parameter_set_count += 1;
        tracing::trace!(
            nal_type,
            count = self.parameter_set_count,
            "SPS or PPS present in the stream"
        );
        if self.parameter_set_count > self.repeat_limit && self.params.stap_a().is_some() {
            tracing::info!(
                count = self.parameter_set_count,
                "stream carries its own parameter sets, STAP-A injection disabled"
            );
            self.params.clear();
        }
    }

    fn send_stap_a<S: TransportSink + ?Sized>(&self, timestamp: u64, sink: &mut S) -> Result<bool> {
        let Some(stap_a) = self.params.stap_a() else {
            return Ok(false);
        };
        let header_len = sink.header_len();
        if header_len + stap_a.len() > sink.max_packet_size() {
            tracing::warn!(
                size = stap_a.len(),
                "STAP-A does not fit in one packet, not injected"
            );
            return Ok(false);
        }

        let buf = sink.request_buffer();
        buf[header_len..header_len + stap_a.len()].copy_from_slice(stap_a);
        sink.update_timestamp(timestamp);
        sink.send(header_len + stap_a.len())?;
        tracing::trace!(size = stap_a.len(), "STAP-A sent ahead of IDR slice");
        Ok(true)
    }

    fn send_single<S: TransportSink + ?Sized>(&self, nal: &NalUnit<'_>, sink: &mut S) -> Result<()> {
        let header_len = sink.header_len();
        let buf = sink.request_buffer();
        buf[header_len..header_len + nal.len()].copy_from_slice(nal.data);
        sink.update_timestamp(nal.timestamp);
        sink.mark_next_packet();
        sink.send(header_len + nal.len())?;
        Ok(())
    }

    fn send_fragmented<S: TransportSink + ?Sized>(
        &self,
        nal: &NalUnit<'_>,
        sink: &mut S,
        max_payload: usize,
    ) -> Result<usize> {
        let header = nal.header();
        let nal_type = nal.nal_type();
        let header_len = sink.header_len();

        let fu_indicator = (header & NAL_NRI_MASK) | FU_A;
        let mut fu_header = nal_type | FU_START_BIT;

        // The NAL header byte counts as sent.
        let mut sum = 1usize;
        let mut fragments = 0usize;

        while sum < nal.len() {
            let chunk = (nal.len() - sum).min(max_payload);
            let last = sum + chunk >= nal.len();

            let buf = sink.request_buffer();
            buf[header_len] = fu_indicator;
            buf[header_len + 1] = if last { fu_header | FU_END_BIT } else { fu_header };
            buf[header_len + 2..header_len + 2 + chunk].copy_from_slice(&nal.data[sum..sum + chunk]);

            sink.update_timestamp(nal.timestamp);
            if last {
                sink.mark_next_packet();
            }
            sink.send(header_len + 2 + chunk)?;

            sum += chunk;
            fragments += 1;
            fu_header &= !FU_START_BIT;
        }

        tracing::trace!(
            nal_type,
            nal_size = nal.len(),
            fragments,
            "FU-A fragmented NAL unit"
        );

        Ok(fragments)
    }
}

impl Default for H264Packetizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest NAL that fits a single packet, and the largest FU-A fragment.
///
/// Fails when the sink cannot carry at least one fragment byte, which
/// would otherwise stall fragmentation.
pub fn max_payload<S: TransportSink + ?Sized>(sink: &S) -> Result<usize> {
    let capacity = sink.max_packet_size();
    let header_len = sink.header_len();
    capacity
        .checked_sub(header_len + 2)
        .filter(|&payload| payload > 0)
        .ok_or(PacketizerError::PacketTooSmall {
            capacity,
            header_len,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MAX_PACKET_SIZE, MemorySink, RTP_HEADER_LENGTH, SentPacket};

    const MAX_PAYLOAD: usize = MAX_PACKET_SIZE - RTP_HEADER_LENGTH - 2;

    fn run(p: &mut H264Packetizer, data: &[u8], timestamp: u64) -> Vec<SentPacket> {
        let mut sink = MemorySink::new();
        let log = sink.packets();
        p.send(&NalUnit { data, timestamp }, &mut sink).unwrap();
        let packets = log.lock().clone();
        packets
    }

    fn nal_of_len(header: u8, len: usize) -> Vec<u8> {
        let mut nal = vec![header];
        nal.extend((1..len).map(|i| i as u8));
        nal
    }

    #[test]
    fn small_nal_single_packet() {
        let mut p = H264Packetizer::new();
        let packets = run(&mut p, &[0x41, 0xAA, 0xBB, 0xCC], 5);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, vec![0x41, 0xAA, 0xBB, 0xCC]);
        assert!(packets[0].marker);
        assert_eq!(packets[0].timestamp_ns, 5);
    }

    #[test]
    fn largest_single_packet() {
        let mut p = H264Packetizer::new();
        let nal = nal_of_len(0x41, MAX_PAYLOAD);
        let packets = run(&mut p, &nal, 0);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, nal);
        assert!(packets[0].marker);
    }

    #[test]
    fn large_nal_fragmented() {
        let mut p = H264Packetizer::new();
        let nal = nal_of_len(0x65, MAX_PAYLOAD * 3 + 10);
        let packets = run(&mut p, &nal, 99);

        let expected = (nal.len() - 1).div_ceil(MAX_PAYLOAD);
        assert_eq!(packets.len(), expected);

        for (i, pkt) in packets.iter().enumerate() {
            assert_eq!(pkt.payload[0], (0x65 & 0x60) | 28, "FU indicator");
            assert_eq!(pkt.payload[1] & 0x1f, 5, "original NAL type");
            assert_eq!(pkt.payload[1] & 0x80 != 0, i == 0, "start bit");
            assert_eq!(pkt.payload[1] & 0x40 != 0, i == packets.len() - 1, "end bit");
            assert_eq!(pkt.marker, i == packets.len() - 1, "marker");
            assert_eq!(pkt.timestamp_ns, 99);
            assert!(pkt.payload.len() <= MAX_PACKET_SIZE - RTP_HEADER_LENGTH);
        }
    }

    #[test]
    fn fragments_reassemble_to_original() {
        let mut p = H264Packetizer::new();
        let nal = nal_of_len(0x61, 5000);
        let packets = run(&mut p, &nal, 0);

        let first = &packets[0].payload;
        let mut rebuilt = vec![(first[0] & 0xE0) | (first[1] & 0x1f)];
        for pkt in &packets {
            rebuilt.extend_from_slice(&pkt.payload[2..]);
        }
        assert_eq!(rebuilt, nal);
    }

    #[test]
    fn single_fragment_has_start_and_end() {
        let mut p = H264Packetizer::new();
        let nal = nal_of_len(0x41, MAX_PAYLOAD + 1);
        let packets = run(&mut p, &nal, 0);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload[1], 0x80 | 0x40 | 1);
        assert!(packets[0].marker);
    }

    #[test]
    fn stap_a_precedes_idr() {
        let params = ParameterSets::new(vec![0x67, 0x01], vec![0x68, 0x02]);
        let mut p = H264Packetizer::with_parameter_sets(params);
        let packets = run(&mut p, &[0x65, 0xAA], 1234);

        assert_eq!(packets.len(), 2);
        assert_eq!(
            packets[0].payload,
            vec![0x18, 0x00, 0x02, 0x67, 0x01, 0x00, 0x02, 0x68, 0x02]
        );
        assert!(!packets[0].marker);
        assert_eq!(packets[1].payload, vec![0x65, 0xAA]);
        assert!(packets[1].marker);
        assert_eq!(packets[0].timestamp_ns, 1234);
        assert_eq!(packets[1].timestamp_ns, 1234);
    }

    #[test]
    fn no_stap_a_for_non_idr() {
        let params = ParameterSets::new(vec![0x67, 0x01], vec![0x68, 0x02]);
        let mut p = H264Packetizer::with_parameter_sets(params);
        let packets = run(&mut p, &[0x41, 0xAA], 0);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn stap_a_precedes_fragmented_idr() {
        let params = ParameterSets::new(vec![0x67, 0x01], vec![0x68, 0x02]);
        let mut p = H264Packetizer::with_parameter_sets(params);
        let nal = nal_of_len(0x65, MAX_PAYLOAD * 2);
        let packets = run(&mut p, &nal, 0);
        assert_eq!(packets[0].payload[0], 0x18);
        assert_eq!(packets[1].payload[0] & 0x1f, 28);
        assert_eq!(packets.len(), 1 + (nal.len() - 1).div_ceil(MAX_PAYLOAD));
    }

    #[test]
    fn in_band_parameter_sets_disable_injection() {
        let params = ParameterSets::new(vec![0x67, 0x01], vec![0x68, 0x02]);
        let mut p = H264Packetizer::with_parameter_sets(params);

        for _ in 0..2 {
            run(&mut p, &[0x67, 0x01], 0);
            run(&mut p, &[0x68, 0x02], 0);
        }
        // Four sightings: still injecting.
        assert_eq!(run(&mut p, &[0x65, 0xAA], 0).len(), 2);

        run(&mut p, &[0x67, 0x01], 0);
        assert!(p.parameter_sets().stap_a().is_none());
        assert_eq!(run(&mut p, &[0x65, 0xAA], 0).len(), 1);
    }

    #[test]
    fn empty_nal_no_packets() {
        let mut p = H264Packetizer::new();
        assert!(run(&mut p, &[], 0).is_empty());
    }

    #[test]
    fn smaller_sink_packet_size() {
        let mut p = H264Packetizer::new();
        let mut sink = MemorySink::with_packet_size(RTP_HEADER_LENGTH + 2 + 100);
        let log = sink.packets();
        let nal = nal_of_len(0x41, 301);
        let sent = p
            .send(&NalUnit { data: &nal, timestamp: 0 }, &mut sink)
            .unwrap();
        assert_eq!(sent, 3);
        assert!(log.lock().iter().all(|pkt| pkt.payload.len() <= 102));
    }

    /// Sink with a fixed, possibly unusable, capacity.
    struct FixedSink {
        buffer: Vec<u8>,
        sent: usize,
    }

    impl FixedSink {
        fn new(capacity: usize) -> Self {
            Self {
                buffer: vec![0u8; capacity],
                sent: 0,
            }
        }
    }

    impl TransportSink for FixedSink {
        fn set_clock_frequency(&mut self, _hz: u32) {}
        fn set_cache_size(&mut self, _packets: usize) {}
        fn request_buffer(&mut self) -> &mut [u8] {
            &mut self.buffer
        }
        fn update_timestamp(&mut self, _timestamp_ns: u64) {}
        fn mark_next_packet(&mut self) {}
        fn send(&mut self, _len: usize) -> std::io::Result<()> {
            self.sent += 1;
            Ok(())
        }
        fn max_packet_size(&self) -> usize {
            self.buffer.len()
        }
    }

    #[test]
    fn sink_without_payload_room_is_rejected() {
        for capacity in [RTP_HEADER_LENGTH + 2, 8] {
            let mut p = H264Packetizer::new();
            let mut sink = FixedSink::new(capacity);
            let result = p.send(&NalUnit { data: &[0x41, 0xAA], timestamp: 0 }, &mut sink);
            assert!(
                matches!(result, Err(PacketizerError::PacketTooSmall { capacity: c, .. }) if c == capacity),
                "capacity {capacity}"
            );
            assert_eq!(sink.sent, 0);
        }
    }

    #[test]
    fn one_byte_fragments_at_minimum_capacity() {
        let mut p = H264Packetizer::new();
        let mut sink = MemorySink::with_packet_size(RTP_HEADER_LENGTH + 2);
        let log = sink.packets();
        let nal = [0x65, 0x01, 0x02, 0x03];
        let sent = p
            .send(&NalUnit { data: &nal, timestamp: 0 }, &mut sink)
            .unwrap();
        assert_eq!(sent, 3);
        let packets = log.lock();
        assert!(packets.iter().all(|pkt| pkt.payload.len() == 3));
        assert!(packets[2].marker);
    }
}
