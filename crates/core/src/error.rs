//! Error types for the H.264 RTP packetizer.

/// Errors that can occur while demuxing and packetizing a stream.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Input**: [`EndOfStream`](Self::EndOfStream),
///   [`FramingViolation`](Self::FramingViolation),
///   [`ResyncExhausted`](Self::ResyncExhausted) — the source ended or its
///   framing cannot be trusted.
/// - **Transport**: [`Io`](Self::Io) — the sink or the source failed.
/// - **Lifecycle**: [`Cancelled`](Self::Cancelled),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`WorkerLost`](Self::WorkerLost).
/// - **Configuration**: [`InvalidParameterSet`](Self::InvalidParameterSet),
///   [`PacketTooSmall`](Self::PacketTooSmall).
#[derive(Debug, thiserror::Error)]
pub enum PacketizerError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source returned end-of-stream before a full NAL unit was read.
    #[error("end of stream")]
    EndOfStream,

    /// Start-code framing expected `00 00 00 01` but found other bytes.
    #[error("NAL units are not preceded by a start code (found {prefix:02X?})")]
    FramingViolation { prefix: [u8; 3] },

    /// Resynchronization scanned `bytes` bytes without finding a NAL boundary.
    #[error("resync gave up after {bytes} bytes")]
    ResyncExhausted { bytes: usize },

    /// The stream was stopped while the worker was reading.
    #[error("cancelled")]
    Cancelled,

    /// [`H264Stream::start`](crate::H264Stream::start) is running, so
    /// configuration changes are refused.
    #[error("stream already running")]
    AlreadyRunning,

    /// A previous worker panicked; its state is gone.
    #[error("stream worker lost")]
    WorkerLost,

    /// The sink's packets leave no room for an FU-A fragment payload.
    #[error("packet capacity {capacity} leaves no payload after a {header_len}-byte header")]
    PacketTooSmall { capacity: usize, header_len: usize },

    /// SPS/PPS bytes could not be decoded or located.
    #[error("invalid parameter set: {0}")]
    InvalidParameterSet(String),
}

/// Convenience alias for `Result<T, PacketizerError>`.
pub type Result<T> = std::result::Result<T, PacketizerError>;
