pub mod error;
pub mod media;
pub mod source;
pub mod stream;
pub mod transport;

pub use error::{PacketizerError, Result};
pub use media::h264::H264Packetizer;
pub use media::params::ParameterSets;
pub use source::{AccessUnitQueue, FramingMode, NalSource, ReaderSource};
pub use stream::{H264Stream, StreamConfig};
pub use transport::{MemorySink, TransportSink, UdpSink, UdpSinkConfig};
