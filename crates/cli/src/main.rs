use std::fs::File;
use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use h264_rtp::source::annexb::{START_CODE, split_nal_units};
use h264_rtp::{
    AccessUnitQueue, FramingMode, H264Stream, NalSource, ReaderSource, UdpSink, UdpSinkConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputFormat {
    /// 4-byte big-endian length before each NAL unit
    LengthPrefixed,
    /// Annex B elementary stream (`00 00 00 01` start codes)
    Annexb,
    /// Annex B file, NAL units delivered without start codes
    Raw,
}

#[derive(Parser)]
#[command(
    name = "h264-rtp",
    about = "Stream an H.264 elementary stream over RTP/UDP"
)]
struct Args {
    /// Input file
    #[arg(long, short)]
    input: PathBuf,

    /// Framing of the input file
    #[arg(long, short, value_enum, default_value_t = InputFormat::Annexb)]
    format: InputFormat,

    /// Destination address (host:port)
    #[arg(long, short, default_value = "127.0.0.1:5004")]
    dest: SocketAddr,

    /// Frame rate used to pace Annex B input
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// RTP payload type
    #[arg(long, default_value_t = 96)]
    payload_type: u8,

    /// Base64 SPS injected ahead of IDR slices (requires --pps-b64)
    #[arg(long, requires = "pps_b64")]
    sps_b64: Option<String>,

    /// Base64 PPS injected ahead of IDR slices (requires --sps-b64)
    #[arg(long, requires = "sps_b64")]
    pps_b64: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("h264-rtp: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> h264_rtp::Result<()> {
    let source = open_source(args)?;

    let mut sink_config = UdpSinkConfig::new(args.dest);
    sink_config.payload_type = args.payload_type;
    let sink = UdpSink::bind(sink_config)?;
    let local = sink.local_addr()?;

    let mut stream = H264Stream::new(source, sink);
    if let (Some(sps), Some(pps)) = (&args.sps_b64, &args.pps_b64) {
        stream.set_stream_parameters_base64(pps, sps)?;
    }
    stream.start()?;

    println!(
        "Streaming {} from {} to {}, press Enter to stop",
        args.input.display(),
        local,
        args.dest
    );
    let stop_requested = stdin_signal();
    while stream.is_running() {
        match stop_requested.recv_timeout(Duration::from_millis(50)) {
            Ok(()) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(50)),
        }
    }
    stream.stop();

    tracing::info!(
        nal_units = stream.nal_count(),
        resyncs = stream.resync_count(),
        "done"
    );
    Ok(())
}

fn open_source(args: &Args) -> h264_rtp::Result<Arc<dyn NalSource>> {
    match args.format {
        InputFormat::LengthPrefixed => {
            let file = File::open(&args.input)?;
            let len = file.metadata()?.len() as usize;
            let source: Arc<dyn NalSource> = Arc::new(
                ReaderSource::new(BufReader::new(file), FramingMode::LengthPrefixed)
                    .with_available_hint(len),
            );
            Ok(source)
        }
        InputFormat::Annexb => feed_annexb(args, FramingMode::StartCodePrefixed),
        InputFormat::Raw => feed_annexb(args, FramingMode::RawUnframed),
    }
}

/// Split an Annex B file into NAL units and push them into a queue at
/// the requested frame rate, one NAL per buffer.
fn feed_annexb(args: &Args, framing: FramingMode) -> h264_rtp::Result<Arc<dyn NalSource>> {
    let data = std::fs::read(&args.input)?;

    let queue = Arc::new(AccessUnitQueue::new(framing));
    let frame = Duration::from_secs(1) / args.fps.max(1);
    let feeder = queue.clone();

    thread::Builder::new()
        .name("annexb-feeder".into())
        .spawn(move || {
            let mut pts = Duration::ZERO;
            for nal in split_nal_units(&data) {
                let mut buf = Vec::with_capacity(nal.len() + START_CODE.len());
                if framing == FramingMode::StartCodePrefixed {
                    buf.extend_from_slice(&START_CODE);
                }
                buf.extend_from_slice(nal);
                if !feeder.push(buf, pts) {
                    return;
                }
                if h264_rtp::media::is_slice(h264_rtp::media::nal_type(nal[0])) {
                    pts += frame;
                    thread::sleep(frame);
                }
            }
            feeder.finish();
        })?;

    let source: Arc<dyn NalSource> = queue;
    Ok(source)
}

/// Fires once a line is read from stdin. A closed stdin never fires.
fn stdin_signal() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut input = String::new();
        if matches!(io::stdin().read_line(&mut input), Ok(n) if n > 0) {
            let _ = tx.send(());
        }
    });
    rx
}
