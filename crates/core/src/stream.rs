use std::sync::Arc;
use std::sync::mpsc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{PacketizerError, Result};
use crate::media::demux::{DEFAULT_MAX_NAL_LENGTH, DEFAULT_MAX_RESYNC_BYTES, DemuxLimits, NalDemuxer};
use crate::media::h264::{DEFAULT_PARAMETER_SET_REPEAT_LIMIT, H264Packetizer};
use crate::media::params::ParameterSets;
use crate::media::stats::{DEFAULT_WINDOW, RollingStats};
use crate::source::NalSource;
use crate::transport::TransportSink;

/// Stream-level configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// RTP media clock handed to the sink (RFC 6184 §8.1 mandates 90 kHz).
    pub clock_rate: u32,
    /// Samples in the cycle-duration window used for timestamp synthesis.
    pub stats_window: usize,
    /// Exclusive upper bound for a length-prefixed NAL.
    pub max_nal_length: usize,
    /// Bytes a resync episode may scan before the stream fails.
    pub max_resync_bytes: usize,
    /// In-band SPS/PPS sightings before STAP-A injection stops.
    pub parameter_set_repeat_limit: usize,
    /// Sink cache depth. When `None`, chosen from the source framing.
    pub cache_size: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            clock_rate: 90_000,
            stats_window: DEFAULT_WINDOW,
            max_nal_length: DEFAULT_MAX_NAL_LENGTH,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            parameter_set_repeat_limit: DEFAULT_PARAMETER_SET_REPEAT_LIMIT,
            cache_size: None,
        }
    }
}

/// State owned by the worker thread while running, and by the stream
/// while stopped.
struct Worker {
    demuxer: NalDemuxer,
    packetizer: H264Packetizer,
    sink: Box<dyn TransportSink>,
    stats: RollingStats,
    nals: Arc<AtomicU64>,
}

impl Worker {
    /// Demux and send until cancelled or the source fails.
    fn run(&mut self, cancelled: &AtomicBool) -> Result<()> {
        self.stats.reset();
        self.packetizer.reset();
        let mut delay = Duration::ZERO;

        while !cancelled.load(Ordering::SeqCst) {
            let started = Instant::now();
            let nal = self.demuxer.next_nal(delay)?;
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            self.packetizer.send(&nal, &mut self.sink)?;
            self.nals.fetch_add(1, Ordering::Relaxed);

            // Time spent resynchronizing says nothing about the NAL rate.
            let started = match self.demuxer.take_resync_instant() {
                Some(at) => at.max(started),
                None => started,
            };
            self.stats.push(started.elapsed());
            delay = self.stats.average();
        }
        Ok(())
    }
}

/// One H.264 stream: a source, a packetizer and a sink driven by a
/// dedicated worker thread.
///
/// ## Lifecycle
///
/// ```text
/// new ──► Stopped ──start()──► Running ──stop()/EOF/error──► Stopped
/// ```
///
/// [`set_stream_parameters`](Self::set_stream_parameters) must be called
/// while stopped. [`stop`](Self::stop) closes the source, which unblocks
/// a pending read, and joins the worker; no packet is sent after it
/// returns. A closed source reports end-of-stream, so a stream restarted
/// after `stop()` exits as soon as it starts unless the source is
/// reopened by its owner.
pub struct H264Stream {
    source: Arc<dyn NalSource>,
    config: StreamConfig,
    params: ParameterSets,
    worker: Option<Worker>,
    handle: Option<JoinHandle<Option<Worker>>>,
    cancelled: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    resyncs: Arc<AtomicU64>,
    nals: Arc<AtomicU64>,
}

impl H264Stream {
    pub fn new(source: Arc<dyn NalSource>, sink: impl TransportSink + 'static) -> Self {
        Self::with_config(source, sink, StreamConfig::default())
    }

    pub fn with_config(
        source: Arc<dyn NalSource>,
        sink: impl TransportSink + 'static,
        config: StreamConfig,
    ) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let resyncs = Arc::new(AtomicU64::new(0));
        let nals = Arc::new(AtomicU64::new(0));

        let limits = DemuxLimits {
            max_nal_length: config.max_nal_length,
            max_resync_bytes: config.max_resync_bytes,
        };
        let demuxer = NalDemuxer::new(source.clone(), limits)
            .with_cancel_flag(cancelled.clone())
            .with_resync_counter(resyncs.clone());

        let worker = Worker {
            demuxer,
            packetizer: H264Packetizer::new().with_repeat_limit(config.parameter_set_repeat_limit),
            sink: Box::new(sink),
            stats: RollingStats::new(config.stats_window),
            nals: nals.clone(),
        };

        Self {
            source,
            config,
            params: ParameterSets::default(),
            worker: Some(worker),
            handle: None,
            cancelled,
            running: Arc::new(AtomicBool::new(false)),
            resyncs,
            nals,
        }
    }

    /// Configure the SPS/PPS injected ahead of IDR slices.
    pub fn set_stream_parameters(&mut self, pps: &[u8], sps: &[u8]) -> Result<()> {
        self.set_parameter_sets(ParameterSets::new(sps.to_vec(), pps.to_vec()))
    }

    /// Same as [`set_stream_parameters`](Self::set_stream_parameters), from
    /// base64 strings (e.g. the two halves of `sprop-parameter-sets`).
    pub fn set_stream_parameters_base64(&mut self, pps_b64: &str, sps_b64: &str) -> Result<()> {
        self.set_parameter_sets(ParameterSets::from_base64(sps_b64, pps_b64)?)
    }

    pub fn set_parameter_sets(&mut self, params: ParameterSets) -> Result<()> {
        if self.is_running() {
            return Err(PacketizerError::AlreadyRunning);
        }
        self.params = params;
        Ok(())
    }

    /// Spawn the worker. Does nothing if it is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.reclaim();

        let mut worker = self.worker.take().ok_or(PacketizerError::WorkerLost)?;
        let framing = worker.demuxer.framing();
        worker.packetizer.set_parameter_sets(self.params.clone());
        worker.sink.set_clock_frequency(self.config.clock_rate);
        worker
            .sink
            .set_cache_size(self.config.cache_size.unwrap_or(framing.default_cache_size()));

        self.cancelled.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        // The worker is handed over only once the thread exists, so a
        // failed spawn leaves it here for the next start().
        let (handoff, receive) = mpsc::sync_channel::<Worker>(1);
        let cancelled = self.cancelled.clone();
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("h264-packetizer".into())
            .spawn(move || {
                let Ok(mut worker) = receive.recv() else {
                    running.store(false, Ordering::SeqCst);
                    return None;
                };
                tracing::debug!(?framing, "H.264 packetizer started");
                let result = worker.run(&cancelled);
                running.store(false, Ordering::SeqCst);
                match result {
                    Ok(()) | Err(PacketizerError::Cancelled) => {
                        tracing::debug!("H.264 packetizer stopped")
                    }
                    Err(PacketizerError::EndOfStream) => {
                        tracing::info!("H.264 packetizer reached end of stream")
                    }
                    Err(e) => tracing::error!(error = %e, "H.264 packetizer failed"),
                }
                Some(worker)
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.worker = Some(worker);
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        if let Err(mpsc::SendError(worker)) = handoff.send(worker) {
            self.worker = Some(worker);
            self.running.store(false, Ordering::SeqCst);
            let _ = handle.join();
            return Err(PacketizerError::WorkerLost);
        }
        self.handle = Some(handle);
        Ok(())
    }

    /// Close the source, cancel the worker and wait for it to exit.
    ///
    /// Safe to call repeatedly and when the stream was never started.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancelled.store(true, Ordering::SeqCst);
        self.source.close();
        match handle.join() {
            Ok(worker) => self.worker = worker,
            Err(_) => tracing::error!("H.264 packetizer worker panicked"),
        }
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("stream stopped");
    }

    /// True while the worker thread is demuxing and sending.
    ///
    /// Turns false on its own when the worker exits at end of stream.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Block until the worker exits on its own (end of stream or error).
    pub fn wait(&mut self) {
        self.reclaim();
    }

    /// Resync episodes since the stream was created.
    pub fn resync_count(&self) -> u64 {
        self.resyncs.load(Ordering::Relaxed)
    }

    /// NAL units sent since the stream was created.
    pub fn nal_count(&self) -> u64 {
        self.nals.load(Ordering::Relaxed)
    }

    /// Join a worker that already exited and take its state back.
    fn reclaim(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(worker) => self.worker = worker,
                Err(_) => tracing::error!("H.264 packetizer worker panicked"),
            }
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for H264Stream {
    fn drop(&mut self) {
        self.stop();
    }
}
