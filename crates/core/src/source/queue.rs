use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::{FramingMode, NalSource};

/// Maximum number of buffers held before [`AccessUnitQueue::push`] drops
/// the oldest one.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

struct Unit {
    data: Vec<u8>,
    pts: Duration,
}

struct State {
    pending: VecDeque<Unit>,
    current: Option<Unit>,
    offset: usize,
    last_pts: Option<Duration>,
    finished: bool,
    closed: bool,
}

/// Buffer-oriented [`NalSource`] fed by an encoder callback.
///
/// Each pushed buffer is one NAL unit (with or without a start code,
/// depending on the framing) plus its presentation time. Reads drain the
/// current buffer before moving to the next one, and `available()`
/// reports what is left of the current buffer only, which is what the
/// demuxer uses as the NAL length in start-code and raw framing.
///
/// Reads block on a condvar until a buffer arrives or the queue is closed.
pub struct AccessUnitQueue {
    state: Mutex<State>,
    ready: Condvar,
    framing: FramingMode,
    depth: usize,
}

impl AccessUnitQueue {
    pub fn new(framing: FramingMode) -> Self {
        Self::with_depth(framing, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_depth(framing: FramingMode, depth: usize) -> Self {
        Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                current: None,
                offset: 0,
                last_pts: None,
                finished: false,
                closed: false,
            }),
            ready: Condvar::new(),
            framing,
            depth: depth.max(1),
        }
    }

    /// Queue one buffer. Returns `false` if the queue is closed.
    ///
    /// When the queue is full the oldest pending buffer is dropped; a live
    /// stream prefers fresh frames over complete history.
    pub fn push(&self, data: Vec<u8>, pts: Duration) -> bool {
        let mut state = self.state.lock();
        if state.closed || state.finished {
            return false;
        }
        if data.is_empty() {
            return true;
        }
        if state.pending.len() >= self.depth {
            state.pending.pop_front();
            tracing::debug!(depth = self.depth, "access unit queue full, dropped oldest buffer");
        }
        state.pending.push_back(Unit { data, pts });
        self.ready.notify_one();
        true
    }

    /// Mark the end of input. Reads drain what is queued, then report
    /// end-of-stream. Unlike [`close`](NalSource::close), nothing is dropped.
    pub fn finish(&self) {
        let mut state = self.state.lock();
        state.finished = true;
        self.ready.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl NalSource for AccessUnitQueue {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Ok(0);
            }
            let exhausted = state
                .current
                .as_ref()
                .is_none_or(|unit| state.offset >= unit.data.len());
            if !exhausted {
                break;
            }
            match state.pending.pop_front() {
                Some(unit) => {
                    state.last_pts = Some(unit.pts);
                    state.current = Some(unit);
                    state.offset = 0;
                }
                None if state.finished => return Ok(0),
                None => self.ready.wait(&mut state),
            }
        }

        let State {
            current, offset, ..
        } = &mut *state;
        let Some(unit) = current.as_ref() else {
            return Ok(0);
        };
        let remaining = &unit.data[*offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        *offset += n;
        Ok(n)
    }

    fn available(&self) -> usize {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .map_or(0, |unit| unit.data.len() - state.offset)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.pending.clear();
        self.ready.notify_all();
    }

    fn presentation_time(&self) -> Option<Duration> {
        self.state.lock().last_pts
    }

    fn framing(&self) -> FramingMode {
        self.framing
    }
}
