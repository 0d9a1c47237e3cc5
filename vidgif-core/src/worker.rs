//! # Filter Workers
//!
//! Each worker owns one filter graph and runs on its own thread. The
//! scheduler talks to it through a single slot: a frame cell plus a status,
//! both behind one mutex, with a condvar signalled on every transition.
//!
//! ```text
//!              hand_off               filtered
//!  Pending ──────────────► Processing ─────────► Done(Ready | Retry)
//!     │                        │    ▲                   │
//!     │ close                  │    └───── hand_off ────┤
//!     ▼                        │ graph error            │ close
//!  Closed ◄────────────────────┴────────────────────────┘
//! ```
//!
//! The scheduler owns every transition out of `Pending`/`Done`; the worker
//! owns every transition out of `Processing`. A frame lives in the slot iff
//! the status is `Processing` or `Done(Ready)`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::error::{ConvertError, MediaError};
use crate::frame::Frame;
use crate::graph::{FilterGraph, Pull};
use crate::timeline::Timeline;

// ============================================================================
// Slot State
// ============================================================================

/// What the worker produced for its last frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// A filtered frame is parked in the slot
    Ready,
    /// The graph buffered the input; nothing to collect
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// No work assigned yet
    Pending,
    /// Frame handed over, worker busy
    Processing,
    /// Worker finished its frame
    Done(FilterOutcome),
    /// Worker stopped for good
    Closed,
}

struct SlotCell {
    status: SlotStatus,
    frame: Option<Frame>,
    /// Failure that closed the worker, until the scheduler collects it
    error: Option<MediaError>,
}

struct Slot {
    cell: Mutex<SlotCell>,
    changed: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            cell: Mutex::new(SlotCell {
                status: SlotStatus::Pending,
                frame: None,
                error: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn close_with_error(&self, error: MediaError) {
        let mut cell = self.cell.lock();
        cell.status = SlotStatus::Closed;
        cell.frame = None;
        cell.error.get_or_insert(error);
        drop(cell);
        self.changed.notify_all();
    }
}

/// Result of offering a frame to a worker
#[derive(Debug)]
pub enum Handoff {
    /// The worker took the frame. `drained` is the result it had parked.
    Accepted { drained: Option<Frame> },
    /// The worker is closed; the frame comes back untouched.
    Rejected(Frame),
}

/// Result of closing a worker at end of stream
#[derive(Debug)]
pub enum Drain {
    /// Closed; this result was still parked
    Frame(Frame),
    /// Closed with nothing left to collect
    Empty,
    /// The worker had already closed itself
    AlreadyClosed,
}

// ============================================================================
// Worker Handle (scheduler side)
// ============================================================================

pub struct FilterWorker {
    id: usize,
    slot: Arc<Slot>,
    handle: Option<JoinHandle<()>>,
    frames_assigned: u64,
    retries: u64,
}

impl FilterWorker {
    /// Start a worker thread around `graph`.
    pub fn spawn(id: usize, graph: Box<dyn FilterGraph>, timeline: Timeline) -> Result<Self, ConvertError> {
        let slot = Arc::new(Slot::new());
        let thread_slot = Arc::clone(&slot);
        let handle = thread::Builder::new()
            .name(format!("vidgif-filter-{id}"))
            .spawn(move || worker_loop(id, graph, timeline, thread_slot))
            .map_err(|source| ConvertError::Spawn { worker: id, source })?;

        Ok(Self {
            id,
            slot,
            handle: Some(handle),
            frames_assigned: 0,
            retries: 0,
        })
    }

    /// Frames this worker has accepted so far
    pub fn frames_assigned(&self) -> u64 {
        self.frames_assigned
    }

    /// Hand-offs that found a `Retry` outcome
    pub fn retries(&self) -> u64 {
        self.retries
    }

    /// Current status, without waiting
    pub(crate) fn status(&self) -> SlotStatus {
        self.slot.cell.lock().status
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SlotStatus::Closed
    }

    /// Block until the worker is not `Processing` and return its status.
    #[cfg(test)]
    fn wait_settled(&self) -> SlotStatus {
        let mut cell = self.slot.cell.lock();
        while cell.status == SlotStatus::Processing {
            self.slot.changed.wait(&mut cell);
        }
        cell.status
    }

    /// Exchange `frame` with whatever the slot holds and arm the worker.
    ///
    /// Blocks while the worker is busy.
    pub fn hand_off(&mut self, frame: Frame) -> Handoff {
        let mut cell = self.slot.cell.lock();
        while cell.status == SlotStatus::Processing {
            self.slot.changed.wait(&mut cell);
        }

        let drained = match cell.status {
            SlotStatus::Closed => return Handoff::Rejected(frame),
            SlotStatus::Done(FilterOutcome::Ready) => cell.frame.take(),
            SlotStatus::Done(FilterOutcome::Retry) => {
                self.retries += 1;
                None
            }
            SlotStatus::Pending | SlotStatus::Processing => None,
        };
        debug_assert!(cell.frame.is_none());

        tracing::trace!(worker = self.id, frame = frame.id, pts = frame.pts, "hand-off");
        cell.frame = Some(frame);
        cell.status = SlotStatus::Processing;
        self.frames_assigned += 1;
        drop(cell);
        self.slot.changed.notify_all();

        Handoff::Accepted { drained }
    }

    /// Retire the worker, collecting a parked result. Blocks while busy.
    pub fn close(&mut self) -> Drain {
        let mut cell = self.slot.cell.lock();
        while cell.status == SlotStatus::Processing {
            self.slot.changed.wait(&mut cell);
        }

        let drain = match cell.status {
            SlotStatus::Closed => return Drain::AlreadyClosed,
            SlotStatus::Done(FilterOutcome::Ready) => cell.frame.take().map(|frame| {
                tracing::trace!(worker = self.id, frame = frame.id, pts = frame.pts, "drained");
                Drain::Frame(frame)
            }),
            SlotStatus::Done(FilterOutcome::Retry) => {
                self.retries += 1;
                None
            }
            SlotStatus::Pending | SlotStatus::Processing => None,
        };
        cell.status = SlotStatus::Closed;
        drop(cell);
        self.slot.changed.notify_all();

        drain.unwrap_or(Drain::Empty)
    }

    /// Failure that closed this worker. Returned once.
    pub fn take_error(&self) -> Option<MediaError> {
        self.slot.cell.lock().error.take()
    }

    /// Force the slot closed without draining. An in-flight frame is
    /// discarded by the worker when it finishes.
    pub fn abort(&self) {
        let mut cell = self.slot.cell.lock();
        cell.status = SlotStatus::Closed;
        cell.frame = None;
        drop(cell);
        self.slot.changed.notify_all();
    }

    /// Wait for the thread to exit. Returns false if it panicked.
    pub fn join(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for FilterWorker {
    fn drop(&mut self) {
        self.abort();
        if !self.join() {
            tracing::warn!(worker = self.id, "Filter worker thread panicked");
        }
    }
}

// ============================================================================
// Worker Thread
// ============================================================================

/// Closes the slot if the worker thread unwinds, so the scheduler never
/// waits on a `Processing` slot nobody will finish.
struct CloseOnPanic<'a> {
    id: usize,
    slot: &'a Slot,
}

impl Drop for CloseOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.slot
                .close_with_error(MediaError::Graph(format!("filter worker {} panicked", self.id)));
        }
    }
}

fn worker_loop(id: usize, mut graph: Box<dyn FilterGraph>, timeline: Timeline, slot: Arc<Slot>) {
    let _guard = CloseOnPanic { id, slot: &slot };
    tracing::debug!(worker = id, graph = graph.name(), "Filter worker started");

    loop {
        let frame = {
            let mut cell = slot.cell.lock();
            loop {
                match cell.status {
                    SlotStatus::Processing => break,
                    SlotStatus::Closed => {
                        tracing::debug!(worker = id, "Filter worker stopped");
                        return;
                    }
                    SlotStatus::Pending | SlotStatus::Done(_) => slot.changed.wait(&mut cell),
                }
            }
            cell.frame.take()
        };

        let Some(frame) = frame else {
            slot.close_with_error(MediaError::Graph("slot armed without a frame".into()));
            return;
        };

        let result = filter_one(graph.as_mut(), frame, &timeline);

        let mut cell = slot.cell.lock();
        if cell.status != SlotStatus::Processing {
            // aborted while filtering
            return;
        }
        match result {
            Ok(Some(out)) => {
                cell.frame = Some(out);
                cell.status = SlotStatus::Done(FilterOutcome::Ready);
            }
            Ok(None) => cell.status = SlotStatus::Done(FilterOutcome::Retry),
            Err(err) => {
                tracing::error!(worker = id, "Filter failed: {}", err);
                cell.error = Some(err);
                cell.status = SlotStatus::Closed;
                drop(cell);
                slot.changed.notify_all();
                return;
            }
        }
        drop(cell);
        slot.changed.notify_all();
    }
}

/// Push one frame through the graph and put its result on the output
/// timeline.
fn filter_one(graph: &mut dyn FilterGraph, frame: Frame, timeline: &Timeline) -> Result<Option<Frame>, MediaError> {
    graph.push(frame)?;
    match graph.pull()? {
        Pull::Frame(mut out) => {
            out.pts = timeline.remap(out.pts);
            Ok(Some(out))
        }
        Pull::Retry => Ok(None),
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Fixed set of workers, visited round-robin. Dropping the pool aborts every
/// worker and joins every thread.
pub struct WorkerPool {
    workers: Vec<FilterWorker>,
}

impl WorkerPool {
    pub fn spawn(graphs: Vec<Box<dyn FilterGraph>>, timeline: Timeline) -> Result<Self, ConvertError> {
        let mut workers = Vec::with_capacity(graphs.len());
        for (id, graph) in graphs.into_iter().enumerate() {
            workers.push(FilterWorker::spawn(id, graph, timeline)?);
        }
        Ok(Self { workers })
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn worker(&self, idx: usize) -> &FilterWorker {
        &self.workers[idx]
    }

    pub fn worker_mut(&mut self, idx: usize) -> &mut FilterWorker {
        &mut self.workers[idx]
    }

    pub fn all_closed(&self) -> bool {
        self.workers.iter().all(FilterWorker::is_closed)
    }

    pub fn frames_per_worker(&self) -> Vec<u64> {
        self.workers.iter().map(FilterWorker::frames_assigned).collect()
    }

    pub fn retries(&self) -> u64 {
        self.workers.iter().map(FilterWorker::retries).sum()
    }

    /// Close every slot without draining.
    pub fn abort_all(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }

    /// Join every thread. Returns the ids of workers that panicked.
    pub fn join_all(&mut self) -> Vec<usize> {
        self.workers
            .iter_mut()
            .filter_map(|worker| (!worker.join()).then_some(worker.id))
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.abort_all();
        for id in self.join_all() {
            tracing::warn!(worker = id, "Filter worker thread panicked");
        }
    }
}
