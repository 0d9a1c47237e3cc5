//! # Pipeline Scheduler
//!
//! Drives one conversion job on the calling thread:
//!
//! ```text
//!  source ──► gate ──► worker[cursor] ──► sink
//!             (drop     (exchange:         (drained result of
//!              early     frame in,          the previous frame
//!              frames)   result out)        on that worker)
//! ```
//!
//! Workers are visited strictly round-robin, so results reach the sink in
//! decode order. At end of stream every worker is closed once, starting at the
//! cursor (the oldest in-flight frame), and the sink is flushed exactly once.
//! Any source or sink failure aborts every worker without draining.

use std::thread;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::ConvertConfig;
use crate::error::{ConvertError, MediaError};
use crate::frame::{Frame, PixelFormat};
use crate::graph::{FilterChainSpec, FilterGraph, GraphFactory, GraphParams};
use crate::palette;
use crate::sink::FrameSink;
use crate::source::{FrameSource, SourceEvent};
use crate::timeline::Timeline;
use crate::worker::{Drain, Handoff, WorkerPool};

// ============================================================================
// Report
// ============================================================================

/// A worker that closed itself mid-job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Completion {
    /// Every worker ran to end of stream
    Full,
    /// Finished on the surviving workers; frames held by the failed ones
    /// were lost
    Degraded { failed_workers: Vec<WorkerFailure> },
}

impl Completion {
    pub fn is_full(&self) -> bool {
        matches!(self, Completion::Full)
    }
}

/// Outcome of a finished job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub config: ConvertConfig,
    /// Frames pulled from the source
    pub frames_decoded: u64,
    /// Frames dropped by the frame-rate gate
    pub frames_decimated: u64,
    /// Frames handed to the sink
    pub frames_encoded: u64,
    /// Admitted frames that never came back out of a graph: still buffered
    /// at end of stream, or lost with a failed worker
    pub frames_unreturned: u64,
    /// Hand-offs that found a buffering graph
    pub retries: u64,
    pub frames_per_worker: Vec<u64>,
    pub completion: Completion,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
struct Counters {
    decoded: u64,
    decimated: u64,
    encoded: u64,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Graph parameters for converting `source` with `config`: scale to
/// `config.scale` of the source width, at most `2^depth` colours, indexed
/// output.
pub fn graph_params(source: &dyn FrameSource, config: &ConvertConfig) -> GraphParams {
    let (width, height) = source.geometry();
    GraphParams {
        width,
        height,
        pixel_format: source.pixel_format(),
        time_base: source.time_base(),
        chain: FilterChainSpec::for_input(width, height, config.scale, palette::colors_for_depth(config.depth)),
        output_format: PixelFormat::Pal8,
    }
}

pub struct Pipeline {
    config: ConvertConfig,
    pool: WorkerPool,
    timeline: Timeline,
    /// Next worker to receive a frame
    cursor: usize,
    /// Frames that passed the gate
    admitted: u64,
    failures: Vec<WorkerFailure>,
    first_failure: Option<(usize, MediaError)>,
}

impl Pipeline {
    /// Validate `config`, build one graph per worker and start the workers.
    pub fn new(
        config: &ConvertConfig,
        timeline: Timeline,
        factory: &dyn GraphFactory,
        params: &GraphParams,
    ) -> Result<Self, ConvertError> {
        config.validate()?;

        let mut graphs: Vec<Box<dyn FilterGraph>> = Vec::with_capacity(config.thread);
        for worker in 0..config.thread {
            let graph = factory
                .build(params)
                .map_err(|source| ConvertError::Filter { worker, source })?;
            graphs.push(graph);
        }
        let pool = WorkerPool::spawn(graphs, timeline)?;

        tracing::info!(
            "Pipeline: {} workers, {} ({}), scale factor {:.4}, interval {:.3} ticks",
            pool.len(),
            params.chain.display_chain(),
            params.chain,
            timeline.pts_scale_factor(),
            timeline.output_interval()
        );

        Ok(Self {
            config: config.clone(),
            pool,
            timeline,
            cursor: 0,
            admitted: 0,
            failures: Vec::new(),
            first_failure: None,
        })
    }

    /// Run the job to completion. Every worker thread has exited when this
    /// returns, on every path.
    pub fn run(mut self, source: &mut dyn FrameSource, sink: &mut dyn FrameSink) -> Result<JobReport, ConvertError> {
        if source.time_base() != self.timeline.input_time_base()
            || sink.time_base() != self.timeline.output_time_base()
        {
            return Err(ConvertError::Config(format!(
                "time bases {} -> {} do not match the pipeline timeline {} -> {}",
                source.time_base(),
                sink.time_base(),
                self.timeline.input_time_base(),
                self.timeline.output_time_base()
            )));
        }

        let started = Instant::now();
        let mut counters = Counters::default();

        let result = self
            .stream(source, sink, &mut counters)
            .and_then(|()| self.drain(sink, &mut counters));
        if let Err(err) = result {
            self.abort(&err);
            return Err(err);
        }

        if self.failures.len() == self.pool.len() {
            let err = self.exhausted();
            self.abort(&err);
            return Err(err);
        }

        if let Err(source) = sink.flush() {
            let err = ConvertError::Encode(source);
            self.abort(&err);
            return Err(err);
        }

        for worker in self.pool.join_all() {
            tracing::warn!(worker, "Filter worker thread panicked");
        }

        let completion = if self.failures.is_empty() {
            Completion::Full
        } else {
            Completion::Degraded {
                failed_workers: std::mem::take(&mut self.failures),
            }
        };
        let report = JobReport {
            config: self.config.clone(),
            frames_decoded: counters.decoded,
            frames_decimated: counters.decimated,
            frames_encoded: counters.encoded,
            frames_unreturned: self.admitted.saturating_sub(counters.encoded),
            retries: self.pool.retries(),
            frames_per_worker: self.pool.frames_per_worker(),
            completion,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if report.frames_unreturned > 0 {
            tracing::warn!("{} admitted frames never left their filter graph", report.frames_unreturned);
        }
        tracing::info!(
            "Job done: {} decoded, {} decimated, {} encoded in {}ms",
            report.frames_decoded,
            report.frames_decimated,
            report.frames_encoded,
            report.elapsed_ms
        );
        Ok(report)
    }

    /// Main loop, up to end of stream.
    fn stream(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        counters: &mut Counters,
    ) -> Result<(), ConvertError> {
        // frame bounced by a closed worker, offered to the next one
        let mut carried: Option<Frame> = None;

        loop {
            let frame = match carried.take() {
                Some(frame) => frame,
                None => match source.next_frame().map_err(ConvertError::Decode)? {
                    SourceEvent::Frame(frame) => {
                        counters.decoded += 1;
                        if !self.timeline.admits(frame.pts, self.admitted) {
                            counters.decimated += 1;
                            tracing::trace!(frame = frame.id, pts = frame.pts, "decimated");
                            continue;
                        }
                        self.admitted += 1;
                        frame
                    }
                    SourceEvent::Again => {
                        thread::yield_now();
                        continue;
                    }
                    SourceEvent::EndOfStream => return Ok(()),
                },
            };

            match self.pool.worker_mut(self.cursor).hand_off(frame) {
                Handoff::Accepted { drained } => {
                    if let Some(out) = drained {
                        sink.submit(out).map_err(ConvertError::Encode)?;
                        counters.encoded += 1;
                    }
                }
                Handoff::Rejected(frame) => {
                    self.retire(self.cursor);
                    if self.pool.all_closed() {
                        return Err(self.exhausted());
                    }
                    carried = Some(frame);
                }
            }
            self.cursor = (self.cursor + 1) % self.pool.len();
        }
    }

    /// Close every worker once, oldest in-flight frame first.
    fn drain(&mut self, sink: &mut dyn FrameSink, counters: &mut Counters) -> Result<(), ConvertError> {
        let workers = self.pool.len();
        for step in 0..workers {
            let idx = (self.cursor + step) % workers;
            match self.pool.worker_mut(idx).close() {
                Drain::Frame(out) => {
                    sink.submit(out).map_err(ConvertError::Encode)?;
                    counters.encoded += 1;
                }
                Drain::Empty => {}
                Drain::AlreadyClosed => self.retire(idx),
            }
        }
        tracing::debug!("Drained {} workers", workers);
        Ok(())
    }

    /// Record why worker `idx` closed itself.
    fn retire(&mut self, idx: usize) {
        let Some(error) = self.pool.worker(idx).take_error() else {
            return;
        };
        tracing::warn!(worker = idx, "Filter worker closed: {}", error);
        self.failures.push(WorkerFailure {
            worker: idx,
            error: error.to_string(),
        });
        if self.first_failure.is_none() {
            self.first_failure = Some((idx, error));
        }
    }

    /// Error for a job with no workers left.
    fn exhausted(&mut self) -> ConvertError {
        match self.first_failure.take() {
            Some((worker, source)) => ConvertError::Filter { worker, source },
            None => ConvertError::Filter {
                worker: self.cursor,
                source: MediaError::Graph("no filter workers left".into()),
            },
        }
    }

    fn abort(&mut self, err: &ConvertError) {
        tracing::error!("Aborting job at {} stage: {}", err.stage(), err);
        self.pool.abort_all();
        for worker in self.pool.join_all() {
            tracing::warn!(worker, "Filter worker thread panicked");
        }
    }
}

/// Convert everything `source` yields into `sink` with `config.thread`
/// workers built by `factory`.
pub fn run(
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    factory: &dyn GraphFactory,
    params: &GraphParams,
    config: &ConvertConfig,
) -> Result<JobReport, ConvertError> {
    let timeline = Timeline::new(source.time_base(), sink.time_base(), config.speed, config.fps)?;
    Pipeline::new(config, timeline, factory, params)?.run(source, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rational;
    use crate::graph::Pull;
    use crate::source::FrameListSource;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct Identity {
        ready: Option<Frame>,
    }

    impl FilterGraph for Identity {
        fn push(&mut self, frame: Frame) -> Result<(), MediaError> {
            self.ready = Some(frame);
            Ok(())
        }
        fn pull(&mut self) -> Result<Pull, MediaError> {
            Ok(self.ready.take().map(Pull::Frame).unwrap_or(Pull::Retry))
        }
    }

    fn identity(_: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        Ok(Box::new(Identity::default()))
    }

    /// Sleeps a little so hand-offs really block.
    struct Slow(Identity);

    impl FilterGraph for Slow {
        fn push(&mut self, frame: Frame) -> Result<(), MediaError> {
            thread::sleep(Duration::from_millis(1));
            self.0.push(frame)
        }
        fn pull(&mut self) -> Result<Pull, MediaError> {
            self.0.pull()
        }
    }

    fn slow(_: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        Ok(Box::new(Slow(Identity::default())))
    }

    struct Failing;

    impl FilterGraph for Failing {
        fn push(&mut self, _frame: Frame) -> Result<(), MediaError> {
            Err(MediaError::Graph("filter exploded".into()))
        }
        fn pull(&mut self) -> Result<Pull, MediaError> {
            Ok(Pull::Retry)
        }
    }

    fn failing(_: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        Ok(Box::new(Failing))
    }

    /// Identity graph keeping a token alive until its worker thread exits.
    struct Holding(#[allow(dead_code)] Arc<()>, Identity);

    impl FilterGraph for Holding {
        fn push(&mut self, frame: Frame) -> Result<(), MediaError> {
            self.1.push(frame)
        }
        fn pull(&mut self) -> Result<Pull, MediaError> {
            self.1.pull()
        }
    }

    fn holding(token: &Arc<()>) -> impl Fn(&GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        let token = Arc::clone(token);
        move |_: &GraphParams| -> Result<Box<dyn FilterGraph>, MediaError> {
            Ok(Box::new(Holding(Arc::clone(&token), Identity::default())))
        }
    }

    /// Builds identity graphs, except a failing one at `fail_at`.
    struct OneBad {
        built: AtomicUsize,
        fail_at: usize,
    }

    impl GraphFactory for OneBad {
        fn build(&self, _params: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
            if self.built.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                Ok(Box::new(Failing))
            } else {
                Ok(Box::new(Identity::default()))
            }
        }
    }

    /// Emits only every other frame.
    #[derive(Default)]
    struct Halving {
        pushed: u64,
        ready: Option<Frame>,
    }

    impl FilterGraph for Halving {
        fn push(&mut self, frame: Frame) -> Result<(), MediaError> {
            if self.pushed % 2 == 0 {
                self.ready = Some(frame);
            }
            self.pushed += 1;
            Ok(())
        }
        fn pull(&mut self) -> Result<Pull, MediaError> {
            Ok(self.ready.take().map(Pull::Frame).unwrap_or(Pull::Retry))
        }
    }

    fn halving(_: &GraphParams) -> Result<Box<dyn FilterGraph>, MediaError> {
        Ok(Box::new(Halving::default()))
    }

    #[derive(Default)]
    struct RecordingSink {
        pts: Vec<i64>,
        flushes: usize,
        submitted_at_flush: Option<usize>,
        fail_on_submit: Option<usize>,
        fail_flush: bool,
        /// Defaults to centiseconds
        time_base: Option<Rational>,
    }

    impl FrameSink for RecordingSink {
        fn time_base(&self) -> Rational {
            self.time_base.unwrap_or(Rational::new(1, 100))
        }
        fn submit(&mut self, frame: Frame) -> Result<(), MediaError> {
            assert_eq!(self.flushes, 0, "submit after flush");
            if self.fail_on_submit == Some(self.pts.len()) {
                return Err(MediaError::InvalidFrame("disk full".into()));
            }
            self.pts.push(frame.pts);
            Ok(())
        }
        fn flush(&mut self) -> Result<(), MediaError> {
            if self.fail_flush {
                return Err(MediaError::Io(std::io::Error::other("trailer write failed")));
            }
            self.flushes += 1;
            self.submitted_at_flush = Some(self.pts.len());
            Ok(())
        }
    }

    enum Step {
        Frame(i64),
        Again,
        Fail,
    }

    struct ScriptedSource {
        steps: VecDeque<Step>,
        time_base: Rational,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>, time_base: Rational) -> Self {
            Self {
                steps: steps.into(),
                time_base,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn time_base(&self) -> Rational {
            self.time_base
        }
        fn geometry(&self) -> (u32, u32) {
            (1, 1)
        }
        fn pixel_format(&self) -> PixelFormat {
            PixelFormat::Rgb24
        }
        fn next_frame(&mut self) -> Result<SourceEvent, MediaError> {
            match self.steps.pop_front() {
                Some(Step::Frame(pts)) => Ok(SourceEvent::Frame(Frame::filled_rgb(1, 1, [0; 3], pts))),
                Some(Step::Again) => Ok(SourceEvent::Again),
                Some(Step::Fail) => Err(MediaError::InvalidFrame("corrupt packet".into())),
                None => Ok(SourceEvent::EndOfStream),
            }
        }
    }

    fn frames(count: i64, time_base: Rational) -> FrameListSource {
        let frames = (0..count).map(|pts| Frame::filled_rgb(1, 1, [0; 3], pts)).collect();
        FrameListSource::new(frames, time_base)
    }

    fn config(speed: f32, fps: u32, thread: usize) -> ConvertConfig {
        ConvertConfig {
            speed,
            fps,
            thread,
            ..Default::default()
        }
    }

    fn convert(
        source: &mut dyn FrameSource,
        sink: &mut RecordingSink,
        factory: &dyn GraphFactory,
        config: &ConvertConfig,
    ) -> Result<JobReport, ConvertError> {
        let params = graph_params(source, config);
        run(source, sink, factory, &params, config)
    }

    #[test]
    fn test_speed_and_fps_scenario() {
        for thread in [1, 2, 3] {
            let mut source = frames(30, Rational::new(1, 30));
            let mut sink = RecordingSink::default();
            let report = convert(&mut source, &mut sink, &identity, &config(2.0, 10, thread)).unwrap();

            assert_eq!(sink.pts, vec![0, 10, 20, 30, 40], "thread = {thread}");
            assert_eq!(report.frames_decoded, 30);
            assert_eq!(report.frames_decimated, 25);
            assert_eq!(report.frames_encoded, 5);
            assert_eq!(report.frames_unreturned, 0);
            assert_eq!(report.frames_per_worker.iter().sum::<u64>(), 5);
            assert!(report.completion.is_full());
            if thread == 2 {
                assert_eq!(report.frames_per_worker, vec![3, 2]);
            }
        }
    }

    #[test]
    fn test_frame_rate_above_centiseconds() {
        let mut source = frames(240, Rational::new(1, 240));
        let mut sink = RecordingSink {
            time_base: Some(Rational::new(1, 1000)),
            ..Default::default()
        };
        let report = convert(&mut source, &mut sink, &identity, &config(1.0, 120, 2)).unwrap();

        // every second input frame, 1000/120 ms apart
        assert_eq!(report.frames_encoded, 120);
        assert_eq!(report.frames_decimated, 120);
        assert_eq!(sink.pts.len(), 120);
        assert_eq!(sink.pts[0], 0);
        assert_eq!(sink.pts[1], 8);
        assert_eq!(*sink.pts.last().unwrap(), 992);
        assert!(sink.pts.windows(2).all(|w| (8..=9).contains(&(w[1] - w[0]))));
        assert!(report.completion.is_full());
    }

    #[test]
    fn test_output_pts_monotonic() {
        let mut source = frames(200, Rational::new(1, 30));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &slow, &config(1.0, 30, 4)).unwrap();

        assert_eq!(report.frames_encoded, 200);
        assert!(sink.pts.windows(2).all(|w| w[0] <= w[1]), "{:?}", sink.pts);
        for (input, output) in sink.pts.iter().enumerate() {
            assert_eq!(*output, (input as f64 * 100.0 / 30.0).round() as i64);
        }
    }

    #[test]
    fn test_even_distribution() {
        let mut source = frames(10, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &identity, &config(1.0, 10, 3)).unwrap();
        assert_eq!(report.frames_per_worker, vec![4, 3, 3]);
    }

    #[test]
    fn test_drains_everything_before_single_flush() {
        let mut source = frames(10, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        convert(&mut source, &mut sink, &slow, &config(1.0, 10, 4)).unwrap();

        assert_eq!(sink.flushes, 1);
        assert_eq!(sink.submitted_at_flush, Some(10));
        assert_eq!(sink.pts, (0..10).map(|p| p * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_thread_matches_parallel_order() {
        let mut sequential = RecordingSink::default();
        convert(&mut frames(50, Rational::new(1, 25)), &mut sequential, &identity, &config(1.5, 10, 1)).unwrap();

        let mut parallel = RecordingSink::default();
        convert(&mut frames(50, Rational::new(1, 25)), &mut parallel, &slow, &config(1.5, 10, 3)).unwrap();

        assert!(!sequential.pts.is_empty());
        assert_eq!(sequential.pts, parallel.pts);
    }

    #[test]
    fn test_decimation_ratio() {
        let mut source = frames(600, Rational::new(1, 60));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &identity, &config(1.0, 10, 2)).unwrap();

        assert_eq!(report.frames_encoded, 100);
        assert_eq!(report.frames_decimated, 500);
        assert_eq!(sink.pts.last(), Some(&990));
    }

    #[test]
    fn test_again_is_retried() {
        let steps = vec![Step::Again, Step::Frame(0), Step::Again, Step::Again, Step::Frame(1)];
        let mut source = ScriptedSource::new(steps, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &identity, &config(1.0, 10, 2)).unwrap();
        assert_eq!(sink.pts, vec![0, 10]);
        assert_eq!(report.frames_decoded, 2);
    }

    #[test]
    fn test_decode_error_aborts_and_joins() {
        let token = Arc::new(());
        let factory = holding(&token);

        let steps = (0..5).map(Step::Frame).chain([Step::Fail]).collect();
        let mut source = ScriptedSource::new(steps, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let err = convert(&mut source, &mut sink, &factory, &config(1.0, 10, 3)).unwrap_err();

        assert!(matches!(err, ConvertError::Decode(_)));
        assert_eq!(err.stage(), "decode");
        assert_eq!(sink.flushes, 0);
        drop(factory);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_sink_error_aborts() {
        let mut source = frames(10, Rational::new(1, 10));
        let mut sink = RecordingSink {
            fail_on_submit: Some(2),
            ..Default::default()
        };
        let err = convert(&mut source, &mut sink, &identity, &config(1.0, 10, 2)).unwrap_err();
        assert!(matches!(err, ConvertError::Encode(_)));
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn test_worker_failure_degrades() {
        let factory = OneBad {
            built: AtomicUsize::new(0),
            fail_at: 1,
        };
        let mut source = frames(10, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &factory, &config(1.0, 10, 2)).unwrap();

        // frame 1 died with worker 1, everything else went through worker 0
        assert_eq!(sink.pts, vec![0, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert_eq!(sink.flushes, 1);
        match report.completion {
            Completion::Degraded { failed_workers } => {
                assert_eq!(failed_workers.len(), 1);
                assert_eq!(failed_workers[0].worker, 1);
                assert!(failed_workers[0].error.contains("filter exploded"));
            }
            Completion::Full => panic!("expected degraded completion"),
        }
        assert_eq!(report.frames_unreturned, 1);
    }

    #[test]
    fn test_failure_found_while_draining_degrades() {
        let factory = OneBad {
            built: AtomicUsize::new(0),
            fail_at: 1,
        };
        // worker 1 gets the last frame and is only looked at again by the drain
        let mut source = frames(2, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &factory, &config(1.0, 10, 2)).unwrap();

        assert_eq!(sink.pts, vec![0]);
        assert_eq!(sink.flushes, 1);
        assert_eq!(report.frames_per_worker, vec![1, 1]);
        assert_eq!(report.frames_unreturned, 1);
        match report.completion {
            Completion::Degraded { failed_workers } => {
                assert_eq!(failed_workers.len(), 1);
                assert_eq!(failed_workers[0].worker, 1);
            }
            Completion::Full => panic!("expected degraded completion"),
        }
    }

    #[test]
    fn test_all_workers_failing_while_draining_is_fatal() {
        // one frame per worker, so no failure surfaces before the drain
        let mut source = frames(2, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let err = convert(&mut source, &mut sink, &failing, &config(1.0, 10, 2)).unwrap_err();

        assert!(matches!(err, ConvertError::Filter { worker: 0, .. }));
        assert_eq!(err.stage(), "filter");
        assert!(sink.pts.is_empty());
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn test_flush_error_aborts_and_joins() {
        let token = Arc::new(());
        let factory = holding(&token);
        let mut source = frames(6, Rational::new(1, 10));
        let mut sink = RecordingSink {
            fail_flush: true,
            ..Default::default()
        };
        let err = convert(&mut source, &mut sink, &factory, &config(1.0, 10, 3)).unwrap_err();

        assert!(matches!(err, ConvertError::Encode(_)));
        assert_eq!(err.stage(), "encode");
        assert_eq!(sink.pts, vec![0, 10, 20, 30, 40, 50]);
        drop(factory);
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_all_workers_failing_is_fatal() {
        let mut source = frames(10, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let err = convert(&mut source, &mut sink, &failing, &config(1.0, 10, 2)).unwrap_err();

        assert!(matches!(err, ConvertError::Filter { worker: 0, .. }));
        assert!(sink.pts.is_empty());
        assert_eq!(sink.flushes, 0);
    }

    #[test]
    fn test_retry_is_an_empty_slot() {
        let mut source = frames(6, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &halving, &config(1.0, 10, 1)).unwrap();

        assert_eq!(sink.pts, vec![0, 20, 40]);
        assert_eq!(report.retries, 3);
        // swallowed frames never come back out
        assert_eq!(report.frames_unreturned, 3);
        assert!(report.completion.is_full());
    }

    #[test]
    fn test_setup_errors() {
        let source = frames(1, Rational::new(1, 10));
        let bad = config(1.0, 10, 0);
        let params = graph_params(&source, &bad);
        let timeline = Timeline::new(Rational::new(1, 10), Rational::new(1, 100), 1.0, 10).unwrap();
        assert!(matches!(
            Pipeline::new(&bad, timeline, &identity, &params),
            Err(ConvertError::Settings(_))
        ));

        let broken = |_: &GraphParams| -> Result<Box<dyn FilterGraph>, MediaError> {
            Err(MediaError::Unsupported("no such filter".into()))
        };
        assert!(matches!(
            Pipeline::new(&config(1.0, 10, 2), timeline, &broken, &params),
            Err(ConvertError::Filter { worker: 0, .. })
        ));
    }

    #[test]
    fn test_report_serializes() {
        let mut source = frames(3, Rational::new(1, 10));
        let mut sink = RecordingSink::default();
        let report = convert(&mut source, &mut sink, &identity, &config(1.0, 10, 1)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frames_encoded"], 3);
        assert_eq!(json["completion"]["status"], "full");
        assert_eq!(json["config"]["fps"], 10);
    }
}
