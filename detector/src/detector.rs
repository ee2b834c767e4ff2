use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use window_delta_common::config::DetectorConfig;
use window_delta_common::frame::{DiffFrame, FrameBuffer, Geometry, PixelFormat, WindowHandle};

use crate::diff::DiffEngine;
use crate::ring::RingBuffer;
use crate::source::{CaptureError, FrameSource};

/// Lifecycle of a [`Detector`].
///
/// `Faulted` is terminal: once entered, every control and read call
/// returns the stored error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Running,
    Faulted(DetectorError),
}

impl DetectorState {
    pub fn is_running(&self) -> bool {
        matches!(self, DetectorState::Running)
    }

    pub fn fault(&self) -> Option<&DetectorError> {
        match self {
            DetectorState::Faulted(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DetectorError {
    #[error("window {handle} cannot be captured: {reason}")]
    InvalidHandle { handle: WindowHandle, reason: String },
    #[error("captured window changed size from {expected} to {actual}")]
    FrameSizeChanged { expected: Geometry, actual: Geometry },
    #[error("capture failed: {0}")]
    CaptureFailure(String),
    #[error("detector setup failed: {0}")]
    Setup(String),
}

/// Geometry of the first capture; every later frame must match it.
#[derive(Debug, Clone, Copy)]
struct Baseline {
    geometry: Geometry,
    stride: usize,
    size: usize,
}

/// State shared between the detector handle and its sampling task.
struct Sampler<S> {
    handle: WindowHandle,
    format: PixelFormat,
    baseline: Baseline,
    warmup_frames: u64,
    sample_interval: Duration,
    source: tokio::sync::Mutex<S>,
    frames: RingBuffer<FrameBuffer>,
    diffs: RingBuffer<DiffFrame>,
    engine: DiffEngine,
    state: watch::Sender<DetectorState>,
    /// Start of the most recent iteration, across runs.
    last_sample: Mutex<Option<Instant>>,
}

/// A launched sampling task and its stop signal.
struct Run {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Samples one window on a fixed cadence and keeps the latest byte-wise
/// difference between consecutive captures.
///
/// All methods take `&self`; a detector can be shared across threads
/// behind an `Arc`. Dropping it stops the sampling task.
pub struct Detector<S> {
    sampler: Arc<Sampler<S>>,
    /// Current or most recently stopped run.
    run: Mutex<Option<Run>>,
    runtime: Handle,
}

impl<S: FrameSource> Detector<S> {
    /// Capture `handle` once to fix the reference geometry.
    ///
    /// Fails with [`DetectorError::InvalidHandle`] if that first capture
    /// fails. The detector starts out [`DetectorState::Idle`].
    pub async fn open(
        mut source: S,
        handle: WindowHandle,
        format: PixelFormat,
        config: &DetectorConfig,
    ) -> Result<Self, DetectorError> {
        config
            .validate()
            .map_err(|e| DetectorError::Setup(e.to_string()))?;
        let runtime = Handle::try_current().map_err(|e| DetectorError::Setup(e.to_string()))?;

        let first = source
            .capture(handle, format)
            .await
            .map_err(|e| invalid_handle(handle, e))?;
        let baseline = Baseline {
            geometry: first.geometry(),
            stride: first.stride(),
            size: first.size(),
        };
        info!(
            %handle,
            %format,
            width = baseline.geometry.width,
            height = baseline.geometry.height,
            stride = baseline.stride,
            "baseline geometry captured"
        );

        let frames = RingBuffer::new(config.frame_history)
            .map_err(|e| DetectorError::Setup(e.to_string()))?;
        let diffs = RingBuffer::new(config.diff_history)
            .map_err(|e| DetectorError::Setup(e.to_string()))?;
        let (state, _) = watch::channel(DetectorState::Idle);

        Ok(Self {
            sampler: Arc::new(Sampler {
                handle,
                format,
                baseline,
                warmup_frames: config.warmup_frames,
                sample_interval: config.sample_interval(),
                source: tokio::sync::Mutex::new(source),
                frames,
                diffs,
                engine: DiffEngine::new(baseline.size),
                state,
                last_sample: Mutex::new(None),
            }),
            run: Mutex::new(None),
            runtime,
        })
    }

    /// Launch the sampling task. No-op when already running.
    ///
    /// After a `stop`, the new task waits for the previous one to finish
    /// its last iteration, then keeps the minimum sample interval measured
    /// from that iteration's start.
    pub fn start(&self) -> Result<(), DetectorError> {
        let mut run = self.lock_run();
        let mut outcome = Ok(());
        let mut launch = false;
        self.sampler.state.send_if_modified(|state| match state {
            DetectorState::Faulted(err) => {
                outcome = Err(err.clone());
                false
            }
            DetectorState::Running => false,
            DetectorState::Idle => {
                *state = DetectorState::Running;
                launch = true;
                true
            }
        });
        outcome?;

        if launch {
            let (stop, stop_rx) = watch::channel(false);
            let previous = run.take().map(|prev| prev.task);
            let sampler = Arc::clone(&self.sampler);
            let task = self.runtime.spawn(sampler.run(stop_rx, previous));
            *run = Some(Run { stop, task });
            info!(handle = %self.sampler.handle, "detector started");
        }
        Ok(())
    }

    /// Ask the sampling task to finish and mark the detector idle.
    ///
    /// Returns immediately; the task may complete one more iteration.
    pub fn stop(&self) -> Result<(), DetectorError> {
        let mut run = self.lock_run();
        let mut outcome = Ok(());
        let stopped = self.sampler.state.send_if_modified(|state| match state {
            DetectorState::Faulted(err) => {
                outcome = Err(err.clone());
                false
            }
            DetectorState::Running => {
                *state = DetectorState::Idle;
                true
            }
            DetectorState::Idle => false,
        });
        outcome?;

        if let Some(run) = run.as_ref() {
            let _ = run.stop.send(true);
        }
        if stopped {
            info!(handle = %self.sampler.handle, "detector stopped");
        }
        Ok(())
    }

    /// Latest diff frame.
    ///
    /// `None` when the detector is not running or has not finished warming
    /// up yet.
    pub fn latest_diff(&self) -> Result<Option<DiffFrame>, DetectorError> {
        let state = self.sampler.state.borrow().clone();
        match state {
            DetectorState::Faulted(err) => Err(err),
            DetectorState::Idle => Ok(None),
            DetectorState::Running => Ok(self.sampler.diffs.latest()),
        }
    }

    pub fn state(&self) -> DetectorState {
        self.sampler.state.borrow().clone()
    }

    /// Watch state transitions, e.g. to await a fault instead of polling.
    pub fn subscribe(&self) -> watch::Receiver<DetectorState> {
        self.sampler.state.subscribe()
    }

    /// Frames captured by the sampling loop so far (baseline not included).
    pub fn captured_frames(&self) -> u64 {
        self.sampler.frames.count()
    }

    pub fn warmup_frames(&self) -> u64 {
        self.sampler.warmup_frames
    }

    pub fn window(&self) -> WindowHandle {
        self.sampler.handle
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.sampler.format
    }

    pub fn width(&self) -> u32 {
        self.sampler.baseline.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.sampler.baseline.geometry.height
    }

    pub fn stride(&self) -> usize {
        self.sampler.baseline.stride
    }

    /// Payload size of every frame and diff (`stride * height`).
    pub fn frame_size(&self) -> usize {
        self.sampler.baseline.size
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: FrameSource> Sampler<S> {
    async fn run(
        self: Arc<Self>,
        mut stop: watch::Receiver<bool>,
        previous: Option<JoinHandle<()>>,
    ) {
        // Chained restarts each wait for their predecessor, so at most one
        // run samples at a time.
        if let Some(previous) = previous {
            let _ = previous.await;
        }
        let mut iterations: u64 = 0;

        loop {
            let due = self.next_sample_due();
            tokio::select! {
                biased;
                // Err means the detector was dropped.
                _ = stop.changed() => {
                    debug!(handle = %self.handle, iterations, "sampling loop stopping");
                    break;
                }
                _ = tokio::time::sleep_until(due) => {}
            }
            *self.lock_last_sample() = Some(Instant::now());

            let fault = match AssertUnwindSafe(self.sample_once()).catch_unwind().await {
                Ok(Ok(())) => {
                    iterations += 1;
                    continue;
                }
                Ok(Err(fault)) => fault,
                Err(panic) => DetectorError::CaptureFailure(panic_message(panic.as_ref())),
            };
            self.enter_fault(fault);
            break;
        }
    }

    /// Earliest start of the next iteration: one interval after the start
    /// of the previous one, however long that one took.
    fn next_sample_due(&self) -> Instant {
        let now = Instant::now();
        match *self.lock_last_sample() {
            Some(last) => (last + self.sample_interval).max(now),
            None => now,
        }
    }

    fn lock_last_sample(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_sample.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sample_once(&self) -> Result<(), DetectorError> {
        let frame = {
            let mut source = self.source.lock().await;
            source
                .capture(self.handle, self.format)
                .await
                .map_err(|e| invalid_handle(self.handle, e))?
        };

        let actual = frame.geometry();
        if actual != self.baseline.geometry {
            return Err(DetectorError::FrameSizeChanged {
                expected: self.baseline.geometry,
                actual,
            });
        }
        if frame.size() != self.baseline.size {
            return Err(DetectorError::CaptureFailure(format!(
                "frame payload is {} bytes (stride {}), baseline is {} bytes (stride {})",
                frame.size(),
                frame.stride(),
                self.baseline.size,
                self.baseline.stride
            )));
        }

        self.frames.add(frame);
        let captured = self.frames.count();
        if captured < self.warmup_frames {
            trace!(captured, warmup = self.warmup_frames, "warming up");
            return Ok(());
        }

        let Some(pair) = self.frames.newest(2) else {
            return Ok(());
        };
        let diff = self
            .engine
            .diff(&pair[1], &pair[0])
            .map_err(|e| DetectorError::CaptureFailure(e.to_string()))?;
        trace!(captured, unchanged = diff.is_unchanged(), "diff computed");
        self.diffs.add(diff);
        Ok(())
    }

    fn enter_fault(&self, fault: DetectorError) {
        match &fault {
            DetectorError::FrameSizeChanged { expected, actual } => {
                warn!(handle = %self.handle, %expected, %actual, "captured window was resized");
            }
            other => {
                error!(handle = %self.handle, error = %other, "sampling loop failed");
            }
        }
        self.state.send_if_modified(|state| {
            if state.fault().is_some() {
                return false;
            }
            *state = DetectorState::Faulted(fault);
            true
        });
    }
}

fn invalid_handle(handle: WindowHandle, err: CaptureError) -> DetectorError {
    DetectorError::InvalidHandle {
        handle,
        reason: err.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("frame source panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("frame source panicked: {msg}")
    } else {
        "frame source panicked".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::time::sleep;

    type Script = Box<dyn FnMut(u64) -> Result<FrameBuffer, CaptureError> + Send>;

    /// Frame source driven by a closure of the call index (0 = baseline).
    struct ScriptedSource {
        script: Script,
        calls: Arc<AtomicU64>,
        stamps: Arc<Mutex<Vec<Instant>>>,
        /// Call index that takes `delay` to complete.
        slow: Option<(u64, Duration)>,
    }

    impl ScriptedSource {
        fn new(
            script: impl FnMut(u64) -> Result<FrameBuffer, CaptureError> + Send + 'static,
        ) -> Self {
            Self {
                script: Box::new(script),
                calls: Arc::new(AtomicU64::new(0)),
                stamps: Arc::new(Mutex::new(Vec::new())),
                slow: None,
            }
        }

        fn slow_on(mut self, call: u64, delay: Duration) -> Self {
            self.slow = Some((call, delay));
            self
        }
    }

    impl FrameSource for ScriptedSource {
        async fn capture(
            &mut self,
            _handle: WindowHandle,
            _format: PixelFormat,
        ) -> Result<FrameBuffer, CaptureError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.stamps.lock().unwrap().push(Instant::now());
            if let Some((slow, delay)) = self.slow {
                if slow == call {
                    sleep(delay).await;
                }
            }
            (self.script)(call)
        }
    }

    fn gray(width: u32, height: u32, fill: u8) -> FrameBuffer {
        let stride = PixelFormat::Gray8.min_stride(width);
        FrameBuffer::new(width, height, stride, PixelFormat::Gray8, vec![fill; stride * height as usize])
            .unwrap()
    }

    const WINDOW: WindowHandle = WindowHandle(0xbeef);

    async fn open(source: ScriptedSource) -> Detector<ScriptedSource> {
        Detector::open(source, WINDOW, PixelFormat::Gray8, &DetectorConfig::default())
            .await
            .unwrap()
    }

    /// Poll on virtual time until `done` holds.
    async fn until(mut done: impl FnMut() -> bool) {
        for _ in 0..10_000 {
            if done() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn invalid_handle_fails_construction() {
        let source = ScriptedSource::new(|_| Err(CaptureError::InvalidHandle(WINDOW)));
        let err = Detector::open(source, WINDOW, PixelFormat::Bgr32, &DetectorConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::InvalidHandle { handle, .. } if handle == WINDOW));
    }

    #[tokio::test]
    async fn invalid_config_fails_construction() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 4, 0)));
        let config = DetectorConfig {
            frame_history: 1,
            ..DetectorConfig::default()
        };
        let err = Detector::open(source, WINDOW, PixelFormat::Gray8, &config)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::Setup(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn opens_idle_with_baseline_geometry() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 3, 0)));
        let calls = Arc::clone(&source.calls);
        let detector = open(source).await;

        assert_eq!(detector.state(), DetectorState::Idle);
        assert_eq!(detector.width(), 4);
        assert_eq!(detector.height(), 3);
        assert_eq!(detector.stride(), 4);
        assert_eq!(detector.frame_size(), 12);
        assert_eq!(detector.latest_diff(), Ok(None));

        // Nothing samples until start().
        sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(detector.captured_frames(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn identical_frames_diff_to_zero_after_warmup() {
        let detector = open(ScriptedSource::new(|_| Ok(gray(4, 4, 0x80)))).await;
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 20).await;
        assert_eq!(detector.captured_frames(), 20);
        assert_eq!(detector.latest_diff(), Ok(None), "no diff before warm-up");

        until(|| detector.captured_frames() >= 21).await;
        let diff = detector.latest_diff().unwrap().expect("diff after warm-up");
        assert_eq!(diff.len(), 16);
        assert!(diff.is_unchanged());
    }

    #[tokio::test(start_paused = true)]
    async fn alternating_frames_report_the_delta() {
        const DELTA: u8 = 37;
        let detector = open(ScriptedSource::new(|call| {
            let mut bytes = vec![10u8; 16];
            if call % 2 == 1 {
                bytes[5] += DELTA;
            }
            Ok(FrameBuffer::new(4, 4, 4, PixelFormat::Gray8, bytes).unwrap())
        }))
        .await;
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 25).await;
        let diff = detector.latest_diff().unwrap().unwrap();
        for (i, &byte) in diff.data().iter().enumerate() {
            let expected = if i == 5 { DELTA } else { 0 };
            assert_eq!(byte, expected, "offset {i}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn warmup_threshold_is_configurable() {
        let config = DetectorConfig {
            warmup_frames: 2,
            ..DetectorConfig::default()
        };
        let detector = Detector::open(
            ScriptedSource::new(|_| Ok(gray(2, 2, 1))),
            WINDOW,
            PixelFormat::Gray8,
            &config,
        )
        .await
        .unwrap();
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 1).await;
        assert_eq!(detector.latest_diff(), Ok(None));
        until(|| detector.captured_frames() >= 2).await;
        assert!(detector.latest_diff().unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn resize_faults_and_stays_faulted() {
        let detector = open(ScriptedSource::new(|call| {
            if call == 0 {
                Ok(gray(4, 4, 0))
            } else {
                Ok(gray(5, 4, 0))
            }
        }))
        .await;
        detector.start().unwrap();

        let mut states = detector.subscribe();
        let state = states
            .wait_for(|s| s.fault().is_some())
            .await
            .unwrap()
            .clone();
        let expected = DetectorError::FrameSizeChanged {
            expected: Geometry { width: 4, height: 4 },
            actual: Geometry { width: 5, height: 4 },
        };
        assert_eq!(state, DetectorState::Faulted(expected.clone()));

        assert_eq!(detector.latest_diff(), Err(expected.clone()));
        assert_eq!(detector.start(), Err(expected.clone()));
        assert_eq!(detector.stop(), Err(expected.clone()));
        assert_eq!(detector.latest_diff(), Err(expected));
    }

    #[tokio::test(start_paused = true)]
    async fn lost_window_faults_with_invalid_handle() {
        let detector = open(ScriptedSource::new(|call| {
            if call < 3 {
                Ok(gray(4, 4, 0))
            } else {
                Err(CaptureError::InvalidHandle(WINDOW))
            }
        }))
        .await;
        detector.start().unwrap();

        until(|| detector.state().fault().is_some()).await;
        assert_eq!(detector.captured_frames(), 2);
        assert!(matches!(
            detector.latest_diff(),
            Err(DetectorError::InvalidHandle { .. })
        ));
        assert!(matches!(detector.start(), Err(DetectorError::InvalidHandle { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_is_reported_as_invalid_handle() {
        let detector = open(ScriptedSource::new(|call| {
            if call == 0 {
                Ok(gray(4, 4, 0))
            } else {
                Err(CaptureError::Backend("connection refused".into()))
            }
        }))
        .await;
        detector.start().unwrap();

        until(|| detector.state().fault().is_some()).await;
        match detector.latest_diff() {
            Err(DetectorError::InvalidHandle { reason, .. }) => {
                assert!(reason.contains("connection refused"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stride_change_is_a_capture_failure() {
        let detector = open(ScriptedSource::new(|call| {
            if call == 0 {
                Ok(gray(4, 4, 0))
            } else {
                Ok(FrameBuffer::new(4, 4, 8, PixelFormat::Gray8, vec![0u8; 32]).unwrap())
            }
        }))
        .await;
        detector.start().unwrap();

        until(|| detector.state().fault().is_some()).await;
        assert!(matches!(
            detector.latest_diff(),
            Err(DetectorError::CaptureFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_source_is_a_capture_failure() {
        let detector = open(ScriptedSource::new(|call| {
            if call == 0 {
                Ok(gray(4, 4, 0))
            } else {
                panic!("device lost")
            }
        }))
        .await;
        detector.start().unwrap();

        until(|| detector.state().fault().is_some()).await;
        match detector.latest_diff() {
            Err(DetectorError::CaptureFailure(msg)) => assert!(msg.contains("device lost")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn captures_respect_minimum_period() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 4, 0)));
        let stamps = Arc::clone(&source.stamps);
        let detector = open(source).await;
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 10).await;
        detector.stop().unwrap();

        // Skip the baseline capture made by open().
        let stamps = stamps.lock().unwrap()[1..11].to_vec();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50));
        }
        assert!(stamps[9] - stamps[0] >= Duration::from_millis(9 * 50));
    }

    fn assert_min_gaps(stamps: &[Instant]) {
        for (i, pair) in stamps.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(50), "captures {i} and {} are {gap:?} apart", i + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capture_does_not_shorten_the_next_interval() {
        // Call 3 overruns the interval by 3 ms.
        let source =
            ScriptedSource::new(|_| Ok(gray(4, 4, 0))).slow_on(3, Duration::from_millis(53));
        let stamps = Arc::clone(&source.stamps);
        let detector = open(source).await;
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 8).await;
        detector.stop().unwrap();

        let stamps = stamps.lock().unwrap()[1..].to_vec();
        assert_min_gaps(&stamps);
        assert_eq!(stamps[3] - stamps[2], Duration::from_millis(53));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_waits_for_the_stopping_run() {
        let source =
            ScriptedSource::new(|_| Ok(gray(4, 4, 0))).slow_on(2, Duration::from_millis(40));
        let calls = Arc::clone(&source.calls);
        let stamps = Arc::clone(&source.stamps);
        let detector = open(source).await;
        detector.start().unwrap();

        // Call 2 starts 50 ms into the run and is still in flight here.
        until(|| calls.load(Ordering::SeqCst) >= 3).await;
        detector.stop().unwrap();
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 5).await;
        let stamps = stamps.lock().unwrap()[1..].to_vec();
        assert_min_gaps(&stamps);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_sampling_and_reads_none() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 4, 0)));
        let calls = Arc::clone(&source.calls);
        let detector = open(source).await;
        detector.start().unwrap();

        until(|| detector.captured_frames() >= 22).await;
        assert!(detector.latest_diff().unwrap().is_some());

        detector.stop().unwrap();
        assert_eq!(detector.state(), DetectorState::Idle);
        assert_eq!(detector.latest_diff(), Ok(None));

        let at_stop = calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(1000)).await;
        assert!(calls.load(Ordering::SeqCst) <= at_stop + 1);

        // Stopping twice is harmless.
        assert_eq!(detector.stop(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 4, 0)));
        let stamps = Arc::clone(&source.stamps);
        let detector = open(source).await;
        detector.start().unwrap();
        detector.start().unwrap();
        assert!(detector.state().is_running());

        until(|| detector.captured_frames() >= 8).await;
        let stamps = stamps.lock().unwrap()[1..].to_vec();
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(50), "a second loop is sampling");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_resumes_sampling() {
        let detector = open(ScriptedSource::new(|_| Ok(gray(4, 4, 0)))).await;
        detector.start().unwrap();
        until(|| detector.captured_frames() >= 3).await;
        detector.stop().unwrap();

        sleep(Duration::from_millis(200)).await;
        let before = detector.captured_frames();
        detector.start().unwrap();
        until(|| detector.captured_frames() >= before + 3).await;
        assert!(detector.state().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_detector_stops_sampling() {
        let source = ScriptedSource::new(|_| Ok(gray(4, 4, 0)));
        let calls = Arc::clone(&source.calls);
        let detector = open(source).await;
        detector.start().unwrap();
        until(|| calls.load(Ordering::SeqCst) >= 4).await;

        drop(detector);
        sleep(Duration::from_millis(50)).await;
        let after_drop = calls.load(Ordering::SeqCst);
        sleep(Duration::from_millis(1000)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_drop);
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "frame source panicked: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "frame source panicked: bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "frame source panicked");
    }
}
