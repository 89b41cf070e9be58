//! The acquisition → detection → event loop.
//!
//! One background task per controller. Each iteration pulls a frame,
//! publishes it, awaits detection, publishes the derived events and sleeps
//! for the frame interval. Cancellation is checked at the top of each
//! iteration; an in-flight detection always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::detection::domain::detection_result::DetectionResult;
use crate::detection::domain::face_detection_service::FaceDetectionService;
use crate::shared::frame::Frame;
use crate::source::domain::frame_source::FrameSource;

use super::event_bus::{EventBus, SubscriptionId};
use super::event_translator::EventTranslator;
use super::events::{FaceEvent, MetadataEvent, PipelineEvent};
use super::pipeline_settings::PipelineSettings;
use super::run_stats::RunStats;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

#[derive(Default)]
struct SourceSlots {
    /// The source while no loop owns it.
    parked: Option<Box<dyn FrameSource>>,
    /// Replacement requested while running, applied on the next iteration.
    pending: Option<Box<dyn FrameSource>>,
}

struct Shared {
    bus: EventBus,
    translator: EventTranslator,
    stats: Mutex<RunStats>,
    slots: Mutex<SourceSlots>,
    running: AtomicBool,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, SourceSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_stats(&self, f: impl FnOnce(&mut RunStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *stats);
    }

    fn apply_pending(&self, current: &mut Option<Box<dyn FrameSource>>) {
        let next = self.slots().pending.take();
        if let Some(next) = next {
            if let Some(mut old) = current.replace(next) {
                old.close();
            }
            log::info!("Frame source swapped");
        }
    }

    /// One loop iteration, without the inter-frame delay. Returns whether
    /// the source produced a frame.
    async fn run_iteration(
        &self,
        detector: &dyn FaceDetectionService,
        source: &mut Box<dyn FrameSource>,
    ) -> bool {
        let acquire_start = Instant::now();
        let frame = source.next_frame().await;
        let Some(frame) = frame else {
            self.with_stats(RunStats::record_empty_poll);
            return false;
        };
        self.with_stats(|s| {
            s.timing("acquire", acquire_start.elapsed());
            s.record_frame();
        });
        log::debug!("Frame {} ({}x{})", frame.index(), frame.width(), frame.height());

        self.bus.emit_frame(&frame);

        let detect_start = Instant::now();
        let result = detector.detect_faces(&frame, source.source_path()).await;
        self.with_stats(|s| {
            s.timing("detect", detect_start.elapsed());
            s.record_detection(result.faces().len(), !result.is_success());
        });
        if let DetectionResult::Failure { message, .. } = &result {
            log::warn!("Detection failed on frame {}: {message}", frame.index());
        }

        self.publish(&result);
        true
    }

    fn publish(&self, result: &DetectionResult) {
        for event in self.translator.translate(result) {
            match event {
                PipelineEvent::FaceDetected(face) => self.bus.emit_face(&face),
                PipelineEvent::Metadata(metadata) => self.bus.emit_metadata(&metadata),
            }
        }
    }
}

/// Temporary ownership of the source. On drop, including unwinding or task
/// abort, the source is parked again (after any queued swap) and the
/// controller returns to idle.
struct SourceLease {
    shared: Arc<Shared>,
    source: Option<Box<dyn FrameSource>>,
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        let mut slots = self.shared.slots();
        let mut source = self.source.take();
        if let Some(next) = slots.pending.take() {
            if let Some(mut old) = source.replace(next) {
                old.close();
            }
        }
        if let Some(mut stale) = std::mem::replace(&mut slots.parked, source) {
            stale.close();
        }
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

struct LoopContext {
    shared: Arc<Shared>,
    detector: Arc<dyn FaceDetectionService>,
    cancelled: Arc<AtomicBool>,
    frame_interval: Duration,
    stop_on_exhaustion: bool,
}

async fn run_loop(ctx: LoopContext, mut lease: SourceLease) {
    loop {
        if ctx.cancelled.load(Ordering::SeqCst) {
            break;
        }
        ctx.shared.apply_pending(&mut lease.source);
        let Some(source) = lease.source.as_mut() else {
            break;
        };

        ctx.shared.run_iteration(&*ctx.detector, source).await;

        if ctx.stop_on_exhaustion && source.is_exhausted() {
            log::info!("Frame source exhausted; pipeline stopping");
            break;
        }
        tokio::time::sleep(ctx.frame_interval).await;
    }
    log::info!("Pipeline stopped");
}

struct ActiveLoop {
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Owns one frame source and drives it through a detection service,
/// publishing `NewFrame`, `NewMetadata` and `FaceDetected` events.
///
/// States are `Idle` and `Running`. `start` spawns onto the current Tokio
/// runtime, so it must be called from within one.
pub struct PipelineController {
    detector: Arc<dyn FaceDetectionService>,
    frame_interval: Duration,
    stop_on_exhaustion: bool,
    shared: Arc<Shared>,
    active: Option<ActiveLoop>,
}

impl PipelineController {
    pub fn new(detector: Arc<dyn FaceDetectionService>, settings: &PipelineSettings) -> Self {
        Self {
            detector,
            frame_interval: settings.frame_interval(),
            stop_on_exhaustion: settings.stop_on_exhaustion,
            shared: Arc::new(Shared {
                bus: EventBus::new(),
                translator: EventTranslator::new(),
                stats: Mutex::new(RunStats::new()),
                slots: Mutex::new(SourceSlots::default()),
                running: AtomicBool::new(false),
            }),
            active: None,
        }
    }

    /// Replaces the frame source. While idle the old source is closed right
    /// away; while running the swap is queued for the next iteration.
    pub fn set_strategy(&self, source: Box<dyn FrameSource>) {
        let mut slots = self.shared.slots();
        if self.shared.running.load(Ordering::SeqCst) {
            if let Some(mut superseded) = slots.pending.replace(source) {
                superseded.close();
            }
            log::info!("Frame source swap queued");
        } else {
            if let Some(mut old) = slots.parked.replace(source) {
                old.close();
            }
            log::info!("Frame source set");
        }
    }

    pub fn state(&self) -> PipelineState {
        if self.is_running() {
            PipelineState::Running
        } else {
            PipelineState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Starts the background loop.
    ///
    /// Fails without a source, and while a loop is still running (including
    /// one that was asked to stop but has not exited yet; use [`wait`](Self::wait)).
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let source = {
            let mut slots = self.shared.slots();
            if self.shared.running.load(Ordering::SeqCst) {
                return Err(PipelineError::InvalidOperation(
                    "pipeline is already running".into(),
                ));
            }
            let source = slots.parked.take().ok_or_else(|| {
                PipelineError::InvalidOperation(
                    "no frame source set; call set_strategy before start".into(),
                )
            })?;
            self.shared.running.store(true, Ordering::SeqCst);
            source
        };

        let cancelled = Arc::new(AtomicBool::new(false));
        let ctx = LoopContext {
            shared: self.shared.clone(),
            detector: self.detector.clone(),
            cancelled: cancelled.clone(),
            frame_interval: self.frame_interval,
            stop_on_exhaustion: self.stop_on_exhaustion,
        };
        let lease = SourceLease {
            shared: self.shared.clone(),
            source: Some(source),
        };

        // A previous loop that ended on its own leaves a finished handle.
        self.active = Some(ActiveLoop {
            cancelled,
            handle: tokio::spawn(run_loop(ctx, lease)),
        });
        log::info!("Pipeline started");
        Ok(())
    }

    /// Requests cancellation and returns immediately. No-op when idle.
    pub fn stop(&self) {
        if let Some(active) = &self.active {
            if !active.cancelled.swap(true, Ordering::SeqCst) && self.is_running() {
                log::info!("Pipeline stop requested");
            }
        }
    }

    /// Waits for the loop to exit. Cancel-safe: dropping this future leaves
    /// the loop handle in place.
    pub async fn wait(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if let Err(e) = (&mut active.handle).await {
            log::error!("Pipeline loop ended abnormally: {e}");
        }
        self.active = None;
    }

    /// Stops the loop, waits for it, and closes the source.
    pub async fn shutdown(&mut self) {
        self.stop();
        self.wait().await;

        let (parked, pending) = {
            let mut slots = self.shared.slots();
            (slots.parked.take(), slots.pending.take())
        };
        for mut source in [parked, pending].into_iter().flatten() {
            source.close();
        }
        log::info!("Pipeline shut down");
    }

    /// Runs exactly one iteration on the caller's task, without the
    /// inter-frame delay. Returns whether the source produced a frame.
    pub async fn process_next_frame(&mut self) -> Result<bool, PipelineError> {
        let mut lease = {
            let mut slots = self.shared.slots();
            if self.shared.running.load(Ordering::SeqCst) {
                return Err(PipelineError::InvalidOperation(
                    "cannot step while the pipeline is running".into(),
                ));
            }
            let source = slots.parked.take().ok_or_else(|| {
                PipelineError::InvalidOperation("no frame source set".into())
            })?;
            SourceLease {
                shared: self.shared.clone(),
                source: Some(source),
            }
        };

        let produced = match lease.source.as_mut() {
            Some(source) => self.shared.run_iteration(&*self.detector, source).await,
            None => false,
        };
        Ok(produced)
    }

    pub fn subscribe_frames(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.bus.subscribe_frames(handler)
    }

    pub fn subscribe_metadata(
        &self,
        handler: impl Fn(&MetadataEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.bus.subscribe_metadata(handler)
    }

    pub fn subscribe_faces(&self, handler: impl Fn(&FaceEvent) + Send + Sync + 'static) -> SubscriptionId {
        self.shared.bus.subscribe_faces(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.bus.unsubscribe(id)
    }

    /// Snapshot of the counters collected so far.
    pub fn stats(&self) -> RunStats {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::detection_result::{BoundingBox, DetectedFace, FailureCause};
    use crate::detection::infrastructure::model_locator::ModelLocator;
    use crate::detection::infrastructure::onnx_face_detection_service::OnnxFaceDetectionService;
    use crate::shared::constants::{FACE_DETECTION_ERROR_KEY, FACE_DETECTION_KEY};
    use crate::shared::frame::PixelFormat;
    use crate::source::infrastructure::file_frame_source::FileFrameSource;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    // --- stubs ---

    fn small_frame(index: usize) -> Frame {
        Frame::new(vec![128u8; 4 * 4 * 3], 4, 4, PixelFormat::Rgb8, index)
    }

    /// Finite or endless scripted source. Frame indices start at `first_index`.
    struct ScriptedSource {
        remaining: Option<usize>,
        next_index: usize,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn finite(frames: usize, first_index: usize) -> (Box<dyn FrameSource>, Arc<AtomicBool>) {
            Self::build(Some(frames), first_index)
        }

        fn endless(first_index: usize) -> (Box<dyn FrameSource>, Arc<AtomicBool>) {
            Self::build(None, first_index)
        }

        fn build(remaining: Option<usize>, first_index: usize) -> (Box<dyn FrameSource>, Arc<AtomicBool>) {
            let closed = Arc::new(AtomicBool::new(false));
            let source = ScriptedSource {
                remaining,
                next_index: first_index,
                closed: closed.clone(),
            };
            (Box::new(source), closed)
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn next_frame(&mut self) -> Option<Frame> {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.remaining.as_mut() {
                Some(0) => return None,
                Some(n) => *n -= 1,
                None => {}
            }
            let frame = small_frame(self.next_index);
            self.next_index += 1;
            Some(frame)
        }

        fn is_exhausted(&self) -> bool {
            self.remaining == Some(0)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Returns the same result for every frame.
    struct StubDetector {
        result: DetectionResult,
        calls: AtomicUsize,
    }

    impl StubDetector {
        fn returning(result: DetectionResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn with_confidences(confidences: &[f64]) -> Arc<Self> {
            let faces = confidences
                .iter()
                .enumerate()
                .map(|(i, &c)| DetectedFace::new(BoundingBox::new(i as i32 * 50, 0, 40, 40), c))
                .collect();
            Self::returning(DetectionResult::success(faces, "stub"))
        }
    }

    #[async_trait]
    impl FaceDetectionService for StubDetector {
        fn method(&self) -> &str {
            "stub"
        }

        async fn is_initialized(&self) -> bool {
            true
        }

        async fn detect_faces(&self, _frame: &Frame, _source_path: Option<&Path>) -> DetectionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    /// Reports one face tagged with whatever path the controller hands over.
    struct PathEchoDetector;

    #[async_trait]
    impl FaceDetectionService for PathEchoDetector {
        fn method(&self) -> &str {
            "path-echo"
        }

        async fn is_initialized(&self) -> bool {
            true
        }

        async fn detect_faces(&self, _frame: &Frame, source_path: Option<&Path>) -> DetectionResult {
            let face = DetectedFace::new(BoundingBox::new(0, 0, 10, 10), 0.9).with_image_path(source_path);
            DetectionResult::success(vec![face], "path-echo")
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    enum Seen {
        Frame(usize),
        Face(f64),
        Meta(String),
    }

    fn record(controller: &PipelineController) -> Arc<Mutex<Vec<Seen>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.subscribe_frames(move |f| sink.lock().unwrap().push(Seen::Frame(f.index())));
        let sink = seen.clone();
        controller.subscribe_faces(move |e| sink.lock().unwrap().push(Seen::Face(e.confidence)));
        let sink = seen.clone();
        controller.subscribe_metadata(move |e| sink.lock().unwrap().push(Seen::Meta(e.key.clone())));
        seen
    }

    fn fast_settings(stop_on_exhaustion: bool) -> PipelineSettings {
        PipelineSettings {
            frame_interval_ms: 1,
            stop_on_exhaustion,
            ..Default::default()
        }
    }

    fn controller_with(detector: Arc<dyn FaceDetectionService>, stop_on_exhaustion: bool) -> PipelineController {
        PipelineController::new(detector, &fast_settings(stop_on_exhaustion))
    }

    async fn eventually(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cond()
    }

    fn uninitialized_onnx(dir: &TempDir) -> Arc<dyn FaceDetectionService> {
        Arc::new(OnnxFaceDetectionService::new(ModelLocator::new(
            "absent.onnx",
            vec![dir.path().to_path_buf()],
        )))
    }

    fn gray_image_source(dir: &TempDir) -> Box<dyn FrameSource> {
        let path = dir.path().join("gray.png");
        image::RgbImage::from_pixel(100, 100, image::Rgb([128, 128, 128]))
            .save(&path)
            .unwrap();
        Box::new(FileFrameSource::open(&path).unwrap())
    }

    // --- lifecycle ---

    #[tokio::test]
    async fn test_start_without_source_fails_and_stays_idle() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let err = controller.start().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidOperation(_)));
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_noop() {
        let controller = controller_with(StubDetector::with_confidences(&[]), false);
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let (source, _) = ScriptedSource::endless(0);
        controller.set_strategy(source);

        controller.start().unwrap();
        assert_eq!(controller.state(), PipelineState::Running);
        assert!(matches!(controller.start(), Err(PipelineError::InvalidOperation(_))));

        controller.stop();
        controller.wait().await;
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn test_restart_resumes_same_source() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let seen = record(&controller);
        let (source, _) = ScriptedSource::endless(0);
        controller.set_strategy(source);

        controller.start().unwrap();
        assert!(eventually(|| !seen.lock().unwrap().is_empty()).await);
        controller.stop();
        controller.wait().await;
        let frames_before = seen.lock().unwrap().len();

        controller.start().unwrap();
        assert!(eventually(|| seen.lock().unwrap().len() > frames_before).await);
        controller.shutdown().await;

        let indices: Vec<usize> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|s| match s {
                Seen::Frame(i) => Some(*i),
                _ => None,
            })
            .collect();
        let expected: Vec<usize> = (0..indices.len()).collect();
        assert_eq!(indices, expected);
    }

    #[tokio::test]
    async fn test_exhaustion_stops_loop_when_configured() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), true);
        let (source, closed) = ScriptedSource::finite(3, 0);
        controller.set_strategy(source);

        controller.start().unwrap();
        controller.wait().await;

        assert_eq!(controller.state(), PipelineState::Idle);
        assert_eq!(controller.stats().frames(), 3);
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_exhausted_source_keeps_loop_polling_by_default() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let (source, _) = ScriptedSource::finite(1, 0);
        controller.set_strategy(source);

        controller.start().unwrap();
        assert!(eventually(|| controller.stats().empty_polls() >= 3).await);
        assert!(controller.is_running());

        controller.stop();
        controller.wait().await;
        assert_eq!(controller.stats().frames(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_source() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let (source, closed) = ScriptedSource::endless(0);
        controller.set_strategy(source);

        controller.start().unwrap();
        controller.shutdown().await;

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(controller.state(), PipelineState::Idle);
        assert!(controller.start().is_err());
    }

    // --- source swapping ---

    #[tokio::test]
    async fn test_set_strategy_while_idle_closes_previous() {
        let controller = controller_with(StubDetector::with_confidences(&[]), false);
        let (first, first_closed) = ScriptedSource::endless(0);
        let (second, second_closed) = ScriptedSource::endless(0);

        controller.set_strategy(first);
        controller.set_strategy(second);

        assert!(first_closed.load(Ordering::SeqCst));
        assert!(!second_closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_set_strategy_while_running_swaps_on_next_iteration() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        let seen = record(&controller);
        let (first, first_closed) = ScriptedSource::endless(1000);
        let (second, second_closed) = ScriptedSource::endless(2000);
        controller.set_strategy(first);

        controller.start().unwrap();
        assert!(eventually(|| !seen.lock().unwrap().is_empty()).await);
        controller.set_strategy(second);

        let swapped = eventually(|| {
            seen.lock()
                .unwrap()
                .iter()
                .any(|s| matches!(s, Seen::Frame(i) if *i >= 2000))
        })
        .await;
        assert!(swapped);
        assert!(first_closed.load(Ordering::SeqCst));
        assert!(!second_closed.load(Ordering::SeqCst));
        assert!(controller.is_running());

        controller.shutdown().await;
        assert!(second_closed.load(Ordering::SeqCst));
    }

    // --- single step ---

    #[tokio::test]
    async fn test_process_next_frame_steps_once() {
        let mut controller = controller_with(StubDetector::with_confidences(&[0.8]), false);
        let seen = record(&controller);
        let (source, _) = ScriptedSource::finite(2, 0);
        controller.set_strategy(source);

        assert_eq!(controller.process_next_frame().await, Ok(true));
        assert_eq!(controller.process_next_frame().await, Ok(true));
        assert_eq!(controller.process_next_frame().await, Ok(false));
        assert_eq!(controller.state(), PipelineState::Idle);

        let frames = seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| matches!(s, Seen::Frame(_)))
            .count();
        assert_eq!(frames, 2);
    }

    #[tokio::test]
    async fn test_face_events_carry_the_file_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller_with(Arc::new(PathEchoDetector), true);
        let paths = Arc::new(Mutex::new(Vec::new()));
        let sink = paths.clone();
        controller.subscribe_faces(move |e| sink.lock().unwrap().push(e.source_path.clone()));
        controller.set_strategy(gray_image_source(&dir));

        assert_eq!(controller.process_next_frame().await, Ok(true));

        let paths = paths.lock().unwrap();
        assert_eq!(*paths, vec![Some(dir.path().join("gray.png"))]);
    }

    #[tokio::test]
    async fn test_process_next_frame_requires_idle_with_source() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        assert!(matches!(
            controller.process_next_frame().await,
            Err(PipelineError::InvalidOperation(_))
        ));

        let (source, _) = ScriptedSource::endless(0);
        controller.set_strategy(source);
        controller.start().unwrap();
        assert!(matches!(
            controller.process_next_frame().await,
            Err(PipelineError::InvalidOperation(_))
        ));
        controller.shutdown().await;
    }

    // --- event emission ---

    #[tokio::test]
    async fn test_uninitialized_detector_emits_frame_then_single_error() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller_with(uninitialized_onnx(&dir), true);
        let seen = record(&controller);
        controller.set_strategy(gray_image_source(&dir));

        controller.start().unwrap();
        controller.wait().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Frame(0), Seen::Meta(FACE_DETECTION_ERROR_KEY.to_string())]
        );
    }

    #[tokio::test]
    async fn test_still_image_emits_once_while_loop_keeps_polling() {
        let dir = TempDir::new().unwrap();
        let mut controller = controller_with(uninitialized_onnx(&dir), false);
        let seen = record(&controller);
        controller.set_strategy(gray_image_source(&dir));

        controller.start().unwrap();
        assert!(eventually(|| controller.stats().empty_polls() >= 5).await);
        controller.stop();
        controller.wait().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Seen::Frame(0), Seen::Meta(FACE_DETECTION_ERROR_KEY.to_string())]
        );
    }

    #[tokio::test]
    async fn test_faces_emitted_in_detector_order_with_metadata_pairs() {
        let mut controller = controller_with(StubDetector::with_confidences(&[0.9, 0.4]), true);
        let seen = record(&controller);
        let (source, _) = ScriptedSource::finite(1, 0);
        controller.set_strategy(source);

        controller.start().unwrap();
        controller.wait().await;

        let meta = Seen::Meta(FACE_DETECTION_KEY.to_string());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Seen::Frame(0),
                Seen::Face(0.9),
                meta.clone(),
                Seen::Face(0.4),
                meta,
            ]
        );
    }

    #[tokio::test]
    async fn test_detection_failures_do_not_stop_loop() {
        let detector = StubDetector::returning(DetectionResult::failure(
            FailureCause::DetectorError,
            "boom",
            "stub",
        ));
        let mut controller = controller_with(detector.clone(), false);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        controller.subscribe_metadata(move |e| sink.lock().unwrap().push(e.value.clone()));
        let (source, _) = ScriptedSource::endless(0);
        controller.set_strategy(source);

        controller.start().unwrap();
        assert!(eventually(|| errors.lock().unwrap().len() >= 3).await);
        assert!(controller.is_running());
        controller.shutdown().await;

        assert!(errors.lock().unwrap().iter().all(|v| v == "boom"));
        assert!(controller.stats().detection_failures() >= 3);
        assert!(detector.calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_stop_loop() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), false);
        controller.subscribe_frames(|_| panic!("subscriber failure"));
        let (source, _) = ScriptedSource::endless(0);
        controller.set_strategy(source);

        controller.start().unwrap();
        assert!(eventually(|| controller.stats().frames() >= 3).await);
        assert!(controller.is_running());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_receives_nothing() {
        let mut controller = controller_with(StubDetector::with_confidences(&[]), true);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = controller.subscribe_frames(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(controller.unsubscribe(id));

        let (source, _) = ScriptedSource::finite(2, 0);
        controller.set_strategy(source);
        controller.start().unwrap();
        controller.wait().await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
