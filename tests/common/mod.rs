//! Scripted platform fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use peekboard_lib::analysis::{AnalysisClient, AnalysisError, ConversationTurn};
use peekboard_lib::capture::{
    CapabilityToken, CaptureCoordinator, CaptureError, CaptureRequest, ConsentAuthority,
    ConsentResult, ConsentSink, DisplayBackend, ImageSource, PixelFormat, Plane, Projection,
    RawImage, SurfaceMetrics, VirtualDisplay,
};
use peekboard_lib::config::CaptureConfig;
use peekboard_lib::encode::{EncodedImage, FrameEncoder};
use peekboard_lib::overlay::{
    OverlayError, OverlayPresenter, OverlayState, OverlaySurface, SurfaceFactory,
};
use peekboard_lib::CapturePipeline;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

// ── Consent ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum Answer {
    Grant,
    Deny,
    /// The dialog stays up; the test answers through `last_sink()`.
    Never,
}

pub struct ScriptedConsent {
    answer: Mutex<Answer>,
    sinks: Mutex<Vec<ConsentSink>>,
}

impl ScriptedConsent {
    pub fn new(answer: Answer) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(answer),
            sinks: Mutex::new(Vec::new()),
        })
    }

    pub fn set_answer(&self, answer: Answer) {
        *self.answer.lock().unwrap() = answer;
    }

    pub fn requests(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn last_sink(&self) -> Option<ConsentSink> {
        self.sinks.lock().unwrap().last().cloned()
    }
}

impl ConsentAuthority for ScriptedConsent {
    fn request_capture(
        &self,
        _request: &CaptureRequest,
        sink: ConsentSink,
    ) -> Result<(), CaptureError> {
        self.sinks.lock().unwrap().push(sink.clone());
        match *self.answer.lock().unwrap() {
            Answer::Grant => {
                sink.deliver(ConsentResult::granted(CapabilityToken::new(())));
            }
            Answer::Deny => {
                sink.deliver(ConsentResult::denied());
            }
            Answer::Never => {}
        }
        Ok(())
    }
}

// ── Virtual display ─────────────────────────────────────────────────

/// Hands out one scripted frame (or none) and counts teardown calls.
#[derive(Default)]
pub struct FrameBackend {
    frame: Option<RawImage>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
}

impl FrameBackend {
    pub fn with_frame(frame: RawImage) -> Arc<Self> {
        Arc::new(Self {
            frame: Some(frame),
            ..Self::default()
        })
    }

    pub fn without_frames() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl DisplayBackend for FrameBackend {
    fn create_virtual_display(
        &self,
        _capability: CapabilityToken,
        _metrics: SurfaceMetrics,
    ) -> Result<VirtualDisplay, CaptureError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(VirtualDisplay {
            source: Box::new(FakeSource {
                frame: self.frame.clone(),
                closed: self.closed.clone(),
            }),
            projection: Box::new(FakeProjection {
                stopped: self.stopped.clone(),
            }),
        })
    }
}

struct FakeSource {
    frame: Option<RawImage>,
    closed: Arc<AtomicUsize>,
}

impl ImageSource for FakeSource {
    fn acquire_latest(&mut self) -> Option<RawImage> {
        self.frame.clone()
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeProjection {
    stopped: Arc<AtomicUsize>,
}

impl Projection for FakeProjection {
    fn stop(&mut self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

/// An opaque gray RGBA frame.
pub fn gray_frame(width: u32, height: u32) -> RawImage {
    let row_stride = width as usize * 4;
    RawImage {
        width,
        height,
        format: PixelFormat::Rgba8888,
        planes: vec![Plane {
            data: [128, 128, 128, 255].repeat(width as usize * height as usize),
            row_stride,
            pixel_stride: 4,
        }],
    }
}

pub fn phone_metrics() -> SurfaceMetrics {
    SurfaceMetrics::new(16, 12, 420)
}

// ── Overlay ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Created,
    Rendered(OverlayState),
    Removed,
}

pub type SurfaceLog = Arc<Mutex<Vec<SurfaceEvent>>>;

pub struct RecordingSurfaces(pub SurfaceLog);

impl SurfaceFactory for RecordingSurfaces {
    fn create(&mut self) -> Result<Box<dyn OverlaySurface>, OverlayError> {
        self.0.lock().unwrap().push(SurfaceEvent::Created);
        Ok(Box::new(RecordingSurface(self.0.clone())))
    }
}

struct RecordingSurface(SurfaceLog);

impl OverlaySurface for RecordingSurface {
    fn render(&mut self, state: &OverlayState) -> Result<(), OverlayError> {
        self.0
            .lock()
            .unwrap()
            .push(SurfaceEvent::Rendered(state.clone()));
        Ok(())
    }

    fn remove(&mut self) {
        self.0.lock().unwrap().push(SurfaceEvent::Removed);
    }
}

/// Blocks the first `create` until the test sends on the paired channel,
/// holding the UI thread mid-open.
pub struct GatedSurfaces {
    inner: RecordingSurfaces,
    entered: Arc<AtomicBool>,
    release: Option<mpsc::Receiver<()>>,
}

impl GatedSurfaces {
    pub fn new(log: SurfaceLog) -> (Self, Arc<AtomicBool>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        let entered = Arc::new(AtomicBool::new(false));
        let factory = Self {
            inner: RecordingSurfaces(log),
            entered: entered.clone(),
            release: Some(rx),
        };
        (factory, entered, tx)
    }
}

impl SurfaceFactory for GatedSurfaces {
    fn create(&mut self) -> Result<Box<dyn OverlaySurface>, OverlayError> {
        if let Some(release) = self.release.take() {
            self.entered.store(true, Ordering::SeqCst);
            let _ = release.recv();
        }
        self.inner.create()
    }
}

pub fn events(log: &SurfaceLog) -> Vec<SurfaceEvent> {
    log.lock().unwrap().clone()
}

// ── Analysis ────────────────────────────────────────────────────────

pub struct FakeAnalysis {
    analyze_reply: Mutex<Result<String, AnalysisError>>,
    chat_reply: Mutex<Result<String, AnalysisError>>,
    /// When set, `analyze` parks until notified.
    gate: Option<Arc<Notify>>,
    analyze_calls: AtomicUsize,
    chat_calls: Mutex<Vec<Vec<ConversationTurn>>>,
    questions: Mutex<Vec<Option<String>>>,
}

impl FakeAnalysis {
    pub fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self::new(Ok(text.to_string()), None))
    }

    pub fn failing(error: AnalysisError) -> Arc<Self> {
        Arc::new(Self::new(Err(error), None))
    }

    pub fn gated(text: &str, gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self::new(Ok(text.to_string()), Some(gate)))
    }

    fn new(analyze_reply: Result<String, AnalysisError>, gate: Option<Arc<Notify>>) -> Self {
        Self {
            analyze_reply: Mutex::new(analyze_reply),
            chat_reply: Mutex::new(Ok("ok".to_string())),
            gate,
            analyze_calls: AtomicUsize::new(0),
            chat_calls: Mutex::new(Vec::new()),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_chat_reply(&self, reply: Result<String, AnalysisError>) {
        *self.chat_reply.lock().unwrap() = reply;
    }

    pub fn analyze_calls(&self) -> usize {
        self.analyze_calls.load(Ordering::SeqCst)
    }

    pub fn chat_calls(&self) -> Vec<Vec<ConversationTurn>> {
        self.chat_calls.lock().unwrap().clone()
    }

    pub fn questions(&self) -> Vec<Option<String>> {
        self.questions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisClient for FakeAnalysis {
    async fn analyze(
        &self,
        image: EncodedImage,
        question: Option<&str>,
    ) -> Result<String, AnalysisError> {
        assert!(image.data_url().starts_with("data:image/jpeg;base64,"));
        self.questions
            .lock()
            .unwrap()
            .push(question.map(str::to_string));
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.analyze_reply.lock().unwrap().clone()
    }

    async fn continue_chat(
        &self,
        transcript: &[ConversationTurn],
    ) -> Result<String, AnalysisError> {
        self.chat_calls.lock().unwrap().push(transcript.to_vec());
        self.chat_reply.lock().unwrap().clone()
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub fn fast_capture_config() -> CaptureConfig {
    CaptureConfig {
        frame_timeout: Duration::from_millis(80),
        poll_interval: Duration::from_millis(5),
        consent_grace: Duration::from_secs(5),
    }
}

pub fn pipeline(
    consent: Arc<ScriptedConsent>,
    backend: Arc<FrameBackend>,
    analysis: Arc<FakeAnalysis>,
    capture: CaptureConfig,
) -> (Arc<CapturePipeline>, SurfaceLog) {
    let log = SurfaceLog::default();
    let pipeline = pipeline_with_surfaces(
        consent,
        backend,
        analysis,
        capture,
        RecordingSurfaces(log.clone()),
    );
    (pipeline, log)
}

pub fn pipeline_with_surfaces<F: SurfaceFactory + 'static>(
    consent: Arc<ScriptedConsent>,
    backend: Arc<FrameBackend>,
    analysis: Arc<FakeAnalysis>,
    capture: CaptureConfig,
    surfaces: F,
) -> Arc<CapturePipeline> {
    let presenter = OverlayPresenter::spawn(surfaces).unwrap();
    let pipeline = CapturePipeline::new(
        CaptureCoordinator::new(consent, backend, capture),
        FrameEncoder::default(),
        presenter,
        analysis,
    );
    Arc::new(pipeline)
}

/// Polls `condition` until it holds, for at most a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}
