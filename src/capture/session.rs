//! Virtual display lifetime.
//!
//! A `CaptureSession` owns the image source and the projection for as long
//! as one frame grab takes. Teardown runs on every exit path (explicit
//! `close`, early return, dropped future) and always releases the image
//! source before stopping the projection.

use super::{CapabilityToken, CaptureError, RawImage, SurfaceMetrics};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Reader attached to the virtual display's output surface.
pub trait ImageSource: Send {
    /// The newest frame the display has produced, or `None` if nothing
    /// is ready yet. Must not block.
    fn acquire_latest(&mut self) -> Option<RawImage>;

    /// Releases the reader. Called exactly once by the session.
    fn close(&mut self);
}

/// The capture grant in use by a virtual display.
pub trait Projection: Send {
    /// Stops capture and invalidates the grant. Called exactly once.
    fn stop(&mut self);
}

pub struct VirtualDisplay {
    pub source: Box<dyn ImageSource>,
    pub projection: Box<dyn Projection>,
}

/// Platform hook that turns a capability into a live virtual display.
pub trait DisplayBackend: Send + Sync {
    /// Consumes the capability; it cannot be presented again.
    fn create_virtual_display(
        &self,
        capability: CapabilityToken,
        metrics: SurfaceMetrics,
    ) -> Result<VirtualDisplay, CaptureError>;
}

pub struct CaptureSession {
    metrics: SurfaceMetrics,
    source: Option<Box<dyn ImageSource>>,
    projection: Option<Box<dyn Projection>>,
    slot: Arc<AtomicBool>,
    open: bool,
}

impl CaptureSession {
    /// Opens a session, claiming `slot` for its lifetime.
    ///
    /// Fails with `AlreadyInProgress` if the slot is already held.
    pub(crate) fn open(
        backend: &dyn DisplayBackend,
        slot: Arc<AtomicBool>,
        capability: CapabilityToken,
        metrics: SurfaceMetrics,
    ) -> Result<Self, CaptureError> {
        if slot.swap(true, Ordering::AcqRel) {
            log::error!(
                "[CAPTURE] Refusing second session while one is open (capability {})",
                capability.id()
            );
            return Err(CaptureError::AlreadyInProgress);
        }

        match backend.create_virtual_display(capability, metrics) {
            Ok(display) => {
                log::info!(
                    "[CAPTURE] Virtual display {}x{} @{}dpi open",
                    metrics.width,
                    metrics.height,
                    metrics.density_dpi
                );
                Ok(Self {
                    metrics,
                    source: Some(display.source),
                    projection: Some(display.projection),
                    slot,
                    open: true,
                })
            }
            Err(e) => {
                slot.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    pub fn metrics(&self) -> SurfaceMetrics {
        self.metrics
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Polls the image source until a frame shows up or `timeout` passes.
    pub async fn next_frame(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<RawImage, CaptureError> {
        let source = self.source.as_mut().ok_or_else(|| {
            CaptureError::CaptureSourceUnavailable("session already closed".to_string())
        })?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(image) = source.acquire_latest() {
                return Ok(image);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CaptureError::CaptureTimeout { waited: timeout });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Tears the display down. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(mut projection) = self.projection.take() {
            projection.stop();
        }
        if self.open {
            self.open = false;
            self.slot.store(false, Ordering::Release);
            log::info!("[CAPTURE] Virtual display torn down");
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PixelFormat, Plane};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    struct FakeSource {
        frames: Vec<RawImage>,
        log: Log,
    }

    impl ImageSource for FakeSource {
        fn acquire_latest(&mut self) -> Option<RawImage> {
            self.frames.pop()
        }

        fn close(&mut self) {
            self.log.lock().unwrap().push("source.close");
        }
    }

    struct FakeProjection(Log);

    impl Projection for FakeProjection {
        fn stop(&mut self) {
            self.0.lock().unwrap().push("projection.stop");
        }
    }

    struct FakeBackend {
        frames: Vec<RawImage>,
        log: Log,
    }

    impl DisplayBackend for FakeBackend {
        fn create_virtual_display(
            &self,
            _capability: CapabilityToken,
            _metrics: SurfaceMetrics,
        ) -> Result<VirtualDisplay, CaptureError> {
            Ok(VirtualDisplay {
                source: Box::new(FakeSource {
                    frames: self.frames.clone(),
                    log: self.log.clone(),
                }),
                projection: Box::new(FakeProjection(self.log.clone())),
            })
        }
    }

    fn metrics() -> SurfaceMetrics {
        SurfaceMetrics::new(1, 1, 160)
    }

    fn one_pixel() -> RawImage {
        RawImage {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8888,
            planes: vec![Plane {
                data: vec![1, 2, 3, 255],
                row_stride: 4,
                pixel_stride: 4,
            }],
        }
    }

    #[tokio::test]
    async fn yields_available_frame() {
        let log = Log::default();
        let backend = FakeBackend {
            frames: vec![one_pixel()],
            log: log.clone(),
        };
        let slot = Arc::new(AtomicBool::new(false));
        let mut session =
            CaptureSession::open(&backend, slot, CapabilityToken::new(()), metrics()).unwrap();

        let frame = session
            .next_frame(Duration::from_millis(50), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(frame.width, 1);
    }

    #[tokio::test]
    async fn times_out_without_frames() {
        let backend = FakeBackend {
            frames: Vec::new(),
            log: Log::default(),
        };
        let slot = Arc::new(AtomicBool::new(false));
        let mut session =
            CaptureSession::open(&backend, slot, CapabilityToken::new(()), metrics()).unwrap();

        let result = session
            .next_frame(Duration::from_millis(30), Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(CaptureError::CaptureTimeout { .. })));
    }

    #[test]
    fn teardown_releases_source_before_projection_once() {
        let log = Log::default();
        let backend = FakeBackend {
            frames: Vec::new(),
            log: log.clone(),
        };
        let slot = Arc::new(AtomicBool::new(false));
        let mut session =
            CaptureSession::open(&backend, slot.clone(), CapabilityToken::new(()), metrics())
                .unwrap();
        assert!(slot.load(Ordering::Acquire));

        session.close();
        session.close();
        drop(session);

        assert_eq!(*log.lock().unwrap(), vec!["source.close", "projection.stop"]);
        assert!(!slot.load(Ordering::Acquire));
    }

    #[test]
    fn second_session_on_same_slot_is_rejected() {
        let backend = FakeBackend {
            frames: Vec::new(),
            log: Log::default(),
        };
        let slot = Arc::new(AtomicBool::new(false));
        let _first =
            CaptureSession::open(&backend, slot.clone(), CapabilityToken::new(()), metrics())
                .unwrap();

        let second =
            CaptureSession::open(&backend, slot.clone(), CapabilityToken::new(()), metrics());
        assert!(matches!(second, Err(CaptureError::AlreadyInProgress)));
        assert!(slot.load(Ordering::Acquire), "first session still holds the slot");
    }

    #[test]
    fn stale_close_does_not_release_a_newer_session() {
        let backend = FakeBackend {
            frames: Vec::new(),
            log: Log::default(),
        };
        let slot = Arc::new(AtomicBool::new(false));
        let mut first =
            CaptureSession::open(&backend, slot.clone(), CapabilityToken::new(()), metrics())
                .unwrap();
        first.close();

        let _second =
            CaptureSession::open(&backend, slot.clone(), CapabilityToken::new(()), metrics())
                .unwrap();
        first.close();
        assert!(slot.load(Ordering::Acquire));
    }
}
