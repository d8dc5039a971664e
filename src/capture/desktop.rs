//! Desktop capture backend using the `xcap` crate.
//!
//! Desktops have no capture consent dialog, so `DesktopConsent` grants on
//! the spot. The "virtual display" is the primary monitor; each session
//! takes one screenshot of it.

use super::{
    CapabilityToken, CaptureError, CaptureRequest, ConsentAuthority, ConsentResult, ConsentSink,
    DisplayBackend, ImageSource, PixelFormat, Plane, Projection, RawImage, SurfaceMetrics,
    VirtualDisplay, BYTES_PER_PIXEL,
};
use xcap::Monitor;

/// Proof that a capability came from `DesktopConsent`.
struct DesktopGrant;

pub struct DesktopConsent;

impl ConsentAuthority for DesktopConsent {
    fn request_capture(
        &self,
        request: &CaptureRequest,
        sink: ConsentSink,
    ) -> Result<(), CaptureError> {
        log::info!(
            "[CAPTURE] {} desktop capture needs no dialog, granting",
            request.correlation()
        );
        sink.deliver(ConsentResult::granted(CapabilityToken::new(DesktopGrant)));
        Ok(())
    }
}

pub struct DesktopDisplayBackend;

impl DisplayBackend for DesktopDisplayBackend {
    fn create_virtual_display(
        &self,
        capability: CapabilityToken,
        _metrics: SurfaceMetrics,
    ) -> Result<VirtualDisplay, CaptureError> {
        capability.into_grant::<DesktopGrant>().ok_or_else(|| {
            CaptureError::CaptureSourceUnavailable(
                "capability was not issued by DesktopConsent".to_string(),
            )
        })?;

        // Fail early if there is nothing to capture.
        primary_monitor()?;
        Ok(VirtualDisplay {
            source: Box::new(MonitorSource { open: true }),
            projection: Box::new(MonitorProjection),
        })
    }
}

/// Primary monitor, or the first one if none reports as primary.
fn primary_monitor() -> Result<Monitor, CaptureError> {
    let monitors = Monitor::all().map_err(|e| {
        CaptureError::CaptureSourceUnavailable(format!("failed to enumerate monitors: {}", e))
    })?;

    let mut fallback = None;
    for monitor in monitors {
        if monitor.is_primary().unwrap_or(false) {
            return Ok(monitor);
        }
        fallback.get_or_insert(monitor);
    }
    fallback.ok_or_else(|| CaptureError::CaptureSourceUnavailable("no monitor found".to_string()))
}

/// Re-resolves the monitor per grab; `Monitor` handles are not `Send`
/// on every platform.
struct MonitorSource {
    open: bool,
}

impl ImageSource for MonitorSource {
    fn acquire_latest(&mut self) -> Option<RawImage> {
        if !self.open {
            return None;
        }
        let start = std::time::Instant::now();
        let captured = primary_monitor().and_then(|monitor| {
            monitor
                .capture_image()
                .map_err(|e| CaptureError::CaptureSourceUnavailable(e.to_string()))
        });
        match captured {
            Ok(image) => {
                let (width, height) = (image.width(), image.height());
                log::info!(
                    "[CAPTURE] Monitor captured {}x{} in {}ms",
                    width,
                    height,
                    start.elapsed().as_millis()
                );
                Some(RawImage {
                    width,
                    height,
                    format: PixelFormat::Rgba8888,
                    planes: vec![Plane {
                        data: image.into_raw(),
                        row_stride: width as usize * BYTES_PER_PIXEL,
                        pixel_stride: BYTES_PER_PIXEL,
                    }],
                })
            }
            Err(e) => {
                log::error!("[CAPTURE] Monitor capture failed: {}", e);
                None
            }
        }
    }

    fn close(&mut self) {
        self.open = false;
    }
}

struct MonitorProjection;

impl Projection for MonitorProjection {
    fn stop(&mut self) {}
}
