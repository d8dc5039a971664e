//! Screen capture domain: public API.
//!
//! This module owns the consent round trip and the single-frame grab.
//! The platform pieces (consent dialog, virtual display, image reader)
//! are traits the host implements; everything else lives here.

mod consent;
mod coordinator;
#[cfg(feature = "desktop")]
mod desktop;
mod frame;
mod session;

pub use consent::{CapabilityToken, ConsentAuthority, ConsentResult, ConsentSink};
pub use coordinator::{CaptureCoordinator, CapturePhase};
#[cfg(feature = "desktop")]
pub use desktop::{DesktopConsent, DesktopDisplayBackend};
pub use frame::{frame_from_raw, CapturedFrame, PixelFormat, Plane, RawImage, BYTES_PER_PIXEL};
pub use session::{CaptureSession, DisplayBackend, ImageSource, Projection, VirtualDisplay};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Size and density of the surface that asked for the capture.
/// The virtual display is created at exactly this resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
}

impl SurfaceMetrics {
    pub fn new(width: u32, height: u32, density_dpi: u32) -> Self {
        Self {
            width,
            height,
            density_dpi,
        }
    }
}

/// One key press worth of "capture the screen".
///
/// The correlation token ties the asynchronous consent answer back to the
/// request that asked for it; answers carrying any other token are stale.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    correlation: Uuid,
    metrics: SurfaceMetrics,
}

impl CaptureRequest {
    pub fn new(metrics: SurfaceMetrics) -> Self {
        Self {
            correlation: Uuid::new_v4(),
            metrics,
        }
    }

    pub fn correlation(&self) -> Uuid {
        self.correlation
    }

    pub fn metrics(&self) -> SurfaceMetrics {
        self.metrics
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Screen capture permission was denied")]
    PermissionDenied,

    #[error("A screen capture is already in progress")]
    AlreadyInProgress,

    #[error("No frame arrived from the screen within {}ms", waited.as_millis())]
    CaptureTimeout { waited: Duration },

    #[error("Screen capture source unavailable: {0}")]
    CaptureSourceUnavailable(String),
}
