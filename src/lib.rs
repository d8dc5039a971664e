//! Peekboard: screen-aware keyboard core.
//!
//! A key press becomes one screenshot, one vision-model answer and a
//! floating overlay the user can keep chatting in:
//! - Consent round trip and single-frame grab (capture/)
//! - JPEG + base64 transport encoding (encode.rs)
//! - Vision chat client and transcript (analysis/)
//! - Overlay state on a dedicated UI thread (overlay/)
//! - The sequencing of all of the above (pipeline.rs)
//!
//! Platform surfaces (consent dialog, virtual display, overlay window)
//! are traits the host implements.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod encode;
pub mod overlay;
pub mod pipeline;
pub mod safety;
pub mod settings;

pub use analysis::{AnalysisClient, AnalysisError, ConversationTurn, OpenRouterClient, Origin};
pub use capture::{CaptureCoordinator, CaptureError, CaptureRequest, CapturedFrame, SurfaceMetrics};
pub use config::{ConfigError, PipelineConfig};
pub use encode::{EncodeError, EncodedImage, FrameEncoder};
pub use overlay::{OverlayError, OverlayPresenter, OverlayState};
pub use pipeline::{CapturePipeline, PipelineError};
pub use settings::{SettingsError, SettingsStore};

/// Installs the `env_logger` backend (filter from `RUST_LOG`, `info` by
/// default). Later calls are no-ops, so hosts and tests may both call it.
pub fn init_logging() {
    let installed = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info"),
    )
    .try_init()
    .is_ok();

    if installed {
        log::info!("Peekboard {} logging initialized", env!("CARGO_PKG_VERSION"));
    }
}
