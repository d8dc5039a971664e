//! Floating overlay: state, platform hooks and the presenter.
//!
//! The host draws the window; this module decides what it shows and
//! when. All surface calls happen on the presenter's UI thread.

mod presenter;

pub use presenter::{OverlayPresenter, OverlaySnapshot, SurfaceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    Loading,
    Result { text: String },
    Error { message: String },
}

impl OverlayState {
    pub fn result(text: impl Into<String>) -> Self {
        OverlayState::Result { text: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        OverlayState::Error {
            message: message.into(),
        }
    }

    /// Text a simple surface can show as-is.
    pub fn display_text(&self) -> String {
        match self {
            OverlayState::Loading => "Analyzing...".to_string(),
            OverlayState::Result { text } => text.clone(),
            OverlayState::Error { message } => format!("Error: {}", message),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Overlay surface could not be created: {0}")]
    SurfaceUnavailable(String),

    #[error("Overlay surface failed to render: {0}")]
    RenderFailed(String),

    #[error("Overlay UI thread is not running")]
    UiThreadGone,
}

/// A platform window drawn above other apps.
///
/// Lives and dies on the UI thread, so it does not need to be `Send`.
pub trait OverlaySurface {
    fn render(&mut self, state: &OverlayState) -> Result<(), OverlayError>;

    /// Removes the window. Called exactly once per surface.
    fn remove(&mut self);
}

/// Creates surfaces. Moved onto the UI thread when the presenter starts.
pub trait SurfaceFactory: Send {
    fn create(&mut self) -> Result<Box<dyn OverlaySurface>, OverlayError>;
}
