//! Capture pipeline: composition root.
//!
//! One request runs Coordinator → Encoder → Presenter(Loading) →
//! AnalysisClient → Presenter(Result/Error), strictly in that order.
//! The pipeline owns the cancellation token of the request in flight;
//! closing the overlay or starting a new request cancels it, and a
//! cancelled request never touches the overlay again.
//!
//! Chat turns are serialized through the conversation lock, so at most
//! one model call per conversation is outstanding and the transcript
//! order is the order the user typed.

use crate::analysis::{
    AnalysisClient, AnalysisError, ConversationTurn, OpenRouterClient, Transcript,
};
use crate::capture::{
    CaptureCoordinator, CaptureError, CaptureRequest, ConsentAuthority, DisplayBackend,
    SurfaceMetrics,
};
use crate::config::PipelineConfig;
use crate::encode::{EncodeError, FrameEncoder};
use crate::overlay::{OverlayError, OverlayPresenter, OverlayState, SurfaceFactory, SurfaceId};
use crate::safety::redact::redact_for_display;
use crate::settings::SettingsStore;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Longest error text shown in the overlay.
const OVERLAY_ERROR_CHARS: usize = 300;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error("The request was cancelled")]
    Cancelled,

    #[error("No conversation is open")]
    NoConversation,

    #[error("Message is empty")]
    EmptyTurn,

    #[error("Nothing to retry: the last message already has a reply")]
    NothingToRetry,
}

/// The request that owns the overlay, registered before the overlay
/// opens so a close during `open()` still cancels it.
struct ActiveRequest {
    correlation: Uuid,
    surface: Option<SurfaceId>,
    cancel: CancellationToken,
}

/// Chat state tied to one overlay.
#[derive(Default)]
struct Conversation {
    correlation: Option<Uuid>,
    surface: Option<SurfaceId>,
    cancel: CancellationToken,
    transcript: Transcript,
}

impl Conversation {
    fn is_live(&self) -> bool {
        self.surface.is_some() && !self.cancel.is_cancelled()
    }
}

pub struct CapturePipeline {
    coordinator: CaptureCoordinator,
    encoder: FrameEncoder,
    presenter: OverlayPresenter,
    client: Arc<dyn AnalysisClient>,
    active: Mutex<Option<ActiveRequest>>,
    conversation: tokio::sync::Mutex<Conversation>,
}

impl CapturePipeline {
    pub fn new(
        coordinator: CaptureCoordinator,
        encoder: FrameEncoder,
        presenter: OverlayPresenter,
        client: Arc<dyn AnalysisClient>,
    ) -> Self {
        Self {
            coordinator,
            encoder,
            presenter,
            client,
            active: Mutex::new(None),
            conversation: tokio::sync::Mutex::new(Conversation::default()),
        }
    }

    /// Wires the platform pieces and the OpenRouter client from `config`.
    pub fn from_config<F>(
        authority: Arc<dyn ConsentAuthority>,
        backend: Arc<dyn DisplayBackend>,
        surfaces: F,
        settings: Arc<dyn SettingsStore>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError>
    where
        F: SurfaceFactory + 'static,
    {
        let coordinator = CaptureCoordinator::new(authority, backend, config.capture);
        let encoder = FrameEncoder::from_config(&config.encoder);
        let presenter = OverlayPresenter::spawn(surfaces)?;
        let client = OpenRouterClient::new(settings, config.analysis)?;
        Ok(Self::new(coordinator, encoder, presenter, Arc::new(client)))
    }

    pub fn coordinator(&self) -> &CaptureCoordinator {
        &self.coordinator
    }

    pub fn presenter(&self) -> &OverlayPresenter {
        &self.presenter
    }

    /// Captures the screen and describes it.
    pub async fn start(&self, metrics: SurfaceMetrics) -> Result<String, PipelineError> {
        self.start_with_question(metrics, None).await
    }

    /// Captures the screen and asks `question` about it.
    ///
    /// Capture and encode failures return before the overlay opens. If an
    /// earlier overlay is still showing and idle, it switches to `Error`
    /// so the key press is not silently ignored. Closing the overlay at
    /// any point, even while it is still opening, ends the request with
    /// `Cancelled` and leaves no conversation behind.
    pub async fn start_with_question(
        &self,
        metrics: SurfaceMetrics,
        question: Option<&str>,
    ) -> Result<String, PipelineError> {
        let request = CaptureRequest::new(metrics);
        let correlation = request.correlation();
        let start = Instant::now();
        log::info!(
            "[PIPELINE] {} started for {}x{}@{}dpi",
            correlation,
            metrics.width,
            metrics.height,
            metrics.density_dpi
        );

        let frame = match self.coordinator.capture(request).await {
            Ok(frame) => frame,
            Err(CaptureError::AlreadyInProgress) => {
                return Err(CaptureError::AlreadyInProgress.into());
            }
            Err(e) => return Err(self.fail_before_overlay(correlation, e.into()).await),
        };
        let capture_ms = start.elapsed().as_millis();

        let image = match self.encoder.encode(frame) {
            Ok(image) => image,
            Err(e) => return Err(self.fail_before_overlay(correlation, e.into()).await),
        };
        let encode_ms = start.elapsed().as_millis() - capture_ms;

        let cancel = self.activate(correlation);
        let surface = match self.presenter.open().await {
            Ok(surface) => surface,
            Err(e) => {
                self.deactivate(correlation);
                return Err(e.into());
            }
        };
        self.attach(correlation, surface);

        // Waits for any chat turn on the previous conversation to finish;
        // that turn was cancelled by `activate`.
        let mut conversation = self.conversation.lock().await;
        *conversation = Conversation {
            correlation: Some(correlation),
            surface: Some(surface),
            cancel: cancel.clone(),
            transcript: Transcript::new(),
        };
        if cancel.is_cancelled() {
            log::info!("[PIPELINE] {} closed or superseded while opening", correlation);
            self.retire(&mut conversation).await;
            return Err(PipelineError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = self.client.analyze(image, question) => Some(outcome),
        };
        let outcome = match outcome {
            Some(outcome) if !cancel.is_cancelled() => outcome,
            _ => {
                log::info!("[PIPELINE] {} cancelled during analysis", correlation);
                self.retire(&mut conversation).await;
                return Err(PipelineError::Cancelled);
            }
        };
        let analyze_ms = start.elapsed().as_millis() - capture_ms - encode_ms;

        match outcome {
            Ok(text) => {
                if !self
                    .presenter
                    .update(surface, OverlayState::result(text.clone()))
                    .await
                {
                    self.retire(&mut conversation).await;
                    return Err(PipelineError::Cancelled);
                }
                conversation
                    .transcript
                    .push(ConversationTurn::assistant(text.clone()));
                log::info!(
                    "[PIPELINE] {} done in {}ms (capture {}ms, encode {}ms, analyze {}ms)",
                    correlation,
                    start.elapsed().as_millis(),
                    capture_ms,
                    encode_ms,
                    analyze_ms
                );
                Ok(text)
            }
            Err(e) => {
                log::error!("[PIPELINE] {} analysis failed after {}ms: {}", correlation, analyze_ms, e);
                if !self
                    .presenter
                    .update(surface, OverlayState::error(overlay_message(&e)))
                    .await
                {
                    self.retire(&mut conversation).await;
                }
                Err(e.into())
            }
        }
    }

    /// Appends the user's turn and asks the model to continue.
    ///
    /// On failure the overlay shows `Error` and the turn stays in the
    /// transcript, so [`retry_last_turn`](Self::retry_last_turn) can
    /// resend it. Turns sent while another is in flight wait their turn.
    pub async fn send_chat_turn(&self, text: &str) -> Result<String, PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::EmptyTurn);
        }

        let mut conversation = self.conversation.lock().await;
        if !conversation.is_live() {
            return Err(PipelineError::NoConversation);
        }
        conversation.transcript.push(ConversationTurn::user(text));
        self.dispatch_chat(&mut conversation).await
    }

    /// Resends the transcript when its last user turn has no reply.
    pub async fn retry_last_turn(&self) -> Result<String, PipelineError> {
        let mut conversation = self.conversation.lock().await;
        if !conversation.is_live() {
            return Err(PipelineError::NoConversation);
        }
        if !conversation.transcript.awaiting_reply() {
            return Err(PipelineError::NothingToRetry);
        }
        self.dispatch_chat(&mut conversation).await
    }

    /// Closes the overlay and cancels whatever it was waiting on.
    /// Safe to call any number of times.
    pub async fn close_overlay(&self) -> bool {
        if let Some(active) = self.lock_active().take() {
            log::info!("[PIPELINE] {} closed by user", active.correlation);
            active.cancel.cancel();
        }
        self.presenter.close().await
    }

    /// Copy of the current conversation, oldest turn first.
    pub async fn transcript(&self) -> Vec<ConversationTurn> {
        self.conversation.lock().await.transcript.turns().to_vec()
    }

    async fn dispatch_chat(
        &self,
        conversation: &mut Conversation,
    ) -> Result<String, PipelineError> {
        let Some(surface) = conversation.surface else {
            return Err(PipelineError::NoConversation);
        };
        let cancel = conversation.cancel.clone();
        let start = Instant::now();

        if !self.presenter.update(surface, OverlayState::Loading).await {
            log::info!("[PIPELINE] Chat turn dropped, {:?} is gone", surface);
            self.retire(conversation).await;
            return Err(PipelineError::Cancelled);
        }
        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            outcome = self.client.continue_chat(conversation.transcript.turns()) => Some(outcome),
        };
        let outcome = match outcome {
            Some(outcome) if !cancel.is_cancelled() => outcome,
            _ => {
                log::info!("[PIPELINE] Chat turn cancelled");
                self.retire(conversation).await;
                return Err(PipelineError::Cancelled);
            }
        };

        match outcome {
            Ok(reply) => {
                log::info!(
                    "[PIPELINE] Chat turn {} answered in {}ms",
                    conversation.transcript.len(),
                    start.elapsed().as_millis()
                );
                if !self
                    .presenter
                    .update(surface, OverlayState::result(reply.clone()))
                    .await
                {
                    self.retire(conversation).await;
                    return Err(PipelineError::Cancelled);
                }
                conversation
                    .transcript
                    .push(ConversationTurn::assistant(reply.clone()));
                Ok(reply)
            }
            Err(e) => {
                log::error!(
                    "[PIPELINE] Chat turn failed after {}ms: {}",
                    start.elapsed().as_millis(),
                    e
                );
                if !self
                    .presenter
                    .update(surface, OverlayState::error(overlay_message(&e)))
                    .await
                {
                    self.retire(conversation).await;
                }
                Err(e.into())
            }
        }
    }

    /// Makes `correlation` the current request, cancelling the one before it.
    fn activate(&self, correlation: Uuid) -> CancellationToken {
        let cancel = CancellationToken::new();
        let previous = self.lock_active().replace(ActiveRequest {
            correlation,
            surface: None,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            log::info!(
                "[PIPELINE] {} supersedes {} ({:?})",
                correlation,
                previous.correlation,
                previous.surface
            );
            previous.cancel.cancel();
        }
        cancel
    }

    /// Records the surface `correlation` opened, if it is still current.
    fn attach(&self, correlation: Uuid, surface: SurfaceId) {
        if let Some(active) = self.lock_active().as_mut() {
            if active.correlation == correlation {
                active.surface = Some(surface);
            }
        }
    }

    fn deactivate(&self, correlation: Uuid) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.correlation == correlation) {
            *active = None;
        }
    }

    /// Ends a conversation whose overlay was closed, superseded or lost,
    /// so later chat turns see `NoConversation`.
    async fn retire(&self, conversation: &mut Conversation) {
        let retired = std::mem::take(conversation);
        if let Some(correlation) = retired.correlation {
            self.deactivate(correlation);
        }
        if let Some(surface) = retired.surface {
            self.presenter.close_surface(surface).await;
        }
    }

    /// Shows a capture or encode failure on an overlay that is already
    /// open and idle. With no overlay, or one still waiting on the model,
    /// the error is only returned.
    async fn fail_before_overlay(&self, correlation: Uuid, error: PipelineError) -> PipelineError {
        log::error!("[PIPELINE] {} aborted: {}", correlation, error);
        match self.conversation.try_lock() {
            Ok(conversation) if conversation.is_live() => {
                if let Some(surface) = conversation.surface {
                    self.presenter
                        .update(surface, OverlayState::error(overlay_message(&error)))
                        .await;
                }
            }
            Ok(_) => {}
            Err(_) => {
                log::info!(
                    "[PIPELINE] {} previous request still running, overlay left as is",
                    correlation
                );
            }
        }
        error
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRequest>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn overlay_message(error: &impl std::fmt::Display) -> String {
    redact_for_display(&error.to_string(), OVERLAY_ERROR_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_message_is_redacted() {
        let error = AnalysisError::Unknown("bad key sk-or-v1-aaaaaaaaaaaaaaaaaaaaaaaaaaaa".into());
        let message = overlay_message(&error);
        assert!(message.starts_with("Analysis failed"));
        assert!(!message.contains("aaaaaaaa"));
    }

    #[test]
    fn component_errors_convert() {
        let error: PipelineError = CaptureError::PermissionDenied.into();
        assert!(matches!(
            error,
            PipelineError::Capture(CaptureError::PermissionDenied)
        ));
        assert_eq!(error.to_string(), "Screen capture permission was denied");

        let error: PipelineError = AnalysisError::Unauthenticated.into();
        assert!(matches!(error, PipelineError::Analysis(_)));
    }

    #[test]
    fn default_conversation_is_not_live() {
        assert!(!Conversation::default().is_live());
    }
}
