//! The capture state machine.
//!
//! `Idle -> AwaitingConsent -> SessionOpen -> Idle`, with every failure and
//! every dropped future also landing back in `Idle`. Only one flow runs
//! per coordinator; a second `capture()` fails fast instead of queueing.
//!
//! Every capture asks for fresh consent. Grants are never cached, so a
//! capability token can never outlive the session it opened.

use super::consent::ConsentInbox;
use super::{
    frame_from_raw, CaptureError, CaptureRequest, CaptureSession, CapturedFrame,
    ConsentAuthority, ConsentResult, DisplayBackend,
};
use crate::config::CaptureConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    AwaitingConsent,
    SessionOpen,
}

struct PhaseState {
    phase: CapturePhase,
    correlation: Option<Uuid>,
}

pub struct CaptureCoordinator {
    authority: Arc<dyn ConsentAuthority>,
    backend: Arc<dyn DisplayBackend>,
    config: CaptureConfig,
    state: Mutex<PhaseState>,
    inbox: Arc<ConsentInbox>,
    session_slot: Arc<AtomicBool>,
}

impl CaptureCoordinator {
    pub fn new(
        authority: Arc<dyn ConsentAuthority>,
        backend: Arc<dyn DisplayBackend>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            authority,
            backend,
            config,
            state: Mutex::new(PhaseState {
                phase: CapturePhase::Idle,
                correlation: None,
            }),
            inbox: ConsentInbox::new(),
            session_slot: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn phase(&self) -> CapturePhase {
        self.lock_state().phase
    }

    /// Correlation token of the flow in progress, if any.
    pub fn in_flight(&self) -> Option<Uuid> {
        self.lock_state().correlation
    }

    pub fn is_session_open(&self) -> bool {
        self.session_slot.load(Ordering::Acquire)
    }

    /// Runs one full flow and returns exactly one frame.
    ///
    /// Consent has no fixed timeout of its own; an authority that never
    /// answers is treated as a denial after the configured grace period.
    /// The frame wait is bounded by `frame_timeout`. The virtual display
    /// is torn down before this returns, whatever the outcome.
    pub async fn capture(&self, request: CaptureRequest) -> Result<CapturedFrame, CaptureError> {
        let metrics = request.metrics();
        if metrics.width == 0 || metrics.height == 0 {
            return Err(CaptureError::CaptureSourceUnavailable(format!(
                "surface reported {}x{}",
                metrics.width, metrics.height
            )));
        }

        let correlation = request.correlation();
        let flow = self.begin(correlation)?;
        let start = Instant::now();

        let (sink, reply) = self.inbox.subscribe(correlation);
        log::info!("[CAPTURE] {} awaiting consent", correlation);
        if let Err(e) = self.authority.request_capture(&request, sink) {
            log::error!("[CAPTURE] {} consent UI failed to launch: {}", correlation, e);
            return Err(e);
        }

        let consent = self.await_consent(correlation, reply).await;
        self.inbox.unsubscribe(correlation);
        let capability = consent?.into_capability().ok_or_else(|| {
            log::warn!("[CAPTURE] {} consent denied", correlation);
            CaptureError::PermissionDenied
        })?;

        let consent_ms = start.elapsed().as_millis();
        log::info!("[CAPTURE] {} consent granted in {}ms", correlation, consent_ms);

        flow.advance(CapturePhase::SessionOpen);
        let mut session = CaptureSession::open(
            self.backend.as_ref(),
            self.session_slot.clone(),
            capability,
            metrics,
        )?;

        let raw = session
            .next_frame(self.config.frame_timeout, self.config.poll_interval)
            .await;
        session.close();

        let raw = raw.inspect_err(|e| {
            log::error!("[CAPTURE] {} frame acquisition failed: {}", correlation, e);
        })?;
        let frame = frame_from_raw(&raw)?;

        log::info!(
            "[CAPTURE] {} captured {}x{} in {}ms ({}ms after consent)",
            correlation,
            frame.width(),
            frame.height(),
            start.elapsed().as_millis(),
            start.elapsed().as_millis() - consent_ms
        );
        Ok(frame)
    }

    async fn await_consent(
        &self,
        correlation: Uuid,
        reply: oneshot::Receiver<ConsentResult>,
    ) -> Result<ConsentResult, CaptureError> {
        match tokio::time::timeout(self.config.consent_grace, reply).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                log::warn!("[CAPTURE] {} consent listener closed unanswered", correlation);
                Err(CaptureError::PermissionDenied)
            }
            Err(_) => {
                log::warn!(
                    "[CAPTURE] {} consent unanswered after {}ms, treating as denied",
                    correlation,
                    self.config.consent_grace.as_millis()
                );
                Err(CaptureError::PermissionDenied)
            }
        }
    }

    fn begin(&self, correlation: Uuid) -> Result<FlowGuard<'_>, CaptureError> {
        let mut state = self.lock_state();
        if state.phase != CapturePhase::Idle {
            log::warn!(
                "[CAPTURE] Rejecting {}: {:?} already in {:?}",
                correlation,
                state.correlation,
                state.phase
            );
            return Err(CaptureError::AlreadyInProgress);
        }
        state.phase = CapturePhase::AwaitingConsent;
        state.correlation = Some(correlation);
        Ok(FlowGuard {
            coordinator: self,
            correlation,
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PhaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the coordinator to `Idle` on every exit path, including a
/// dropped `capture()` future.
struct FlowGuard<'a> {
    coordinator: &'a CaptureCoordinator,
    correlation: Uuid,
}

impl FlowGuard<'_> {
    fn advance(&self, phase: CapturePhase) {
        self.coordinator.lock_state().phase = phase;
    }
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.inbox.unsubscribe(self.correlation);
        let mut state = self.coordinator.lock_state();
        if state.correlation == Some(self.correlation) {
            state.phase = CapturePhase::Idle;
            state.correlation = None;
        }
    }
}
