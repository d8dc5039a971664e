//! Overlay presenter: owns the single floating surface.
//!
//! Surface and state live on a dedicated UI thread. Everyone else,
//! including background completions, sends messages that the thread
//! applies in arrival order. Each `open()` issues a fresh `SurfaceId`;
//! updates addressed to any other id are dropped, so a result that lands
//! after its overlay was closed or reused never reaches the screen.

use super::{OverlayError, OverlayState, OverlaySurface, SurfaceFactory};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Identifies one `open()` of the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(u64);

/// What the overlay shows right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySnapshot {
    pub surface: Option<SurfaceId>,
    pub state: Option<OverlayState>,
}

enum UiMessage {
    Open {
        reply: oneshot::Sender<Result<SurfaceId, OverlayError>>,
    },
    Update {
        surface: SurfaceId,
        state: OverlayState,
        reply: Option<oneshot::Sender<bool>>,
    },
    Close {
        surface: Option<SurfaceId>,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<OverlaySnapshot>,
    },
    Shutdown,
}

pub struct OverlayPresenter {
    tx: mpsc::UnboundedSender<UiMessage>,
    ui_thread: Option<JoinHandle<()>>,
}

impl OverlayPresenter {
    /// Starts the UI thread. The factory moves onto it.
    pub fn spawn<F>(factory: F) -> Result<Self, OverlayError>
    where
        F: SurfaceFactory + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory: Box<dyn SurfaceFactory> = Box::new(factory);
        // Surfaces are created and dropped on the UI thread only.
        let handle = std::thread::Builder::new()
            .name("overlay-ui".to_string())
            .spawn(move || {
                UiLoop {
                    factory,
                    mounted: None,
                    next_id: 0,
                }
                .run(rx)
            })
            .map_err(|e| {
                OverlayError::SurfaceUnavailable(format!("UI thread failed to start: {}", e))
            })?;

        Ok(Self {
            tx,
            ui_thread: Some(handle),
        })
    }

    /// Shows the overlay in `Loading`. If it is already showing, the same
    /// window is reused and its previous owner loses access.
    pub async fn open(&self) -> Result<SurfaceId, OverlayError> {
        let (reply, rx) = oneshot::channel();
        self.send(UiMessage::Open { reply })?;
        rx.await.map_err(|_| OverlayError::UiThreadGone)?
    }

    /// Applies `state` if `surface` is still the current overlay.
    /// Returns whether it was applied.
    pub async fn update(&self, surface: SurfaceId, state: OverlayState) -> bool {
        let (reply, rx) = oneshot::channel();
        let message = UiMessage::Update {
            surface,
            state,
            reply: Some(reply),
        };
        if self.send(message).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Fire-and-forget form of [`update`](Self::update), usable from
    /// synchronous callbacks.
    pub fn post_update(&self, surface: SurfaceId, state: OverlayState) {
        let _ = self.send(UiMessage::Update {
            surface,
            state,
            reply: None,
        });
    }

    /// Removes whatever overlay is showing. Idempotent; returns whether a
    /// surface was actually removed.
    pub async fn close(&self) -> bool {
        self.request_close(None).await
    }

    /// Removes the overlay only if `surface` is still the current one.
    pub async fn close_surface(&self, surface: SurfaceId) -> bool {
        self.request_close(Some(surface)).await
    }

    pub async fn snapshot(&self) -> OverlaySnapshot {
        let (reply, rx) = oneshot::channel();
        if self.send(UiMessage::Snapshot { reply }).is_err() {
            return OverlaySnapshot::default();
        }
        rx.await.unwrap_or_default()
    }

    async fn request_close(&self, surface: Option<SurfaceId>) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.send(UiMessage::Close { surface, reply }).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    fn send(&self, message: UiMessage) -> Result<(), OverlayError> {
        self.tx.send(message).map_err(|_| {
            log::error!("[OVERLAY] UI thread is gone, message dropped");
            OverlayError::UiThreadGone
        })
    }
}

impl Drop for OverlayPresenter {
    /// Host teardown: the UI thread drains its queue, removes any open
    /// surface and exits before this returns.
    fn drop(&mut self) {
        let _ = self.tx.send(UiMessage::Shutdown);
        if let Some(handle) = self.ui_thread.take() {
            if handle.join().is_err() {
                log::error!("[OVERLAY] UI thread panicked");
            }
        }
    }
}

struct Mounted {
    id: SurfaceId,
    surface: Box<dyn OverlaySurface>,
    state: OverlayState,
}

struct UiLoop {
    factory: Box<dyn SurfaceFactory>,
    mounted: Option<Mounted>,
    next_id: u64,
}

impl UiLoop {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<UiMessage>) {
        log::info!("[OVERLAY] UI thread started");
        while let Some(message) = rx.blocking_recv() {
            match message {
                UiMessage::Open { reply } => {
                    let _ = reply.send(self.open());
                }
                UiMessage::Update {
                    surface,
                    state,
                    reply,
                } => {
                    let applied = self.update(surface, state);
                    if let Some(reply) = reply {
                        let _ = reply.send(applied);
                    }
                }
                UiMessage::Close { surface, reply } => {
                    let _ = reply.send(self.close(surface));
                }
                UiMessage::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                UiMessage::Shutdown => break,
            }
        }
        log::info!("[OVERLAY] UI thread stopping");
    }

    fn open(&mut self) -> Result<SurfaceId, OverlayError> {
        self.next_id += 1;
        let id = SurfaceId(self.next_id);

        if let Some(mounted) = self.mounted.as_mut() {
            log::info!("[OVERLAY] Reusing surface {:?} as {:?}", mounted.id, id);
            mounted.id = id;
            mounted.state = OverlayState::Loading;
            if let Err(e) = mounted.surface.render(&OverlayState::Loading) {
                self.unmount("render failed");
                return Err(e);
            }
            return Ok(id);
        }

        let mut surface = self.factory.create()?;
        if let Err(e) = surface.render(&OverlayState::Loading) {
            surface.remove();
            return Err(e);
        }
        self.mounted = Some(Mounted {
            id,
            surface,
            state: OverlayState::Loading,
        });
        log::info!("[OVERLAY] Surface {:?} opened", id);
        Ok(id)
    }

    /// A surface that fails to render is torn down, like in `open`.
    fn update(&mut self, surface: SurfaceId, state: OverlayState) -> bool {
        match self.mounted.as_mut() {
            Some(mounted) if mounted.id == surface => {
                if let Err(e) = mounted.surface.render(&state) {
                    log::error!("[OVERLAY] {:?} render failed: {}", surface, e);
                    self.unmount("render failed");
                    return false;
                }
                mounted.state = state;
                true
            }
            _ => {
                log::info!("[OVERLAY] Dropping update for stale {:?}", surface);
                false
            }
        }
    }

    fn close(&mut self, surface: Option<SurfaceId>) -> bool {
        let current = self.mounted.as_ref().map(|m| m.id);
        match (current, surface) {
            (Some(current), Some(requested)) if current != requested => false,
            (Some(_), _) => {
                self.unmount("closed");
                true
            }
            (None, _) => false,
        }
    }

    fn snapshot(&self) -> OverlaySnapshot {
        OverlaySnapshot {
            surface: self.mounted.as_ref().map(|m| m.id),
            state: self.mounted.as_ref().map(|m| m.state.clone()),
        }
    }

    fn unmount(&mut self, reason: &str) {
        if let Some(mut mounted) = self.mounted.take() {
            mounted.surface.remove();
            log::info!("[OVERLAY] Surface {:?} removed ({})", mounted.id, reason);
        }
    }
}

impl Drop for UiLoop {
    fn drop(&mut self) {
        self.unmount("host teardown");
    }
}
