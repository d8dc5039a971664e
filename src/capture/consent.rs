//! Capture consent round trip.
//!
//! The platform shows its own permission UI and answers some time later.
//! Instead of a process-wide broadcast, each coordinator owns one inbox;
//! a request subscribes with its correlation token, hands a `ConsentSink`
//! to the authority, and unsubscribes when it leaves the waiting state.
//! Anything delivered to a token that is no longer subscribed is dropped.

use super::{CaptureError, CaptureRequest};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::oneshot;
use uuid::Uuid;

/// One-time credential authorizing a single capture session.
///
/// Neither `Clone` nor `Copy`: opening a session consumes it.
pub struct CapabilityToken {
    id: Uuid,
    grant: Box<dyn Any + Send>,
}

impl CapabilityToken {
    /// Wraps whatever native handle the platform returned with the grant.
    pub fn new<G: Any + Send>(grant: G) -> Self {
        Self {
            id: Uuid::new_v4(),
            grant: Box::new(grant),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Unwraps the native handle. `None` if it was issued by another platform.
    pub fn into_grant<G: Any>(self) -> Option<G> {
        self.grant.downcast::<G>().ok().map(|g| *g)
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityToken")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// What the platform answered.
#[derive(Debug)]
pub struct ConsentResult {
    pub granted: bool,
    pub capability: Option<CapabilityToken>,
}

impl ConsentResult {
    pub fn granted(capability: CapabilityToken) -> Self {
        Self {
            granted: true,
            capability: Some(capability),
        }
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            capability: None,
        }
    }

    /// The capability, if and only if consent was actually granted.
    pub fn into_capability(self) -> Option<CapabilityToken> {
        if self.granted {
            self.capability
        } else {
            None
        }
    }
}

/// Platform hook that shows the consent UI.
pub trait ConsentAuthority: Send + Sync {
    /// Starts the consent flow and returns immediately.
    ///
    /// The answer goes through `sink`, from any thread, at any later time,
    /// or never. An `Err` means the consent UI could not even be shown.
    fn request_capture(
        &self,
        request: &CaptureRequest,
        sink: ConsentSink,
    ) -> Result<(), CaptureError>;
}

/// Reply handle bound to one request's correlation token.
#[derive(Clone)]
pub struct ConsentSink {
    correlation: Uuid,
    inbox: Weak<ConsentInbox>,
}

impl ConsentSink {
    pub fn correlation(&self) -> Uuid {
        self.correlation
    }

    /// Hands the answer to the waiting coordinator.
    ///
    /// Returns `false` when the answer was stale: the request already gave
    /// up, finished, or its coordinator is gone. Stale answers are dropped
    /// along with any capability they carry.
    pub fn deliver(&self, result: ConsentResult) -> bool {
        match self.inbox.upgrade() {
            Some(inbox) => inbox.deliver(self.correlation, result),
            None => {
                log::warn!(
                    "[CAPTURE] Consent for {} arrived after its coordinator was dropped",
                    self.correlation
                );
                false
            }
        }
    }
}

impl fmt::Debug for ConsentSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentSink")
            .field("correlation", &self.correlation)
            .finish()
    }
}

struct Subscription {
    correlation: Uuid,
    reply: oneshot::Sender<ConsentResult>,
}

/// Per-coordinator listener slot. At most one subscription at a time.
pub(crate) struct ConsentInbox {
    pending: Mutex<Option<Subscription>>,
}

impl ConsentInbox {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(None),
        })
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        correlation: Uuid,
    ) -> (ConsentSink, oneshot::Receiver<ConsentResult>) {
        let (reply, receiver) = oneshot::channel();
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = pending.replace(Subscription { correlation, reply }) {
            log::warn!(
                "[CAPTURE] Replaced leftover consent subscription {}",
                old.correlation
            );
        }
        let sink = ConsentSink {
            correlation,
            inbox: Arc::downgrade(self),
        };
        (sink, receiver)
    }

    pub(crate) fn unsubscribe(&self, correlation: Uuid) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if pending
            .as_ref()
            .is_some_and(|sub| sub.correlation == correlation)
        {
            *pending = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn is_waiting(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn deliver(&self, correlation: Uuid, result: ConsentResult) -> bool {
        let subscription = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(sub) if sub.correlation == correlation => pending.take(),
                _ => None,
            }
        };

        match subscription {
            Some(sub) => {
                let accepted = sub.reply.send(result).is_ok();
                if !accepted {
                    log::warn!("[CAPTURE] Consent for {} had no receiver", correlation);
                }
                accepted
            }
            None => {
                log::warn!(
                    "[CAPTURE] Discarding stale consent result for {}",
                    correlation
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_round_trips_native_grant() {
        let token = CapabilityToken::new(42u32);
        assert_eq!(token.into_grant::<u32>(), Some(42));
    }

    #[test]
    fn capability_rejects_foreign_grant() {
        let token = CapabilityToken::new("android-intent");
        assert!(token.into_grant::<u32>().is_none());
    }

    #[test]
    fn denied_result_has_no_capability() {
        let mut result = ConsentResult::granted(CapabilityToken::new(()));
        result.granted = false;
        assert!(result.into_capability().is_none());
        assert!(ConsentResult::denied().into_capability().is_none());
    }

    #[tokio::test]
    async fn delivery_reaches_matching_subscription() {
        let inbox = ConsentInbox::new();
        let id = Uuid::new_v4();
        let (sink, receiver) = inbox.subscribe(id);

        assert!(sink.deliver(ConsentResult::denied()));
        let result = receiver.await.unwrap();
        assert!(!result.granted);
        assert!(!inbox.is_waiting());
    }

    #[test]
    fn delivery_after_unsubscribe_is_stale() {
        let inbox = ConsentInbox::new();
        let id = Uuid::new_v4();
        let (sink, _receiver) = inbox.subscribe(id);
        inbox.unsubscribe(id);

        assert!(!sink.deliver(ConsentResult::granted(CapabilityToken::new(()))));
    }

    #[test]
    fn delivery_for_other_request_is_stale() {
        let inbox = ConsentInbox::new();
        let old = Uuid::new_v4();
        let (old_sink, _old_rx) = inbox.subscribe(old);
        inbox.unsubscribe(old);
        let (_sink, _rx) = inbox.subscribe(Uuid::new_v4());

        assert!(!old_sink.deliver(ConsentResult::denied()));
        assert!(inbox.is_waiting(), "current subscription must survive");
    }

    #[test]
    fn second_delivery_is_stale() {
        let inbox = ConsentInbox::new();
        let (sink, _receiver) = inbox.subscribe(Uuid::new_v4());
        assert!(sink.deliver(ConsentResult::denied()));
        assert!(!sink.deliver(ConsentResult::denied()));
    }

    #[test]
    fn delivery_after_coordinator_drop_is_stale() {
        let inbox = ConsentInbox::new();
        let (sink, _receiver) = inbox.subscribe(Uuid::new_v4());
        drop(inbox);
        assert!(!sink.deliver(ConsentResult::denied()));
    }
}
