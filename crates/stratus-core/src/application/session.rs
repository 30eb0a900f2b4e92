//! Sessions and the correlation table that feeds them.
//!
//! Every top-level request and every event runs in its own [`Session`]. The
//! [`SessionRouter`] keeps one bounded inbox per live session, keyed by
//! [`SessionId`], and is the only way envelopes reach an inbox: an envelope is
//! delivered to the session whose id equals its `to_session`, or dropped.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::domain::envelope::{Envelope, SessionId, TransactionId};
use crate::CoreError;

struct SessionSlot {
    inbox: mpsc::Sender<Envelope>,
    cancel: watch::Sender<bool>,
}

struct RouterInner {
    slots: DashMap<SessionId, SessionSlot>,
    next_id: AtomicU64,
    inbox_capacity: usize,
}

/// Correlation table from session id to session inbox
#[derive(Clone)]
pub struct SessionRouter {
    inner: Arc<RouterInner>,
}

impl SessionRouter {
    /// Create a router whose inboxes hold at most `inbox_capacity` envelopes
    pub fn new(inbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                slots: DashMap::with_capacity(64),
                next_id: AtomicU64::new(1),
                inbox_capacity: inbox_capacity.max(1),
            }),
        }
    }

    /// Open a new session with a fresh id
    pub fn open(&self) -> Session {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (inbox_tx, inbox_rx) = mpsc::channel(self.inner.inbox_capacity);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        self.inner.slots.insert(
            id,
            SessionSlot {
                inbox: inbox_tx,
                cancel: cancel_tx,
            },
        );
        trace!(session = %id, "Session opened");

        Session {
            id,
            inbox: inbox_rx,
            cancel: cancel_rx,
            forwards: 0,
            router: self.inner.clone(),
        }
    }

    /// Deliver a correlated envelope into the inbox named by its `to_session`.
    ///
    /// Waits while the inbox is full. Fails with [`CoreError::SessionClosed`]
    /// when no such session is live.
    pub async fn deliver(&self, envelope: Envelope) -> Result<(), CoreError> {
        let target = envelope.to_session;
        // Clone the sender so no map guard is held across the await.
        let sender = self
            .inner
            .slots
            .get(&target)
            .map(|slot| slot.inbox.clone())
            .ok_or(CoreError::SessionClosed(target))?;

        sender
            .send(envelope)
            .await
            .map_err(|_| CoreError::SessionClosed(target))
    }

    /// Raise the cancellation signal of a session
    pub fn cancel(&self, id: SessionId) -> bool {
        match self.inner.slots.get(&id) {
            Some(slot) => {
                let _ = slot.cancel.send(true);
                debug!(session = %id, "Session cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Whether a session is live
    pub fn is_active(&self, id: SessionId) -> bool {
        self.inner.slots.contains_key(&id)
    }

    /// Number of live sessions
    pub fn active_sessions(&self) -> usize {
        self.inner.slots.len()
    }
}

/// One correlated conversation.
///
/// The session owns its inbox exclusively; dropping it unregisters the id so
/// late replies are discarded by the router.
pub struct Session {
    id: SessionId,
    inbox: mpsc::Receiver<Envelope>,
    cancel: watch::Receiver<bool>,
    forwards: u32,
    router: Arc<RouterInner>,
}

impl Session {
    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Wait for the next correlated envelope
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbox.recv().await
    }

    /// Take an envelope if one is already queued
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.inbox.try_recv().ok()
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Transaction id tagging the next forwarded request.
    ///
    /// Tags start at 1 and never repeat within a session, so a reply to an
    /// earlier forward that timed out can be told apart from the current one.
    pub(crate) fn next_forward_tag(&mut self) -> TransactionId {
        self.forwards = self.forwards.wrapping_add(1).max(1);
        TransactionId(self.forwards)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.router.slots.remove(&self.id);
        trace!(session = %self.id, "Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
