//! Scripted transport standing in for cells, image servers and callers.
//!
//! Every send is recorded. Requests whose kind has a scripted [`Reply`] get a
//! correlated reply, which is queued on a channel the harness feeds back into
//! the orchestrator's intake. Unscripted kinds are never answered.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::debug;

use stratus_core::{Destination, Envelope, MessageKind, Transport, TransportError, Value};

/// Scripted remote behaviour for one request
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Reply with `success = true` and these fields
    Success(Vec<(String, Value)>),
    /// Reply with `success = false` and this error text
    Failure(String),
    /// Never reply
    Silent,
    /// Send the inner reply after a delay
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    /// Successful reply without fields
    pub fn ok() -> Self {
        Reply::Success(Vec::new())
    }

    /// Successful reply carrying one field
    pub fn with(key: &str, value: impl Into<Value>) -> Self {
        Reply::Success(vec![(key.to_string(), value.into())])
    }

    /// Failure reply
    pub fn fail(text: impl Into<String>) -> Self {
        Reply::Failure(text.into())
    }

    /// Delay this reply
    pub fn after(self, delay: Duration) -> Self {
        Reply::Delayed(delay, Box::new(self))
    }
}

type Responder = Arc<dyn Fn(&Destination, &Envelope) -> Reply + Send + Sync>;

/// Recording, scriptable [`Transport`]
pub struct ScriptedTransport {
    sent: Mutex<Vec<(Destination, Envelope)>>,
    responders: Mutex<HashMap<MessageKind, Responder>>,
    unreachable: Mutex<HashSet<Destination>>,
    unreachable_kinds: Mutex<HashSet<(MessageKind, Destination)>>,
    replies: mpsc::UnboundedSender<Envelope>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    notify: Notify,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Create a transport that answers nothing
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sent: Mutex::new(Vec::new()),
            responders: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            unreachable_kinds: Mutex::new(HashSet::new()),
            replies: tx,
            inbound: Mutex::new(Some(rx)),
            notify: Notify::new(),
        }
    }

    /// Answer every request of `kind` the same way
    pub fn respond(&self, kind: MessageKind, reply: Reply) {
        self.respond_with(kind, move |_, _| reply.clone());
    }

    /// Answer requests of `kind` depending on destination and content
    pub fn respond_with<F>(&self, kind: MessageKind, responder: F)
    where
        F: Fn(&Destination, &Envelope) -> Reply + Send + Sync + 'static,
    {
        self.responders.lock().insert(kind, Arc::new(responder));
    }

    /// Make sends to `destination` fail
    pub fn set_unreachable(&self, destination: Destination) {
        self.unreachable.lock().insert(destination);
    }

    /// Make sends of `kind` to `destination` fail, other kinds still go through
    pub fn set_unreachable_for(&self, kind: MessageKind, destination: Destination) {
        self.unreachable_kinds.lock().insert((kind, destination));
    }

    /// Take the channel scripted replies are queued on
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        self.inbound.lock().take()
    }

    /// Everything sent so far, in order
    pub fn sent(&self) -> Vec<(Destination, Envelope)> {
        self.sent.lock().clone()
    }

    /// Sent envelopes of `kind`
    pub fn sent_of(&self, kind: MessageKind) -> Vec<(Destination, Envelope)> {
        self.sent
            .lock()
            .iter()
            .filter(|(_, envelope)| envelope.kind == kind)
            .cloned()
            .collect()
    }

    /// Wait until an envelope matching `predicate` has been sent
    pub async fn wait_for<F>(
        &self,
        timeout: Duration,
        predicate: F,
    ) -> Option<(Destination, Envelope)>
    where
        F: Fn(&Destination, &Envelope) -> bool,
    {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                let found = self
                    .sent
                    .lock()
                    .iter()
                    .find(|(destination, envelope)| predicate(destination, envelope))
                    .cloned();
                if let Some(found) = found {
                    return found;
                }
                notified.await;
            }
        })
        .await
        .ok()
    }

    fn schedule(&self, request: &Envelope, destination: &Destination, reply: Reply) {
        let Some(kind) = request.kind.response_kind() else {
            return;
        };

        let mut delay = Duration::ZERO;
        let mut reply = reply;
        let reply = loop {
            match reply {
                Reply::Delayed(extra, inner) => {
                    delay += extra;
                    reply = *inner;
                }
                other => break other,
            }
        };

        let envelope = Envelope::reply_to(request, kind, destination.to_string());
        let envelope = match reply {
            Reply::Success(fields) => fields
                .into_iter()
                .fold(envelope, |envelope, (key, value)| envelope.with(&key, value)),
            Reply::Failure(text) => envelope.failed(text),
            Reply::Silent | Reply::Delayed(..) => return,
        };

        debug!(
            kind = %kind,
            destination = %destination,
            delay_ms = delay.as_millis() as u64,
            "Scripted reply"
        );
        let replies = self.replies.clone();
        if delay.is_zero() {
            let _ = replies.send(envelope);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = replies.send(envelope);
            });
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        let refused = self.unreachable.lock().contains(destination)
            || self
                .unreachable_kinds
                .lock()
                .contains(&(envelope.kind, destination.clone()));
        if refused {
            return Err(TransportError::Unreachable(destination.to_string()));
        }

        let responder = self.responders.lock().get(&envelope.kind).cloned();
        self.sent.lock().push((destination.clone(), envelope.clone()));
        self.notify.notify_waiters();

        if let Some(responder) = responder {
            let reply = responder(destination, &envelope);
            self.schedule(&envelope, destination, reply);
        }
        Ok(())
    }
}
