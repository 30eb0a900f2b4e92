//! Orchestrator: intake, handler registry and per-session context.
//!
//! Inbound envelopes enter through [`Orchestrator::dispatch`]. Envelopes bound
//! to a live session are correlated replies and go to that session's inbox;
//! unbound envelopes open a new session and run the handler registered for
//! their kind as an independent task.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info_span, warn, Instrument};

use super::forward::forward_and_wait;
use super::session::{Session, SessionRouter};
use crate::config::OrchestratorConfig;
use crate::domain::address::Destination;
use crate::domain::authority::ResourceAuthority;
use crate::domain::envelope::{Envelope, MessageKind, SessionId};
use crate::domain::transport::Transport;
use crate::error::{CoreError, ForwardError, OperationError, TransportError};

/// Logical name the orchestrator signs outbound envelopes with by default
pub const DEFAULT_IDENTITY: &str = "core";

/// An orchestration routine bound to one message kind.
///
/// `Err` is reserved for defects an operator has to see. Expected failures
/// are reported to `request.sender` through exactly one reply envelope.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Run the routine for one inbound request or event
    async fn execute(&self, ctx: &mut SessionContext, request: Envelope) -> Result<(), CoreError>;
}

struct OrchestratorInner {
    identity: String,
    router: SessionRouter,
    transport: Arc<dyn Transport>,
    authority: Arc<dyn ResourceAuthority>,
    config: OrchestratorConfig,
    handlers: HashMap<MessageKind, Arc<dyn OperationHandler>>,
}

/// Session-scoped orchestration engine
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// Start building an orchestrator
    pub fn builder(
        transport: Arc<dyn Transport>,
        authority: Arc<dyn ResourceAuthority>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            identity: DEFAULT_IDENTITY.to_string(),
            transport,
            authority,
            config: OrchestratorConfig::default(),
            handlers: HashMap::new(),
        }
    }

    /// Logical name of this orchestrator
    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// Session correlation table
    pub fn router(&self) -> &SessionRouter {
        &self.inner.router
    }

    /// Accept an inbound envelope.
    ///
    /// Replies for sessions that already ended are logged and dropped.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<(), CoreError> {
        if envelope.to_session.is_bound() {
            let kind = envelope.kind;
            let target = envelope.to_session;
            return match self.inner.router.deliver(envelope).await {
                Ok(()) => Ok(()),
                Err(CoreError::SessionClosed(_)) => {
                    warn!(session = %target, kind = %kind, "Dropping envelope for closed session");
                    Ok(())
                }
                Err(e) => Err(e),
            };
        }

        self.spawn_session(envelope).map(|_| ())
    }

    /// Open a session for an unbound envelope and run its handler.
    ///
    /// The returned handle resolves with the handler's result once the
    /// routine returns and the session is destroyed.
    pub fn spawn_session(
        &self,
        envelope: Envelope,
    ) -> Result<JoinHandle<Result<(), CoreError>>, CoreError> {
        let handler = self
            .inner
            .handlers
            .get(&envelope.kind)
            .cloned()
            .ok_or(CoreError::UnknownMessageKind(envelope.kind))?;

        let session = self.inner.router.open();
        let span = info_span!(
            "session",
            id = %session.id(),
            kind = %envelope.kind,
            transaction = %envelope.transaction_id,
        );
        let mut ctx = SessionContext {
            session,
            orchestrator: self.clone(),
        };

        Ok(tokio::spawn(
            async move {
                let kind = envelope.kind;
                let result = handler.execute(&mut ctx, envelope).await;
                if let Err(e) = &result {
                    error!(kind = %kind, error = %e, "Orchestration routine failed");
                }
                result
            }
            .instrument(span),
        ))
    }
}

#[async_trait]
impl Transport for Orchestrator {
    async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        if destination.is_local() {
            return self
                .dispatch(envelope)
                .await
                .map_err(|e| TransportError::Other(e.to_string()));
        }
        self.inner.transport.send(envelope, destination).await
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    identity: String,
    transport: Arc<dyn Transport>,
    authority: Arc<dyn ResourceAuthority>,
    config: OrchestratorConfig,
    handlers: HashMap<MessageKind, Arc<dyn OperationHandler>>,
}

impl OrchestratorBuilder {
    /// Override the configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the logical name outbound envelopes are signed with
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Register a handler, replacing any previous one for `kind`
    pub fn register(mut self, kind: MessageKind, handler: Arc<dyn OperationHandler>) -> Self {
        if self.handlers.insert(kind, handler).is_some() {
            debug!(kind = %kind, "Replacing registered handler");
        }
        self
    }

    /// Build the orchestrator
    pub fn build(self) -> Result<Orchestrator, CoreError> {
        self.config.validate()?;
        Ok(Orchestrator {
            inner: Arc::new(OrchestratorInner {
                identity: self.identity,
                router: SessionRouter::new(self.config.inbox_capacity),
                transport: self.transport,
                authority: self.authority,
                config: self.config,
                handlers: self.handlers,
            }),
        })
    }
}

/// Everything an orchestration routine can touch while it runs
pub struct SessionContext {
    session: Session,
    orchestrator: Orchestrator,
}

impl SessionContext {
    /// Session id
    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    /// The underlying session
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Whether cancellation of this session has been requested
    pub fn is_cancelled(&self) -> bool {
        self.session.is_cancelled()
    }

    /// Resource authority
    pub fn authority(&self) -> &dyn ResourceAuthority {
        self.orchestrator.inner.authority.as_ref()
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        self.orchestrator.config()
    }

    /// Logical name outbound envelopes are signed with
    pub fn identity(&self) -> &str {
        self.orchestrator.identity()
    }

    /// Build a new sub-request signed by this orchestrator
    pub fn request(&self, kind: MessageKind) -> Envelope {
        Envelope::request(kind, self.identity()).from_session(self.id())
    }

    /// Build the reply to `request`, sent from this session
    pub fn reply_for(&self, request: &Envelope, kind: MessageKind) -> Envelope {
        Envelope::reply_to(request, kind, self.identity()).from_session(self.id())
    }

    /// Send without waiting for a reply
    pub async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError> {
        self.orchestrator.send(envelope, destination).await
    }

    /// Forward `request` and wait for one reply of kind `expected`, bounded by
    /// the configured operate timeout
    pub async fn forward_and_wait(
        &mut self,
        request: Envelope,
        destination: &Destination,
        expected: MessageKind,
    ) -> Result<Envelope, ForwardError> {
        let timeout = self.orchestrator.config().operate_timeout();
        forward_and_wait(
            &mut self.session,
            &self.orchestrator,
            request,
            destination,
            expected,
            timeout,
        )
        .await
    }

    /// Invoke the handler for `envelope` as a concurrent sub-task.
    ///
    /// The sub-task's reply comes back into this session's inbox, correlated
    /// by the envelope's transaction id.
    pub fn spawn_subtask(&self, envelope: Envelope) -> Result<(), CoreError> {
        self.orchestrator.spawn_session(envelope).map(|_| ())
    }

    /// Send the one top-level reply for `request`.
    ///
    /// A failed outcome becomes a failure reply carrying the error text.
    /// Protocol violations are reported to the caller and then returned as a
    /// defect.
    pub async fn finish(
        &self,
        request: &Envelope,
        kind: MessageKind,
        outcome: Result<Envelope, OperationError>,
    ) -> Result<(), CoreError> {
        let (reply, defect) = match outcome {
            Ok(reply) => (reply.succeeded(), None),
            Err(err) => {
                debug!(session = %self.id(), kind = %kind, error = %err, "Operation failed");
                let reply = self.reply_for(request, kind).failed(err.to_string());
                let defect = if err.is_defect() { Some(CoreError::from(err)) } else { None };
                (reply, defect)
            }
        };

        let destination = Destination::parse(&request.sender);
        self.send(reply, &destination).await?;

        match defect {
            Some(defect) => Err(defect),
            None => Ok(()),
        }
    }
}
