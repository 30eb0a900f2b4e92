//! Live orchestrator wired to a [`ScriptedTransport`].

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use stratus_core::{
    CoreError, Destination, Envelope, MessageKind, Orchestrator, OrchestratorConfig,
    ResourceAuthority,
};

use crate::fixtures::CALLER;
use crate::transport::ScriptedTransport;

/// How long [`TestHarness::caller_reply`] waits by default
pub const REPLY_WAIT: Duration = Duration::from_secs(60);

/// Orchestrator with every standard workflow, fed by a scripted transport
pub struct TestHarness {
    /// The orchestrator under test
    pub orchestrator: Orchestrator,
    /// Transport recording everything the orchestrator sends
    pub transport: Arc<ScriptedTransport>,
    pump: JoinHandle<()>,
}

impl TestHarness {
    /// Build the orchestrator and start feeding scripted replies into it
    pub fn start(
        authority: Arc<dyn ResourceAuthority>,
        transport: Arc<ScriptedTransport>,
        config: OrchestratorConfig,
    ) -> Result<Self, CoreError> {
        let mut inbound = transport
            .take_inbound()
            .ok_or_else(|| {
                CoreError::ConfigurationError("transport already attached".to_string())
            })?;

        let orchestrator = Orchestrator::builder(transport.clone(), authority)
            .with_config(config)
            .with_standard_workflows()
            .build()?;

        let intake = orchestrator.clone();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = inbound.recv().await {
                if let Err(e) = intake.dispatch(envelope).await {
                    warn!(error = %e, "Scripted reply rejected by intake");
                }
            }
        });

        Ok(Self {
            orchestrator,
            transport,
            pump,
        })
    }

    /// Run one top-level request to completion
    pub async fn run(&self, request: Envelope) -> Result<(), CoreError> {
        let handle = self.orchestrator.spawn_session(request)?;
        handle
            .await
            .map_err(|e| CoreError::Other(format!("session task failed: {}", e)))?
    }

    /// Start one top-level request without waiting for it
    pub fn submit(
        &self,
        request: Envelope,
    ) -> Result<JoinHandle<Result<(), CoreError>>, CoreError> {
        self.orchestrator.spawn_session(request)
    }

    /// Wait for the reply of `kind` sent to the test caller
    pub async fn caller_reply(&self, kind: MessageKind) -> Option<Envelope> {
        let caller = Destination::Node(CALLER.to_string());
        self.transport
            .wait_for(REPLY_WAIT, |destination, envelope| {
                destination == &caller && envelope.kind == kind
            })
            .await
            .map(|(_, envelope)| envelope)
    }

    /// Replies of `kind` the test caller received so far
    pub fn caller_replies(&self, kind: MessageKind) -> Vec<Envelope> {
        let caller = Destination::Node(CALLER.to_string());
        self.transport
            .sent_of(kind)
            .into_iter()
            .filter(|(destination, _)| destination == &caller)
            .map(|(_, envelope)| envelope)
            .collect()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
