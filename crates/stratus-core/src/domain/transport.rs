//! Outbound transport interface

use async_trait::async_trait;

use super::address::Destination;
use super::envelope::Envelope;
use crate::error::TransportError;

/// Sends envelopes to logical destinations.
///
/// Correlated replies come back through the orchestrator's dispatch path, not
/// through this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send an envelope; ownership moves to the transport
    async fn send(
        &self,
        envelope: Envelope,
        destination: &Destination,
    ) -> Result<(), TransportError>;

    /// Re-enter the local intake as if the envelope arrived externally
    async fn send_to_self(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.send(envelope, &Destination::Local).await
    }
}
