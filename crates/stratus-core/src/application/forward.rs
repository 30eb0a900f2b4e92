//! Forward-and-wait: send one sub-request, consume exactly one correlated reply.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::session::Session;
use crate::domain::address::Destination;
use crate::domain::envelope::{Envelope, MessageKind};
use crate::domain::transport::Transport;
use crate::error::ForwardError;

/// Send `request` to `destination` and wait for its reply.
///
/// The request is stamped with the session id so the reply routes back here,
/// and with a fresh transaction id the reply must carry back. Envelopes with
/// another transaction id answer an earlier forward that already timed out;
/// they are logged and discarded. The wait is bounded by `timeout` only;
/// cancellation is not observed. At most one correlated reply is taken from
/// the inbox, and none when the timer fires. A correlated reply of another
/// kind than `expected` is a protocol violation and is reported as such,
/// never retried.
pub async fn forward_and_wait(
    session: &mut Session,
    transport: &dyn Transport,
    request: Envelope,
    destination: &Destination,
    expected: MessageKind,
    timeout: Duration,
) -> Result<Envelope, ForwardError> {
    let tag = session.next_forward_tag();
    let request = request.from_session(session.id()).with_transaction(tag);
    let kind = request.kind;

    transport.send(request, destination).await.map_err(|e| {
        warn!(
            session = %session.id(),
            kind = %kind,
            destination = %destination,
            error = %e,
            "Forward request failed"
        );
        ForwardError::Transport(e)
    })?;

    debug!(
        session = %session.id(),
        kind = %kind,
        destination = %destination,
        transaction = %tag,
        "Request forwarded, waiting for response"
    );

    let deadline = Instant::now() + timeout;
    let reply = loop {
        match tokio::time::timeout_at(deadline, session.recv()).await {
            Err(_) => {
                warn!(
                    session = %session.id(),
                    kind = %kind,
                    destination = %destination,
                    timeout_ms = timeout.as_millis() as u64,
                    "wait response timeout"
                );
                return Err(ForwardError::Timeout);
            }
            Ok(None) => return Err(ForwardError::SessionClosed),
            Ok(Some(stale)) if stale.transaction_id != tag => {
                warn!(
                    session = %session.id(),
                    received = %stale.kind,
                    transaction = %stale.transaction_id,
                    expected_transaction = %tag,
                    "Discarding stale reply"
                );
            }
            Ok(Some(reply)) => break reply,
        }
    };

    if reply.kind != expected {
        warn!(
            session = %session.id(),
            expected = %expected,
            received = %reply.kind,
            sender = %reply.sender,
            "Unexpected reply kind"
        );
        return Err(ForwardError::UnexpectedReply {
            expected,
            received: reply.kind,
        });
    }

    if !reply.success {
        debug!(
            session = %session.id(),
            kind = %reply.kind,
            error = %reply.error,
            "Remote party reported failure"
        );
        return Err(ForwardError::Rejected(reply.error));
    }

    Ok(reply)
}
