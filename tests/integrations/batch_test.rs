//! Batch fan-out and aggregation through a live orchestrator.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use stratus_core::domain::records::{BatchId, BatchItemStatus, InstanceId};
use stratus_core::{
    keys, Envelope, MessageKind, OrchestratorConfig, ResourceAuthority, SessionId, TransactionId,
};
use stratus_integration_tests::utils::{
    authority_with_guests, authority_with_running_guests, start, start_with,
};
use stratus_state_inmemory::InMemoryResourceAuthority;
use stratus_test_utils::fixtures::{self, CALLER, TEMPLATE};
use stratus_test_utils::{Reply, ScriptedTransport, TestHarness};

/// Submit a batch and wait for the accepted reply; returns the batch id and
/// the id of the aggregating session
async fn submit(
    harness: &TestHarness,
    request: Envelope,
    response: MessageKind,
) -> (BatchId, SessionId, tokio::task::JoinHandle<Result<(), stratus_core::CoreError>>) {
    let handle = harness.submit(request).unwrap();
    let accepted = harness.caller_reply(response).await.unwrap();
    assert!(accepted.success, "{}", accepted.error);
    let batch = BatchId(accepted.string(keys::BATCH).unwrap().to_string());
    (batch, accepted.from_session, handle)
}

async fn statuses(authority: &InMemoryResourceAuthority, batch: &BatchId) -> Vec<BatchItemStatus> {
    authority
        .get_batch_job(batch)
        .await
        .unwrap()
        .items
        .into_iter()
        .map(|item| item.status)
        .collect()
}

fn delete_batch() -> Envelope {
    fixtures::batch_request(MessageKind::BatchDeleteGuestRequest, &["g1", "g2", "g3"])
}

#[tokio::test(start_paused = true)]
async fn test_batch_create_guests() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::CreateGuestRequest, Reply::ok());
    let harness = start(authority.clone(), transport.clone());

    let request = fixtures::batch_request(MessageKind::BatchCreateGuestRequest, &["web-1", "web-2"])
        .with(keys::TEMPLATE, TEMPLATE)
        .with(keys::DISKS, vec![20u64]);
    let (batch, _, handle) = submit(&harness, request, MessageKind::BatchCreateGuestResponse).await;
    handle.await.unwrap().unwrap();

    assert_eq!(
        statuses(&authority, &batch).await,
        vec![BatchItemStatus::Succeeded, BatchItemStatus::Succeeded]
    );
    assert_eq!(authority.instance_count().await, 2);

    let mut names: Vec<String> = transport
        .sent_of(MessageKind::CreateGuestRequest)
        .into_iter()
        .map(|(_, envelope)| envelope.string(keys::NAME).unwrap().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["web-1".to_string(), "web-2".to_string()]);

    // Sub-operation replies stay inside the orchestrator
    assert!(harness.caller_replies(MessageKind::CreateGuestResponse).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batch_stop_reports_item_failures() {
    let authority = authority_with_running_guests(&["g1", "g2"]).await;
    authority
        .set_instance_running(&InstanceId("g2".to_string()), false)
        .await
        .unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::StopInstanceRequest, Reply::ok());
    let harness = start(authority.clone(), transport);

    let request = fixtures::batch_request(MessageKind::BatchStopGuestRequest, &["g1", "g2"]);
    let (batch, _, handle) = submit(&harness, request, MessageKind::BatchStopGuestResponse).await;
    handle.await.unwrap().unwrap();

    assert_eq!(
        statuses(&authority, &batch).await,
        vec![
            BatchItemStatus::Succeeded,
            BatchItemStatus::Failed("invalid state: instance already stopped".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_query_batch_status() {
    let authority = authority_with_guests(&["g1", "g2", "g3"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond_with(MessageKind::DeleteGuestRequest, |_, request| {
        match request.string(keys::INSTANCE) {
            Ok("g2") => Reply::fail("volume busy"),
            _ => Reply::ok(),
        }
    });
    let harness = start(authority, transport);

    let (batch, _, handle) =
        submit(&harness, delete_batch(), MessageKind::BatchDeleteGuestResponse).await;
    handle.await.unwrap().unwrap();

    let query = Envelope::request(MessageKind::QueryBatchStatusRequest, CALLER)
        .with(keys::BATCH, batch.0.clone());
    harness.run(query).await.unwrap();

    let reply = harness.caller_reply(MessageKind::QueryBatchStatusResponse).await.unwrap();
    assert!(reply.success, "{}", reply.error);
    assert_eq!(reply.string(keys::BATCH).unwrap(), batch.0);
    assert_eq!(reply.strings(keys::ITEMS).unwrap(), &["g1", "g2", "g3"].map(String::from));
    assert_eq!(
        reply.strings(keys::STATUS).unwrap(),
        &["success", "failed", "success"].map(String::from)
    );
    assert_eq!(reply.strings(keys::REASONS).unwrap(), &["", "volume busy", ""].map(String::from));
}

#[tokio::test(start_paused = true)]
async fn test_uncorrelated_replies_do_not_disturb_aggregation() {
    let authority = authority_with_guests(&["g1", "g2", "g3"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(
        MessageKind::DeleteGuestRequest,
        Reply::ok().after(Duration::from_secs(1)),
    );
    let harness = start(authority.clone(), transport);

    let (batch, session, handle) =
        submit(&harness, delete_batch(), MessageKind::BatchDeleteGuestResponse).await;

    // Unknown transaction: ignored
    let stray = Envelope::request(MessageKind::DeleteGuestResponse, "default.c1")
        .to_session(session)
        .with_transaction(TransactionId(7))
        .failed("stale");
    harness.orchestrator.dispatch(stray).await.unwrap();

    // Known transaction, wrong kind: the item fails and its late reply is ignored
    let wrong_kind = Envelope::request(MessageKind::StopInstanceResponse, "default.c1")
        .to_session(session)
        .with_transaction(TransactionId(0))
        .succeeded();
    harness.orchestrator.dispatch(wrong_kind).await.unwrap();

    handle.await.unwrap().unwrap();

    assert_eq!(
        statuses(&authority, &batch).await,
        vec![
            BatchItemStatus::Failed("unexpected reply stop_instance_response".to_string()),
            BatchItemStatus::Succeeded,
            BatchItemStatus::Succeeded,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_batch_leaves_items_pending() {
    let authority = authority_with_guests(&["g1", "g2", "g3"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond_with(MessageKind::DeleteGuestRequest, |_, request| {
        match request.string(keys::INSTANCE) {
            Ok("g2") => Reply::Silent,
            _ => Reply::ok(),
        }
    });
    let config = OrchestratorConfig {
        operate_timeout_secs: 30,
        ..fixtures::test_config()
    };
    let harness = start_with(authority.clone(), transport, config);

    let started = Instant::now();
    let (batch, _, handle) =
        submit(&harness, delete_batch(), MessageKind::BatchDeleteGuestResponse).await;
    handle.await.unwrap().unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(30), "gave up after {:?}", elapsed);
    assert_eq!(
        statuses(&authority, &batch).await,
        vec![
            BatchItemStatus::Succeeded,
            BatchItemStatus::Pending,
            BatchItemStatus::Succeeded,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_batch_stops_aggregating() {
    let authority = authority_with_guests(&["g1", "g2", "g3"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority.clone(), transport);

    let started = Instant::now();
    let (batch, session, handle) =
        submit(&harness, delete_batch(), MessageKind::BatchDeleteGuestResponse).await;
    assert!(harness.orchestrator.router().cancel(session));
    handle.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!harness.orchestrator.router().is_active(session));
    assert_eq!(statuses(&authority, &batch).await, vec![BatchItemStatus::Pending; 3]);
}
