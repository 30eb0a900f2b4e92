//! Every request gets exactly one reply, and failed steps are unwound once.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use stratus_core::domain::records::{InstanceId, MigrationState};
use stratus_core::{keys, CoreError, Destination, Envelope, MessageKind, SessionId};
use stratus_integration_tests::utils::{authority_with_guests, start};
use stratus_test_utils::fixtures::{self, cell, CALLER};
use stratus_test_utils::{Reply, ScriptedTransport};

#[tokio::test(start_paused = true)]
async fn test_detach_failure_cancels_migration_once() {
    let authority = authority_with_guests(&["i1", "i2"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::AttachInstanceRequest, Reply::ok());
    transport.respond(MessageKind::DetachInstanceRequest, Reply::fail("source busy"));
    let harness = start(authority.clone(), transport.clone());

    harness
        .run(fixtures::migrate_request(&cell("c1"), &cell("c2"), &["i1", "i2"]))
        .await
        .unwrap();

    let reply = harness.caller_reply(MessageKind::MigrateInstanceResponse).await.unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error, "source busy");

    let migrations = authority.migrations().await;
    assert_eq!(migrations.len(), 1);
    assert_eq!(
        migrations[0].state,
        MigrationState::Cancelled("detach instance fail: source busy".to_string())
    );

    // No retry of the attach, and the target is never told to take over
    assert_eq!(transport.sent_of(MessageKind::AttachInstanceRequest).len(), 1);
    assert!(transport.sent_of(MessageKind::MigrationNotify).is_empty());

    let instance = authority.instance(&InstanceId("i1".to_string())).await.unwrap();
    assert_eq!(instance.cell, cell("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_target_fails_attach_step() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_unreachable(Destination::cell(&cell("c2")));
    let harness = start(authority.clone(), transport.clone());

    harness
        .run(fixtures::migrate_request(&cell("c1"), &cell("c2"), &["i1"]))
        .await
        .unwrap();

    let reply = harness.caller_reply(MessageKind::MigrateInstanceResponse).await.unwrap();
    assert_eq!(reply.error, "send request fail: destination default.c2 unreachable");
    let migrations = authority.migrations().await;
    assert!(matches!(
        &migrations[0].state,
        MigrationState::Cancelled(reason) if reason.starts_with("attach instance fail")
    ));
    assert!(transport.sent_of(MessageKind::DetachInstanceRequest).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_notify_send_cancels_migration_once() {
    let authority = authority_with_guests(&["i1", "i2"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::AttachInstanceRequest, Reply::ok());
    transport.respond(MessageKind::DetachInstanceRequest, Reply::ok());
    transport.set_unreachable_for(MessageKind::MigrationNotify, Destination::cell(&cell("c2")));
    let harness = start(authority.clone(), transport.clone());

    harness
        .run(fixtures::migrate_request(&cell("c1"), &cell("c2"), &["i1", "i2"]))
        .await
        .unwrap();

    let replies = harness.caller_replies(MessageKind::MigrateInstanceResponse);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].error, "send request fail: destination default.c2 unreachable");

    let migrations = authority.migrations().await;
    assert_eq!(migrations.len(), 1);
    assert_eq!(
        migrations[0].state,
        MigrationState::Cancelled(
            "send migrate request fail: destination default.c2 unreachable".to_string()
        )
    );

    // Both earlier steps ran exactly once and nothing reached the target afterwards
    assert_eq!(transport.sent_of(MessageKind::AttachInstanceRequest).len(), 1);
    assert_eq!(transport.sent_of(MessageKind::DetachInstanceRequest).len(), 1);
    assert!(transport.sent_of(MessageKind::MigrationNotify).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wrong_reply_kind_fails_once_and_surfaces_violation() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority.clone(), transport.clone());

    let handle = harness.submit(fixtures::create_guest_request("web-1")).unwrap();
    let (_, forwarded) = transport
        .wait_for(Duration::from_secs(1), |_, envelope| {
            envelope.kind == MessageKind::CreateGuestRequest
        })
        .await
        .unwrap();
    assert_eq!(authority.instance_count().await, 1);

    // The cell answers the create with an event instead of a create response
    let wrong = Envelope::reply_to(&forwarded, MessageKind::GuestStoppedEvent, "default.c1");
    harness.orchestrator.dispatch(wrong).await.unwrap();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(CoreError::ProtocolViolation(_))), "{:?}", result);

    let replies = harness.caller_replies(MessageKind::CreateGuestResponse);
    assert_eq!(replies.len(), 1);
    assert!(!replies[0].success);
    assert_eq!(
        replies[0].error,
        "unexpected reply guest_stopped_event, expected create_guest_response"
    );

    // The allocated instance was released before the failure went out
    assert_eq!(authority.instance_count().await, 0);
}

/// One request per workflow, each from its own caller session, and the
/// response kind it must be answered with
fn requests() -> Vec<(Envelope, MessageKind, bool)> {
    let request = |kind: MessageKind, session: u64| {
        Envelope::request(kind, CALLER).from_session(SessionId(session))
    };
    vec![
        (
            request(MessageKind::CreateGuestRequest, 101).with(keys::NAME, "web-1"),
            MessageKind::CreateGuestResponse,
            false,
        ),
        (
            request(MessageKind::DeleteGuestRequest, 102).with(keys::INSTANCE, "i1"),
            MessageKind::DeleteGuestResponse,
            true,
        ),
        (
            request(MessageKind::StopInstanceRequest, 103).with(keys::INSTANCE, ""),
            MessageKind::StopInstanceResponse,
            false,
        ),
        (
            request(MessageKind::CreateDiskImageRequest, 104)
                .with(keys::NAME, "!")
                .with(keys::INSTANCE, "i2"),
            MessageKind::CreateDiskImageResponse,
            false,
        ),
        (
            request(MessageKind::ResetSystemRequest, 105)
                .with(keys::INSTANCE, "i2")
                .with(keys::IMAGE, "img-missing"),
            MessageKind::ResetSystemResponse,
            false,
        ),
        (
            request(MessageKind::ModifyStoragePathRequest, 106)
                .with(keys::CELL, "c1")
                .with(keys::PATH, "/data"),
            MessageKind::ModifyStoragePathResponse,
            false,
        ),
        (
            request(MessageKind::MigrateInstanceRequest, 107)
                .with(keys::SOURCE_CELL, "default.c1")
                .with(keys::TARGET_CELL, "default.c1")
                .with(keys::INSTANCES, vec!["i2".to_string()]),
            MessageKind::MigrateInstanceResponse,
            false,
        ),
        (
            request(MessageKind::BatchStopGuestRequest, 108)
                .with(keys::ITEMS, Vec::<String>::new()),
            MessageKind::BatchStopGuestResponse,
            false,
        ),
        (
            request(MessageKind::QueryBatchStatusRequest, 109).with(keys::BATCH, "b-missing"),
            MessageKind::QueryBatchStatusResponse,
            false,
        ),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_every_request_gets_exactly_one_swapped_reply() {
    let authority = authority_with_guests(&["i1", "i2"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::DeleteGuestRequest, Reply::ok());
    let harness = start(authority, transport);

    let cases = requests();
    for (request, _, _) in &cases {
        harness.run(request.clone()).await.unwrap();
    }

    for (request, response, success) in cases {
        let replies = harness.caller_replies(response);
        assert_eq!(replies.len(), 1, "{} replies", response);
        let reply = &replies[0];
        assert_eq!(reply.success, success, "{}: {}", response, reply.error);
        assert_eq!(reply.to_session, request.from_session);
        assert_eq!(reply.transaction_id, request.transaction_id);
        assert!(reply.from_session.is_bound());
        if !success {
            assert!(!reply.error.is_empty(), "{} without error text", response);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_malformed_requests_are_reported_as_invalid() {
    let authority = authority_with_guests(&["i2"]).await;
    let harness = start(authority, Arc::new(ScriptedTransport::new()));

    for (request, _, success) in requests() {
        if !success {
            harness.run(request).await.unwrap();
        }
    }

    let error = |kind: MessageKind| harness.caller_replies(kind)[0].error.clone();
    assert_eq!(
        error(MessageKind::CreateGuestResponse),
        "invalid request: missing field 'template'"
    );
    assert_eq!(
        error(MessageKind::StopInstanceResponse),
        "invalid request: empty field 'instance'"
    );
    assert_eq!(
        error(MessageKind::CreateDiskImageResponse),
        "invalid request: invalid image name '!'"
    );
    assert_eq!(
        error(MessageKind::ModifyStoragePathResponse),
        "invalid request: invalid cell name 'c1'"
    );
    assert_eq!(
        error(MessageKind::BatchStopGuestResponse),
        "invalid request: empty field 'items'"
    );
    assert_eq!(error(MessageKind::ResetSystemResponse), "disk image img-missing not found");
    assert_eq!(error(MessageKind::QueryBatchStatusResponse), "batch b-missing not found");
}
