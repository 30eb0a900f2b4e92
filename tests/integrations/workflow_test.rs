//! Single-request workflows driven through a live orchestrator.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use stratus_core::domain::records::{CellStatus, InstanceId};
use stratus_core::{keys, AuthorityError, Envelope, MessageKind, ResourceAuthority};
use stratus_integration_tests::utils::{authority_with_guests, authority_with_running_guests, start};
use stratus_monitoring::LogExt;
use stratus_test_utils::fixtures::{self, cell, CALLER, IMAGE, IMAGE_SERVER, STORAGE_PATH};
use stratus_test_utils::{MockResourceAuthority, Reply, ScriptedTransport};

fn id(value: &str) -> InstanceId {
    InstanceId(value.to_string())
}

/// Position of the first send of `kind` to `destination`
fn position(transport: &ScriptedTransport, kind: MessageKind, destination: &str) -> Option<usize> {
    transport
        .sent()
        .iter()
        .position(|(to, envelope)| envelope.kind == kind && to.to_string() == destination)
}

fn disk_image_request() -> Envelope {
    Envelope::request(MessageKind::CreateDiskImageRequest, CALLER)
        .with(keys::NAME, "snap-1")
        .with(keys::INSTANCE, "i1")
        .with(keys::DESCRIPTION, "nightly")
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_image() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::CreateDiskImageRequest, Reply::with(keys::IMAGE, "img-new"));
    transport.respond(MessageKind::UploadDiskImageRequest, Reply::ok());
    let harness = start(authority, transport.clone());

    harness.run(disk_image_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::CreateDiskImageResponse).await.unwrap();
    assert!(reply.success, "{}", reply.error);
    assert_eq!(reply.string(keys::IMAGE).unwrap(), "img-new");
    assert_eq!(reply.string(keys::IMAGE_SERVER).unwrap(), IMAGE_SERVER);

    let created = transport.sent_of(MessageKind::CreateDiskImageRequest);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0.to_string(), IMAGE_SERVER);
    assert_eq!(created[0].1.uint(keys::SIZE).unwrap(), 20);

    let upload = transport.sent_of(MessageKind::UploadDiskImageRequest);
    assert_eq!(upload[0].0.to_string(), "default.c1");
    assert_eq!(upload[0].1.string(keys::IMAGE).unwrap(), "img-new");
    assert!(transport.sent_of(MessageKind::DeleteDiskImageRequest).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_image_upload_failure_deletes_image() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::CreateDiskImageRequest, Reply::with(keys::IMAGE, "img-new"));
    transport.respond(MessageKind::UploadDiskImageRequest, Reply::fail("disk read error"));
    transport.respond(MessageKind::DeleteDiskImageRequest, Reply::ok());
    let harness = start(authority, transport.clone());

    harness.run(disk_image_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::CreateDiskImageResponse).await.unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error, "disk read error");

    let deleted = transport.sent_of(MessageKind::DeleteDiskImageRequest);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].0.to_string(), IMAGE_SERVER);
    assert_eq!(deleted[0].1.string(keys::IMAGE).unwrap(), "img-new");

    // The image is gone before the caller hears about the failure
    let delete_at =
        position(&transport, MessageKind::DeleteDiskImageRequest, IMAGE_SERVER).unwrap();
    let reply_at = position(&transport, MessageKind::CreateDiskImageResponse, CALLER).unwrap();
    assert!(delete_at < reply_at);
}

#[tokio::test(start_paused = true)]
async fn test_late_upload_reply_does_not_abort_image_delete() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::CreateDiskImageRequest, Reply::with(keys::IMAGE, "img-new"));
    // Upload answers at 6s, one second after the 5s operate timeout,
    // while the delete issued at 5s is acknowledged at 7s.
    transport.respond(
        MessageKind::UploadDiskImageRequest,
        Reply::ok().after(Duration::from_secs(6)),
    );
    transport.respond(
        MessageKind::DeleteDiskImageRequest,
        Reply::ok().after(Duration::from_secs(2)),
    );
    let harness = start(authority, transport.clone());

    let started = Instant::now();
    harness.run(disk_image_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::CreateDiskImageResponse).await.unwrap();
    assert_eq!(reply.error, "timeout");

    // The caller is answered only once the delete was acknowledged
    assert!(started.elapsed() >= Duration::from_secs(7), "{:?}", started.elapsed());

    let upload = transport.sent_of(MessageKind::UploadDiskImageRequest);
    let deleted = transport.sent_of(MessageKind::DeleteDiskImageRequest);
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].1.string(keys::IMAGE).unwrap(), "img-new");
    assert_ne!(deleted[0].1.transaction_id, upload[0].1.transaction_id);
}

#[tokio::test(start_paused = true)]
async fn test_create_disk_image_of_running_guest_is_refused() {
    let authority = authority_with_running_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority, transport.clone());

    harness.run(disk_image_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::CreateDiskImageResponse).await.unwrap();
    assert_eq!(reply.error, "invalid state: instance i1 is running");
    assert!(transport.sent_of(MessageKind::CreateDiskImageRequest).is_empty());
}

fn reset_request() -> Envelope {
    Envelope::request(MessageKind::ResetSystemRequest, CALLER)
        .with(keys::INSTANCE, "i1")
        .with(keys::IMAGE, IMAGE)
}

#[tokio::test(start_paused = true)]
async fn test_reset_system() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::ResetSystemRequest, Reply::ok());
    let harness = start(authority.clone(), transport.clone());

    harness.run(reset_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::ResetSystemResponse).await.unwrap();
    assert!(reply.success, "{}", reply.error);
    assert_eq!(reply.string(keys::INSTANCE).unwrap(), "i1");

    let forwarded = transport.sent_of(MessageKind::ResetSystemRequest);
    assert_eq!(forwarded[0].0.to_string(), "default.c1");
    assert_eq!(forwarded[0].1.string(keys::IMAGE_SERVER).unwrap(), IMAGE_SERVER);
    assert!(!authority.instance(&id("i1")).await.unwrap().resetting);
}

#[tokio::test(start_paused = true)]
async fn test_reset_system_failure_leaves_flag_set() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::ResetSystemRequest, Reply::fail("image fetch failed"));
    let harness = start(authority.clone(), transport);

    harness.run(reset_request()).await.unwrap();

    let reply = harness.caller_reply(MessageKind::ResetSystemResponse).await.unwrap();
    assert_eq!(reply.error, "image fetch failed");
    assert!(authority.instance(&id("i1")).await.unwrap().resetting);

    // A second reset is refused while the flag is set
    harness.run(reset_request()).await.unwrap();
    let replies = harness.caller_replies(MessageKind::ResetSystemResponse);
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[1].error, "invalid state: instance i1 is already resetting");
}

fn storage_path_request(path: &str) -> Envelope {
    Envelope::request(MessageKind::ModifyStoragePathRequest, CALLER)
        .with(keys::CELL, "default.c1")
        .with(keys::PATH, path)
}

#[tokio::test(start_paused = true)]
async fn test_change_storage_path() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::ModifyStoragePathRequest, Reply::ok());
    let harness = start(authority.clone(), transport.clone());

    harness.run(storage_path_request("/data/guests")).await.unwrap();

    let reply = harness.caller_reply(MessageKind::ModifyStoragePathResponse).await.unwrap();
    assert!(reply.success, "{}", reply.error);
    assert_eq!(reply.string(keys::PATH).unwrap(), "/data/guests");

    let status = authority.get_cell_status(&cell("c1")).await.unwrap();
    assert_eq!(status.storage_path, "/data/guests");
}

#[tokio::test(start_paused = true)]
async fn test_change_storage_path_unchanged_skips_cell() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority, transport.clone());

    harness.run(storage_path_request(STORAGE_PATH)).await.unwrap();

    let reply = harness.caller_reply(MessageKind::ModifyStoragePathResponse).await.unwrap();
    assert!(reply.success);
    assert!(transport.sent_of(MessageKind::ModifyStoragePathRequest).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_change_storage_path_rejected_by_cell() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::ModifyStoragePathRequest, Reply::fail("path not mounted"));
    let harness = start(authority.clone(), transport);

    harness.run(storage_path_request("/mnt/missing")).await.unwrap();

    let reply = harness.caller_reply(MessageKind::ModifyStoragePathResponse).await.unwrap();
    assert_eq!(reply.error, "path not mounted");
    let status = authority.get_cell_status(&cell("c1")).await.unwrap();
    assert_eq!(status.storage_path, STORAGE_PATH);
}

#[tokio::test(start_paused = true)]
async fn test_change_storage_path_restores_cell_when_record_fails() {
    let mut authority = MockResourceAuthority::new();
    authority.expect_get_cell_status().returning(|name| {
        Ok(CellStatus {
            name: name.clone(),
            alive: true,
            storage_path: "/old".to_string(),
        })
    });
    authority
        .expect_update_cell_storage_path()
        .returning(|_, _| Err(AuthorityError::Other("record store full".to_string())));

    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::ModifyStoragePathRequest, Reply::ok());
    let harness = start(Arc::new(authority), transport.clone());

    harness.run(storage_path_request("/new")).await.unwrap();

    let paths: Vec<String> = transport
        .sent_of(MessageKind::ModifyStoragePathRequest)
        .iter()
        .map(|(_, envelope)| envelope.string(keys::PATH).unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["/new".to_string(), "/old".to_string()]);

    let reply = harness.caller_reply(MessageKind::ModifyStoragePathResponse).await.unwrap();
    assert_eq!(reply.error, "record store full");
}

#[tokio::test(start_paused = true)]
async fn test_stop_guest() {
    let authority = authority_with_running_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::StopInstanceRequest, Reply::ok());
    let harness = start(authority.clone(), transport);

    let request =
        Envelope::request(MessageKind::StopInstanceRequest, CALLER).with(keys::INSTANCE, "i1");
    harness.run(request.clone()).await.log_err("stop guest").unwrap();
    assert!(!authority.instance(&id("i1")).await.unwrap().running);

    harness.run(request).await.unwrap();
    let replies = harness.caller_replies(MessageKind::StopInstanceResponse);
    assert_eq!(replies.len(), 2);
    assert!(replies[0].success);
    assert_eq!(replies[1].error, "invalid state: instance already stopped");
}

#[tokio::test(start_paused = true)]
async fn test_delete_guest_keeps_record_when_cell_refuses() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::DeleteGuestRequest, Reply::fail("volume busy"));
    let harness = start(authority.clone(), transport);

    let request =
        Envelope::request(MessageKind::DeleteGuestRequest, CALLER).with(keys::INSTANCE, "i1");
    harness.run(request).await.unwrap();

    let reply = harness.caller_reply(MessageKind::DeleteGuestResponse).await.unwrap();
    assert_eq!(reply.error, "volume busy");
    assert!(authority.instance(&id("i1")).await.is_some());
}

fn disconnect(graceful: bool) -> Envelope {
    Envelope::request(MessageKind::CellDisconnectedEvent, "default.c1")
        .with(keys::CELL, "default.c1")
        .with(keys::GRACEFUL, graceful)
}

#[tokio::test(start_paused = true)]
async fn test_ungraceful_disconnect_attaches_on_survivor() {
    let authority = authority_with_guests(&["i1", "i2"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority, transport.clone());

    harness.run(disconnect(false)).await.unwrap();

    let attach = transport.sent_of(MessageKind::AttachInstanceRequest);
    assert_eq!(attach.len(), 1);
    assert_eq!(attach[0].0.to_string(), "default.c2");
    assert!(attach[0].1.bool(keys::IMMEDIATE).unwrap());
    assert_eq!(attach[0].1.string(keys::SOURCE_CELL).unwrap(), "default.c1");
    assert_eq!(
        attach[0].1.strings(keys::INSTANCES).unwrap(),
        &["i1".to_string(), "i2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_graceful_disconnect_does_nothing() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority.clone(), transport.clone());

    harness.run(disconnect(true)).await.unwrap();

    assert!(transport.sent().is_empty());
    assert!(authority.get_cell_status(&cell("c1")).await.unwrap().alive);
}

#[tokio::test(start_paused = true)]
async fn test_guest_power_events() {
    let authority = authority_with_guests(&["i1"]).await;
    let transport = Arc::new(ScriptedTransport::new());
    let harness = start(authority.clone(), transport.clone());

    let started =
        Envelope::request(MessageKind::GuestStartedEvent, "default.c1").with(keys::INSTANCE, "i1");
    harness.run(started).await.unwrap();
    assert!(authority.instance(&id("i1")).await.unwrap().running);

    let stopped =
        Envelope::request(MessageKind::GuestStoppedEvent, "default.c1").with(keys::INSTANCE, "i1");
    harness.run(stopped).await.unwrap();
    assert!(!authority.instance(&id("i1")).await.unwrap().running);

    // Events are never answered
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_create_guest_against_seeded_authority() {
    let authority = authority_with_guests(&[]).await;
    let transport = Arc::new(ScriptedTransport::new());
    transport.respond(MessageKind::CreateGuestRequest, Reply::ok());
    let harness = start(authority.clone(), transport.clone());

    let request = fixtures::create_guest_request("web-1").with(keys::SECURITY_POLICY, "sp-default");
    harness.run(request).await.unwrap();

    let reply = harness.caller_reply(MessageKind::CreateGuestResponse).await.unwrap();
    assert!(reply.success, "{}", reply.error);
    let created = id(reply.string(keys::INSTANCE).unwrap());
    let record = authority.instance(&created).await.unwrap();
    assert_eq!(record.name, "web-1");

    let forwarded = &transport.sent_of(MessageKind::CreateGuestRequest)[0].1;
    assert_eq!(forwarded.string(keys::OPERATING_SYSTEM).unwrap(), "linux");
    assert_eq!(forwarded.string(keys::MONITOR_SECRET).unwrap(), record.monitor_secret);
}
