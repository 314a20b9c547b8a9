//! Scénarios de bout en bout : batch hub → dispatch → requêtes Memfault.

use bridge_devkit::batch_builders::twin_body;
use bridge_devkit::{BatchBuilder, Responses, TestHarness};
use bridge_kernel::api_client::Method;
use bridge_kernel::dispatch::DispatchError;
use bridge_kernel::models::{MEMFAULT_PROPERTY, MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION};
use bridge_kernel::{DispatchOutcome, InboundMessage, Payload, Properties};
use serde_json::json;

#[tokio::test]
async fn test_every_non_empty_chunk_forwarded_once() {
    let mut harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .chunk("dev-1", b"chunk-a")
        .chunk("dev-1", b"")
        .chunk("dev-1", b"chunk-b")
        .chunk("dev-1", b"")
        .build();

    let outcome = harness.dispatch(&batch).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Chunks { forwarded: 2, skipped_empty: 2, rejected: 0 });

    harness.expect_requests(Method::POST, &TestHarness::chunks_path("dev-1"), 2);
    harness.verify_expectations().unwrap();

    let mut bodies: Vec<Vec<u8>> = harness
        .sent()
        .into_iter()
        .filter_map(|r| r.body.map(|p| p.as_bytes().to_vec()))
        .collect();
    bodies.sort();
    assert_eq!(bodies, vec![b"chunk-a".to_vec(), b"chunk-b".to_vec()]);
    for request in harness.sent() {
        assert_eq!(request.header_value("Memfault-Project-Key"), Some("test-project-key"));
        assert_eq!(request.header_value("Content-Type"), Some("application/octet-stream"));
    }
}

#[tokio::test]
async fn test_rejected_chunk_does_not_cancel_others() {
    let harness = TestHarness::new().unwrap();
    let path = TestHarness::chunks_path("dev-1");
    harness.backend.respond(Method::POST, &path, Responses::status(500));

    let batch = BatchBuilder::new().chunk("dev-1", b"a").chunk("dev-1", b"b").build();
    let outcome = harness.dispatch(&batch).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::Chunks { forwarded: 1, skipped_empty: 0, rejected: 1 });
    assert_eq!(harness.backend.count(Method::POST, &path), 2);
    assert_eq!(harness.health().chunks_rejected, 1);
}

#[tokio::test]
async fn test_chunk_transport_error_surfaces_after_all_forwards() {
    let harness = TestHarness::new().unwrap();
    let path = TestHarness::chunks_path("dev-1");
    harness.backend.fail(Method::POST, &path, "connection reset");

    let batch = BatchBuilder::new().chunk("dev-1", b"a").chunk("dev-1", b"b").build();
    let err = harness.dispatch(&batch).await.unwrap_err();

    assert!(err.downcast_ref::<DispatchError>().is_some());
    assert_eq!(harness.backend.count(Method::POST, &path), 2);
    assert_eq!(harness.health().failures, 1);
}

#[tokio::test]
async fn test_twin_and_chunk_routes_never_cross() {
    let harness = TestHarness::new().unwrap();

    harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(Some("Kitchen"), None)).build())
        .await
        .unwrap();
    assert_eq!(harness.backend.count(Method::POST, &TestHarness::chunks_path("dev-1")), 0);
    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-1")), 1);

    // seul le premier message pilote le routage
    let mixed = BatchBuilder::new()
        .chunk("dev-2", b"chunk")
        .twin("dev-2", &twin_body(Some("Sink"), None))
        .build();
    let outcome = harness.dispatch(&mixed).await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Chunks { .. }));
    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-2")), 0);

    // memfault + schema twin sur le même message : les chunks gagnent
    let both = BatchBuilder::new()
        .message(InboundMessage {
            body: b"chunk".to_vec(),
            properties: Properties::new()
                .with(MEMFAULT_PROPERTY, "")
                .with(MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION),
            system_properties: bridge_devkit::batch_builders::system_properties("dev-3"),
        })
        .build();
    harness.dispatch(&both).await.unwrap();
    assert_eq!(harness.backend.count(Method::POST, &TestHarness::chunks_path("dev-3")), 1);
    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-3")), 0);
}

#[tokio::test]
async fn test_unroutable_batch_is_dropped() {
    let harness = TestHarness::new().unwrap();
    let outcome = harness
        .dispatch(&BatchBuilder::new().telemetry("dev-1", b"{\"t\":21}").build())
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Unroutable);
    assert!(harness.sent().is_empty());
    assert_eq!(harness.health().dropped, 1);
}

#[tokio::test]
async fn test_twin_without_relevant_fields_makes_no_call() {
    let harness = TestHarness::new().unwrap();
    let bodies = [
        twin_body(None, None),
        json!({ "tags": {}, "properties": { "reported": { "dev": {} } } }),
        json!({ "tags": { "location": "lab" }, "properties": { "desired": { "x": 1 } } }),
    ];
    for body in &bodies {
        let outcome = harness.dispatch(&BatchBuilder::new().twin("dev-1", body).build()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NothingToUpdate);
    }
    assert!(harness.sent().is_empty());
}

#[tokio::test]
async fn test_partial_patch_contains_only_nickname() {
    let harness = TestHarness::new().unwrap();
    harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(Some("X"), None)).build())
        .await
        .unwrap();

    harness
        .assert_raw_body(Method::PATCH, &TestHarness::device_path("dev-1"), r#"{"nickname":"X"}"#)
        .unwrap();
}

#[tokio::test]
async fn test_unknown_hardware_version_is_provisioned_then_retried() {
    let mut harness = TestHarness::new().unwrap();
    let device_path = TestHarness::device_path("dev-1");
    harness
        .backend
        .respond(Method::PATCH, &device_path, Responses::unknown_hardware_version("v2"))
        .respond(Method::PATCH, &device_path, Responses::status(200))
        .respond(
            Method::GET,
            &TestHarness::software_types_path(),
            Responses::software_types(&["asset_tracker_v2", "bootloader"]),
        )
        .respond(Method::POST, &TestHarness::hardware_versions_path(), Responses::status(201));

    let outcome = harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(None, Some("v2"))).build())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::HardwareVersionProvisioned { hardware_version: "v2".into() }
    );

    let order: Vec<(Method, String)> = harness
        .sent()
        .into_iter()
        .map(|r| (r.method, r.path.split('?').next().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            (Method::PATCH, device_path.clone()),
            (Method::GET, TestHarness::software_types_path()),
            (Method::POST, TestHarness::hardware_versions_path()),
            (Method::PATCH, device_path.clone()),
        ]
    );

    assert_eq!(
        harness.last_json_body(Method::POST, &TestHarness::hardware_versions_path()).unwrap(),
        Some(json!({ "name": "v2", "primary_software_type": "asset_tracker_v2" }))
    );
    let patches = harness.backend.requests_to(Method::PATCH, &device_path);
    assert_eq!(patches[0].body, patches[1].body);
    assert_eq!(patches[1].body, Some(Payload::Text(r#"{"hardware_version":"v2"}"#.into())));

    harness.expect_requests(Method::GET, &TestHarness::software_types_path(), 1);
    harness.verify_expectations().unwrap();
    assert_eq!(harness.backend.pending_replies(), 0);
    assert_eq!(harness.health().hardware_versions_provisioned, 1);
}

#[tokio::test]
async fn test_other_error_codes_skip_provisioning() {
    let harness = TestHarness::new().unwrap();
    let device_path = TestHarness::device_path("dev-1");
    harness.backend.respond(
        Method::PATCH,
        &device_path,
        Responses::error(422, 1004, "HardwareVersion with name `v2` not found"),
    );

    let outcome = harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(Some("Kitchen"), Some("v2"))).build())
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::UpdateRejected { status: 422 });
    assert_eq!(harness.sent().len(), 1);
    assert_eq!(harness.backend.count(Method::GET, &TestHarness::software_types_path()), 0);
    assert_eq!(harness.backend.count(Method::POST, &TestHarness::hardware_versions_path()), 0);
}

#[tokio::test]
async fn test_unknown_hardware_version_without_hardware_version_in_patch() {
    let harness = TestHarness::new().unwrap();
    let device_path = TestHarness::device_path("dev-1");
    harness
        .backend
        .respond(Method::PATCH, &device_path, Responses::unknown_hardware_version("v2"));

    let outcome = harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(Some("Kitchen"), None)).build())
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::UpdateRejected { status: 422 });
    assert_eq!(harness.sent().len(), 1);
}

#[tokio::test]
async fn test_empty_software_type_listing_fails_recovery() {
    let harness = TestHarness::new().unwrap();
    let device_path = TestHarness::device_path("dev-1");
    harness
        .backend
        .respond(Method::PATCH, &device_path, Responses::unknown_hardware_version("v2"))
        .respond(Method::GET, &TestHarness::software_types_path(), Responses::software_types(&[]));

    let err = harness
        .dispatch(&BatchBuilder::new().twin("dev-1", &twin_body(None, Some("v2"))).build())
        .await
        .unwrap_err();

    assert!(matches!(err.downcast_ref::<DispatchError>(), Some(DispatchError::Provision(_))));
    assert_eq!(harness.backend.count(Method::POST, &TestHarness::hardware_versions_path()), 0);
    assert_eq!(harness.backend.count(Method::PATCH, &device_path), 1);
}

#[tokio::test]
async fn test_same_batch_twice_yields_identical_calls() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .twin("dev-1", &twin_body(Some("Kitchen"), Some("evt2")))
        .build();

    let first = harness.dispatch(&batch).await.unwrap();
    let after_first = harness.sent();
    let second = harness.dispatch(&batch).await.unwrap();
    let all = harness.sent();

    assert_eq!(first, second);
    assert_eq!(all.len(), after_first.len() * 2);
    for (a, b) in after_first.iter().zip(&all[after_first.len()..]) {
        assert_eq!(a.method, b.method);
        assert_eq!(a.path, b.path);
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.body, b.body);
    }
    assert_eq!(harness.health().batches_handled, 2);
}

#[tokio::test]
async fn test_kitchen_twin_end_to_end() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .message(InboundMessage {
            body: br#"{"tags":{"name":"Kitchen"},"properties":{"reported":{"dev":{"v":{"brdV":"evt2"}}}}}"#.to_vec(),
            properties: Properties::new().with(MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION),
            system_properties: Properties::new().with("iothub-connection-device-id", "dev-1"),
        })
        .build();

    let outcome = harness.dispatch(&batch).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::DeviceUpdated);

    let sent = harness.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, Method::PATCH);
    assert!(sent[0].path.ends_with("/devices/dev-1"));
    harness
        .assert_raw_body(
            Method::PATCH,
            &TestHarness::device_path("dev-1"),
            r#"{"nickname":"Kitchen","hardware_version":"evt2"}"#,
        )
        .unwrap();
    assert_eq!(sent[0].header_value("Authorization"), Some("Basic OnRlc3QtdG9rZW4="));
}

#[tokio::test]
async fn test_binding_device_id_wins_over_connection_id() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .twin_with_binding_id("dev-binding", Some("dev-conn"), &twin_body(Some("Sink"), None))
        .build();
    harness.dispatch(&batch).await.unwrap();

    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-binding")), 1);
    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-conn")), 0);
}

#[tokio::test]
async fn test_twin_without_device_id_makes_no_call() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .message(InboundMessage {
            body: twin_body(Some("Sink"), None).to_string().into_bytes(),
            properties: Properties::new().with(MESSAGE_SCHEMA_PROPERTY, TWIN_CHANGE_NOTIFICATION),
            system_properties: Properties::new(),
        })
        .build();

    assert_eq!(harness.dispatch(&batch).await.unwrap(), DispatchOutcome::MissingDeviceId);
    assert!(harness.sent().is_empty());
}

#[tokio::test]
async fn test_chunk_batch_without_device_id_makes_no_call() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .message(InboundMessage {
            body: b"chunk".to_vec(),
            properties: Properties::new().with(MEMFAULT_PROPERTY, ""),
            system_properties: Properties::new(),
        })
        .build();

    assert_eq!(harness.dispatch(&batch).await.unwrap(), DispatchOutcome::MissingDeviceId);
    assert!(harness.sent().is_empty());
}

#[tokio::test]
async fn test_unknown_hardware_version_without_content_length_skips_provisioning() {
    let harness = TestHarness::new().unwrap();
    let device_path = TestHarness::device_path("dev-1");
    let error = json!({ "error": { "code": 1003, "message": "HardwareVersion with name `v2` not found" } });
    harness
        .backend
        .respond(Method::PATCH, &device_path, Responses::json_without_length(422, &error));
    let mut zero_length = Responses::json(422, &error);
    zero_length.headers.insert("content-length".into(), "0".into());
    harness.backend.respond(Method::PATCH, &device_path, zero_length);

    let batch = BatchBuilder::new().twin("dev-1", &twin_body(None, Some("v2"))).build();
    for _ in 0..2 {
        assert_eq!(
            harness.dispatch(&batch).await.unwrap(),
            DispatchOutcome::UpdateRejected { status: 422 }
        );
    }

    assert_eq!(harness.sent().len(), 2);
    assert_eq!(harness.backend.count(Method::GET, &TestHarness::software_types_path()), 0);
    assert_eq!(harness.backend.count(Method::POST, &TestHarness::hardware_versions_path()), 0);
}

#[tokio::test]
async fn test_reserved_characters_in_device_id_stay_in_path() {
    let harness = TestHarness::new().unwrap();
    harness
        .dispatch(&BatchBuilder::new().chunk("dev#1", b"a").chunk("dev#1", b"b").build())
        .await
        .unwrap();
    harness
        .dispatch(&BatchBuilder::new().twin("dev?x=1", &twin_body(Some("Sink"), None)).build())
        .await
        .unwrap();

    assert_eq!(harness.backend.count(Method::POST, "/api/v0/chunks/dev%231"), 2);
    assert_eq!(
        harness.backend.count(Method::PATCH, &TestHarness::device_path("dev%3Fx%3D1")),
        1
    );
    assert!(harness.sent().iter().all(|r| !r.path.contains('#') && !r.path.contains('?')));
}

#[tokio::test]
async fn test_mistyped_board_version_keeps_nickname_update() {
    let harness = TestHarness::new().unwrap();
    let body = json!({
        "tags": { "name": "Kitchen" },
        "properties": { "reported": { "dev": { "v": { "brdV": 2 } } } }
    });

    let outcome = harness.dispatch(&BatchBuilder::new().twin("dev-1", &body).build()).await.unwrap();

    assert_eq!(outcome, DispatchOutcome::DeviceUpdated);
    harness
        .assert_raw_body(Method::PATCH, &TestHarness::device_path("dev-1"), r#"{"nickname":"Kitchen"}"#)
        .unwrap();
}

#[tokio::test]
async fn test_empty_binding_device_id_falls_back_to_connection_id() {
    let harness = TestHarness::new().unwrap();
    let batch = BatchBuilder::new()
        .twin_with_binding_id("", Some("dev-1"), &twin_body(Some("Sink"), None))
        .build();

    assert_eq!(harness.dispatch(&batch).await.unwrap(), DispatchOutcome::DeviceUpdated);
    assert_eq!(harness.backend.count(Method::PATCH, &TestHarness::device_path("dev-1")), 1);
}
