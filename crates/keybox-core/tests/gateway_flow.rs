//! End-to-end gateway flows through the dispatcher.
//!
//! These tests drive the dispatcher the way a transport would: session
//! lifecycle hooks plus serialized calls per session, with bridged replies
//! arriving from spawned tasks.

use serde_json::{json, Value};

use keybox_core::harness::{gateway_with_devices, wait_for_replies, wait_until};
use keybox_core::types::SessionId;
use keybox_proto::{ErrCode, RequestId};

/// S1 takes dev-1, S2 is refused while it is held, and wins after S1
/// releases it.
#[tokio::test]
async fn busy_device_becomes_available_after_disconnect() {
    let gw = gateway_with_devices(&["dev-1"]);
    let (s1, s2) = (SessionId::new(1), SessionId::new(2));
    gw.dispatcher.session_added(s1).await;
    gw.dispatcher.session_added(s2).await;

    gw.dispatcher
        .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    gw.dispatcher
        .call(s2, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    gw.dispatcher
        .call(s1, RequestId::from(2u64), "disconnectDevice", json!("dev-1"))
        .await;
    gw.dispatcher
        .call(s2, RequestId::from(2u64), "connectDevice", json!("dev-1"))
        .await;

    let replies = gw.sink.replies().await;
    assert_eq!(replies.len(), 4);

    assert!(replies[0].2.is_ok());
    assert_eq!(replies[0].2.errmessage, "connect ok");

    assert_eq!(replies[1].0, s2);
    assert_eq!(replies[1].2.errcode, ErrCode::DeviceBusy.code());
    assert_eq!(
        replies[1].2.errmessage,
        "device already used by another client"
    );

    assert!(replies[2].2.is_ok());
    assert_eq!(replies[2].2.errmessage, "disconnect ok");

    assert_eq!(replies[3].0, s2);
    assert!(replies[3].2.is_ok());
}

/// A completion that lands after its session has gone produces zero replies
/// and no fault.
#[tokio::test]
async fn late_completion_after_session_removal_is_dropped() {
    let gw = gateway_with_devices(&["dev-1"]);
    let device = gw.devices[0].clone();
    let s1 = SessionId::new(1);
    gw.dispatcher.session_added(s1).await;

    gw.dispatcher
        .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    wait_for_replies(&gw.sink, 1).await;

    device.set_hold_calls(true);
    gw.dispatcher
        .call(s1, RequestId::from(2u64), "signReq", json!({"digest": "00ff"}))
        .await;

    // The session leaves while the device still works on the call.
    gw.dispatcher.session_removed(s1).await;
    device.release_call();

    let stats = gw.dispatcher.stats().clone();
    wait_until(move || stats.snapshot().dropped_completions == 1).await;

    // Only the connect reply ever reached the transport.
    assert_eq!(gw.sink.count().await, 1);
    assert_eq!(device.disconnect_count(), 1);
}

/// Session teardown with an active binding frees the device for another
/// session immediately.
#[tokio::test]
async fn teardown_releases_binding_for_other_sessions() {
    let gw = gateway_with_devices(&["dev-1"]);
    let device = gw.devices[0].clone();
    let (s1, s2) = (SessionId::new(1), SessionId::new(2));
    gw.dispatcher.session_added(s1).await;
    gw.dispatcher.session_added(s2).await;

    gw.dispatcher
        .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    gw.dispatcher.session_removed(s1).await;

    assert_eq!(device.disconnect_count(), 1);

    gw.dispatcher
        .call(s2, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    let replies = gw.sink.replies().await;
    assert!(replies.last().expect("connect reply").2.is_ok());
    assert_eq!(device.connect_count(), 2);
}

/// A whole session conversation: version, enumeration, bind, forwarded
/// operation, unbind.
#[tokio::test]
async fn full_session_exchange() {
    let gw = gateway_with_devices(&["dev-1", "dev-2"]);
    let s1 = SessionId::new(1);
    gw.dispatcher.session_added(s1).await;

    gw.dispatcher
        .call(s1, RequestId::from(1u64), "getServerVersion", Value::Null)
        .await;
    gw.dispatcher
        .call(s1, RequestId::from(2u64), "getDeviceList", Value::Null)
        .await;
    gw.dispatcher
        .call(s1, RequestId::from(3u64), "connectDevice", json!("dev-2"))
        .await;
    gw.dispatcher
        .call(
            s1,
            RequestId::from(4u64),
            "getPublicKeyFromPath",
            json!({"path": "m/44'/0'/0'/0/0"}),
        )
        .await;
    wait_for_replies(&gw.sink, 4).await;
    gw.dispatcher
        .call(s1, RequestId::from(5u64), "disconnectDevice", json!("dev-2"))
        .await;
    wait_for_replies(&gw.sink, 5).await;

    let replies = gw.sink.replies().await;
    assert!(replies.iter().all(|(session, _, _)| *session == s1));

    let by_request = |n: u64| {
        replies
            .iter()
            .find(|(_, request, _)| *request == RequestId::from(n))
            .map(|(_, _, envelope)| envelope.clone())
            .expect("reply present")
    };

    assert!(by_request(1).data.get("version").is_some());
    assert_eq!(
        by_request(2).data,
        json!([{"deviceId": "dev-1"}, {"deviceId": "dev-2"}])
    );
    assert_eq!(by_request(3).errmessage, "connect ok");
    assert_eq!(
        by_request(4).data,
        json!({"echo": {
            "method": "getPublicKeyFromPath",
            "params": {"path": "m/44'/0'/0'/0/0"},
        }})
    );
    assert_eq!(by_request(5).errmessage, "disconnect ok");

    let stats = gw.dispatcher.stats().snapshot();
    assert_eq!(stats.received, 5);
    assert_eq!(stats.replied, 5);
    assert_eq!(stats.forwarded, 1);
}

/// Disconnecting a device the session does not hold changes nothing.
#[tokio::test]
async fn mismatched_disconnect_leaves_binding_intact() {
    let gw = gateway_with_devices(&["dev-1", "dev-2"]);
    let s1 = SessionId::new(1);
    gw.dispatcher.session_added(s1).await;

    gw.dispatcher
        .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-1"))
        .await;
    gw.dispatcher
        .call(s1, RequestId::from(2u64), "disconnectDevice", json!("dev-2"))
        .await;

    let replies = gw.sink.replies().await;
    assert_eq!(replies[1].2.errcode, ErrCode::ClientIssue.code());
    assert_eq!(replies[1].2.errmessage, "should connect first");

    // dev-1 is still held: a signReq goes through.
    gw.dispatcher
        .call(s1, RequestId::from(3u64), "signReq", json!({}))
        .await;
    wait_for_replies(&gw.sink, 3).await;
    assert!(gw.sink.replies().await[2].2.is_ok());
}
