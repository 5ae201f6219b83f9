//! Method dispatch for the keybox gateway.
//!
//! Routes an incoming call to server-info queries, device enumeration,
//! bind/unbind control calls, or forwarded device operations. Control calls
//! reply immediately; forwarded calls hand the operation to the bound device
//! on a spawned task and the reply arrives later through the bridge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use keybox_proto::{DeviceId, ErrCode, Method, ReplyEnvelope, RequestId};

use crate::arbiter::Arbiter;
use crate::bridge::ReplyBridge;
use crate::device::DeviceDirectory;
use crate::errors::BindError;
use crate::types::SessionId;

/// Version string answered by `getServerVersion`.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Reply Sink Trait
// ============================================================================

/// Outbound half of the transport: delivers one reply envelope to a session.
///
/// The transport is expected to drop replies addressed to sessions it no
/// longer knows; the dispatcher and bridge additionally refuse to produce a
/// reply once the session record is gone.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, session: SessionId, request: RequestId, envelope: ReplyEnvelope);
}

// ============================================================================
// Dispatch Statistics
// ============================================================================

/// Counters for dispatch activity.
#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Calls received from the transport.
    pub received: AtomicU64,
    /// Replies delivered to the sink (immediate and bridged).
    pub replied: AtomicU64,
    /// Calls forwarded to a bound device.
    pub forwarded: AtomicU64,
    /// Calls with an unrecognized method name.
    pub unknown_method: AtomicU64,
    /// Device completions discarded because the session was gone.
    pub dropped_completions: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current counters.
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            unknown_method: self.unknown_method.load(Ordering::Relaxed),
            dropped_completions: self.dropped_completions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_replied(&self) {
        self.replied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_unknown_method(&self) {
        self.unknown_method.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_dropped_completions(&self) {
        self.dropped_completions.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub replied: u64,
    pub forwarded: u64,
    pub unknown_method: u64,
    pub dropped_completions: u64,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes calls delivered by the transport and owns the arbitration state.
///
/// The transport delivers one session's calls serially; calls from different
/// sessions may arrive concurrently, which the arbiter's single lock
/// serializes where it matters.
pub struct Dispatcher {
    arbiter: Arc<Arbiter>,
    devices: Arc<dyn DeviceDirectory>,
    sink: Arc<dyn ReplySink>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    pub fn new(devices: Arc<dyn DeviceDirectory>, sink: Arc<dyn ReplySink>) -> Self {
        Self {
            arbiter: Arc::new(Arbiter::new()),
            devices,
            sink,
            stats: Arc::new(DispatchStats::new()),
        }
    }

    /// Shared arbitration state.
    pub fn arbiter(&self) -> &Arc<Arbiter> {
        &self.arbiter
    }

    /// Dispatch counters.
    pub fn stats(&self) -> &Arc<DispatchStats> {
        &self.stats
    }

    // -------------------------------------------------------------------------
    // Session Lifecycle Hooks
    // -------------------------------------------------------------------------

    /// Transport hook: a new client connection appeared.
    pub async fn session_added(&self, session: SessionId) {
        if let Err(e) = self.arbiter.add_session(session).await {
            error!(%session, error = %e, "transport announced a duplicate session");
        }
    }

    /// Transport hook: a client connection went away. Any held binding is
    /// released before this returns; in-flight forwarded calls are left to
    /// complete and their replies are dropped by the bridge.
    pub async fn session_removed(&self, session: SessionId) {
        if let Err(e) = self.arbiter.remove_session(session).await {
            debug!(%session, error = %e, "removal of unknown session ignored");
        }
    }

    // -------------------------------------------------------------------------
    // Call Dispatch
    // -------------------------------------------------------------------------

    /// Dispatch one incoming call.
    ///
    /// Every call produces exactly one reply: immediately for control
    /// methods, or later through the bridge for forwarded methods (unless
    /// the session disconnects first, in which case the completion is
    /// discarded).
    pub async fn call(
        &self,
        session: SessionId,
        request: RequestId,
        method_name: &str,
        params: Value,
    ) {
        self.stats.inc_received();

        if !self.arbiter.is_live(session).await {
            error!(%session, method = method_name, "call from unregistered session");
            return self
                .send(
                    session,
                    request,
                    ReplyEnvelope::err(ErrCode::ServerIssue, "internal error: no session state"),
                )
                .await;
        }

        let method = match Method::parse(method_name) {
            Some(method) => method,
            None => {
                self.stats.inc_unknown_method();
                warn!(%session, method = method_name, "unrecognized method");
                return self
                    .send(
                        session,
                        request,
                        ReplyEnvelope::err(
                            ErrCode::ClientIssue,
                            format!("no such method: {method_name}"),
                        ),
                    )
                    .await;
            }
        };

        match method {
            Method::GetServerVersion => {
                self.send(
                    session,
                    request,
                    ReplyEnvelope::ok(json!({"version": SERVER_VERSION})),
                )
                .await
            }
            Method::GetDeviceList => {
                let list: Vec<Value> = self
                    .devices
                    .list()
                    .await
                    .into_iter()
                    .map(|id| json!({"deviceId": id}))
                    .collect();
                self.send(session, request, ReplyEnvelope::ok(Value::Array(list)))
                    .await
            }
            Method::ConnectDevice => self.connect_device(session, request, &params).await,
            Method::DisconnectDevice => self.disconnect_device(session, request, &params).await,
            Method::Forwarded(forwarded) => {
                self.forward(session, request, forwarded.as_str(), params)
                    .await
            }
        }
    }

    async fn connect_device(&self, session: SessionId, request: RequestId, params: &Value) {
        let device_id = match device_id_param(params) {
            Some(id) => id,
            None => {
                return self
                    .send(
                        session,
                        request,
                        ReplyEnvelope::err(ErrCode::ClientIssue, "deviceId must be a string"),
                    )
                    .await;
            }
        };

        let device = match self.devices.lookup(&device_id).await {
            Some(device) => device,
            None => {
                let e = BindError::DeviceNotFound;
                return self
                    .send(session, request, ReplyEnvelope::err(e.errcode(), e.to_string()))
                    .await;
            }
        };

        match self.arbiter.bind(session, device).await {
            Ok(()) => {
                info!(%session, device = %device_id, "device connected");
                self.send(session, request, ReplyEnvelope::ok_with_message("connect ok"))
                    .await
            }
            Err(e) => {
                self.send(session, request, ReplyEnvelope::err(e.errcode(), e.to_string()))
                    .await
            }
        }
    }

    async fn disconnect_device(&self, session: SessionId, request: RequestId, params: &Value) {
        let device_id = match device_id_param(params) {
            Some(id) => id,
            None => {
                return self
                    .send(
                        session,
                        request,
                        ReplyEnvelope::err(ErrCode::ClientIssue, "deviceId must be a string"),
                    )
                    .await;
            }
        };

        // No directory lookup here: a name that resolves to nothing cannot
        // match the session's binding either, and the mismatch reply covers
        // both cases.
        match self.arbiter.unbind(session, &device_id).await {
            Ok(()) => {
                info!(%session, device = %device_id, "device disconnected");
                self.send(
                    session,
                    request,
                    ReplyEnvelope::ok_with_message("disconnect ok"),
                )
                .await
            }
            Err(e) => {
                self.send(session, request, ReplyEnvelope::err(e.errcode(), e.to_string()))
                    .await
            }
        }
    }

    async fn forward(
        &self,
        session: SessionId,
        request: RequestId,
        method: &'static str,
        params: Value,
    ) {
        let device = match self.arbiter.bound_device(session).await {
            Some(device) => device,
            None => {
                return self
                    .send(
                        session,
                        request,
                        ReplyEnvelope::err(ErrCode::ClientIssue, "you must connect dev first"),
                    )
                    .await;
            }
        };

        self.stats.inc_forwarded();
        debug!(%session, method, "forwarding call to bound device");

        let bridge = ReplyBridge::new(
            session,
            request,
            method,
            self.arbiter.clone(),
            self.sink.clone(),
            self.stats.clone(),
        );
        tokio::spawn(async move {
            let result = device.call(method, params).await;
            bridge.complete(result).await;
        });
    }

    async fn send(&self, session: SessionId, request: RequestId, envelope: ReplyEnvelope) {
        self.stats.inc_replied();
        self.sink.reply(session, request, envelope).await;
    }
}

/// The `deviceId` parameter is a bare JSON string, validated before any
/// registry lookup.
fn device_id_param(params: &Value) -> Option<DeviceId> {
    params.as_str().map(DeviceId::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{gateway_with_devices, wait_for_replies};

    #[tokio::test]
    async fn server_version_needs_no_session_state_beyond_liveness() {
        let gw = gateway_with_devices(&[]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "getServerVersion", Value::Null)
            .await;

        let replies = gw.sink.replies().await;
        assert_eq!(replies.len(), 1);
        let envelope = &replies[0].2;
        assert!(envelope.is_ok());
        assert_eq!(envelope.data, json!({"version": SERVER_VERSION}));
    }

    #[tokio::test]
    async fn empty_directory_yields_empty_array_not_error() {
        let gw = gateway_with_devices(&[]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "getDeviceList", Value::Null)
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert!(envelope.is_ok());
        assert_eq!(envelope.data, json!([]));
    }

    #[tokio::test]
    async fn device_list_preserves_registry_order() {
        let gw = gateway_with_devices(&["dev-b", "dev-a"]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "getDeviceList", Value::Null)
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(
            envelope.data,
            json!([{"deviceId": "dev-b"}, {"deviceId": "dev-a"}])
        );
    }

    #[tokio::test]
    async fn connect_to_unknown_device_is_a_client_issue() {
        let gw = gateway_with_devices(&["dev-1"]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-9"))
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(envelope.errcode, ErrCode::ClientIssue.code());
        assert_eq!(envelope.errmessage, "no such device");
    }

    #[tokio::test]
    async fn non_string_device_id_is_rejected_before_lookup() {
        let gw = gateway_with_devices(&["dev-1"]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "connectDevice", json!(42))
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(envelope.errcode, ErrCode::ClientIssue.code());
        assert_eq!(envelope.errmessage, "deviceId must be a string");
    }

    #[tokio::test]
    async fn forwarding_without_binding_names_the_precondition() {
        let gw = gateway_with_devices(&["dev-1"]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "signReq", json!({"path": "m/44'/0'/0'"}))
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(envelope.errcode, ErrCode::ClientIssue.code());
        assert_eq!(envelope.errmessage, "you must connect dev first");
    }

    #[tokio::test]
    async fn unknown_method_always_gets_a_reply() {
        let gw = gateway_with_devices(&[]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "launchMissiles", Value::Null)
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(envelope.errcode, ErrCode::ClientIssue.code());
        assert_eq!(envelope.errmessage, "no such method: launchMissiles");
        assert_eq!(gw.dispatcher.stats().snapshot().unknown_method, 1);
    }

    #[tokio::test]
    async fn call_from_unregistered_session_is_a_server_issue() {
        let gw = gateway_with_devices(&[]);

        gw.dispatcher
            .call(
                SessionId::new(99),
                RequestId::from(1u64),
                "getServerVersion",
                Value::Null,
            )
            .await;

        let envelope = gw.sink.replies().await[0].2.clone();
        assert_eq!(envelope.errcode, ErrCode::ServerIssue.code());
        assert_eq!(envelope.errmessage, "internal error: no session state");
    }

    #[tokio::test]
    async fn forwarded_call_replies_through_the_bridge() {
        let gw = gateway_with_devices(&["dev-1"]);
        let s1 = SessionId::new(1);
        gw.dispatcher.session_added(s1).await;

        gw.dispatcher
            .call(s1, RequestId::from(1u64), "connectDevice", json!("dev-1"))
            .await;
        gw.dispatcher
            .call(s1, RequestId::from(2u64), "multiplyReq", json!([6, 7]))
            .await;

        wait_for_replies(&gw.sink, 2).await;
        let replies = gw.sink.replies().await;
        let forwarded = &replies[1];
        assert_eq!(forwarded.1, RequestId::from(2u64));
        assert!(forwarded.2.is_ok());
        assert_eq!(
            forwarded.2.data,
            json!({"echo": {"method": "multiplyReq", "params": [6, 7]}})
        );
        assert_eq!(gw.dispatcher.stats().snapshot().forwarded, 1);
    }
}
