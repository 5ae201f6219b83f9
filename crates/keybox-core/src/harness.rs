//! Test harness: scriptable devices, a recording sink, and a pre-wired
//! gateway.
//!
//! These utilities are used by the unit tests and the integration tests; a
//! transport implementation can also use them to exercise its wiring before
//! real drivers exist.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Notify};

use keybox_proto::{DeviceId, ReplyEnvelope, RequestId};

use crate::device::{Device, DeviceDirectory, DeviceResult};
use crate::dispatch::{Dispatcher, ReplySink};
use crate::types::SessionId;

// ============================================================================
// Mock Device
// ============================================================================

/// Scriptable in-memory device.
///
/// Echoes forwarded calls back as `{"echo": {"method", "params"}}`, counts
/// connects and disconnects, and can be told to refuse either. It also
/// watches for overlapping connections: the arbitration layer must never let
/// two sessions hold the device at once, so a second connect before a
/// disconnect trips `overlap_seen`.
pub struct MockDevice {
    id: DeviceId,
    accept_connect: AtomicBool,
    refuse_disconnect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    active: AtomicUsize,
    overlap_seen: AtomicBool,
    /// When set, `call` parks until `release_call` is invoked. Supports one
    /// parked call at a time.
    hold_calls: AtomicBool,
    release: Notify,
}

impl MockDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: DeviceId::new(id),
            accept_connect: AtomicBool::new(true),
            refuse_disconnect: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            overlap_seen: AtomicBool::new(false),
            hold_calls: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    /// A device whose driver refuses every connect.
    pub fn refusing_connect(id: impl Into<String>) -> Self {
        let device = Self::new(id);
        device.accept_connect.store(false, Ordering::SeqCst);
        device
    }

    pub fn set_accept_connect(&self, accept: bool) {
        self.accept_connect.store(accept, Ordering::SeqCst);
    }

    pub fn set_refuse_disconnect(&self, refuse: bool) {
        self.refuse_disconnect.store(refuse, Ordering::SeqCst);
    }

    /// Park subsequent forwarded calls until [`release_call`] is invoked.
    ///
    /// [`release_call`]: MockDevice::release_call
    pub fn set_hold_calls(&self, hold: bool) {
        self.hold_calls.store(hold, Ordering::SeqCst);
    }

    /// Let one parked forwarded call complete.
    pub fn release_call(&self) {
        self.release.notify_one();
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Whether two connections ever overlapped on this device.
    pub fn overlap_seen(&self) -> bool {
        self.overlap_seen.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Device for MockDevice {
    fn device_id(&self) -> &DeviceId {
        &self.id
    }

    async fn connect(&self) -> bool {
        if !self.accept_connect.load(Ordering::SeqCst) {
            return false;
        }
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_seen.store(true, Ordering::SeqCst);
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) -> bool {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);
        !self.refuse_disconnect.load(Ordering::SeqCst)
    }

    async fn call(&self, method: &str, params: Value) -> DeviceResult {
        if self.hold_calls.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        DeviceResult::ok(json!({"echo": {"method": method, "params": params}}))
    }
}

// ============================================================================
// Static Directory
// ============================================================================

/// Fixed device directory preserving registration order.
#[derive(Default)]
pub struct StaticDirectory {
    devices: Vec<Arc<MockDevice>>,
}

impl StaticDirectory {
    pub fn new(devices: Vec<Arc<MockDevice>>) -> Self {
        Self { devices }
    }

    /// Directory of fresh mock devices with the given identifiers.
    pub fn with_ids(ids: &[&str]) -> Self {
        Self::new(ids.iter().map(|id| Arc::new(MockDevice::new(*id))).collect())
    }

    pub fn devices(&self) -> &[Arc<MockDevice>] {
        &self.devices
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn list(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|d| d.device_id().clone()).collect()
    }

    async fn lookup(&self, id: &DeviceId) -> Option<Arc<dyn Device>> {
        self.devices
            .iter()
            .find(|d| d.device_id() == id)
            .map(|d| d.clone() as Arc<dyn Device>)
    }
}

// ============================================================================
// Recording Sink
// ============================================================================

/// Reply sink that records every delivered envelope.
#[derive(Default)]
pub struct RecordingSink {
    replies: Mutex<Vec<(SessionId, RequestId, ReplyEnvelope)>>,
}

impl RecordingSink {
    /// All replies delivered so far, in delivery order.
    pub async fn replies(&self) -> Vec<(SessionId, RequestId, ReplyEnvelope)> {
        self.replies.lock().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn reply(&self, session: SessionId, request: RequestId, envelope: ReplyEnvelope) {
        self.replies.lock().await.push((session, request, envelope));
    }
}

// ============================================================================
// Pre-wired Gateway
// ============================================================================

/// Dispatcher wired to mock devices and a recording sink.
pub struct TestGateway {
    pub dispatcher: Dispatcher,
    pub sink: Arc<RecordingSink>,
    pub devices: Vec<Arc<MockDevice>>,
}

/// Build a gateway whose directory holds fresh mock devices with the given
/// identifiers.
pub fn gateway_with_devices(ids: &[&str]) -> TestGateway {
    let directory = StaticDirectory::with_ids(ids);
    let devices = directory.devices().to_vec();
    let sink = Arc::new(RecordingSink::default());
    let dispatcher = Dispatcher::new(Arc::new(directory), sink.clone());
    TestGateway {
        dispatcher,
        sink,
        devices,
    }
}

/// Wait until the sink holds at least `n` replies. Bridged replies arrive
/// from spawned tasks, so tests poll rather than assume ordering with the
/// dispatching call.
pub async fn wait_for_replies(sink: &RecordingSink, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if sink.count().await >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("timed out waiting for replies");
}

/// Wait until `condition` reports true.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if condition() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
