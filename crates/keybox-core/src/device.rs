//! Trait seams for the device driver and the external device directory.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use keybox_proto::DeviceId;

/// Outcome of a forwarded device operation.
///
/// Device-level failures (signing failure, hardware fault) are data: they
/// travel back to the client inside the reply envelope, never as a transport
/// fault.
#[derive(Debug, Clone)]
pub struct DeviceResult {
    pub errcode: i32,
    pub errmessage: String,
    pub data: Value,
}

impl DeviceResult {
    /// Successful completion with a result payload.
    pub fn ok(data: Value) -> Self {
        Self {
            errcode: 0,
            errmessage: String::new(),
            data,
        }
    }

    /// Device-reported failure.
    pub fn err(errcode: i32, errmessage: impl Into<String>) -> Self {
        Self {
            errcode,
            errmessage: errmessage.into(),
            data: Value::Null,
        }
    }
}

/// Driver-side interface of one exclusive-access device.
///
/// `call` is the asynchronous operation seam: the dispatcher awaits it on a
/// spawned task, so a slow device never blocks call dispatch, and its
/// completion may land at any later time relative to the originating
/// session's lifetime.
#[async_trait]
pub trait Device: Send + Sync {
    /// Stable identifier the device advertises.
    fn device_id(&self) -> &DeviceId;

    /// Open the device for exclusive use. `false` means the driver refused.
    async fn connect(&self) -> bool;

    /// Close the device. Invoked on every binding teardown, including
    /// teardown triggered by session removal. `false` means the driver
    /// refused; the caller force-clears its own state regardless.
    async fn disconnect(&self) -> bool;

    /// Execute a forwarded operation and report its completion. The device
    /// is the sole authority on when (and whether) the operation completes.
    async fn call(&self, method: &str, params: Value) -> DeviceResult;
}

/// Enumeration and lookup interface of the external device registry.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Identifiers of all known devices, in registry order.
    async fn list(&self) -> Vec<DeviceId>;

    /// Resolve an identifier to a device handle.
    async fn lookup(&self, id: &DeviceId) -> Option<Arc<dyn Device>>;
}
