//! Session registry and device binding table.
//!
//! Both maps live behind a single lock: session teardown must clear the
//! binding and drop the session record as one atomic step, and the
//! busy-check-then-connect sequence of `bind` must not interleave with bind
//! attempts from other sessions on the same device. Driver connect and
//! disconnect calls happen under that lock so the occupancy map and the
//! driver's own connection state cannot drift apart.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use keybox_proto::DeviceId;

use crate::device::Device;
use crate::errors::{BindError, SessionError, UnbindError};
use crate::types::SessionId;

/// Per-session record. The binding is the only state a session carries.
struct SessionSlot {
    binding: Option<Binding>,
}

/// Session-side half of the session<->device relation; the occupancy map is
/// the device-side half. The device handle is kept here so teardown can
/// disconnect without consulting the directory again.
struct Binding {
    device_id: DeviceId,
    device: Arc<dyn Device>,
}

#[derive(Default)]
struct ArbiterInner {
    /// Live sessions and their current binding.
    sessions: HashMap<SessionId, SessionSlot>,
    /// Device occupancy: which session holds each bound device.
    occupants: HashMap<DeviceId, SessionId>,
}

/// The single synchronization point for session and binding state.
///
/// Owns the answer to "does this session still exist": the reply bridge
/// re-resolves session identity here when a device completion arrives.
#[derive(Default)]
pub struct Arbiter {
    inner: Mutex<ArbiterInner>,
}

impl Arbiter {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Session Lifecycle
    // -------------------------------------------------------------------------

    /// Register a new session with no bound device.
    ///
    /// A duplicate identity is a transport bug, reported as an error and
    /// left unregistered rather than clobbering the live record.
    pub async fn add_session(&self, session: SessionId) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if inner.sessions.contains_key(&session) {
            return Err(SessionError::Duplicate(session));
        }
        inner.sessions.insert(session, SessionSlot { binding: None });
        debug!(%session, "session registered");
        Ok(())
    }

    /// Remove a session, releasing any binding it holds first.
    ///
    /// The binding is cleared from both maps under the same lock acquisition
    /// that removes the session record. A driver that refuses to disconnect
    /// is logged and overridden: there is no client left to report to, and
    /// local state consistency wins over driver truthfulness. Removing an
    /// unknown session is a no-op observed as `NotFound`.
    pub async fn remove_session(&self, session: SessionId) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .sessions
            .remove(&session)
            .ok_or(SessionError::NotFound(session))?;
        if let Some(binding) = slot.binding {
            if !binding.device.disconnect().await {
                warn!(
                    %session,
                    device = %binding.device_id,
                    "driver refused disconnect during teardown; binding cleared anyway"
                );
            }
            inner.occupants.remove(&binding.device_id);
            debug!(%session, device = %binding.device_id, "binding released on teardown");
        }
        debug!(%session, "session removed");
        Ok(())
    }

    /// Whether the session is currently registered.
    pub async fn is_live(&self, session: SessionId) -> bool {
        self.inner.lock().await.sessions.contains_key(&session)
    }

    /// The device currently bound by the session, if any.
    pub async fn binding_of(&self, session: SessionId) -> Option<DeviceId> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(&session)
            .and_then(|slot| slot.binding.as_ref().map(|b| b.device_id.clone()))
    }

    /// Handle of the device currently bound by the session, if any.
    pub async fn bound_device(&self, session: SessionId) -> Option<Arc<dyn Device>> {
        let inner = self.inner.lock().await;
        inner
            .sessions
            .get(&session)
            .and_then(|slot| slot.binding.as_ref().map(|b| b.device.clone()))
    }

    // -------------------------------------------------------------------------
    // Binding
    // -------------------------------------------------------------------------

    /// Bind a session to a device.
    ///
    /// Fails with `AlreadyBound` if the session holds a device, `DeviceBusy`
    /// if another session occupies the target. Otherwise the driver connect
    /// runs under the arbitration lock; on refusal nothing is recorded and
    /// the failure is reported as `ConnectFailed`. Exactly one of two
    /// concurrent binds on a free device can reach the connect call.
    pub async fn bind(
        &self,
        session: SessionId,
        device: Arc<dyn Device>,
    ) -> Result<(), BindError> {
        let device_id = device.device_id().clone();
        let mut inner = self.inner.lock().await;
        let ArbiterInner {
            sessions,
            occupants,
        } = &mut *inner;

        let slot = sessions.get_mut(&session).ok_or(BindError::SessionGone)?;
        if slot.binding.is_some() {
            return Err(BindError::AlreadyBound);
        }
        if let Some(holder) = occupants.get(&device_id) {
            debug!(%session, device = %device_id, %holder, "bind refused, device occupied");
            return Err(BindError::DeviceBusy);
        }

        if !device.connect().await {
            return Err(BindError::ConnectFailed);
        }

        occupants.insert(device_id.clone(), session);
        debug!(%session, device = %device_id, "device bound");
        slot.binding = Some(Binding { device_id, device });
        Ok(())
    }

    /// Release a session's binding to the named device.
    ///
    /// The request must match the current binding exactly: a session bound
    /// to a different device (or to none) observes `NotBound` and no state
    /// changes. The driver disconnect always runs before the relation is
    /// cleared.
    pub async fn unbind(
        &self,
        session: SessionId,
        device_id: &DeviceId,
    ) -> Result<(), UnbindError> {
        let mut inner = self.inner.lock().await;
        let ArbiterInner {
            sessions,
            occupants,
        } = &mut *inner;

        let slot = sessions.get_mut(&session).ok_or(UnbindError::SessionGone)?;
        if !matches!(&slot.binding, Some(b) if b.device_id == *device_id) {
            return Err(UnbindError::NotBound);
        }

        if let Some(binding) = slot.binding.take() {
            if !binding.device.disconnect().await {
                warn!(
                    %session,
                    device = %binding.device_id,
                    "driver refused disconnect; binding cleared anyway"
                );
            }
            occupants.remove(&binding.device_id);
            debug!(%session, device = %binding.device_id, "device unbound");
        }
        Ok(())
    }

    /// Which session, if any, currently occupies the device.
    pub async fn occupant_of(&self, device_id: &DeviceId) -> Option<SessionId> {
        self.inner.lock().await.occupants.get(device_id).copied()
    }

    /// Check both directions of the session<->device relation against each
    /// other. Intended for tests and invariant fuzzing.
    pub async fn relation_is_consistent(&self) -> bool {
        let inner = self.inner.lock().await;
        let bound: Vec<(DeviceId, SessionId)> = inner
            .sessions
            .iter()
            .filter_map(|(session, slot)| {
                slot.binding
                    .as_ref()
                    .map(|b| (b.device_id.clone(), *session))
            })
            .collect();
        bound.len() == inner.occupants.len()
            && bound
                .iter()
                .all(|(device, session)| inner.occupants.get(device) == Some(session))
    }
}
