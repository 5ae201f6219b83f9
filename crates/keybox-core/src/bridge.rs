//! Routes a device completion back to its originating session.

use std::sync::Arc;

use tracing::debug;

use keybox_proto::{ReplyEnvelope, RequestId};

use crate::arbiter::Arbiter;
use crate::device::DeviceResult;
use crate::dispatch::{DispatchStats, ReplySink};
use crate::types::SessionId;

/// Captures the minimal state needed to deliver one forwarded call's result.
///
/// The bridge holds the session *identity* plus the shared arbiter, never a
/// session record: liveness is re-resolved when the completion arrives, so a
/// completion that lands after disconnection resolves to nothing instead of
/// a dangling reference. Device completions may arrive on any task at any
/// later time.
pub struct ReplyBridge {
    session: SessionId,
    request: RequestId,
    method: &'static str,
    arbiter: Arc<Arbiter>,
    sink: Arc<dyn ReplySink>,
    stats: Arc<DispatchStats>,
}

impl ReplyBridge {
    pub fn new(
        session: SessionId,
        request: RequestId,
        method: &'static str,
        arbiter: Arc<Arbiter>,
        sink: Arc<dyn ReplySink>,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            session,
            request,
            method,
            arbiter,
            sink,
            stats,
        }
    }

    /// Deliver the completion to the originating session, or discard it
    /// silently if the session no longer exists. Consuming `self` makes a
    /// second delivery unrepresentable.
    ///
    /// A device-reported error is still a delivery: the code and message
    /// travel inside the envelope.
    pub async fn complete(self, result: DeviceResult) {
        if !self.arbiter.is_live(self.session).await {
            self.stats.inc_dropped_completions();
            debug!(
                session = %self.session,
                method = self.method,
                "dropping completion for departed session"
            );
            return;
        }

        let envelope = ReplyEnvelope::from_device(result.errcode, result.errmessage, result.data);
        self.stats.inc_replied();
        self.sink.reply(self.session, self.request, envelope).await;
    }
}
