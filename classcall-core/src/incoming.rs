//! Incoming-call notification
//!
//! The notifier is a thin view over the pending offer plus the two actions
//! a user can take on it. Ringing is driven by the call manager and lasts
//! exactly as long as the pending record.

use crate::call::{CallError, CallManager};
use crate::identity::ParticipantId;
use crate::session::PendingIncomingCall;
use crate::types::CallId;
use std::sync::Arc;
use tokio::sync::watch;

/// Ringing indication
pub trait Ringer: Send + Sync {
    /// An offer became pending
    fn start_ringing(&self, caller: &ParticipantId);

    /// The pending offer was cleared
    fn stop_ringing(&self);
}

/// Ringer that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRinger;

impl Ringer for TracingRinger {
    fn start_ringing(&self, caller: &ParticipantId) {
        tracing::info!(caller = %caller, "Ringing");
    }

    fn stop_ringing(&self) {
        tracing::info!("Ringing stopped");
    }
}

/// Pending offer plus accept/decline
#[derive(Clone)]
pub struct IncomingCallNotifier {
    manager: Arc<CallManager>,
}

impl IncomingCallNotifier {
    /// Notifier for `manager`
    #[must_use]
    pub fn new(manager: Arc<CallManager>) -> Self {
        Self { manager }
    }

    /// Current pending offer
    #[must_use]
    pub fn pending(&self) -> Option<PendingIncomingCall> {
        self.manager.store().pending()
    }

    /// Who is calling, if anyone
    #[must_use]
    pub fn caller(&self) -> Option<ParticipantId> {
        self.pending().and_then(|p| p.offer).map(|o| o.from)
    }

    /// Watch the pending offer
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Option<PendingIncomingCall>> {
        self.manager.store().watch_pending()
    }

    /// Answer the pending offer
    ///
    /// # Errors
    ///
    /// Returns error if nothing is pending or answering fails
    pub async fn accept(&self) -> Result<CallId, CallError> {
        self.manager.accept_incoming().await
    }

    /// Refuse the pending offer
    ///
    /// # Errors
    ///
    /// Returns error if nothing is pending or the decline cannot be sent
    pub async fn decline(&self) -> Result<(), CallError> {
        self.manager.decline_incoming().await
    }
}
