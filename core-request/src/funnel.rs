//! Per-provider authorization funnel.
//!
//! Concurrent requests that hit an authorization error register here and
//! share a single authorization operation. Every registration is answered
//! exactly once: with the authorization's outcome, or with
//! [`Error::Aborted`] when the registering operation is cancelled first.

use crate::error::{EitherError, Error};
use crate::operation::{Operation, OperationId};
use std::collections::HashMap;
use tokio::sync::oneshot;

pub(crate) type AuthorizationSender = oneshot::Sender<EitherError<()>>;

#[derive(Default)]
pub(crate) struct AuthFunnel {
    current: Option<Operation<()>>,
    pending: HashMap<OperationId, Vec<AuthorizationSender>>,
}

impl AuthFunnel {
    pub(crate) fn current(&self) -> Option<&Operation<()>> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, authorization: Operation<()>) {
        self.current = Some(authorization);
    }

    /// Queues a completion for `requester`.
    pub(crate) fn register(&mut self, requester: OperationId) -> oneshot::Receiver<EitherError<()>> {
        let (tx, rx) = oneshot::channel();
        self.pending.entry(requester).or_default().push(tx);
        rx
    }

    /// Removes the registrations of a cancelled requester.
    ///
    /// The removed senders are answered with [`Error::Aborted`]. When this
    /// leaves the funnel without dependents, the in-flight authorization is
    /// returned so the caller can cancel it outside the lock. It stays
    /// current until it completes, so a later requester waits for it to
    /// wind down instead of starting a second one alongside.
    pub(crate) fn withdraw(&mut self, requester: OperationId) -> Option<Operation<()>> {
        let senders = self.pending.remove(&requester)?;
        for sender in senders.into_iter().rev() {
            let _ = sender.send(Err(Error::Aborted));
        }
        if self.pending.is_empty() {
            self.current.clone()
        } else {
            None
        }
    }

    /// Clears the funnel when `authorization` is still the current one and
    /// returns every pending completion.
    ///
    /// A stale authorization gets nothing.
    pub(crate) fn complete(&mut self, authorization: OperationId) -> Vec<AuthorizationSender> {
        match &self.current {
            Some(current) if current.id() == authorization => {
                self.current = None;
                self.pending.drain().flat_map(|(_, senders)| senders).collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn pending_requesters(&self) -> usize {
        self.pending.len()
    }
}
