//! In-flight guards: one execution per fingerprint, shared with concurrent
//! callers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use tokio::sync::watch;

use super::Fingerprint;
use crate::error::{ErrorKind, OperationError};
use crate::models::ResultRef;

/// What the leader publishes to its followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlightOutcome {
    pub result: Result<ResultRef, OperationError>,
    pub attempts: u32,
    /// The leader found the result cached instead of executing
    pub from_cache: bool,
}

impl FlightOutcome {
    pub(crate) fn abandoned(message: &str) -> Self {
        Self {
            result: Err(OperationError::new(ErrorKind::Abandoned, message)),
            attempts: 0,
            from_cache: false,
        }
    }
}

/// `{fingerprint, waiters}` plus the channel followers listen on.
struct InFlightGuard {
    fingerprint: Fingerprint,
    waiters: usize,
    sender: watch::Sender<Option<FlightOutcome>>,
}

/// Process-wide guard table.
#[derive(Default)]
pub struct InFlightTable {
    guards: Mutex<HashMap<Fingerprint, InFlightGuard>>,
}

/// Result of [`InFlightTable::join_or_lead`].
pub enum Flight {
    /// This caller created the guard and must execute.
    Leader(Publisher),
    /// Another caller is executing; wait for its outcome.
    Follower(Follower),
}

impl InFlightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the guard for `fingerprint` or joins the existing one. The
    /// decision is made under one lock, so exactly one caller leads.
    pub fn join_or_lead(self: &Arc<Self>, fingerprint: &Fingerprint) -> Flight {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(guard) = guards.get_mut(fingerprint) {
            guard.waiters += 1;
            return Flight::Follower(Follower {
                receiver: guard.sender.subscribe(),
            });
        }
        let (sender, _) = watch::channel(None);
        guards.insert(
            fingerprint.clone(),
            InFlightGuard {
                fingerprint: fingerprint.clone(),
                waiters: 0,
                sender,
            },
        );
        Flight::Leader(Publisher {
            table: Arc::clone(self),
            fingerprint: fingerprint.clone(),
            published: false,
        })
    }

    pub fn len(&self) -> usize {
        self.guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, fingerprint: &Fingerprint, outcome: FlightOutcome) {
        let guard = self
            .guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(fingerprint);
        if let Some(guard) = guard {
            debug!(
                "releasing guard {} to {} waiter(s)",
                guard.fingerprint.short(),
                guard.waiters
            );
            guard.sender.send_replace(Some(outcome));
        }
    }
}

/// Held by the leader. Publishing removes the guard and wakes every
/// follower; dropping it unpublished tells followers the run was abandoned.
pub struct Publisher {
    table: Arc<InFlightTable>,
    fingerprint: Fingerprint,
    published: bool,
}

impl Publisher {
    pub fn publish(mut self, outcome: FlightOutcome) {
        self.published = true;
        self.table.release(&self.fingerprint, outcome);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if !self.published {
            self.table.release(
                &self.fingerprint,
                FlightOutcome::abandoned("the executing task ended without publishing a result"),
            );
        }
    }
}

/// Held by a caller that joined someone else's execution.
pub struct Follower {
    receiver: watch::Receiver<Option<FlightOutcome>>,
}

impl Follower {
    pub async fn wait(mut self) -> FlightOutcome {
        loop {
            if let Some(outcome) = self.receiver.borrow_and_update().clone() {
                return outcome;
            }
            if self.receiver.changed().await.is_err() {
                return self
                    .receiver
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| FlightOutcome::abandoned("the in-flight guard was dropped"));
            }
        }
    }
}
